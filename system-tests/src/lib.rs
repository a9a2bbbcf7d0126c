// system-tests/src/lib.rs
// ============================================================================
// Module: System Tests Crate Root
// Description: Placeholder library for the end-to-end test suite.
// Purpose: Host the integration scenarios under tests/.
// Dependencies: none
// ============================================================================

//! ## Overview
//! This crate exists to host the end-to-end scenarios in `tests/`; it has no
//! library surface of its own.
