// state-tape-extract/tests/match_and_tape.rs
// ============================================================================
// Module: Matching and Tape Tests
// Description: Tests for cross-frame identity and the tape builder.
// ============================================================================
//! ## Overview
//! Validates element identity preservation under small motion, fresh-id
//! minting, window boundaries, span monotonicity, and pred-error bounds.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use state_tape_config::WindowBoundaryPreference;
use state_tape_core::BBox;
use state_tape_core::ElementId;
use state_tape_core::ElementState;
use state_tape_core::ElementType;
use state_tape_core::FrameId;
use state_tape_core::HashAlgorithm;
use state_tape_core::HashDigest;
use state_tape_core::MediaId;
use state_tape_core::ScreenState;
use state_tape_core::SessionId;
use state_tape_core::StateId;
use state_tape_core::Timestamp;
use state_tape_core::UIElement;
use state_tape_extract::NormalizedFrame;
use state_tape_extract::TapeBuilder;
use state_tape_extract::TapeBuilderConfig;
use state_tape_extract::nodes::match_ids::match_elements;
use state_tape_extract::nodes::match_ids::mint_fresh_ids;
use state_tape_extract::wire::encode_b64;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds an element with the given id and bounds.
fn element(id: &str, element_type: ElementType, x1: i32, y1: i32, x2: i32, y2: i32) -> UIElement {
    UIElement {
        element_id: ElementId::new(id),
        element_type,
        bbox: BBox::new(x1, y1, x2, y2).unwrap(),
        text_refs: Vec::new(),
        label: None,
        interactable: true,
        state: ElementState::default(),
        parent_id: None,
        children_ids: Vec::new(),
        z: 0,
        app_hint: Some("editor".to_string()),
    }
}

/// Builds a screen state over the given elements.
fn screen_state(id: &str, elements: Vec<UIElement>) -> ScreenState {
    ScreenState {
        state_id: StateId::new(id),
        frame_ids: vec![FrameId::new("frame-1")],
        elements,
        text_tokens: Vec::new(),
        tables: Vec::new(),
        code_blocks: Vec::new(),
        charts: Vec::new(),
        cursor: None,
        focus_element_id: None,
        visible_apps: vec!["editor".to_string()],
        state_confidence: 0.9,
    }
}

/// Builds a small normalized frame at the given timestamp.
fn frame(ts_ms: i64) -> NormalizedFrame {
    let rgb = vec![200_u8; 16 * 16 * 3];
    NormalizedFrame {
        frame_id: FrameId::new(format!("frame-{ts_ms}")),
        ts_ms: Timestamp::from_millis(ts_ms),
        session_id: SessionId::new("session-1"),
        media_id: MediaId::new("cd".repeat(32)),
        frame_index: 0,
        width: 16,
        height: 16,
        image_sha256: HashDigest { algorithm: HashAlgorithm::Sha256, value: "11".repeat(32) },
        phash_hex: "0000000000000000".to_string(),
        rgb_b64: encode_b64(&rgb),
    }
}

// ============================================================================
// SECTION: Identifier Matching
// ============================================================================

/// Tests a slightly moved element keeps its identifier.
#[test]
fn test_small_motion_preserves_id() {
    let mut previous = screen_state("s1", vec![element("btn", ElementType::Button, 10, 10, 110, 40)]);
    mint_fresh_ids(&mut previous);
    let stable_id = previous.elements[0].element_id.clone();
    let mut current =
        screen_state("s2", vec![element("tmp", ElementType::Button, 12, 11, 112, 41)]);
    match_elements(&mut current, &previous);
    assert_eq!(current.elements[0].element_id, stable_id);
}

/// Tests a type change past the cost ceiling mints a new identifier.
#[test]
fn test_type_change_mints_new_id() {
    let mut previous = screen_state("s1", vec![element("btn", ElementType::Button, 10, 10, 110, 40)]);
    mint_fresh_ids(&mut previous);
    let stable_id = previous.elements[0].element_id.clone();
    let mut current =
        screen_state("s2", vec![element("tmp", ElementType::Table, 300, 300, 500, 400)]);
    match_elements(&mut current, &previous);
    assert_ne!(current.elements[0].element_id, stable_id);
}

/// Tests minting is deterministic for identical content.
#[test]
fn test_minting_is_deterministic() {
    let mut a = screen_state("s1", vec![element("x", ElementType::Button, 10, 10, 110, 40)]);
    let mut b = screen_state("s1", vec![element("x", ElementType::Button, 10, 10, 110, 40)]);
    mint_fresh_ids(&mut a);
    mint_fresh_ids(&mut b);
    assert_eq!(a.elements[0].element_id, b.elements[0].element_id);
}

// ============================================================================
// SECTION: Tape Builder
// ============================================================================

/// Builds the default test tape config.
fn tape_config() -> TapeBuilderConfig {
    TapeBuilderConfig {
        window_ms: 5_000,
        boundary_preference: WindowBoundaryPreference::AppChange,
        token_confidence_floor: 0.5,
    }
}

/// Tests an app change closes the window and links an edge.
#[test]
fn test_app_change_closes_window() {
    let mut builder = TapeBuilder::new(tape_config());
    let editor = screen_state("s1", vec![element("a", ElementType::Window, 0, 0, 16, 16)]);
    let mut browser = screen_state("s2", vec![element("b", ElementType::Window, 0, 0, 16, 16)]);
    browser.visible_apps = vec!["browser".to_string()];
    let first = builder.observe(&frame(1_000), &editor, false);
    assert!(first.span.is_none());
    let second = builder.observe(&frame(2_000), &editor, false);
    assert!(second.span.is_none());
    let third = builder.observe(&frame(3_000), &browser, false);
    let span = third.span.expect("app change closes the window");
    assert!(span.span.window_is_valid());
    assert_eq!(span.span.summary_features.app, "editor");
    assert!(third.edge.is_none());
    let last = builder.flush();
    let closing = last.span.expect("flush closes the open window");
    let edge = last.edge.expect("second span links to the first");
    assert_eq!(edge.edge.from_state_id, span.span.state_id);
    assert_eq!(edge.edge.to_state_id, closing.span.state_id);
    assert!(edge.edge.from_state_id != edge.edge.to_state_id);
    assert!((0.0..=2.0).contains(&edge.edge.pred_error));
}

/// Tests span start times are monotone over a frame sequence.
#[test]
fn test_span_monotonicity() {
    let mut builder = TapeBuilder::new(tape_config());
    let state = screen_state("s1", vec![element("a", ElementType::Window, 0, 0, 16, 16)]);
    let mut starts = Vec::new();
    for index in 0..6 {
        let ts = 1_000 + index * 4_000;
        let emit = builder.observe(&frame(ts), &state, false);
        if let Some(span) = emit.span {
            starts.push(span.span.ts_start_ms);
        }
    }
    if let Some(span) = builder.flush().span {
        starts.push(span.span.ts_start_ms);
    }
    assert!(starts.len() >= 2);
    for pair in starts.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
}

/// Tests the evidence union covers every contributing frame.
#[test]
fn test_span_evidence_union() {
    let mut builder = TapeBuilder::new(tape_config());
    let state = screen_state("s1", vec![element("a", ElementType::Window, 0, 0, 16, 16)]);
    let _ = builder.observe(&frame(1_000), &state, false);
    let _ = builder.observe(&frame(2_000), &state, false);
    let span = builder.flush().span.expect("flush closes the window");
    assert_eq!(span.evidence.len(), 2);
    assert!(span.evidence.iter().all(|reference| !reference.media_id.as_str().is_empty()));
}
