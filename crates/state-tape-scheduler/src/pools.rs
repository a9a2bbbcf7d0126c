// state-tape-scheduler/src/pools.rs
// ============================================================================
// Module: Resource Pools
// Description: Bounded worker pools for heavy Stage-2 processing.
// Purpose: Enforce per-plugin and global GPU concurrency caps.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! Heavy work runs inside cooperative task pools: every plugin has a
//! concurrency cap and model-backed plugins additionally hold a permit from
//! the global GPU pool. Permits are semaphore-backed; a failed acquire means
//! the slice waits for the next tick rather than oversubscribing the
//! machine. The foreground ceiling (default zero heavy workers while the
//! user is active) is enforced upstream by the idle gate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

// ============================================================================
// SECTION: Pools
// ============================================================================

/// Bounded pools for Stage-2 workers.
#[derive(Debug)]
pub struct ResourcePools {
    /// Global GPU permit pool.
    gpu: Arc<Semaphore>,
    /// Per-plugin permit pools, created on first use.
    per_plugin: Mutex<BTreeMap<String, Arc<Semaphore>>>,
    /// Cap applied to each per-plugin pool.
    plugin_cap: usize,
}

impl ResourcePools {
    /// Creates pools with the configured caps.
    #[must_use]
    pub fn new(gpu_cap: usize, plugin_cap: usize) -> Self {
        Self {
            gpu: Arc::new(Semaphore::new(gpu_cap.max(1))),
            per_plugin: Mutex::new(BTreeMap::new()),
            plugin_cap: plugin_cap.max(1),
        }
    }

    /// Tries to take one GPU permit without waiting.
    #[must_use]
    pub fn try_acquire_gpu(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.gpu).try_acquire_owned().ok()
    }

    /// Tries to take one permit for the named plugin without waiting.
    #[must_use]
    pub fn try_acquire_plugin(&self, plugin_id: &str) -> Option<OwnedSemaphorePermit> {
        let pool = {
            let Ok(mut pools) = self.per_plugin.lock() else {
                return None;
            };
            Arc::clone(
                pools
                    .entry(plugin_id.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.plugin_cap))),
            )
        };
        pool.try_acquire_owned().ok()
    }
}
