// state-tape-plugins/src/subprocess.rs
// ============================================================================
// Module: Subprocess Plugin Host
// Description: Long-lived sandboxed workers with framed JSON messaging.
// Purpose: Host untrusted plugins outside the orchestrator process.
// Dependencies: state-tape-core, crate::plugin, serde, serde_json
// ============================================================================

//! ## Overview
//! Each subprocess plugin gets one long-lived worker. Requests and responses
//! are length-prefixed (u32 big-endian) JSON frames over the worker's stdio
//! pipes. A worker crash surfaces as [`PluginError::WorkerCrashed`], which
//! the registry turns into a demotion for the remainder of the run. Spawn
//! concurrency is bounded by the host cap enforced in [`WorkerPool`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::plugin::Diagnostic;
use crate::plugin::PluginContext;
use crate::plugin::PluginDescriptor;
use crate::plugin::PluginError;
use crate::plugin::PluginInputs;
use crate::plugin::PluginMetrics;
use crate::plugin::PluginOutput;
use crate::plugin::TapePlugin;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted frame size (16 MiB).
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

// ============================================================================
// SECTION: Wire Messages
// ============================================================================

/// Request frame sent to a worker.
#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    /// Operation name (always `invoke`).
    op: &'static str,
    /// Run identifier string.
    run_id: &'a str,
    /// Invocation timestamp in milliseconds.
    ts_ms: i64,
    /// Validated plugin configuration.
    config: &'a Value,
    /// Input values keyed by label.
    inputs: &'a BTreeMap<String, Value>,
}

/// Response frame received from a worker.
#[derive(Debug, Deserialize)]
struct WorkerResponse {
    /// Output items.
    #[serde(default)]
    items: Vec<Value>,
    /// Call metrics.
    #[serde(default)]
    metrics: PluginMetrics,
    /// Structured diagnostics.
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
    /// Worker-reported error, when the call failed.
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// One long-lived worker process with framed stdio.
struct Worker {
    /// Child process handle.
    child: Child,
}

impl Worker {
    /// Spawns the worker command with piped stdio.
    fn spawn(command: &PathBuf, args: &[String]) -> Result<Self, PluginError> {
        let child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| PluginError::LoadFailure(format!("worker spawn failed: {err}")))?;
        Ok(Self { child })
    }

    /// Sends one framed request and reads one framed response.
    fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>, PluginError> {
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| PluginError::WorkerCrashed("worker stdin closed".to_string()))?;
        let frame_len = u32::try_from(request.len())
            .map_err(|_| PluginError::Execution("request frame too large".to_string()))?;
        if frame_len > MAX_FRAME_BYTES {
            return Err(PluginError::Execution("request frame too large".to_string()));
        }
        stdin
            .write_all(&frame_len.to_be_bytes())
            .and_then(|()| stdin.write_all(request))
            .and_then(|()| stdin.flush())
            .map_err(|err| PluginError::WorkerCrashed(format!("worker write failed: {err}")))?;
        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| PluginError::WorkerCrashed("worker stdout closed".to_string()))?;
        let mut len_buf = [0_u8; 4];
        stdout
            .read_exact(&mut len_buf)
            .map_err(|err| PluginError::WorkerCrashed(format!("worker read failed: {err}")))?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_BYTES {
            return Err(PluginError::WorkerCrashed("response frame too large".to_string()));
        }
        let mut payload = vec![0_u8; len as usize];
        stdout
            .read_exact(&mut payload)
            .map_err(|err| PluginError::WorkerCrashed(format!("worker read failed: {err}")))?;
        Ok(payload)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ============================================================================
// SECTION: Worker Pool
// ============================================================================

/// Bounded pool tracking live subprocess hosts.
#[derive(Debug)]
pub struct WorkerPool {
    /// Maximum concurrently hosted workers.
    max_hosts: usize,
    /// Live worker count.
    live: Mutex<usize>,
}

impl WorkerPool {
    /// Creates a pool with the given host cap.
    #[must_use]
    pub fn new(max_hosts: usize) -> Self {
        Self { max_hosts, live: Mutex::new(0) }
    }

    /// Reserves one host slot.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoadFailure`] when the cap is reached.
    pub fn reserve(&self) -> Result<(), PluginError> {
        let mut live = self
            .live
            .lock()
            .map_err(|_| PluginError::LoadFailure("worker pool poisoned".to_string()))?;
        if *live >= self.max_hosts {
            return Err(PluginError::LoadFailure(format!(
                "subprocess host cap reached: {}",
                self.max_hosts
            )));
        }
        *live += 1;
        Ok(())
    }

    /// Releases one host slot.
    pub fn release(&self) {
        if let Ok(mut live) = self.live.lock() {
            *live = live.saturating_sub(1);
        }
    }
}

// ============================================================================
// SECTION: Subprocess Plugin
// ============================================================================

/// Subprocess-hosted plugin proxy.
pub struct SubprocessPlugin {
    /// Static descriptor for wiring.
    descriptor: PluginDescriptor,
    /// Worker command path.
    command: PathBuf,
    /// Worker arguments.
    args: Vec<String>,
    /// Lazily spawned worker, replaced after crashes.
    worker: Mutex<Option<Worker>>,
}

impl SubprocessPlugin {
    /// Creates a proxy that spawns its worker on first use.
    #[must_use]
    pub fn new(descriptor: PluginDescriptor, command: PathBuf, args: Vec<String>) -> Self {
        Self { descriptor, command, args, worker: Mutex::new(None) }
    }
}

impl TapePlugin for SubprocessPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        ctx: &PluginContext,
        inputs: &PluginInputs,
    ) -> Result<PluginOutput, PluginError> {
        let request = WorkerRequest {
            op: "invoke",
            run_id: ctx.run_id.as_str(),
            ts_ms: ctx.ts_ms.millis(),
            config: &ctx.config,
            inputs: &inputs.values,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|err| PluginError::Execution(err.to_string()))?;
        let mut guard = self
            .worker
            .lock()
            .map_err(|_| PluginError::Execution("worker mutex poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(Worker::spawn(&self.command, &self.args)?);
        }
        let worker = guard
            .as_mut()
            .ok_or_else(|| PluginError::WorkerCrashed("worker unavailable".to_string()))?;
        let response_bytes = match worker.round_trip(&payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                // Drop the dead worker so a later run can respawn it.
                *guard = None;
                return Err(err);
            }
        };
        drop(guard);
        let response: WorkerResponse = serde_json::from_slice(&response_bytes)
            .map_err(|err| PluginError::OutputRejected(format!("malformed frame: {err}")))?;
        if let Some(error) = response.error {
            return Err(PluginError::Execution(error));
        }
        Ok(PluginOutput {
            items: response.items,
            metrics: response.metrics,
            diagnostics: response.diagnostics,
        })
    }
}
