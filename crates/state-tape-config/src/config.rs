// state-tape-config/src/config.rs
// ============================================================================
// Module: State Tape Configuration
// Description: Configuration loading and validation for State Tape.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: state-tape-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded once per process from a TOML file with strict size
//! and path limits. Every record is a closed enumeration
//! (`deny_unknown_fields`); unknown options are rejected at load time rather
//! than ignored. Missing or invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "state-tape.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "STATE_TAPE_CONFIG";
/// Environment variable naming the data root.
pub const DATA_DIR_ENV_VAR: &str = "DATA_DIR";
/// Environment variable naming the config root.
pub const CONFIG_DIR_ENV_VAR: &str = "CONFIG_DIR";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum span window duration in milliseconds.
pub const MIN_SPAN_WINDOW_MS: u64 = 3_000;
/// Maximum span window duration in milliseconds.
pub const MAX_SPAN_WINDOW_MS: u64 = 10_000;
/// Default span window duration in milliseconds.
pub const DEFAULT_SPAN_WINDOW_MS: u64 = 5_000;
/// Default media blob TTL in days.
pub const DEFAULT_MEDIA_TTL_DAYS: u32 = 60;
/// Default activity staleness window in milliseconds.
pub const DEFAULT_ACTIVITY_STALE_MS: u64 = 5_000;
/// Default backlog SLA in hours before burn-down engages.
pub const DEFAULT_BURN_DOWN_THRESHOLD_HOURS: f64 = 144.0;
/// Hysteresis fraction applied when exiting burn-down.
pub const BURN_DOWN_EXIT_FRACTION: f64 = 0.10;
/// Default per-plugin concurrency cap.
pub const DEFAULT_PLUGIN_CONCURRENCY: usize = 2;
/// Default global GPU concurrency cap.
pub const DEFAULT_GPU_CONCURRENCY: usize = 1;
/// Maximum concurrency accepted for any pool.
pub const MAX_POOL_CONCURRENCY: usize = 64;
/// Default popup model-call timeout in milliseconds.
pub const DEFAULT_POPUP_TIMEOUT_MS: u64 = 12_000;
/// Default batch model-call timeout in milliseconds.
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 120_000;
/// Default maximum citations returned by the query API.
pub const DEFAULT_MAX_CITATIONS: u32 = 8;
/// Hard maximum citations accepted by the query API.
pub const MAX_MAX_CITATIONS: u32 = 32;
/// Default OCR confidence floor.
pub const DEFAULT_OCR_MIN_CONFIDENCE: f32 = 0.35;
/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE_PX: u32 = 1024;
/// Default tile overlap in pixels.
pub const DEFAULT_TILE_OVERLAP_PX: u32 = 64;
/// Default stable pHash Hamming distance.
pub const DEFAULT_PHASH_STABLE_DISTANCE: u32 = 4;
/// Default boundary pHash Hamming distance.
pub const DEFAULT_PHASH_BOUNDARY_DISTANCE: u32 = 12;
/// Default store batch size before a transaction commit.
pub const DEFAULT_STORE_BATCH_SIZE: usize = 128;
/// Maximum plugins accepted in the allowlist.
pub const MAX_ALLOWLIST_ENTRIES: usize = 256;
/// Maximum app denylist entries.
pub const MAX_DENYLIST_ENTRIES: usize = 256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file exceeds the size limit.
    #[error("config file too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual file size in bytes.
        actual_bytes: usize,
    },
    /// Config file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A config value failed validation.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Storage Config
// ============================================================================

/// Storage configuration for the data root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Data root directory (holds `metadata.db`, `audit.db`, `media/`,
    /// `derived/`, `index/`, journals, and state files).
    pub data_dir: PathBuf,
    /// Media blob TTL in days.
    #[serde(default = "default_media_ttl_days")]
    pub media_ttl_days: u32,
    /// Inserts batched per store transaction.
    #[serde(default = "default_store_batch_size")]
    pub batch_size: usize,
}

/// Returns the default media TTL in days.
const fn default_media_ttl_days() -> u32 {
    DEFAULT_MEDIA_TTL_DAYS
}

/// Returns the default store batch size.
const fn default_store_batch_size() -> usize {
    DEFAULT_STORE_BATCH_SIZE
}

// ============================================================================
// SECTION: Scheduler Config
// ============================================================================

/// Idle gate and backlog scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Activity sample staleness window in milliseconds; a missing or stale
    /// sample is treated as active (fail closed).
    #[serde(default = "default_activity_stale_ms")]
    pub activity_stale_ms: u64,
    /// Projected catch-up hours above which burn-down mode engages.
    #[serde(default = "default_burn_down_threshold_hours")]
    pub burn_down_threshold_hours: f64,
    /// Per-plugin worker concurrency cap.
    #[serde(default = "default_plugin_concurrency")]
    pub plugin_concurrency: usize,
    /// Global GPU worker concurrency cap.
    #[serde(default = "default_gpu_concurrency")]
    pub gpu_concurrency: usize,
    /// Heavy workers permitted while the user is active.
    #[serde(default)]
    pub foreground_ceiling: usize,
    /// Batch model-call timeout in milliseconds.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            activity_stale_ms: DEFAULT_ACTIVITY_STALE_MS,
            burn_down_threshold_hours: DEFAULT_BURN_DOWN_THRESHOLD_HOURS,
            plugin_concurrency: DEFAULT_PLUGIN_CONCURRENCY,
            gpu_concurrency: DEFAULT_GPU_CONCURRENCY,
            foreground_ceiling: 0,
            batch_timeout_ms: DEFAULT_BATCH_TIMEOUT_MS,
        }
    }
}

/// Returns the default activity staleness window.
const fn default_activity_stale_ms() -> u64 {
    DEFAULT_ACTIVITY_STALE_MS
}

/// Returns the default burn-down threshold in hours.
const fn default_burn_down_threshold_hours() -> f64 {
    DEFAULT_BURN_DOWN_THRESHOLD_HOURS
}

/// Returns the default per-plugin concurrency.
const fn default_plugin_concurrency() -> usize {
    DEFAULT_PLUGIN_CONCURRENCY
}

/// Returns the default GPU concurrency.
const fn default_gpu_concurrency() -> usize {
    DEFAULT_GPU_CONCURRENCY
}

/// Returns the default batch timeout.
const fn default_batch_timeout_ms() -> u64 {
    DEFAULT_BATCH_TIMEOUT_MS
}

// ============================================================================
// SECTION: Extraction Config
// ============================================================================

/// Span window boundary preference when both triggers apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowBoundaryPreference {
    /// Prefer app/window-change boundaries.
    #[default]
    AppChange,
    /// Prefer fixed-duration boundaries.
    TimeBased,
}

/// Extraction DAG and tape builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Fixed topological node order for the DAG.
    #[serde(default = "default_dag_order")]
    pub dag_order: Vec<String>,
    /// OCR confidence floor; tokens below are dropped.
    #[serde(default = "default_ocr_min_confidence")]
    pub ocr_min_confidence: f32,
    /// Tile edge in pixels.
    #[serde(default = "default_tile_size_px")]
    pub tile_size_px: u32,
    /// Tile overlap in pixels.
    #[serde(default = "default_tile_overlap_px")]
    pub tile_overlap_px: u32,
    /// pHash Hamming distance at or below which a frame is stable.
    #[serde(default = "default_phash_stable_distance")]
    pub phash_stable_distance: u32,
    /// pHash Hamming distance at or above which a boundary is declared.
    #[serde(default = "default_phash_boundary_distance")]
    pub phash_boundary_distance: u32,
    /// Span window duration in milliseconds (3–10 s).
    #[serde(default = "default_span_window_ms")]
    pub span_window_ms: u64,
    /// Boundary preference when both window triggers apply.
    #[serde(default)]
    pub window_boundary_preference: WindowBoundaryPreference,
    /// Approved trainable predictor model identifiers (empty keeps the
    /// deterministic baseline projection).
    #[serde(default)]
    pub approved_predictor_models: Vec<String>,
    /// Per-plugin closed configuration values, keyed by plugin identifier.
    #[serde(default)]
    pub plugin_options: BTreeMap<String, Value>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dag_order: default_dag_order(),
            ocr_min_confidence: DEFAULT_OCR_MIN_CONFIDENCE,
            tile_size_px: DEFAULT_TILE_SIZE_PX,
            tile_overlap_px: DEFAULT_TILE_OVERLAP_PX,
            phash_stable_distance: DEFAULT_PHASH_STABLE_DISTANCE,
            phash_boundary_distance: DEFAULT_PHASH_BOUNDARY_DISTANCE,
            span_window_ms: DEFAULT_SPAN_WINDOW_MS,
            window_boundary_preference: WindowBoundaryPreference::default(),
            approved_predictor_models: Vec::new(),
            plugin_options: BTreeMap::new(),
        }
    }
}

/// Returns the default DAG topological order.
fn default_dag_order() -> Vec<String> {
    [
        "preprocess.normalize",
        "preprocess.tile",
        "ocr",
        "ui.parse",
        "layout.assemble",
        "extract.table",
        "extract.spreadsheet",
        "extract.code",
        "extract.chart",
        "track.cursor",
        "build.state",
        "match.ids",
        "temporal.segment",
        "build.delta",
        "infer.action",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Returns the default OCR confidence floor.
const fn default_ocr_min_confidence() -> f32 {
    DEFAULT_OCR_MIN_CONFIDENCE
}

/// Returns the default tile edge.
const fn default_tile_size_px() -> u32 {
    DEFAULT_TILE_SIZE_PX
}

/// Returns the default tile overlap.
const fn default_tile_overlap_px() -> u32 {
    DEFAULT_TILE_OVERLAP_PX
}

/// Returns the default stable pHash distance.
const fn default_phash_stable_distance() -> u32 {
    DEFAULT_PHASH_STABLE_DISTANCE
}

/// Returns the default boundary pHash distance.
const fn default_phash_boundary_distance() -> u32 {
    DEFAULT_PHASH_BOUNDARY_DISTANCE
}

/// Returns the default span window duration.
const fn default_span_window_ms() -> u64 {
    DEFAULT_SPAN_WINDOW_MS
}

// ============================================================================
// SECTION: Plugin Config
// ============================================================================

/// Plugin admission configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginAdmissionConfig {
    /// Allowlisted plugin identifiers; empty refuses every plugin.
    #[serde(default)]
    pub allowlist: BTreeSet<String>,
    /// Path to the plugin lockfile (manifest + code hashes).
    #[serde(default)]
    pub lockfile_path: Option<PathBuf>,
    /// Maximum concurrently hosted subprocess plugins.
    #[serde(default = "default_max_subprocess_hosts")]
    pub max_subprocess_hosts: usize,
}

/// Returns the default subprocess host cap.
const fn default_max_subprocess_hosts() -> usize {
    4
}

// ============================================================================
// SECTION: Policy Config
// ============================================================================

/// Evidence policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Application hints whose artifacts are dropped from bundles.
    #[serde(default)]
    pub app_denylist: BTreeSet<String>,
    /// Permit raw media references in bundles (default false).
    #[serde(default)]
    pub can_show_raw_media: bool,
    /// Permit text export from bundles (default false).
    #[serde(default)]
    pub can_export_text: bool,
}

// ============================================================================
// SECTION: Server Config
// ============================================================================

/// Query HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address; must be loopback.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Default maximum citations per response.
    #[serde(default = "default_max_citations")]
    pub max_citations: u32,
    /// Popup query deadline in milliseconds.
    #[serde(default = "default_popup_timeout_ms")]
    pub popup_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_citations: DEFAULT_MAX_CITATIONS,
            popup_timeout_ms: DEFAULT_POPUP_TIMEOUT_MS,
        }
    }
}

/// Returns the default loopback bind address.
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8743))
}

/// Returns the default maximum citations.
const fn default_max_citations() -> u32 {
    DEFAULT_MAX_CITATIONS
}

/// Returns the default popup timeout.
const fn default_popup_timeout_ms() -> u64 {
    DEFAULT_POPUP_TIMEOUT_MS
}

// ============================================================================
// SECTION: Index Config
// ============================================================================

/// Index layer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Enable the optional ANN snapshot alongside the linear scan.
    #[serde(default)]
    pub ann_enabled: bool,
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root State Tape configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateTapeConfig {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Extraction configuration.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Plugin admission configuration.
    #[serde(default)]
    pub plugins: PluginAdmissionConfig,
    /// Evidence policy configuration.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Query server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Index layer configuration.
    #[serde(default)]
    pub index: IndexConfig,
}

impl StateTapeConfig {
    /// Loads configuration from the provided path, or from
    /// `STATE_TAPE_CONFIG`, or from `CONFIG_DIR/state-tape.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is missing, oversized,
    /// unparseable, or invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = match path {
            Some(path) => path.to_path_buf(),
            None => resolve_default_path()?,
        };
        let metadata =
            fs::metadata(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        let actual_bytes = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if actual_bytes > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                max_bytes: MAX_CONFIG_FILE_SIZE,
                actual_bytes,
            });
        }
        let text =
            fs::read_to_string(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        let config: Self =
            toml::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration with defaults rooted at the given data dir.
    #[must_use]
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            storage: StorageConfig {
                data_dir,
                media_ttl_days: DEFAULT_MEDIA_TTL_DAYS,
                batch_size: DEFAULT_STORE_BATCH_SIZE,
            },
            scheduler: SchedulerConfig::default(),
            extraction: ExtractionConfig::default(),
            plugins: PluginAdmissionConfig::default(),
            policy: PolicyConfig::default(),
            server: ServerConfig::default(),
            index: IndexConfig::default(),
        }
    }

    /// Validates every field against the documented limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path(&self.storage.data_dir)?;
        if self.storage.media_ttl_days == 0 {
            return Err(ConfigError::Invalid("storage.media_ttl_days must be positive".into()));
        }
        if self.storage.batch_size == 0 {
            return Err(ConfigError::Invalid("storage.batch_size must be positive".into()));
        }
        if !(MIN_SPAN_WINDOW_MS..=MAX_SPAN_WINDOW_MS).contains(&self.extraction.span_window_ms) {
            return Err(ConfigError::Invalid(format!(
                "extraction.span_window_ms must lie in [{MIN_SPAN_WINDOW_MS}, \
                 {MAX_SPAN_WINDOW_MS}]"
            )));
        }
        if !(0.0..=1.0).contains(&self.extraction.ocr_min_confidence) {
            return Err(ConfigError::Invalid(
                "extraction.ocr_min_confidence must lie in [0, 1]".into(),
            ));
        }
        if self.extraction.tile_overlap_px >= self.extraction.tile_size_px {
            return Err(ConfigError::Invalid(
                "extraction.tile_overlap_px must be smaller than tile_size_px".into(),
            ));
        }
        if self.extraction.phash_stable_distance >= self.extraction.phash_boundary_distance {
            return Err(ConfigError::Invalid(
                "extraction.phash_stable_distance must be below phash_boundary_distance".into(),
            ));
        }
        if self.extraction.dag_order.is_empty() {
            return Err(ConfigError::Invalid("extraction.dag_order must not be empty".into()));
        }
        if self.scheduler.burn_down_threshold_hours <= 0.0 {
            return Err(ConfigError::Invalid(
                "scheduler.burn_down_threshold_hours must be positive".into(),
            ));
        }
        for (label, value) in [
            ("scheduler.plugin_concurrency", self.scheduler.plugin_concurrency),
            ("scheduler.gpu_concurrency", self.scheduler.gpu_concurrency),
        ] {
            if value == 0 || value > MAX_POOL_CONCURRENCY {
                return Err(ConfigError::Invalid(format!(
                    "{label} must lie in [1, {MAX_POOL_CONCURRENCY}]"
                )));
            }
        }
        if self.plugins.allowlist.len() > MAX_ALLOWLIST_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "plugins.allowlist exceeds {MAX_ALLOWLIST_ENTRIES} entries"
            )));
        }
        if self.policy.app_denylist.len() > MAX_DENYLIST_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "policy.app_denylist exceeds {MAX_DENYLIST_ENTRIES} entries"
            )));
        }
        if !is_loopback(self.server.bind_addr.ip()) {
            return Err(ConfigError::Invalid(format!(
                "server.bind_addr must be loopback, found {}",
                self.server.bind_addr
            )));
        }
        if self.server.max_citations == 0 || self.server.max_citations > MAX_MAX_CITATIONS {
            return Err(ConfigError::Invalid(format!(
                "server.max_citations must lie in [1, {MAX_MAX_CITATIONS}]"
            )));
        }
        Ok(())
    }

    /// Returns the burn-down exit threshold (enter threshold − 10%).
    #[must_use]
    pub fn burn_down_exit_hours(&self) -> f64 {
        self.scheduler.burn_down_threshold_hours * (1.0 - BURN_DOWN_EXIT_FRACTION)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the default config path from the environment.
fn resolve_default_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    if let Ok(dir) = env::var(CONFIG_DIR_ENV_VAR) {
        return Ok(PathBuf::from(dir).join(DEFAULT_CONFIG_NAME));
    }
    Err(ConfigError::Io(format!(
        "no config path provided and neither {CONFIG_ENV_VAR} nor {CONFIG_DIR_ENV_VAR} is set"
    )))
}

/// Validates a configured filesystem path against safety limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let path_string = path.display().to_string();
    if path_string.is_empty() {
        return Err(ConfigError::Invalid("path must not be empty".into()));
    }
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("path exceeds length limit".into()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("path contains an overlong component".into()));
        }
    }
    Ok(())
}

/// Returns true when the address is loopback.
fn is_loopback(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}
