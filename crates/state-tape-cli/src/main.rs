#![cfg_attr(
    test,
    allow(
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
    )
)]
// state-tape-cli/src/main.rs
// ============================================================================
// Module: State Tape CLI Entry Point
// Description: Command dispatcher for ingest, batch, query, and serving.
// Purpose: Provide the operational surface with structured exit codes.
// Dependencies: clap, state-tape-* workspace crates, tokio
// ============================================================================

//! ## Overview
//! The CLI wires the workspace together: Stage-1 handoff ingest and spool
//! drain, the idle-gated batch runner, the metadata-only local query, the
//! popup HTTP client, consent management, backup/restore, and the loopback
//! query server. Exit codes: `0` success, `2` consent not accepted, `3`
//! preflight or evidence failure, any other nonzero internal error; stderr
//! carries a structured JSON reason.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde_json::Value;
use serde_json::json;
use state_tape_config::StateTapeConfig;
use state_tape_core::ArtifactEnvelope;
use state_tape_core::ArtifactKind;
use state_tape_core::BlobStore;
use state_tape_core::FileAuditSink;
use state_tape_core::MediaId;
use state_tape_core::RecordStore;
use state_tape_core::RunId;
use state_tape_core::StderrAuditSink;
use state_tape_core::TimeRange;
use state_tape_core::Timestamp;
use state_tape_extract::ExtractionPipeline;
use state_tape_extract::PipelineBackends;
use state_tape_extract::ScriptedOcrBackend;
use state_tape_extract::ScriptedVlmBackend;
use state_tape_extract::TapeBuilderConfig;
use state_tape_extract::builtin_admission;
use state_tape_extract::register_builtin_pack;
use state_tape_index::IndexSet;
use state_tape_ingest::HandoffIngestor;
use state_tape_ingest::IngestError;
use state_tape_ingest::TransferMode;
use state_tape_plugins::CancelToken;
use state_tape_plugins::PluginRegistry;
use state_tape_query::ApiContext;
use state_tape_query::PolicyGate;
use state_tape_query::QueryEngine;
use state_tape_query::TokenIssuer;
use state_tape_scheduler::BacklogObservation;
use state_tape_scheduler::BatchDriver;
use state_tape_scheduler::BatchProcessor;
use state_tape_scheduler::ConsentError;
use state_tape_scheduler::ConsentGate;
use state_tape_scheduler::FileActivitySource;
use state_tape_scheduler::IdleGate;
use state_tape_scheduler::PressureThresholds;
use state_tape_scheduler::ResourcePools;
use state_tape_scheduler::Scheduler;
use state_tape_store_sqlite::FileBlobStore;
use state_tape_store_sqlite::SqliteAuditStore;
use state_tape_store_sqlite::SqliteRecordStore;
use state_tape_store_sqlite::SqliteStoreConfig;

mod backup;
mod client;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "state-tape", version, arg_required_else_help = true)]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Stage-1 handoff operations.
    Handoff {
        /// Handoff subcommand.
        #[command(subcommand)]
        command: HandoffCommand,
    },
    /// Idle-gated batch processing.
    Batch {
        /// Batch subcommand.
        #[command(subcommand)]
        command: BatchCommand,
    },
    /// Metadata-only local query.
    Query(QueryArgs),
    /// Popup query through the HTTP API.
    Popup(PopupArgs),
    /// Capture consent management.
    Consent {
        /// Consent subcommand.
        #[command(subcommand)]
        command: ConsentCommand,
    },
    /// Backup and restore.
    Backup {
        /// Backup subcommand.
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Serve the loopback query API.
    Serve(ServeArgs),
}

/// Handoff subcommands.
#[derive(Subcommand, Debug)]
enum HandoffCommand {
    /// Ingest one handoff directory.
    Ingest(IngestArgs),
    /// Drain every handoff under a spool root.
    Drain(DrainArgs),
}

/// Batch subcommands.
#[derive(Subcommand, Debug)]
enum BatchCommand {
    /// Run the gated batch drain loop once to completion.
    Run(BatchArgs),
}

/// Consent subcommands.
#[derive(Subcommand, Debug)]
enum ConsentCommand {
    /// Print the consent record.
    Status(DataDirArgs),
    /// Record acceptance.
    Accept(DataDirArgs),
}

/// Backup subcommands.
#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Create a manifest-verified backup.
    Create(BackupArgs),
    /// Restore a verified backup.
    Restore(BackupArgs),
}

/// Blob transfer mode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Always copy bytes.
    Copy,
    /// Hardlink first, copy on failure.
    Hardlink,
}

/// Arguments for `handoff ingest`.
#[derive(Args, Debug)]
struct IngestArgs {
    /// Handoff directory produced by the capture host.
    #[arg(long)]
    handoff_root: PathBuf,
    /// Destination data root.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Blob transfer mode.
    #[arg(long, value_enum, default_value = "hardlink")]
    mode: ModeArg,
    /// Treat a skipped (incomplete) handoff as a failure.
    #[arg(long)]
    strict: bool,
}

/// Arguments for `handoff drain`.
#[derive(Args, Debug)]
struct DrainArgs {
    /// Spool root containing handoff directories.
    #[arg(long)]
    spool_root: PathBuf,
    /// Destination data root.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Arguments for `batch run`.
#[derive(Args, Debug)]
struct BatchArgs {
    /// Data root.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Maximum frames processed per admission slice.
    #[arg(long, default_value_t = 16)]
    slice_size: usize,
}

/// Arguments for the local query.
#[derive(Args, Debug)]
struct QueryArgs {
    /// Query text.
    query: String,
    /// Data root.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Citation cap.
    #[arg(long)]
    max_citations: Option<u32>,
}

/// Arguments for the popup HTTP query.
#[derive(Args, Debug)]
struct PopupArgs {
    /// Query text.
    query: String,
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:8743")]
    server: String,
    /// Citation cap.
    #[arg(long)]
    max_citations: Option<u32>,
}

/// Shared data-dir argument.
#[derive(Args, Debug)]
struct DataDirArgs {
    /// Data root.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Arguments for backup commands.
#[derive(Args, Debug)]
struct BackupArgs {
    /// Data root.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Backup directory.
    #[arg(long)]
    backup_root: PathBuf,
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeArgs {
    /// Data root.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Bind address (must be loopback).
    #[arg(long)]
    bind: Option<SocketAddr>,
}

// ============================================================================
// SECTION: Exit Codes
// ============================================================================

/// Exit code for consent refusals.
const EXIT_CONSENT: u8 = 2;
/// Exit code for preflight and evidence failures.
const EXIT_PREFLIGHT: u8 = 3;

/// CLI failure carrying its exit code and structured reason.
#[derive(Debug)]
struct CliFailure {
    /// Exit code.
    code: u8,
    /// Machine-readable reason kind.
    kind: &'static str,
    /// Human-readable message.
    message: String,
}

impl CliFailure {
    /// Builds an internal-error failure.
    fn internal(message: impl Into<String>) -> Self {
        Self { code: 1, kind: "internal", message: message.into() }
    }

    /// Builds a preflight failure (exit 3).
    fn preflight(kind: &'static str, message: impl Into<String>) -> Self {
        Self { code: EXIT_PREFLIGHT, kind, message: message.into() }
    }
}

impl From<ConsentError> for CliFailure {
    fn from(error: ConsentError) -> Self {
        match error {
            ConsentError::NotAccepted => Self {
                code: EXIT_CONSENT,
                kind: "consent_not_accepted",
                message: error.to_string(),
            },
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<IngestError> for CliFailure {
    fn from(error: IngestError) -> Self {
        match &error {
            IngestError::MissingBlob(_)
            | IngestError::ChecksumMismatch(_)
            | IngestError::CorruptSource(_) => {
                Self::preflight("handoff_incomplete", error.to_string())
            }
            _ => Self::internal(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Process entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            emit_failure(&failure);
            ExitCode::from(failure.code)
        }
    }
}

/// Writes the structured failure reason to stderr.
fn emit_failure(failure: &CliFailure) {
    let line = json!({ "ok": false, "kind": failure.kind, "message": failure.message });
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{line}");
}

/// Writes a JSON value to stdout.
fn emit(value: &Value) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{value}");
}

/// Dispatches the parsed command.
fn run(cli: Cli) -> Result<(), CliFailure> {
    match cli.command {
        Command::Handoff { command } => match command {
            HandoffCommand::Ingest(args) => run_ingest(&args),
            HandoffCommand::Drain(args) => run_drain(&args),
        },
        Command::Batch { command } => match command {
            BatchCommand::Run(args) => run_batch(&args),
        },
        Command::Query(args) => run_query(&args),
        Command::Popup(args) => run_popup(&args),
        Command::Consent { command } => match command {
            ConsentCommand::Status(args) => run_consent_status(&args),
            ConsentCommand::Accept(args) => run_consent_accept(&args),
        },
        Command::Backup { command } => match command {
            BackupCommand::Create(args) => run_backup_create(&args),
            BackupCommand::Restore(args) => run_backup_restore(&args),
        },
        Command::Serve(args) => run_serve(&args),
    }
}

// ============================================================================
// SECTION: Shared Setup
// ============================================================================

/// Resolves the data root from the flag or `DATA_DIR`.
fn resolve_data_dir(flag: Option<&PathBuf>) -> Result<PathBuf, CliFailure> {
    if let Some(dir) = flag {
        return Ok(dir.clone());
    }
    std::env::var(state_tape_config::DATA_DIR_ENV_VAR)
        .map(PathBuf::from)
        .map_err(|_| CliFailure::preflight("data_dir_missing", "no --data-dir and DATA_DIR unset"))
}

/// Loads or defaults the configuration for a data root.
fn load_config(data_dir: PathBuf) -> StateTapeConfig {
    StateTapeConfig::load(None).unwrap_or_else(|_| StateTapeConfig::with_data_dir(data_dir))
}

/// Opens the record store for a data root.
fn open_store(data_dir: &PathBuf) -> Result<SqliteRecordStore, CliFailure> {
    SqliteRecordStore::open(&SqliteStoreConfig::for_data_root(data_dir))
        .map_err(|err| CliFailure::internal(err.to_string()))
}

/// Returns the current unix epoch milliseconds.
fn now_millis() -> Timestamp {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Timestamp::from_millis(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
}

// ============================================================================
// SECTION: Handoff Commands
// ============================================================================

/// Runs `handoff ingest`.
fn run_ingest(args: &IngestArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    ConsentGate::for_data_root(&data_dir).preflight()?;
    let audit = SqliteAuditStore::open_at_root(&data_dir)
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let sink = FileAuditSink::open(&data_dir.join("journal.ndjson"))
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let mode = match args.mode {
        ModeArg::Copy => TransferMode::Copy,
        ModeArg::Hardlink => TransferMode::Hardlink,
    };
    let ingestor = HandoffIngestor::new(data_dir, mode, &audit, &sink);
    let report = ingestor.ingest(&args.handoff_root)?;
    if report.skipped && args.strict {
        return Err(CliFailure::preflight(
            "handoff_incomplete",
            "handoff missing terminal marker",
        ));
    }
    emit(&json!({
        "ok": true,
        "skipped": report.skipped,
        "run_id": report.run_id.as_ref().map(|id| id.as_str().to_string()),
        "counts": {
            "metadata_rows_copied": report.counts.metadata_rows_copied,
            "media_files_linked": report.counts.media_files_linked,
            "media_files_copied": report.counts.media_files_copied,
            "bytes_ingested": report.counts.bytes_ingested,
        }
    }));
    Ok(())
}

/// Runs `handoff drain`.
fn run_drain(args: &DrainArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    ConsentGate::for_data_root(&data_dir).preflight()?;
    let audit = SqliteAuditStore::open_at_root(&data_dir)
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let sink = FileAuditSink::open(&data_dir.join("journal.ndjson"))
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let ingestor = HandoffIngestor::new(data_dir, TransferMode::Hardlink, &audit, &sink);
    let reports = ingestor.drain(&args.spool_root)?;
    let ingested = reports.iter().filter(|report| !report.skipped).count();
    emit(&json!({ "ok": true, "handoffs_ingested": ingested, "handoffs_seen": reports.len() }));
    Ok(())
}

// ============================================================================
// SECTION: Batch Command
// ============================================================================

/// Pipeline-backed batch processor.
struct PipelineProcessor {
    /// Extraction pipeline.
    pipeline: ExtractionPipeline,
    /// Record store for backlog scans.
    store: SqliteRecordStore,
    /// Blob store for frame media.
    blobs: FileBlobStore,
    /// Run identifier.
    run_id: RunId,
    /// Cooperative cancel token.
    cancel: CancelToken,
}

impl PipelineProcessor {
    /// Lists frames that have no screen state yet, oldest first.
    fn unprocessed_frames(&self) -> Result<Vec<ArtifactEnvelope>, String> {
        let frames = self
            .store
            .scan_by_kind(ArtifactKind::Frame, TimeRange::all())
            .map_err(|err| err.to_string())?;
        let states = self
            .store
            .scan_by_kind(ArtifactKind::ScreenState, TimeRange::all())
            .map_err(|err| err.to_string())?;
        let processed: BTreeSet<String> = states
            .iter()
            .filter_map(|record| record.payload.get("frame_ids"))
            .filter_map(Value::as_array)
            .flat_map(|ids| ids.iter().filter_map(Value::as_str).map(ToString::to_string))
            .collect();
        Ok(frames
            .into_iter()
            .filter(|frame| {
                frame
                    .payload
                    .get("frame_id")
                    .and_then(Value::as_str)
                    .is_none_or(|id| !processed.contains(id))
            })
            .collect())
    }
}

impl BatchProcessor for PipelineProcessor {
    fn backlog(&self) -> Result<BacklogObservation, String> {
        let unprocessed = self.unprocessed_frames()?;
        let oldest = unprocessed
            .first()
            .and_then(|frame| frame.payload.get("ts_ms"))
            .and_then(Value::as_i64)
            .map(Timestamp::from_millis);
        Ok(BacklogObservation {
            oldest_unprocessed_ts: oldest,
            backlog_size: unprocessed.len() as u64,
        })
    }

    fn process_next(&mut self, _oldest_first: bool, max_items: usize) -> Result<u64, String> {
        // Scans return frames in time order, so steady-state and burn-down
        // both drain oldest first here; burn-down pins the order contractually.
        let mut frames = self.unprocessed_frames()?;
        frames.truncate(max_items);
        let mut processed = 0_u64;
        for frame in &frames {
            let media_id = frame
                .payload
                .pointer("/image_sha256/value")
                .and_then(Value::as_str)
                .ok_or_else(|| "frame record missing image hash".to_string())?;
            let media = self
                .blobs
                .get_blob(&MediaId::new(media_id))
                .map_err(|err| err.to_string())?;
            self.pipeline
                .process_frame(&self.run_id, &self.cancel, frame, &media)
                .map_err(|err| err.to_string())?;
            processed += 1;
        }
        if processed > 0 {
            self.pipeline.flush().map_err(|err| err.to_string())?;
        }
        Ok(processed)
    }
}

/// Runs `batch run`.
fn run_batch(args: &BatchArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    let config = load_config(data_dir.clone());
    let consent = ConsentGate::for_data_root(&data_dir);
    consent.preflight()?;
    let store = open_store(&data_dir)?;
    let blobs = FileBlobStore::open(&data_dir, store.clone())
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let audit = SqliteAuditStore::open_at_root(&data_dir)
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let backends = PipelineBackends {
        ocr: Arc::new(ScriptedOcrBackend::new()),
        vlm: Arc::new(ScriptedVlmBackend::new()),
    };
    let mut registry = PluginRegistry::new(Arc::new(audit));
    let admission =
        builtin_admission().map_err(|err| CliFailure::internal(err.to_string()))?;
    register_builtin_pack(&mut registry, &admission, &backends)
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let tape_config = TapeBuilderConfig {
        window_ms: config.extraction.span_window_ms,
        boundary_preference: config.extraction.window_boundary_preference,
        token_confidence_floor: config.extraction.ocr_min_confidence,
    };
    let mut pipeline = ExtractionPipeline::new(
        registry,
        config.extraction.clone(),
        tape_config,
        Arc::new(store.clone()),
    );
    pipeline.begin_run();
    let mut processor = PipelineProcessor {
        pipeline,
        store,
        blobs,
        run_id: RunId::new(format!("batch-{}", now_millis())),
        cancel: CancelToken::new(),
    };
    let mut scheduler = Scheduler::new(
        config.scheduler.burn_down_threshold_hours,
        config.burn_down_exit_hours(),
    );
    let activity = FileActivitySource::for_data_root(&data_dir);
    let mut driver = BatchDriver {
        scheduler: &mut scheduler,
        idle_gate: IdleGate::new(config.scheduler.activity_stale_ms),
        consent: &consent,
        activity: &activity,
        slice_size: args.slice_size,
    };
    let thresholds = PressureThresholds::default();
    let pools = ResourcePools::new(
        config.scheduler.gpu_concurrency,
        config.scheduler.plugin_concurrency,
    );
    let sink = StderrAuditSink;
    let mut total = 0_u64;
    loop {
        let pressure = thresholds.evaluate(used_disk_fraction(&data_dir));
        // Heavy (model-backed) work holds a GPU permit for the slice.
        let Some(_gpu_permit) = pools.try_acquire_gpu() else {
            emit(&json!({ "ok": true, "frames_processed": total, "gated": true }));
            return Ok(());
        };
        let outcome = driver
            .drive_once(&mut processor, now_millis(), pressure)
            .map_err(|err| match err {
                state_tape_scheduler::BatchError::Consent(consent_error) => {
                    CliFailure::from(consent_error)
                }
                other => CliFailure::internal(other.to_string()),
            })?;
        total += outcome.processed;
        if outcome.gated || outcome.processed == 0 {
            // Stage-2 commits enqueue an index refresh; rebuild and persist
            // the snapshots, then publish the staleness metric.
            let arc: Arc<dyn RecordStore> = Arc::new(processor.store.clone());
            let index = IndexSet::rebuild(arc.as_ref(), config.index.ann_enabled)
                .map_err(|err| CliFailure::internal(err.to_string()))?;
            index
                .persist(&data_dir)
                .map_err(|err| CliFailure::internal(err.to_string()))?;
            let stale_docs = index
                .stale_docs_count(arc.as_ref())
                .map_err(|err| CliFailure::internal(err.to_string()))?;
            let event = state_tape_core::AuditEvent::new("system.batch.completed", now_millis())
                .with_details(json!({
                    "frames_processed": total,
                    "gated": outcome.gated,
                    "stale_docs_count": stale_docs,
                    "mode": format!("{:?}", outcome.state.mode),
                }));
            state_tape_core::AuditSink::emit(&sink, &event);
            emit(&json!({
                "ok": true,
                "frames_processed": total,
                "gated": outcome.gated,
                "stale_docs_count": stale_docs,
            }));
            return Ok(());
        }
    }
}

/// Best-effort used-space fraction for the data root's filesystem.
fn used_disk_fraction(data_dir: &PathBuf) -> f64 {
    let available = fs2::available_space(data_dir).unwrap_or(0);
    let total = fs2::total_space(data_dir).unwrap_or(0);
    if total == 0 {
        return 0.0;
    }
    1.0 - (available as f64 / total as f64)
}

// ============================================================================
// SECTION: Query Commands
// ============================================================================

/// Runs the metadata-only local query.
fn run_query(args: &QueryArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    let config = load_config(data_dir.clone());
    let store = open_store(&data_dir)?;
    let arc: Arc<dyn RecordStore> = Arc::new(store);
    let index = IndexSet::rebuild(arc.as_ref(), config.index.ann_enabled)
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let engine = QueryEngine::new(index, arc, PolicyGate::new(config.policy.clone()));
    let max_citations = args.max_citations.unwrap_or(config.server.max_citations) as usize;
    let response = engine.execute(&args.query, max_citations, 0);
    let value =
        serde_json::to_value(&response).map_err(|err| CliFailure::internal(err.to_string()))?;
    emit(&value);
    Ok(())
}

/// Runs the popup HTTP query with the documented retry policy.
fn run_popup(args: &PopupArgs) -> Result<(), CliFailure> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    runtime.block_on(async {
        let mut query_client = client::QueryClient::new(args.server.clone())
            .map_err(|err| CliFailure::internal(err.to_string()))?;
        let response = query_client
            .popup(&args.query, args.max_citations)
            .await
            .map_err(|err| CliFailure::preflight("query_failed", err.to_string()))?;
        emit(&response);
        Ok(())
    })
}

// ============================================================================
// SECTION: Consent Commands
// ============================================================================

/// Runs `consent status`.
fn run_consent_status(args: &DataDirArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    let gate = ConsentGate::for_data_root(&data_dir);
    let status = gate.status().map_err(CliFailure::from)?;
    match status {
        Some(record) => {
            emit(&json!({
                "ok": true,
                "accepted": record.accepted,
                "accepted_at_utc": record.accepted_at_utc,
            }));
            Ok(())
        }
        None => {
            emit(&json!({ "ok": true, "accepted": false }));
            Ok(())
        }
    }
}

/// Runs `consent accept`.
fn run_consent_accept(args: &DataDirArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    let gate = ConsentGate::for_data_root(&data_dir);
    gate.accept(state_tape_ingest::rfc3339_utc(now_millis())).map_err(CliFailure::from)?;
    emit(&json!({ "ok": true, "accepted": true }));
    Ok(())
}

// ============================================================================
// SECTION: Backup Commands
// ============================================================================

/// Runs `backup create`.
fn run_backup_create(args: &BackupArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    let copied = backup::create(&data_dir, &args.backup_root)
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    emit(&json!({ "ok": true, "files_backed_up": copied }));
    Ok(())
}

/// Runs `backup restore`.
fn run_backup_restore(args: &BackupArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    let restored = backup::restore(&args.backup_root, &data_dir)
        .map_err(|err| CliFailure::preflight("backup_invalid", err.to_string()))?;
    emit(&json!({ "ok": true, "files_restored": restored }));
    Ok(())
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Runs the loopback query server.
fn run_serve(args: &ServeArgs) -> Result<(), CliFailure> {
    let data_dir = resolve_data_dir(args.data_dir.as_ref())?;
    let config = load_config(data_dir.clone());
    let bind = args.bind.unwrap_or(config.server.bind_addr);
    let store = open_store(&data_dir)?;
    let arc: Arc<dyn RecordStore> = Arc::new(store);
    let index = IndexSet::rebuild(arc.as_ref(), config.index.ann_enabled)
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    let engine = QueryEngine::new(index, arc, PolicyGate::new(config.policy.clone()));
    let context = Arc::new(ApiContext {
        engine: Arc::new(engine),
        issuer: TokenIssuer::new(),
        max_citations: config.server.max_citations,
        popup_timeout_ms: config.server.popup_timeout_ms,
    });
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| CliFailure::internal(err.to_string()))?;
    runtime
        .block_on(state_tape_query::serve(bind, context))
        .map_err(|err| CliFailure::preflight("serve_refused", err.to_string()))
}
