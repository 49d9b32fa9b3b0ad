// Meeting-Local recording store
//
// Local persistence for recordings, transcripts and summaries:
// - SQLite store with typed repositories and atomic batch saves
// - Storage-root path virtualization with self-healing media tokens
// - Reconciliation: orphan classification, relationship repair,
//   duplicate merging and empty-shell cleanup

// Timing log macros - exported for use by other modules
#[macro_use]
pub mod macros;

// Core modules
pub mod config;
pub mod database;
pub mod error;
pub mod library;
pub mod paths;
pub mod reconcile;
pub mod state;

pub use config::StoreConfig;
pub use database::{
    ChangeSet, CompleteRecord, ContentType, DatabaseManager, GeoLocation, Priority, ProcessingState,
    Recording, ReminderItem, Summary, SummaryContent, TaskItem, TitleCandidate, Transcript,
    TranscriptSegment, Workflow,
};
pub use error::ReconcileError;
pub use library::{NewRecording, RecordingLibrary};
pub use paths::{PathVirtualizer, Resolution};
pub use reconcile::{ReconcileOutcome, ReconcilePhase, ReconcileProgress, Reconciler, ReconciliationReport};
pub use state::{AppState, ReconcileTask};

/// Initialize env_logger to output to stderr (reads RUST_LOG env var).
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Open the store under the platform data directory with persisted overrides applied
pub fn open_default_library() -> anyhow::Result<RecordingLibrary> {
    let config = StoreConfig::platform_default()?;
    let library = RecordingLibrary::open(config)?;
    log::info!(
        "Recording store ready: database {:?}, storage root {:?}",
        library.config().database_path,
        library.config().storage_root
    );
    Ok(library)
}
