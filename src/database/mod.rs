// Database module for the recording store
// Provides SQLite persistence for settings, recordings, transcripts and summaries

pub mod manager;
pub mod migrations;
pub mod models;
pub mod rows;
pub mod batch;
pub mod settings_repo;
pub mod recordings_repo;
pub mod transcripts_repo;
pub mod summaries_repo;

pub use batch::{ChangeSet, StoreSnapshot};
pub use manager::DatabaseManager;
pub use models::*;
pub use recordings_repo::Workflow;
pub use rows::{EntityKind, UndecodableRow};
