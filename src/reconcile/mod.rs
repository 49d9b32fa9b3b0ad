//! Reconciliation engine
//!
//! Brings the store back to a consistent state after partial writes, syncs or
//! deletes, and after the storage root moved.
//!
//! Module structure:
//! - working_set.rs: in-memory copy of the store and the final diff
//! - classifier.rs: shell / missing media / preserved / orphan labels (read only)
//! - repairer.rs: rebinds forward and back links, clears dangling ids
//! - duplicates.rs: completeness scoring, exact-key groups, cross-identity pairs
//! - merge.rs: executes a single merge
//! - orchestrator.rs: phase state machine, progress, cancellation, commit
//! - report.rs: report, outcome and progress types

pub mod working_set;
pub mod classifier;
pub mod repairer;
pub mod duplicates;
pub mod merge;
pub mod orchestrator;
pub mod report;

pub use classifier::{
    classify, ContentOrphan, OrphanCounts, OrphanReason, OrphanReport, ParentOrphan, RecordingClass,
};
pub use duplicates::{completeness_score, CrossIdentityPair, DuplicateGroup, GenericNameMatcher};
pub use merge::{MergeRecord, MergeStrategy};
pub use orchestrator::Reconciler;
pub use report::{ReconcileOutcome, ReconcilePhase, ReconcileProgress, ReconciliationReport};
pub use working_set::{MediaStatus, WorkingSet};
