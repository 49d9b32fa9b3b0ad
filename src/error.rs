//! Reconciliation error taxonomy.
//!
//! Only `CommitFailure` ends a pass. Every other variant is recorded as an
//! issue on the report and logged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::EntityKind;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcileError {
    #[error("media token '{token}' of recording {recording_id} does not resolve under the storage root")]
    PathUnresolvable { recording_id: String, token: String },

    #[error("{kind:?} {id}: {detail}")]
    RelationshipInconsistent { kind: EntityKind, id: String, detail: String },

    #[error("recordings {candidates:?} tie on completeness and last-modified; kept {survivor}")]
    AmbiguousDuplicate { survivor: String, candidates: Vec<String> },

    #[error("merging {loser} into {survivor} was skipped: {reason}")]
    MergeBlocked { loser: String, survivor: String, reason: String },

    #[error("{kind:?} {id} could not be decoded: {error}")]
    Undecodable { kind: EntityKind, id: String, error: String },

    #[error("failed to commit reconciliation changes: {message}")]
    CommitFailure { message: String },

    #[error("failed to load the store: {message}")]
    ScanFailure { message: String },
}

impl ReconcileError {
    /// Whether this error ends the current pass
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::CommitFailure { .. } | ReconcileError::ScanFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_failures_are_fatal() {
        assert!(ReconcileError::CommitFailure { message: "disk full".to_string() }.is_fatal());
        assert!(ReconcileError::ScanFailure { message: "locked".to_string() }.is_fatal());
        assert!(!ReconcileError::PathUnresolvable {
            recording_id: "r".to_string(),
            token: "a.m4a".to_string(),
        }.is_fatal());
    }

    #[test]
    fn test_display_names_the_entities() {
        let err = ReconcileError::MergeBlocked {
            loser: "a".to_string(),
            survivor: "b".to_string(),
            reason: "survivor already owns a summary".to_string(),
        };
        assert_eq!(err.to_string(), "merging a into b was skipped: survivor already owns a summary");
    }
}
