//! Reconciliation report types

use serde::{Deserialize, Serialize};

use super::classifier::OrphanReport;
use super::merge::MergeRecord;
use crate::database::ChangeSet;
use crate::error::ReconcileError;

/// Phases of a reconciliation pass, in order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Scanning,
    Classifying,
    Repairing,
    Merging,
    Persisting,
    Done,
    Failed,
    Cancelled,
}

impl ReconcilePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePhase::Scanning => "scanning",
            ReconcilePhase::Classifying => "classifying",
            ReconcilePhase::Repairing => "repairing",
            ReconcilePhase::Merging => "merging",
            ReconcilePhase::Persisting => "persisting",
            ReconcilePhase::Done => "done",
            ReconcilePhase::Failed => "failed",
            ReconcilePhase::Cancelled => "cancelled",
        }
    }

    /// Coarse progress reported when the phase starts
    pub fn percent(&self) -> u8 {
        match self {
            ReconcilePhase::Scanning => 0,
            ReconcilePhase::Classifying => 20,
            ReconcilePhase::Repairing => 40,
            ReconcilePhase::Merging => 60,
            ReconcilePhase::Persisting => 80,
            ReconcilePhase::Done | ReconcilePhase::Failed | ReconcilePhase::Cancelled => 100,
        }
    }
}

/// Progress update sent to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileProgress {
    pub phase: ReconcilePhase,
    pub percent: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nothing needed to change
    Clean,
    Applied,
    /// Scan and classification only
    DryRun,
    Cancelled,
    /// The pass could not load or commit; see `issues`
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub outcome: ReconcileOutcome,
    pub classification: OrphanReport,
    pub tokens_healed: usize,
    pub repairs: usize,
    pub merges: Vec<MergeRecord>,
    pub shells_deleted: Vec<String>,
    /// Shells seen during classification that are still present after the pass
    pub shells_left: Vec<String>,
    pub issues: Vec<ReconcileError>,
    /// Writes computed by the pass. Kept after a failed commit so it can be retried.
    pub change_set: ChangeSet,
}

impl ReconciliationReport {
    pub(crate) fn new(outcome: ReconcileOutcome) -> Self {
        Self {
            outcome,
            classification: OrphanReport::default(),
            tokens_healed: 0,
            repairs: 0,
            merges: Vec::new(),
            shells_deleted: Vec::new(),
            shells_left: Vec::new(),
            issues: Vec::new(),
            change_set: ChangeSet::default(),
        }
    }

    pub fn merges_count(&self) -> usize {
        self.merges.len()
    }

    pub fn missing_media_count(&self) -> usize {
        self.classification.missing_media.len()
    }

    pub fn preserved_count(&self) -> usize {
        self.classification.preserved.len()
    }

    /// The error that ended the pass, if any
    pub fn fatal_issue(&self) -> Option<&ReconcileError> {
        self.issues.iter().find(|issue| issue.is_fatal())
    }

    /// Whether a commit can be retried from this report without rescanning
    pub fn can_retry_commit(&self) -> bool {
        self.outcome == ReconcileOutcome::Failed && !self.change_set.is_empty()
    }

    /// Merge attempts that were skipped to protect content
    pub fn blocked_merges(&self) -> impl Iterator<Item = &ReconcileError> {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, ReconcileError::MergeBlocked { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progress_is_monotonic() {
        let phases = [
            ReconcilePhase::Scanning,
            ReconcilePhase::Classifying,
            ReconcilePhase::Repairing,
            ReconcilePhase::Merging,
            ReconcilePhase::Persisting,
            ReconcilePhase::Done,
        ];
        assert!(phases.windows(2).all(|w| w[0].percent() < w[1].percent()));
    }

    #[test]
    fn test_retry_needs_failed_outcome_and_changes() {
        let mut report = ReconciliationReport::new(ReconcileOutcome::Failed);
        assert!(!report.can_retry_commit());

        report.change_set.deleted_recordings.push("r-1".to_string());
        assert!(report.can_retry_commit());

        report.outcome = ReconcileOutcome::Applied;
        assert!(!report.can_retry_commit());
    }

    #[test]
    fn test_report_serializes_outcome_snake_case() {
        let report = ReconciliationReport::new(ReconcileOutcome::DryRun);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "dry_run");
    }
}
