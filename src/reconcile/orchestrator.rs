//! Reconciliation orchestrator.
//!
//! Runs Scanning → Classifying → Repairing → Merging → Persisting over a
//! working copy of the store and commits the resulting diff in one
//! transaction. Cancellation is only observed between phases, so the store is
//! either untouched or fully updated.

use chrono::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::classifier::{classify, classify_recording, RecordingClass};
use super::duplicates::{cross_identity_pairs, exact_key_groups, GenericNameMatcher};
use super::merge::{merge_into, MergeStrategy};
use super::repairer::repair;
use super::report::{ReconcilePhase, ReconcileOutcome, ReconcileProgress, ReconciliationReport};
use super::working_set::WorkingSet;
use crate::config::StoreConfig;
use crate::database::DatabaseManager;
use crate::error::ReconcileError;
use crate::paths::PathVirtualizer;

pub struct Reconciler<'a> {
    db: &'a DatabaseManager,
    /// Fresh per reconciler, so the root listing is cached for one run only
    paths: PathVirtualizer,
    matcher: GenericNameMatcher,
    merge_window: Duration,
    progress: Option<UnboundedSender<ReconcileProgress>>,
    cancel: CancellationToken,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a DatabaseManager, config: &StoreConfig) -> Self {
        Self {
            db,
            paths: PathVirtualizer::new(config.storage_root.clone()),
            matcher: GenericNameMatcher::new(&config.generic_name_patterns),
            merge_window: config.merge_window,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: UnboundedSender<ReconcileProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn enter(&self, phase: ReconcilePhase) {
        log::debug!("Reconciliation phase: {}", phase.as_str());
        if let Some(tx) = &self.progress {
            // The receiver may have been dropped; progress is best effort
            let _ = tx.send(ReconcileProgress {
                phase,
                percent: phase.percent(),
            });
        }
    }

    /// Returns true (and marks the report) when cancellation was requested
    fn cancelled(&self, report: &mut ReconciliationReport) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        log::info!("Reconciliation cancelled; nothing was written");
        report.outcome = ReconcileOutcome::Cancelled;
        report.change_set = Default::default();
        self.enter(ReconcilePhase::Cancelled);
        true
    }

    /// Run one pass. With `apply == false` the pass stops after classification.
    pub fn run(&self, apply: bool) -> ReconciliationReport {
        log::info!("Starting reconciliation (apply={})", apply);
        let mut report = ReconciliationReport::new(ReconcileOutcome::Clean);

        if self.cancelled(&mut report) {
            return report;
        }
        self.enter(ReconcilePhase::Scanning);
        let snapshot = match timed!("Loading store snapshot", self.db.load_snapshot()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Reconciliation could not load the store: {:#}", e);
                report.outcome = ReconcileOutcome::Failed;
                report.issues.push(ReconcileError::ScanFailure { message: format!("{:#}", e) });
                self.enter(ReconcilePhase::Failed);
                return report;
            }
        };

        let original = WorkingSet::from_snapshot(snapshot);
        let mut set = original.clone();
        let (healed, path_issues) = timed!("Resolving media tokens", set.scan_media(&self.paths));
        report.tokens_healed = healed;
        report.issues.extend(path_issues);
        for row in &set.undecodable {
            log::warn!("Skipping undecodable {} {}: {}", row.kind.as_str(), row.id, row.error);
            report.issues.push(ReconcileError::Undecodable {
                kind: row.kind,
                id: row.id.clone(),
                error: row.error.clone(),
            });
        }

        if self.cancelled(&mut report) {
            return report;
        }
        self.enter(ReconcilePhase::Classifying);
        report.classification = timed!("Classification", classify(&set));

        if !apply {
            report.change_set = set.diff(&original);
            report.shells_left = report.classification.shells.clone();
            report.outcome = ReconcileOutcome::DryRun;
            self.enter(ReconcilePhase::Done);
            log::info!("Dry run finished: {:?}", report.classification.counts());
            return report;
        }

        if self.cancelled(&mut report) {
            return report;
        }
        self.enter(ReconcilePhase::Repairing);
        let repaired = repair(&mut set);
        report.repairs += repaired.repairs;
        report.issues.extend(repaired.events);

        if self.cancelled(&mut report) {
            return report;
        }
        self.enter(ReconcilePhase::Merging);
        timed!("Duplicate merging", self.merge_duplicates(&mut set, &mut report));
        self.delete_shells(&mut set, &mut report);

        // Merges re-point children; settle their slots and states
        let settled = repair(&mut set);
        report.repairs += settled.repairs;
        for event in settled.events {
            if !report.issues.contains(&event) {
                report.issues.push(event);
            }
        }

        report.shells_left = report
            .classification
            .shells
            .iter()
            .filter(|id| set.recordings.contains_key(*id))
            .cloned()
            .collect();

        if self.cancelled(&mut report) {
            return report;
        }
        self.enter(ReconcilePhase::Persisting);
        report.change_set = set.diff(&original);

        if report.change_set.is_empty() {
            report.outcome = ReconcileOutcome::Clean;
            self.enter(ReconcilePhase::Done);
            log::info!("Reconciliation finished: store is consistent");
            return report;
        }

        match self.db.save_all(&report.change_set) {
            Ok(()) => {
                report.outcome = ReconcileOutcome::Applied;
                self.enter(ReconcilePhase::Done);
                log::info!(
                    "Reconciliation applied {} writes: {} repairs, {} merges, {} shells deleted, {} tokens healed",
                    report.change_set.len(),
                    report.repairs,
                    report.merges_count(),
                    report.shells_deleted.len(),
                    report.tokens_healed
                );
            }
            Err(e) => {
                log::error!("Reconciliation commit failed: {:#}", e);
                report.outcome = ReconcileOutcome::Failed;
                report.issues.push(ReconcileError::CommitFailure { message: format!("{:#}", e) });
                self.enter(ReconcilePhase::Failed);
            }
        }

        report
    }

    /// Retry the commit of a report's change set without rescanning
    pub fn commit(&self, report: &mut ReconciliationReport) -> Result<(), ReconcileError> {
        if !report.change_set.is_empty() {
            self.db.save_all(&report.change_set).map_err(|e| ReconcileError::CommitFailure {
                message: format!("{:#}", e),
            })?;
        }

        report.issues.retain(|issue| !issue.is_fatal());
        report.outcome = if report.change_set.is_empty() {
            ReconcileOutcome::Clean
        } else {
            ReconcileOutcome::Applied
        };
        log::info!("Committed {} reconciliation writes", report.change_set.len());
        Ok(())
    }

    fn merge_duplicates(&self, set: &mut WorkingSet, report: &mut ReconciliationReport) {
        for group in exact_key_groups(set, &self.matcher) {
            if let Some(ambiguity) = group.ambiguity {
                log::warn!("{}", ambiguity);
                report.issues.push(ambiguity);
            }
            for loser in &group.losers {
                match merge_into(set, loser, &group.survivor, MergeStrategy::ExactKey) {
                    Ok(record) => report.merges.push(record),
                    Err(e) => {
                        log::warn!("{}", e);
                        report.issues.push(e);
                    }
                }
            }
        }

        for pair in cross_identity_pairs(set, &self.matcher, self.merge_window) {
            match merge_into(set, &pair.generic, &pair.titled, MergeStrategy::CrossIdentity) {
                Ok(record) => report.merges.push(record),
                Err(e) => {
                    log::warn!("{}", e);
                    report.issues.push(e);
                }
            }
        }
    }

    /// Delete recordings that are shells on the post-merge state
    fn delete_shells(&self, set: &mut WorkingSet, report: &mut ReconciliationReport) {
        let shells: Vec<String> = set
            .recordings
            .values()
            .filter(|r| classify_recording(set, r) == RecordingClass::Shell)
            .map(|r| r.id.clone())
            .collect();

        for id in shells {
            log::info!("Deleting empty shell recording {}", id);
            set.remove_recording(&id);
            report.shells_deleted.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ProcessingState, Recording, Summary, SummaryContent, Transcript};
    use chrono::Utc;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        db: DatabaseManager,
        config: StoreConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("media");
        fs::create_dir_all(&root).unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db")).unwrap();
        let config = StoreConfig::new(db.db_path().to_path_buf(), root);
        Fixture { _dir: dir, db, config }
    }

    fn summary_for(owner: &Recording) -> Summary {
        Summary::from_parts(
            &owner.id,
            None,
            SummaryContent {
                text: "Decided to ship on Friday.".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_empty_store_is_clean() {
        let f = fixture();
        let report = Reconciler::new(&f.db, &f.config).run(true);

        assert_eq!(report.outcome, ReconcileOutcome::Clean);
        assert!(report.change_set.is_empty());
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let f = fixture();
        let mut shell = Recording::new("Empty", Utc::now(), None);
        f.db.upsert_recording(&mut shell).unwrap();

        let report = Reconciler::new(&f.db, &f.config).run(false);

        assert_eq!(report.outcome, ReconcileOutcome::DryRun);
        assert_eq!(report.classification.shells, vec![shell.id.clone()]);
        assert_eq!(report.shells_left, vec![shell.id.clone()]);
        assert!(f.db.get_recording(&shell.id).unwrap().is_some());
    }

    #[test]
    fn test_apply_repairs_and_deletes_shells() {
        let f = fixture();
        let mut shell = Recording::new("Empty", Utc::now(), None);
        f.db.upsert_recording(&mut shell).unwrap();

        let mut owner = Recording::new("Interview", Utc::now(), None);
        f.db.upsert_recording(&mut owner).unwrap();
        let mut transcript = Transcript::new(&owner.id, vec![], "whisper", 0.8);
        f.db.upsert_transcript(&mut transcript).unwrap();

        let report = Reconciler::new(&f.db, &f.config).run(true);

        assert_eq!(report.outcome, ReconcileOutcome::Applied);
        assert_eq!(report.shells_deleted, vec![shell.id.clone()]);
        assert!(report.shells_left.is_empty());
        assert!(f.db.get_recording(&shell.id).unwrap().is_none());

        let repaired = f.db.get_recording(&owner.id).unwrap().unwrap();
        assert_eq!(repaired.transcript_id.as_deref(), Some(transcript.id.as_str()));
        assert_eq!(repaired.transcription_state, ProcessingState::Completed);
    }

    #[test]
    fn test_missing_media_and_preserved_are_never_deleted() {
        let f = fixture();
        let mut missing = Recording::new("Lost file", Utc::now(), Some("lost.m4a".to_string()));
        f.db.upsert_recording(&mut missing).unwrap();

        let mut preserved = Recording::new("Notes only", Utc::now(), None);
        let mut summary = summary_for(&preserved);
        preserved.summary_id = Some(summary.id.clone());
        f.db.upsert_recording(&mut preserved).unwrap();
        f.db.upsert_summary(&mut summary).unwrap();

        let report = Reconciler::new(&f.db, &f.config).run(true);

        assert_eq!(report.missing_media_count(), 1);
        assert_eq!(report.preserved_count(), 1);
        assert!(f.db.get_recording(&missing.id).unwrap().is_some());
        assert!(f.db.get_recording(&preserved.id).unwrap().is_some());
        assert!(report.issues.iter().any(|i| matches!(i, ReconcileError::PathUnresolvable { .. })));
    }

    #[test]
    fn test_cancelled_before_start_writes_nothing() {
        let f = fixture();
        let mut shell = Recording::new("Empty", Utc::now(), None);
        f.db.upsert_recording(&mut shell).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = Reconciler::new(&f.db, &f.config)
            .with_cancellation(cancel)
            .run(true);

        assert_eq!(report.outcome, ReconcileOutcome::Cancelled);
        assert!(f.db.get_recording(&shell.id).unwrap().is_some());
    }

    #[test]
    fn test_progress_reports_every_phase() {
        let f = fixture();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        Reconciler::new(&f.db, &f.config).with_progress(tx).run(true);

        let mut phases = Vec::new();
        while let Ok(update) = rx.try_recv() {
            phases.push(update.phase);
        }
        assert_eq!(
            phases,
            vec![
                ReconcilePhase::Scanning,
                ReconcilePhase::Classifying,
                ReconcilePhase::Repairing,
                ReconcilePhase::Merging,
                ReconcilePhase::Persisting,
                ReconcilePhase::Done,
            ]
        );
    }

    #[test]
    fn test_corrupt_children_are_isolated_from_the_pass() {
        let f = fixture();
        let mut shell = Recording::new("Empty", Utc::now(), None);
        f.db.upsert_recording(&mut shell).unwrap();

        let mut owner = Recording::new("Board meeting", Utc::now(), None);
        f.db.upsert_recording(&mut owner).unwrap();
        let mut transcript = Transcript::new(&owner.id, vec![], "whisper", 0.9);
        f.db.upsert_transcript(&mut transcript).unwrap();
        let mut summary = summary_for(&owner);
        f.db.upsert_summary(&mut summary).unwrap();
        owner.transcript_id = Some(transcript.id.clone());
        f.db.upsert_recording(&mut owner).unwrap();

        // Text in a REAL column and broken JSON
        f.db.with_connection(|conn| {
            conn.execute("UPDATE transcripts SET confidence = 'n/a' WHERE id = ?", [&transcript.id])?;
            conn.execute("UPDATE summaries SET tasks_json = '{oops' WHERE id = ?", [&summary.id])?;
            Ok(())
        }).unwrap();

        let report = Reconciler::new(&f.db, &f.config).run(true);

        assert_eq!(report.outcome, ReconcileOutcome::Applied);
        let undecodable: Vec<_> = report
            .issues
            .iter()
            .filter(|issue| matches!(issue, ReconcileError::Undecodable { .. }))
            .collect();
        assert_eq!(undecodable.len(), 2);
        assert_eq!(report.classification.class_of(&owner.id), Some(RecordingClass::Preserved));
        assert_eq!(report.shells_deleted, vec![shell.id.clone()]);

        let stored = f.db.get_recording(&owner.id).unwrap().expect("owner kept");
        assert_eq!(stored.transcript_id.as_deref(), Some(transcript.id.as_str()));
        let raw_rows: i64 = f.db.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT (SELECT COUNT(*) FROM transcripts) + (SELECT COUNT(*) FROM summaries)",
                [],
                |row| row.get(0),
            )?)
        }).unwrap();
        assert_eq!(raw_rows, 2);
    }

    #[test]
    fn test_failed_commit_keeps_change_set_for_retry() {
        let f = fixture();
        let mut shell = Recording::new("Empty", Utc::now(), None);
        f.db.upsert_recording(&mut shell).unwrap();

        // Block deletes on recordings so the commit fails
        f.db.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_delete BEFORE DELETE ON recordings
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )?;
            Ok(())
        }).unwrap();

        let reconciler = Reconciler::new(&f.db, &f.config);
        let mut report = reconciler.run(true);

        assert_eq!(report.outcome, ReconcileOutcome::Failed);
        assert!(report.can_retry_commit());
        assert!(matches!(report.fatal_issue(), Some(ReconcileError::CommitFailure { .. })));
        assert!(f.db.get_recording(&shell.id).unwrap().is_some());

        f.db.with_connection(|conn| {
            conn.execute_batch("DROP TRIGGER block_delete;")?;
            Ok(())
        }).unwrap();

        reconciler.commit(&mut report).unwrap();
        assert_eq!(report.outcome, ReconcileOutcome::Applied);
        assert!(report.fatal_issue().is_none());
        assert!(f.db.get_recording(&shell.id).unwrap().is_none());
    }
}
