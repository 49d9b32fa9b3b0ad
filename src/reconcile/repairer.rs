//! Relationship repair.
//!
//! A recording's `transcript_id`/`summary_id` is the forward link and a
//! child's `owner_id` is the back link. The back link is authoritative: it is
//! written by the workflow that produced the child, while slots are
//! denormalized and go stale. Repair only rewrites slots, summary derivation
//! links and processing states. Ids never change, and running it on its own
//! output changes nothing.

use chrono::{DateTime, Utc};

use super::working_set::WorkingSet;
use crate::database::{EntityKind, ProcessingState};
use crate::error::ReconcileError;

#[derive(Debug, Clone, Default)]
pub struct RepairOutcome {
    /// Number of individual fixes applied to the working set
    pub repairs: usize,
    /// One `RelationshipInconsistent` per fix or unfixable link
    pub events: Vec<ReconcileError>,
}

impl RepairOutcome {
    fn fixed(&mut self, kind: EntityKind, id: &str, detail: String) {
        log::info!("Repair {} {}: {}", kind.as_str(), id, detail);
        self.repairs += 1;
        self.events.push(ReconcileError::RelationshipInconsistent {
            kind,
            id: id.to_string(),
            detail,
        });
    }

    fn noted(&mut self, kind: EntityKind, id: &str, detail: String) {
        log::debug!("Left {} {} as is: {}", kind.as_str(), id, detail);
        self.events.push(ReconcileError::RelationshipInconsistent {
            kind,
            id: id.to_string(),
            detail,
        });
    }
}

/// Run one repair pass over the working set
pub fn repair(set: &mut WorkingSet) -> RepairOutcome {
    let mut outcome = RepairOutcome::default();

    let recording_ids: Vec<String> = set.recordings.keys().cloned().collect();
    for recording_id in &recording_ids {
        repair_transcript_slot(set, recording_id, &mut outcome);
        repair_summary_slot(set, recording_id, &mut outcome);
    }

    note_competing_children(set, &mut outcome);
    repair_summary_derivation(set, &mut outcome);

    for recording_id in &recording_ids {
        sync_processing_states(set, recording_id, &mut outcome);
    }

    if outcome.repairs > 0 {
        log::info!("Relationship repair applied {} fixes", outcome.repairs);
    }
    outcome
}

/// Newest child first, ties broken by smallest id
fn pick_newest<'a>(candidates: impl Iterator<Item = (&'a String, DateTime<Utc>)>) -> Option<String> {
    candidates
        .max_by(|(a_id, a_ts), (b_id, b_ts)| a_ts.cmp(b_ts).then_with(|| b_id.cmp(a_id)))
        .map(|(id, _)| id.clone())
}

fn repair_transcript_slot(set: &mut WorkingSet, recording_id: &str, outcome: &mut RepairOutcome) {
    let Some(recording) = set.recordings.get(recording_id) else { return };
    if set.linked_transcript(recording).is_some() {
        return;
    }
    let current = recording.transcript_id.clone();
    if let Some(id) = &current {
        if set.is_undecodable(EntityKind::Transcript, id) {
            return;
        }
    }

    let candidate = pick_newest(
        set.transcripts
            .values()
            .filter(|t| t.owner_id == recording_id)
            .map(|t| (&t.id, t.modified_at)),
    );

    let Some(recording) = set.recordings.get_mut(recording_id) else { return };
    match (candidate, current) {
        (Some(child_id), previous) => {
            recording.transcript_id = Some(child_id.clone());
            let detail = match previous {
                Some(stale) => format!("transcript slot pointed at {}, rebound to {}", stale, child_id),
                None => format!("transcript slot was empty, rebound to {}", child_id),
            };
            outcome.fixed(EntityKind::Recording, recording_id, detail);
        }
        (None, Some(stale)) => {
            recording.transcript_id = None;
            outcome.fixed(
                EntityKind::Recording,
                recording_id,
                format!("cleared dangling transcript id {}", stale),
            );
        }
        (None, None) => {}
    }
}

fn repair_summary_slot(set: &mut WorkingSet, recording_id: &str, outcome: &mut RepairOutcome) {
    let Some(recording) = set.recordings.get(recording_id) else { return };
    if set.linked_summary(recording).is_some() {
        return;
    }
    let current = recording.summary_id.clone();
    if let Some(id) = &current {
        if set.is_undecodable(EntityKind::Summary, id) {
            return;
        }
    }

    let candidate = pick_newest(
        set.summaries
            .values()
            .filter(|s| s.owner_id == recording_id)
            .map(|s| (&s.id, s.modified_at)),
    );

    let Some(recording) = set.recordings.get_mut(recording_id) else { return };
    match (candidate, current) {
        (Some(child_id), previous) => {
            recording.summary_id = Some(child_id.clone());
            let detail = match previous {
                Some(stale) => format!("summary slot pointed at {}, rebound to {}", stale, child_id),
                None => format!("summary slot was empty, rebound to {}", child_id),
            };
            outcome.fixed(EntityKind::Recording, recording_id, detail);
        }
        (None, Some(stale)) => {
            recording.summary_id = None;
            outcome.fixed(
                EntityKind::Recording,
                recording_id,
                format!("cleared dangling summary id {}", stale),
            );
        }
        (None, None) => {}
    }
}

/// Children that lost to another child for their owner's slot, or whose owner is gone
fn note_competing_children(set: &WorkingSet, outcome: &mut RepairOutcome) {
    for transcript in set.transcripts.values() {
        match set.recordings.get(&transcript.owner_id) {
            None => outcome.noted(
                EntityKind::Transcript,
                &transcript.id,
                format!("owner {} does not exist", transcript.owner_id),
            ),
            Some(owner) if owner.transcript_id.as_deref() != Some(transcript.id.as_str()) => outcome.noted(
                EntityKind::Transcript,
                &transcript.id,
                format!("owner {} already links another transcript", owner.id),
            ),
            Some(_) => {}
        }
    }

    for summary in set.summaries.values() {
        match set.recordings.get(&summary.owner_id) {
            None => outcome.noted(
                EntityKind::Summary,
                &summary.id,
                format!("owner {} does not exist", summary.owner_id),
            ),
            Some(owner) if owner.summary_id.as_deref() != Some(summary.id.as_str()) => outcome.noted(
                EntityKind::Summary,
                &summary.id,
                format!("owner {} already links another summary", owner.id),
            ),
            Some(_) => {}
        }
    }
}

/// Clear a summary's transcript link unless it names a transcript of the same owner
fn repair_summary_derivation(set: &mut WorkingSet, outcome: &mut RepairOutcome) {
    let stale: Vec<String> = set
        .summaries
        .values()
        .filter(|summary| {
            summary.transcript_id.as_deref().is_some_and(|transcript_id| {
                let same_owner = set
                    .transcripts
                    .get(transcript_id)
                    .is_some_and(|t| t.owner_id == summary.owner_id);
                !same_owner && !set.is_undecodable(EntityKind::Transcript, transcript_id)
            })
        })
        .map(|summary| summary.id.clone())
        .collect();

    for id in stale {
        if let Some(summary) = set.summaries.get_mut(&id) {
            let previous = summary.transcript_id.take().unwrap_or_default();
            outcome.fixed(
                EntityKind::Summary,
                &id,
                format!("cleared transcript link {} that does not belong to its owner", previous),
            );
        }
    }
}

fn synced_state(state: ProcessingState, slot_filled: bool) -> ProcessingState {
    match (state, slot_filled) {
        (ProcessingState::NotStarted, true) => ProcessingState::Completed,
        (ProcessingState::Completed, false) => ProcessingState::NotStarted,
        (state, _) => state,
    }
}

fn sync_processing_states(set: &mut WorkingSet, recording_id: &str, outcome: &mut RepairOutcome) {
    let Some(recording) = set.recordings.get_mut(recording_id) else { return };

    let transcription = synced_state(recording.transcription_state, recording.transcript_id.is_some());
    if transcription != recording.transcription_state {
        let detail = format!(
            "transcription state {} -> {}",
            recording.transcription_state.as_str(),
            transcription.as_str()
        );
        recording.transcription_state = transcription;
        outcome.fixed(EntityKind::Recording, recording_id, detail);
    }

    let Some(recording) = set.recordings.get_mut(recording_id) else { return };
    let summary = synced_state(recording.summary_state, recording.summary_id.is_some());
    if summary != recording.summary_state {
        let detail = format!(
            "summary state {} -> {}",
            recording.summary_state.as_str(),
            summary.as_str()
        );
        recording.summary_state = summary;
        outcome.fixed(EntityKind::Recording, recording_id, detail);
    }
}
