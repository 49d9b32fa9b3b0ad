//! Merge execution: the only duplicate-resolution step that mutates.

use serde::{Deserialize, Serialize};

use super::working_set::{MediaStatus, WorkingSet};
use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    ExactKey,
    CrossIdentity,
}

/// What a completed merge did
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeRecord {
    pub survivor: String,
    pub loser: String,
    pub strategy: MergeStrategy,
    /// Recording fields copied from the loser
    pub transferred: Vec<String>,
    pub moved_transcripts: Vec<String>,
    pub moved_summaries: Vec<String>,
    /// Empty summaries of the loser that had nowhere to go
    pub dropped_summaries: Vec<String>,
}

fn blocked(loser: &str, survivor: &str, reason: impl Into<String>) -> ReconcileError {
    ReconcileError::MergeBlocked {
        loser: loser.to_string(),
        survivor: survivor.to_string(),
        reason: reason.into(),
    }
}

/// Fold `loser_id` into `survivor_id` and remove the loser.
///
/// Content is moved only into free survivor slots. If any transcript or
/// non-empty summary of the loser has nowhere to go, nothing is changed and
/// `MergeBlocked` is returned.
pub fn merge_into(
    set: &mut WorkingSet,
    loser_id: &str,
    survivor_id: &str,
    strategy: MergeStrategy,
) -> Result<MergeRecord, ReconcileError> {
    if loser_id == survivor_id {
        return Err(blocked(loser_id, survivor_id, "cannot merge a recording into itself"));
    }
    let (Some(loser), Some(survivor)) = (set.recordings.get(loser_id), set.recordings.get(survivor_id)) else {
        return Err(blocked(loser_id, survivor_id, "recording no longer present"));
    };

    if set.undecodable_owned_by(loser_id).next().is_some() {
        return Err(blocked(loser_id, survivor_id, "loser owns rows that could not be decoded"));
    }

    // Plan content moves before touching anything
    let loser_transcripts = set.transcripts_owned_by(loser_id);
    let survivor_has_transcript = set.owns_transcript(survivor);
    if loser_transcripts.len() > 1 {
        return Err(blocked(
            loser_id,
            survivor_id,
            format!("loser owns {} transcripts", loser_transcripts.len()),
        ));
    }
    if !loser_transcripts.is_empty() && survivor_has_transcript {
        return Err(blocked(loser_id, survivor_id, "survivor already owns a transcript"));
    }

    let loser_summaries = set.summaries_owned_by(loser_id);
    let (non_empty, empty): (Vec<String>, Vec<String>) = loser_summaries
        .into_iter()
        .partition(|id| set.summaries.get(id).is_some_and(|s| !s.is_empty()));
    let survivor_has_summary = set.owns_summary(survivor);
    if non_empty.len() > 1 {
        return Err(blocked(
            loser_id,
            survivor_id,
            format!("loser owns {} non-empty summaries", non_empty.len()),
        ));
    }
    if !non_empty.is_empty() && survivor_has_summary {
        return Err(blocked(loser_id, survivor_id, "survivor already owns a summary"));
    }

    let moved_summary = if survivor_has_summary {
        None
    } else if let Some(id) = non_empty.first() {
        Some(id.clone())
    } else {
        empty
            .iter()
            .filter_map(|id| set.summaries.get(id))
            .max_by(|a, b| a.modified_at.cmp(&b.modified_at).then_with(|| b.id.cmp(&a.id)))
            .map(|s| s.id.clone())
    };
    let dropped_summaries: Vec<String> = empty
        .into_iter()
        .filter(|id| Some(id) != moved_summary.as_ref())
        .collect();

    // Metadata the survivor lacks
    let mut transferred = Vec::new();
    let mut updated = survivor.clone();
    if updated.duration <= 0.0 && loser.duration > 0.0 {
        updated.duration = loser.duration;
        transferred.push("duration".to_string());
    }
    if updated.file_size <= 0 && loser.file_size > 0 {
        updated.file_size = loser.file_size;
        transferred.push("file_size".to_string());
    }
    if updated.location.is_none() && loser.location.is_some() {
        updated.location = loser.location.clone();
        transferred.push("location".to_string());
    }

    let survivor_media = set.media_status(survivor_id);
    let loser_media = set.media_status(loser_id);
    let take_media = match (&survivor_media, &loser_media) {
        (MediaStatus::Resolved(_), _) => false,
        (_, MediaStatus::Resolved(_)) => true,
        (MediaStatus::Absent, MediaStatus::Unresolvable) => true,
        _ => false,
    };
    if take_media {
        updated.media_token = loser.media_token.clone();
        transferred.push("media_token".to_string());
    }

    // Apply
    let moved_transcripts = loser_transcripts;
    for id in &moved_transcripts {
        if let Some(transcript) = set.transcripts.get_mut(id) {
            transcript.owner_id = survivor_id.to_string();
        }
        updated.transcript_id = Some(id.clone());
    }
    let mut moved_summaries = Vec::new();
    if let Some(id) = moved_summary {
        if let Some(summary) = set.summaries.get_mut(&id) {
            summary.owner_id = survivor_id.to_string();
        }
        updated.summary_id = Some(id.clone());
        moved_summaries.push(id);
    }
    for id in &dropped_summaries {
        set.summaries.remove(id);
    }

    if take_media {
        set.media.insert(survivor_id.to_string(), loser_media);
    }
    set.recordings.insert(survivor_id.to_string(), updated);
    set.remove_recording(loser_id);

    log::info!(
        "Merged recording {} into {} ({:?}): transferred {:?}, moved {} transcripts and {} summaries",
        loser_id,
        survivor_id,
        strategy,
        transferred,
        moved_transcripts.len(),
        moved_summaries.len()
    );

    Ok(MergeRecord {
        survivor: survivor_id.to_string(),
        loser: loser_id.to_string(),
        strategy,
        transferred,
        moved_transcripts,
        moved_summaries,
        dropped_summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        GeoLocation, Recording, StoreSnapshot, Summary, SummaryContent, Transcript, TranscriptSegment,
    };
    use chrono::Utc;

    fn set_from(
        recordings: Vec<Recording>,
        transcripts: Vec<Transcript>,
        summaries: Vec<Summary>,
    ) -> WorkingSet {
        WorkingSet::from_snapshot(StoreSnapshot {
            recordings,
            transcripts,
            summaries,
            undecodable: vec![],
        })
    }

    fn summary_for(owner: &mut Recording, text: &str) -> Summary {
        let summary = Summary::from_parts(
            &owner.id,
            None,
            SummaryContent {
                text: text.to_string(),
                ..Default::default()
            },
        );
        owner.summary_id = Some(summary.id.clone());
        summary
    }

    #[test]
    fn test_merge_transfers_metadata_and_content() {
        let mut survivor = Recording::new("Budget Planning Meeting", Utc::now(), None);
        let summary = summary_for(&mut survivor, "Budget approved.");

        let mut loser = Recording::new("rec_20240101_0001", Utc::now(), Some("rec.m4a".to_string()));
        loser.duration = 182.5;
        loser.file_size = 4096;
        loser.location = Some(GeoLocation {
            latitude: 40.5,
            longitude: -3.75,
            accuracy: 8.0,
            address: Some("Office".to_string()),
            captured_at: Utc::now(),
        });
        let transcript = Transcript::new(
            &loser.id,
            vec![TranscriptSegment::new("A", "Let's start.", 0.0, 1.5)],
            "whisper",
            0.9,
        );
        loser.transcript_id = Some(transcript.id.clone());

        let mut set = set_from(vec![survivor.clone(), loser.clone()], vec![transcript.clone()], vec![summary.clone()]);
        set.media.insert(loser.id.clone(), MediaStatus::Resolved("rec.m4a".to_string()));

        let record = merge_into(&mut set, &loser.id, &survivor.id, MergeStrategy::CrossIdentity).unwrap();

        assert!(!set.recordings.contains_key(&loser.id));
        let merged = &set.recordings[&survivor.id];
        assert_eq!(merged.name, "Budget Planning Meeting");
        assert_eq!(merged.duration, 182.5);
        assert_eq!(merged.file_size, 4096);
        assert!(merged.location.is_some());
        assert_eq!(merged.media_token.as_deref(), Some("rec.m4a"));
        assert_eq!(merged.transcript_id.as_deref(), Some(transcript.id.as_str()));
        assert_eq!(merged.summary_id.as_deref(), Some(summary.id.as_str()));
        assert_eq!(set.transcripts[&transcript.id].owner_id, survivor.id);
        assert!(set.media_status(&survivor.id).is_resolved());
        assert_eq!(record.transferred, vec!["duration", "file_size", "location", "media_token"]);
    }

    #[test]
    fn test_merge_blocked_when_survivor_slot_taken() {
        let mut survivor = Recording::new("Weekly sync", Utc::now(), None);
        let kept = summary_for(&mut survivor, "Survivor summary.");
        let mut loser = Recording::new("Weekly sync", Utc::now(), None);
        loser.duration = 30.0;
        let other = summary_for(&mut loser, "Loser summary.");

        let mut set = set_from(vec![survivor.clone(), loser.clone()], vec![], vec![kept, other.clone()]);
        let before = set.clone();

        let err = merge_into(&mut set, &loser.id, &survivor.id, MergeStrategy::ExactKey).unwrap_err();
        assert!(matches!(err, ReconcileError::MergeBlocked { .. }));
        assert_eq!(set, before);
    }

    #[test]
    fn test_empty_summary_without_slot_is_dropped() {
        let mut survivor = Recording::new("Weekly sync", Utc::now(), None);
        let kept = summary_for(&mut survivor, "Survivor summary.");
        let mut loser = Recording::new("Weekly sync", Utc::now(), None);
        let empty = summary_for(&mut loser, "");

        let mut set = set_from(vec![survivor.clone(), loser.clone()], vec![], vec![kept.clone(), empty.clone()]);
        let record = merge_into(&mut set, &loser.id, &survivor.id, MergeStrategy::ExactKey).unwrap();

        assert_eq!(record.dropped_summaries, vec![empty.id.clone()]);
        assert!(!set.summaries.contains_key(&empty.id));
        assert_eq!(set.recordings[&survivor.id].summary_id.as_deref(), Some(kept.id.as_str()));
    }

    #[test]
    fn test_resolved_survivor_media_is_kept() {
        let survivor = Recording::new("Call", Utc::now(), Some("mine.m4a".to_string()));
        let loser = Recording::new("Call", Utc::now(), Some("theirs.m4a".to_string()));

        let mut set = set_from(vec![survivor.clone(), loser.clone()], vec![], vec![]);
        set.media.insert(survivor.id.clone(), MediaStatus::Resolved("mine.m4a".to_string()));
        set.media.insert(loser.id.clone(), MediaStatus::Resolved("theirs.m4a".to_string()));

        merge_into(&mut set, &loser.id, &survivor.id, MergeStrategy::ExactKey).unwrap();
        assert_eq!(set.recordings[&survivor.id].media_token.as_deref(), Some("mine.m4a"));
    }
}
