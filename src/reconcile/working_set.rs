//! In-memory copy of the store that reconciliation phases mutate.
//!
//! Phases never write to the database directly. They edit a `WorkingSet`
//! cloned from a `StoreSnapshot`, and the orchestrator diffs the two at the
//! end to produce a single `ChangeSet`.

use std::collections::{BTreeMap, BTreeSet};

use crate::database::{
    ChangeSet, EntityKind, Recording, StoreSnapshot, Summary, Transcript, UndecodableRow,
};
use crate::error::ReconcileError;
use crate::paths::{PathVirtualizer, Resolution};

/// Where a recording's media stands against the current storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStatus {
    /// No media token at all
    Absent,
    /// Token resolved; holds the file name that was found
    Resolved(String),
    Unresolvable,
}

impl MediaStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, MediaStatus::Resolved(_))
    }

    pub fn resolved_file_name(&self) -> Option<&str> {
        match self {
            MediaStatus::Resolved(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingSet {
    pub recordings: BTreeMap<String, Recording>,
    pub transcripts: BTreeMap<String, Transcript>,
    pub summaries: BTreeMap<String, Summary>,
    /// Media status per recording id. Recordings missing here count as `Absent`.
    pub media: BTreeMap<String, MediaStatus>,
    pub undecodable: Vec<UndecodableRow>,
}

impl WorkingSet {
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            recordings: snapshot.recordings.into_iter().map(|r| (r.id.clone(), r)).collect(),
            transcripts: snapshot.transcripts.into_iter().map(|t| (t.id.clone(), t)).collect(),
            summaries: snapshot.summaries.into_iter().map(|s| (s.id.clone(), s)).collect(),
            media: BTreeMap::new(),
            undecodable: snapshot.undecodable,
        }
    }

    /// Resolve every media token, rewriting tokens that were found by file-name fallback.
    /// Returns the number of healed tokens and an issue per unresolvable token.
    pub fn scan_media(&mut self, paths: &PathVirtualizer) -> (usize, Vec<ReconcileError>) {
        let mut healed = 0;
        let mut issues = Vec::new();

        for recording in self.recordings.values_mut() {
            let Some(token) = recording.media_token.clone() else {
                self.media.insert(recording.id.clone(), MediaStatus::Absent);
                continue;
            };

            let status = match paths.resolve(&token) {
                Resolution::Found { path, healed_token } => {
                    if let Some(new_token) = healed_token {
                        log::info!(
                            "Healing media token of recording {}: '{}' -> '{}'",
                            recording.id, token, new_token
                        );
                        recording.media_token = Some(new_token);
                        healed += 1;
                    }
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    MediaStatus::Resolved(file_name)
                }
                Resolution::NotFound => {
                    log::debug!("Media token '{}' of recording {} not found", token, recording.id);
                    issues.push(ReconcileError::PathUnresolvable {
                        recording_id: recording.id.clone(),
                        token,
                    });
                    MediaStatus::Unresolvable
                }
            };
            self.media.insert(recording.id.clone(), status);
        }

        (healed, issues)
    }

    pub fn media_status(&self, recording_id: &str) -> MediaStatus {
        self.media.get(recording_id).cloned().unwrap_or(MediaStatus::Absent)
    }

    /// Transcript the recording's slot points at, if that transcript names it as owner
    pub fn linked_transcript(&self, recording: &Recording) -> Option<&Transcript> {
        recording
            .transcript_id
            .as_deref()
            .and_then(|id| self.transcripts.get(id))
            .filter(|t| t.owner_id == recording.id)
    }

    /// Summary the recording's slot points at, if that summary names it as owner
    pub fn linked_summary(&self, recording: &Recording) -> Option<&Summary> {
        recording
            .summary_id
            .as_deref()
            .and_then(|id| self.summaries.get(id))
            .filter(|s| s.owner_id == recording.id)
    }

    /// Ids of transcripts carrying this owner id, in id order
    pub fn transcripts_owned_by(&self, recording_id: &str) -> Vec<String> {
        self.transcripts
            .values()
            .filter(|t| t.owner_id == recording_id)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Ids of summaries carrying this owner id, in id order
    pub fn summaries_owned_by(&self, recording_id: &str) -> Vec<String> {
        self.summaries
            .values()
            .filter(|s| s.owner_id == recording_id)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Undecodable child rows that name this recording as owner
    pub fn undecodable_owned_by<'a>(
        &'a self,
        recording_id: &'a str,
    ) -> impl Iterator<Item = &'a UndecodableRow> + 'a {
        self.undecodable
            .iter()
            .filter(move |row| row.owner_id.as_deref() == Some(recording_id))
    }

    pub fn is_undecodable(&self, kind: EntityKind, id: &str) -> bool {
        self.undecodable.iter().any(|row| row.kind == kind && row.id == id)
    }

    pub fn owns_transcript(&self, recording: &Recording) -> bool {
        self.linked_transcript(recording).is_some()
            || self.transcripts.values().any(|t| t.owner_id == recording.id)
    }

    pub fn owns_summary(&self, recording: &Recording) -> bool {
        self.linked_summary(recording).is_some()
            || self.summaries.values().any(|s| s.owner_id == recording.id)
    }

    /// Whether the recording owns any content, counting rows that failed to decode
    pub fn owns_content(&self, recording: &Recording) -> bool {
        let slot_undecodable = |kind: EntityKind, slot: &Option<String>| {
            slot.as_deref().is_some_and(|id| self.is_undecodable(kind, id))
        };

        self.owns_transcript(recording)
            || self.owns_summary(recording)
            || self.undecodable_owned_by(&recording.id).next().is_some()
            || slot_undecodable(EntityKind::Transcript, &recording.transcript_id)
            || slot_undecodable(EntityKind::Summary, &recording.summary_id)
    }

    /// Remove a recording. Children are left as they are.
    pub fn remove_recording(&mut self, id: &str) -> Option<Recording> {
        self.media.remove(id);
        self.recordings.remove(id)
    }

    /// Writes needed to turn `original` into `self`
    pub fn diff(&self, original: &WorkingSet) -> ChangeSet {
        let mut changes = ChangeSet::default();

        changes.recordings = changed(&original.recordings, &self.recordings);
        changes.transcripts = changed(&original.transcripts, &self.transcripts);
        changes.summaries = changed(&original.summaries, &self.summaries);
        changes.deleted_recordings = removed(&original.recordings, &self.recordings);
        changes.deleted_transcripts = removed(&original.transcripts, &self.transcripts);
        changes.deleted_summaries = removed(&original.summaries, &self.summaries);

        changes
    }
}

fn changed<T: Clone + PartialEq>(before: &BTreeMap<String, T>, after: &BTreeMap<String, T>) -> Vec<T> {
    after
        .iter()
        .filter(|(id, entity)| before.get(*id) != Some(*entity))
        .map(|(_, entity)| entity.clone())
        .collect()
}

fn removed<T>(before: &BTreeMap<String, T>, after: &BTreeMap<String, T>) -> Vec<String> {
    let remaining: BTreeSet<&String> = after.keys().collect();
    before
        .keys()
        .filter(|id| !remaining.contains(id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    fn snapshot_with(recordings: Vec<Recording>, transcripts: Vec<Transcript>) -> StoreSnapshot {
        StoreSnapshot {
            recordings,
            transcripts,
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_media_heals_and_flags_tokens() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("found.m4a"), b"x").unwrap();

        let moved = Recording::new("Moved", Utc::now(), Some("old/dir/found.m4a".to_string()));
        let gone = Recording::new("Gone", Utc::now(), Some("gone.m4a".to_string()));
        let bare = Recording::new("Bare", Utc::now(), None);
        let (moved_id, gone_id, bare_id) = (moved.id.clone(), gone.id.clone(), bare.id.clone());

        let mut set = WorkingSet::from_snapshot(snapshot_with(vec![moved, gone, bare], vec![]));
        let (healed, issues) = set.scan_media(&PathVirtualizer::new(root.path()));

        assert_eq!(healed, 1);
        assert_eq!(issues.len(), 1);
        assert_eq!(set.recordings[&moved_id].media_token.as_deref(), Some("found.m4a"));
        assert_eq!(set.media_status(&moved_id), MediaStatus::Resolved("found.m4a".to_string()));
        assert_eq!(set.media_status(&gone_id), MediaStatus::Unresolvable);
        assert_eq!(set.media_status(&bare_id), MediaStatus::Absent);
    }

    #[test]
    fn test_ownership_counts_back_ids_without_slot() {
        let recording = Recording::new("Sync", Utc::now(), None);
        let transcript = Transcript::new(&recording.id, vec![], "whisper", 0.9);
        let set = WorkingSet::from_snapshot(snapshot_with(vec![recording.clone()], vec![transcript]));

        assert!(set.linked_transcript(&recording).is_none());
        assert!(set.owns_transcript(&recording));
        assert!(set.owns_content(&recording));
        assert!(!set.owns_summary(&recording));
    }

    #[test]
    fn test_undecodable_child_counts_as_content() {
        let recording = Recording::new("Corrupt", Utc::now(), None);
        let mut set = WorkingSet::from_snapshot(snapshot_with(vec![recording.clone()], vec![]));
        set.undecodable.push(UndecodableRow {
            kind: EntityKind::Summary,
            id: "s-1".to_string(),
            owner_id: Some(recording.id.clone()),
            error: "bad json".to_string(),
        });

        assert!(set.owns_content(&recording));
        assert!(set.is_undecodable(EntityKind::Summary, "s-1"));
    }

    #[test]
    fn test_diff_reports_changes_and_removals() {
        let a = Recording::new("A", Utc::now(), None);
        let b = Recording::new("B", Utc::now(), None);
        let original = WorkingSet::from_snapshot(snapshot_with(vec![a.clone(), b.clone()], vec![]));

        let mut edited = original.clone();
        assert!(edited.diff(&original).is_empty());

        edited.recordings.get_mut(&a.id).unwrap().name = "A renamed".to_string();
        edited.remove_recording(&b.id);

        let changes = edited.diff(&original);
        assert_eq!(changes.recordings.len(), 1);
        assert_eq!(changes.recordings[0].name, "A renamed");
        assert_eq!(changes.deleted_recordings, vec![b.id]);
    }
}
