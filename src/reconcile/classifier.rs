//! Orphan classification. Labels every entity in a working set and never writes.

use serde::{Deserialize, Serialize};

use super::working_set::{MediaStatus, WorkingSet};
use crate::database::{EntityKind, Recording, UndecodableRow};

/// Category of a recording
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordingClass {
    /// No media, no content. Safe to delete.
    Shell,
    /// Media token does not resolve and there is no content
    MissingMedia,
    /// No usable media but owns a transcript or summary
    Preserved,
    Healthy,
}

/// Why a transcript or summary is not properly linked from its owner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    MissingOwner,
    UnlinkedOwner,
    OwnerPointsElsewhere,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentOrphan {
    pub kind: EntityKind,
    pub id: String,
    pub owner_id: String,
    pub reason: OrphanReason,
}

/// A recording slot holding an id that does not lead back to the recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentOrphan {
    pub recording_id: String,
    pub slot: EntityKind,
    pub dangling_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrphanReport {
    pub shells: Vec<String>,
    pub missing_media: Vec<String>,
    pub preserved: Vec<String>,
    pub healthy: Vec<String>,
    pub content_orphans: Vec<ContentOrphan>,
    pub parent_orphans: Vec<ParentOrphan>,
    pub undecodable: Vec<UndecodableRow>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrphanCounts {
    pub shells: usize,
    pub missing_media: usize,
    pub preserved: usize,
    pub healthy: usize,
    pub content_orphans: usize,
    pub parent_orphans: usize,
    pub undecodable: usize,
}

impl OrphanReport {
    pub fn counts(&self) -> OrphanCounts {
        OrphanCounts {
            shells: self.shells.len(),
            missing_media: self.missing_media.len(),
            preserved: self.preserved.len(),
            healthy: self.healthy.len(),
            content_orphans: self.content_orphans.len(),
            parent_orphans: self.parent_orphans.len(),
            undecodable: self.undecodable.len(),
        }
    }

    pub fn class_of(&self, recording_id: &str) -> Option<RecordingClass> {
        let contains = |ids: &[String]| ids.iter().any(|id| id == recording_id);
        if contains(&self.shells) {
            Some(RecordingClass::Shell)
        } else if contains(&self.missing_media) {
            Some(RecordingClass::MissingMedia)
        } else if contains(&self.preserved) {
            Some(RecordingClass::Preserved)
        } else if contains(&self.healthy) {
            Some(RecordingClass::Healthy)
        } else {
            None
        }
    }

    /// No broken links in either direction
    pub fn links_consistent(&self) -> bool {
        self.content_orphans.is_empty() && self.parent_orphans.is_empty()
    }
}

/// Category of a single recording
pub fn classify_recording(set: &WorkingSet, recording: &Recording) -> RecordingClass {
    let owns_content = set.owns_content(recording);
    match (set.media_status(&recording.id), owns_content) {
        (MediaStatus::Absent, false) => RecordingClass::Shell,
        (MediaStatus::Unresolvable, false) => RecordingClass::MissingMedia,
        (MediaStatus::Absent | MediaStatus::Unresolvable, true) => RecordingClass::Preserved,
        (MediaStatus::Resolved(_), _) => RecordingClass::Healthy,
    }
}

/// Label every entity in the working set
pub fn classify(set: &WorkingSet) -> OrphanReport {
    let mut report = OrphanReport {
        undecodable: set.undecodable.clone(),
        ..Default::default()
    };

    for recording in set.recordings.values() {
        let bucket = match classify_recording(set, recording) {
            RecordingClass::Shell => &mut report.shells,
            RecordingClass::MissingMedia => &mut report.missing_media,
            RecordingClass::Preserved => &mut report.preserved,
            RecordingClass::Healthy => &mut report.healthy,
        };
        bucket.push(recording.id.clone());

        if let Some(id) = &recording.transcript_id {
            let undecodable = set.is_undecodable(EntityKind::Transcript, id);
            if set.linked_transcript(recording).is_none() && !undecodable {
                report.parent_orphans.push(ParentOrphan {
                    recording_id: recording.id.clone(),
                    slot: EntityKind::Transcript,
                    dangling_id: id.clone(),
                });
            }
        }
        if let Some(id) = &recording.summary_id {
            let undecodable = set.is_undecodable(EntityKind::Summary, id);
            if set.linked_summary(recording).is_none() && !undecodable {
                report.parent_orphans.push(ParentOrphan {
                    recording_id: recording.id.clone(),
                    slot: EntityKind::Summary,
                    dangling_id: id.clone(),
                });
            }
        }
    }

    for transcript in set.transcripts.values() {
        let owner_slot = set.recordings.get(&transcript.owner_id).map(|r| r.transcript_id.as_deref());
        if let Some(reason) = orphan_reason(owner_slot, &transcript.id) {
            report.content_orphans.push(ContentOrphan {
                kind: EntityKind::Transcript,
                id: transcript.id.clone(),
                owner_id: transcript.owner_id.clone(),
                reason,
            });
        }
    }

    for summary in set.summaries.values() {
        let owner_slot = set.recordings.get(&summary.owner_id).map(|r| r.summary_id.as_deref());
        if let Some(reason) = orphan_reason(owner_slot, &summary.id) {
            report.content_orphans.push(ContentOrphan {
                kind: EntityKind::Summary,
                id: summary.id.clone(),
                owner_id: summary.owner_id.clone(),
                reason,
            });
        }
    }

    log::debug!("Classification: {:?}", report.counts());
    report
}

/// `owner_slot` is None when the owner does not exist, Some(slot value) otherwise
fn orphan_reason(owner_slot: Option<Option<&str>>, child_id: &str) -> Option<OrphanReason> {
    match owner_slot {
        None => Some(OrphanReason::MissingOwner),
        Some(None) => Some(OrphanReason::UnlinkedOwner),
        Some(Some(id)) if id != child_id => Some(OrphanReason::OwnerPointsElsewhere),
        Some(Some(_)) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{StoreSnapshot, Summary, SummaryContent, Transcript};
    use chrono::Utc;

    fn summary_for(owner: &Recording) -> Summary {
        Summary::from_parts(
            &owner.id,
            None,
            SummaryContent {
                text: "Agreed on the Q3 budget.".to_string(),
                ..Default::default()
            },
        )
    }

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

    #[test]
    fn test_recording_categories() {
        let shell = Recording::new("Shell", Utc::now(), None);
        let missing = Recording::new("Missing", Utc::now(), Some("gone.m4a".to_string()));
        let mut preserved = Recording::new("Preserved", Utc::now(), None);
        let healthy = Recording::new("Healthy", Utc::now(), Some("here.m4a".to_string()));

        let summary = summary_for(&preserved);
        preserved.summary_id = Some(summary.id.clone());

        let mut set = set_from(
            vec![shell.clone(), missing.clone(), preserved.clone(), healthy.clone()],
            vec![],
            vec![summary],
        );
        set.media.insert(shell.id.clone(), MediaStatus::Absent);
        set.media.insert(missing.id.clone(), MediaStatus::Unresolvable);
        set.media.insert(healthy.id.clone(), MediaStatus::Resolved("here.m4a".to_string()));

        let report = classify(&set);

        assert_eq!(report.class_of(&shell.id), Some(RecordingClass::Shell));
        assert_eq!(report.class_of(&missing.id), Some(RecordingClass::MissingMedia));
        assert_eq!(report.class_of(&preserved.id), Some(RecordingClass::Preserved));
        assert_eq!(report.class_of(&healthy.id), Some(RecordingClass::Healthy));
        assert!(report.links_consistent());
    }

    #[test]
    fn test_content_orphan_reasons() {
        let unlinked_owner = Recording::new("Unlinked", Utc::now(), None);
        let mut elsewhere_owner = Recording::new("Elsewhere", Utc::now(), None);

        let lost = Transcript::new("no-such-recording", vec![], "whisper", 0.5);
        let unlinked = Transcript::new(&unlinked_owner.id, vec![], "whisper", 0.5);
        let current = Transcript::new(&elsewhere_owner.id, vec![], "whisper", 0.5);
        let stale = Transcript::new(&elsewhere_owner.id, vec![], "whisper", 0.5);
        elsewhere_owner.transcript_id = Some(current.id.clone());

        let set = set_from(
            vec![unlinked_owner, elsewhere_owner],
            vec![lost.clone(), unlinked.clone(), current.clone(), stale.clone()],
            vec![],
        );
        let report = classify(&set);

        let reason_of = |id: &str| {
            report.content_orphans.iter().find(|o| o.id == id).map(|o| o.reason)
        };
        assert_eq!(reason_of(&lost.id), Some(OrphanReason::MissingOwner));
        assert_eq!(reason_of(&unlinked.id), Some(OrphanReason::UnlinkedOwner));
        assert_eq!(reason_of(&stale.id), Some(OrphanReason::OwnerPointsElsewhere));
        assert_eq!(reason_of(&current.id), None);
    }

    #[test]
    fn test_parent_orphan_for_dangling_and_foreign_slots() {
        let other = Recording::new("Other", Utc::now(), None);
        let foreign = summary_for(&other);

        let mut recording = Recording::new("Dangling", Utc::now(), None);
        recording.transcript_id = Some("deleted-transcript".to_string());
        recording.summary_id = Some(foreign.id.clone());

        let set = set_from(vec![recording.clone(), other], vec![], vec![foreign]);
        let report = classify(&set);

        assert_eq!(report.parent_orphans.len(), 2);
        assert!(report.parent_orphans.iter().all(|o| o.recording_id == recording.id));
        // A dangling slot does not count as owned content
        assert_eq!(report.class_of(&recording.id), Some(RecordingClass::Shell));
    }

    #[test]
    fn test_slot_pointing_at_undecodable_row_is_not_dangling() {
        let mut recording = Recording::new("Corrupt child", Utc::now(), None);
        recording.transcript_id = Some("t-corrupt".to_string());

        let mut set = set_from(vec![recording.clone()], vec![], vec![]);
        set.undecodable.push(UndecodableRow {
            kind: EntityKind::Transcript,
            id: "t-corrupt".to_string(),
            owner_id: Some(recording.id.clone()),
            error: "invalid segments".to_string(),
        });

        let report = classify(&set);
        assert!(report.parent_orphans.is_empty());
        assert_eq!(report.class_of(&recording.id), Some(RecordingClass::Preserved));
        assert_eq!(report.counts().undecodable, 1);
    }
}
