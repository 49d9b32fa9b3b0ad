// Whole-store snapshot loading and atomic multi-entity save

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::models::{Recording, Summary, Transcript};
use super::recordings_repo::{delete_recording_row_impl, load_recordings_lenient, upsert_recording_impl};
use super::rows::UndecodableRow;
use super::summaries_repo::{delete_summary_impl, load_summaries_lenient, upsert_summary_impl};
use super::transcripts_repo::{delete_transcript_impl, load_transcripts_lenient, upsert_transcript_impl};
use super::DatabaseManager;

/// Every decodable entity in the store at one point in time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub recordings: Vec<Recording>,
    pub transcripts: Vec<Transcript>,
    pub summaries: Vec<Summary>,
    /// Rows present on disk that failed to decode
    pub undecodable: Vec<UndecodableRow>,
}

/// A batch of writes applied in one transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    pub recordings: Vec<Recording>,
    pub transcripts: Vec<Transcript>,
    pub summaries: Vec<Summary>,
    /// Recording rows to delete. Owned content is not touched; it must have
    /// been re-parented by an upsert in the same batch.
    pub deleted_recordings: Vec<String>,
    pub deleted_transcripts: Vec<String>,
    pub deleted_summaries: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of individual row writes in the batch
    pub fn len(&self) -> usize {
        self.recordings.len()
            + self.transcripts.len()
            + self.summaries.len()
            + self.deleted_recordings.len()
            + self.deleted_transcripts.len()
            + self.deleted_summaries.len()
    }
}

impl DatabaseManager {
    /// Load all three collections, isolating rows that cannot be decoded
    pub fn load_snapshot(&self) -> Result<StoreSnapshot> {
        self.with_connection(|conn| {
            let (recordings, mut undecodable) = load_recordings_lenient(conn)?;
            let (transcripts, bad_transcripts) = load_transcripts_lenient(conn)?;
            let (summaries, bad_summaries) = load_summaries_lenient(conn)?;
            undecodable.extend(bad_transcripts);
            undecodable.extend(bad_summaries);

            Ok(StoreSnapshot {
                recordings,
                transcripts,
                summaries,
                undecodable,
            })
        })
    }

    /// Persist a batch atomically: either every write lands or none does
    pub fn save_all(&self, changes: &ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        self.with_transaction(|tx| {
            for id in &changes.deleted_transcripts {
                delete_transcript_impl(tx, id)?;
            }
            for id in &changes.deleted_summaries {
                delete_summary_impl(tx, id)?;
            }
            for recording in &changes.recordings {
                upsert_recording_impl(tx, &mut recording.clone())?;
            }
            for transcript in &changes.transcripts {
                upsert_transcript_impl(tx, &mut transcript.clone())?;
            }
            for summary in &changes.summaries {
                upsert_summary_impl(tx, &mut summary.clone())?;
            }
            for id in &changes.deleted_recordings {
                delete_recording_row_impl(tx, id)?;
            }
            Ok(())
        }).context("Failed to save change set")?;

        log::info!("Saved change set with {} writes", changes.len());
        Ok(())
    }
}
