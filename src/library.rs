// Recording library
// Ingress and egress API used by capture, import, sync and presentation layers.
// Every media path goes through the path virtualizer; nothing outside this
// module stores an absolute path.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::database::recordings_repo::{get_recording_impl, upsert_recording_impl};
use crate::database::summaries_repo::{find_summaries_by_owner_impl, get_summary_impl, upsert_summary_impl};
use crate::database::transcripts_repo::{
    find_transcripts_by_owner_impl, get_transcript_impl, upsert_transcript_impl,
};
use crate::database::{
    CompleteRecord, DatabaseManager, GeoLocation, ProcessingState, Recording, Summary, SummaryContent,
    Transcript, TranscriptSegment, Workflow,
};
use crate::error::ReconcileError;
use crate::paths::{PathVirtualizer, Resolution};
use crate::reconcile::{Reconciler, ReconciliationReport};

/// Metadata supplied when a recording is registered
#[derive(Debug, Clone, Default)]
pub struct NewRecording {
    pub name: String,
    pub recorded_at: Option<DateTime<Utc>>,
    pub file_size: i64,
    pub duration: f64,
    pub location: Option<GeoLocation>,
}

pub struct RecordingLibrary {
    db: Arc<DatabaseManager>,
    config: StoreConfig,
}

impl RecordingLibrary {
    pub fn new(db: Arc<DatabaseManager>, config: StoreConfig) -> Self {
        Self { db, config }
    }

    /// Open the database named by the config and apply persisted overrides
    pub fn open(mut config: StoreConfig) -> Result<Self> {
        let db = DatabaseManager::new(config.database_path.clone())
            .context("Failed to open recording store")?;
        config.load_overrides(&db)?;
        Ok(Self::new(Arc::new(db), config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn database(&self) -> Arc<DatabaseManager> {
        self.db.clone()
    }

    /// Point the library at a relocated storage root and persist the choice
    pub fn set_storage_root(&mut self, root: PathBuf) -> Result<()> {
        let mut config = self.config.clone();
        config.storage_root = root;
        self.db.save_store_settings(&config.to_settings())
            .context("Failed to persist storage root")?;

        log::info!("Storage root changed: {:?} -> {:?}", self.config.storage_root, config.storage_root);
        self.config = config;
        Ok(())
    }

    /// A virtualizer for the current root; its listing cache lives for one call
    fn paths(&self) -> PathVirtualizer {
        PathVirtualizer::new(self.config.storage_root.clone())
    }

    // ============== Ingress ==============

    /// Register a recording for a media file and return its id
    pub fn create_recording(&self, media_path: &Path, meta: NewRecording) -> Result<String> {
        let token = self.paths().to_token(media_path);
        let recorded_at = meta.recorded_at.unwrap_or_else(Utc::now);

        let mut recording = Recording::new(&meta.name, recorded_at, Some(token));
        recording.file_size = meta.file_size;
        recording.duration = meta.duration;
        recording.location = meta.location;

        self.db.upsert_recording(&mut recording)?;
        log::info!(
            "Created recording {} ('{}') with media token {:?}",
            recording.id, recording.name, recording.media_token
        );
        Ok(recording.id)
    }

    /// Attach a transcript, replacing the recording's current one in place
    pub fn attach_transcript(
        &self,
        recording_id: &str,
        segments: Vec<TranscriptSegment>,
        engine: &str,
        confidence: f64,
    ) -> Result<String> {
        self.db.with_transaction(|tx| {
            let Some(mut recording) = get_recording_impl(tx, recording_id)? else {
                bail!("Recording not found: {}", recording_id);
            };

            let current = match recording.transcript_id.as_deref() {
                Some(id) => get_transcript_impl(tx, id)?.filter(|t| t.owner_id == recording_id),
                None => None,
            };
            let current = match current {
                Some(t) => Some(t),
                None => find_transcripts_by_owner_impl(tx, recording_id)?.into_iter().next(),
            };

            let mut transcript = match current {
                Some(mut existing) => {
                    log::info!("Replacing transcript {} of recording {}", existing.id, recording_id);
                    existing.segments = segments;
                    existing.engine = engine.to_string();
                    existing.confidence = confidence;
                    existing
                }
                None => Transcript::new(recording_id, segments, engine, confidence),
            };
            upsert_transcript_impl(tx, &mut transcript)?;

            recording.transcript_id = Some(transcript.id.clone());
            recording.transcription_state = ProcessingState::Completed;
            upsert_recording_impl(tx, &mut recording)?;

            Ok(transcript.id)
        })
    }

    /// Attach a summary, replacing the current one in place and bumping its version.
    /// A transcript link that does not name a transcript of the same recording is dropped.
    pub fn attach_summary(
        &self,
        recording_id: &str,
        transcript_id: Option<String>,
        content: SummaryContent,
    ) -> Result<String> {
        self.db.with_transaction(|tx| {
            let Some(mut recording) = get_recording_impl(tx, recording_id)? else {
                bail!("Recording not found: {}", recording_id);
            };

            let source = match transcript_id.as_deref() {
                Some(id) => {
                    let found = get_transcript_impl(tx, id)?.filter(|t| t.owner_id == recording_id);
                    if found.is_none() {
                        log::warn!(
                            "Dropping transcript link {} on summary for {}: not a transcript of this recording",
                            id, recording_id
                        );
                    }
                    found
                }
                None => None,
            };

            let mut content = content;
            if content.original_length == 0 {
                if let Some(t) = &source {
                    content.original_length = t.word_count() as i64;
                }
            }
            let source_id = source.map(|t| t.id);

            let current = match recording.summary_id.as_deref() {
                Some(id) => get_summary_impl(tx, id)?.filter(|s| s.owner_id == recording_id),
                None => None,
            };
            let current = match current {
                Some(s) => Some(s),
                None => find_summaries_by_owner_impl(tx, recording_id)?.into_iter().next(),
            };

            let mut summary = match current {
                Some(existing) => {
                    let mut replaced = Summary::from_parts(recording_id, source_id, content);
                    replaced.id = existing.id;
                    replaced.version = existing.version + 1;
                    log::info!(
                        "Replacing summary {} of recording {} (version {})",
                        replaced.id, recording_id, replaced.version
                    );
                    replaced
                }
                None => Summary::from_parts(recording_id, source_id, content),
            };
            upsert_summary_impl(tx, &mut summary)?;

            recording.summary_id = Some(summary.id.clone());
            recording.summary_state = ProcessingState::Completed;
            upsert_recording_impl(tx, &mut recording)?;

            Ok(summary.id)
        })
    }

    pub fn rename_recording(&self, id: &str, new_name: &str) -> Result<bool> {
        let renamed = self.db.rename_recording(id, new_name)?;
        if renamed {
            log::info!("Renamed recording {} to '{}'", id, new_name);
        }
        Ok(renamed)
    }

    pub fn set_processing_state(&self, id: &str, workflow: Workflow, state: ProcessingState) -> Result<bool> {
        self.db.set_processing_state(id, workflow, state)
    }

    /// Explicit user deletion; owned transcripts and summaries go with it
    pub fn delete_recording(&self, id: &str) -> Result<bool> {
        self.db.delete_recording(id)
    }

    // ============== Egress ==============

    /// Resolve a recording's media against the current root
    pub fn resolve_media(&self, recording: &Recording) -> Resolution {
        match recording.media_token.as_deref() {
            Some(token) => self.paths().resolve(token),
            None => Resolution::NotFound,
        }
    }

    /// Absolute path of a recording's media, if it can be found
    pub fn media_path(&self, recording: &Recording) -> Option<PathBuf> {
        self.resolve_media(recording).path().map(Path::to_path_buf)
    }

    /// Get a recording, re-persisting its media token when it was found by file name
    pub fn get_recording(&self, id: &str) -> Result<Option<Recording>> {
        let Some(mut recording) = self.db.get_recording(id)? else {
            return Ok(None);
        };

        if let Some(healed) = self.resolve_media(&recording).healed_token() {
            log::info!(
                "Self-healing media token of recording {}: {:?} -> '{}'",
                recording.id, recording.media_token, healed
            );
            recording.media_token = Some(healed.to_string());
            self.db.upsert_recording(&mut recording)?;
        }

        Ok(Some(recording))
    }

    /// Find the recording whose media is the given file
    pub fn get_by_media_path(&self, path: &Path) -> Result<Option<Recording>> {
        let token = self.paths().to_token(path);
        if let Some(recording) = self.db.find_recording_by_token(&token)? {
            return self.get_recording(&recording.id);
        }

        // Stored tokens may predate a layout change; match on the file name
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(None);
        };
        let candidate = self
            .db
            .find_recordings_by_token_suffix(&file_name)?
            .into_iter()
            .find(|r| r.media_file_name() == Some(file_name.as_str()));

        match candidate {
            Some(recording) => self.get_recording(&recording.id),
            None => Ok(None),
        }
    }

    /// A recording with its current transcript and summary
    pub fn get_complete_record(&self, id: &str) -> Result<Option<CompleteRecord>> {
        let Some(recording) = self.get_recording(id)? else {
            return Ok(None);
        };

        let transcript = match recording.transcript_id.as_deref() {
            Some(tid) => self.db.get_transcript(tid)?.filter(|t| t.owner_id == recording.id),
            None => None,
        };
        let transcript = match transcript {
            Some(t) => Some(t),
            None => self.db.find_transcripts_by_owner(&recording.id)?.into_iter().next(),
        };

        let summary = match recording.summary_id.as_deref() {
            Some(sid) => self.db.get_summary(sid)?.filter(|s| s.owner_id == recording.id),
            None => None,
        };
        let summary = match summary {
            Some(s) => Some(s),
            None => self.db.find_summaries_by_owner(&recording.id)?.into_iter().next(),
        };

        Ok(Some(CompleteRecord { recording, transcript, summary }))
    }

    /// Every recording that owns a transcript or summary, most recent first
    pub fn list_all_with_content(&self) -> Result<Vec<CompleteRecord>> {
        let snapshot = self.db.load_snapshot()?;

        let mut transcripts: HashMap<String, Vec<Transcript>> = HashMap::new();
        for t in snapshot.transcripts {
            transcripts.entry(t.owner_id.clone()).or_default().push(t);
        }
        let mut summaries: HashMap<String, Vec<Summary>> = HashMap::new();
        for s in snapshot.summaries {
            summaries.entry(s.owner_id.clone()).or_default().push(s);
        }

        let mut records: Vec<CompleteRecord> = snapshot
            .recordings
            .into_iter()
            .map(|recording| {
                let transcript = pick_current(
                    transcripts.remove(&recording.id).unwrap_or_default(),
                    recording.transcript_id.as_deref(),
                    |t| (&t.id, t.modified_at),
                );
                let summary = pick_current(
                    summaries.remove(&recording.id).unwrap_or_default(),
                    recording.summary_id.as_deref(),
                    |s| (&s.id, s.modified_at),
                );
                CompleteRecord { recording, transcript, summary }
            })
            .filter(|record| record.has_content())
            .collect();

        records.sort_by(|a, b| b.recording.recorded_at.cmp(&a.recording.recorded_at));
        Ok(records)
    }

    // ============== Maintenance ==============

    /// Run one reconciliation pass on the calling thread
    pub fn run_reconciliation(&self, apply: bool) -> ReconciliationReport {
        Reconciler::new(&self.db, &self.config).run(apply)
    }

    /// Retry committing the change set of a failed pass
    pub fn commit(&self, report: &mut ReconciliationReport) -> Result<(), ReconcileError> {
        Reconciler::new(&self.db, &self.config).commit(report)
    }
}

/// The child the slot names, else the most recently modified one
fn pick_current<T>(
    children: Vec<T>,
    slot: Option<&str>,
    key: impl Fn(&T) -> (&String, DateTime<Utc>),
) -> Option<T> {
    let slotted = slot.and_then(|id| children.iter().position(|c| key(c).0 == id));
    let index = slotted.or_else(|| {
        children
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| key(*a).1.cmp(&key(*b).1))
            .map(|(i, _)| i)
    })?;
    children.into_iter().nth(index)
}
