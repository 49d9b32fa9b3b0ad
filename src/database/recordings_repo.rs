// Recordings repository
// Handles CRUD and predicate queries for recordings

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{ProcessingState, Recording};
use super::rows::{format_timestamp, EntityKind, RecordingRow, UndecodableRow, RECORDING_COLUMNS};
use super::DatabaseManager;

/// Which processing workflow a state update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Transcription,
    Summary,
}

impl DatabaseManager {
    /// Insert a recording, or replace the stored row with the same id
    pub fn upsert_recording(&self, recording: &mut Recording) -> Result<()> {
        self.with_connection(|conn| {
            upsert_recording_impl(conn, recording)
        })
    }

    /// Get a recording by ID
    pub fn get_recording(&self, id: &str) -> Result<Option<Recording>> {
        self.with_connection(|conn| {
            get_recording_impl(conn, id)
        })
    }

    /// Get all recordings (most recent first)
    pub fn list_recordings(&self) -> Result<Vec<Recording>> {
        self.with_connection(|conn| {
            list_recordings_impl(conn)
        })
    }

    /// Recordings whose display name equals `name`
    pub fn find_recordings_by_name(&self, name: &str) -> Result<Vec<Recording>> {
        self.with_connection(|conn| {
            query_recordings(conn, "WHERE name = ?1", params![name])
        })
    }

    /// The recording stored with exactly this media token
    pub fn find_recording_by_token(&self, token: &str) -> Result<Option<Recording>> {
        self.with_connection(|conn| {
            let mut found = query_recordings(conn, "WHERE media_token = ?1", params![token])?;
            Ok(if found.is_empty() { None } else { Some(found.remove(0)) })
        })
    }

    /// Recordings whose media token ends with `suffix` (e.g. a bare file name)
    pub fn find_recordings_by_token_suffix(&self, suffix: &str) -> Result<Vec<Recording>> {
        if suffix.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| {
            query_recordings(
                conn,
                "WHERE media_token IS NOT NULL AND substr(media_token, -length(?1)) = ?1",
                params![suffix],
            )
        })
    }

    /// Change the display name of a recording. Returns false when the id is unknown.
    pub fn rename_recording(&self, id: &str, new_name: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE recordings SET name = ?1, last_modified = ?2 WHERE id = ?3",
                params![new_name, format_timestamp(&Utc::now()), id],
            ).context("Failed to rename recording")?;
            Ok(updated > 0)
        })
    }

    /// Update the transcription or summary state of a recording
    pub fn set_processing_state(&self, id: &str, workflow: Workflow, state: ProcessingState) -> Result<bool> {
        let column = match workflow {
            Workflow::Transcription => "transcription_state",
            Workflow::Summary => "summary_state",
        };
        self.with_connection(|conn| {
            let updated = conn.execute(
                &format!("UPDATE recordings SET {} = ?1, last_modified = ?2 WHERE id = ?3", column),
                params![state.as_str(), format_timestamp(&Utc::now()), id],
            ).context("Failed to update processing state")?;
            Ok(updated > 0)
        })
    }

    /// Delete a recording together with every transcript and summary it owns
    pub fn delete_recording(&self, id: &str) -> Result<bool> {
        self.with_transaction(|tx| {
            delete_recording_cascade_impl(tx, id)
        })
    }
}

pub(crate) fn upsert_recording_impl(conn: &Connection, recording: &mut Recording) -> Result<()> {
    recording.last_modified = Utc::now();

    let location_json = recording
        .location
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to encode recording location")?;

    conn.execute(
        r#"
        INSERT INTO recordings (
            id, name, recorded_at, media_token, file_size, duration, location_json,
            transcription_state, summary_state, transcript_id, summary_id, last_modified
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            recorded_at = excluded.recorded_at,
            media_token = excluded.media_token,
            file_size = excluded.file_size,
            duration = excluded.duration,
            location_json = excluded.location_json,
            transcription_state = excluded.transcription_state,
            summary_state = excluded.summary_state,
            transcript_id = excluded.transcript_id,
            summary_id = excluded.summary_id,
            last_modified = excluded.last_modified
        "#,
        params![
            recording.id,
            recording.name,
            format_timestamp(&recording.recorded_at),
            recording.media_token,
            recording.file_size,
            recording.duration,
            location_json,
            recording.transcription_state.as_str(),
            recording.summary_state.as_str(),
            recording.transcript_id,
            recording.summary_id,
            format_timestamp(&recording.last_modified),
        ],
    ).context("Failed to save recording")?;

    Ok(())
}

pub(crate) fn get_recording_impl(conn: &Connection, id: &str) -> Result<Option<Recording>> {
    let row = conn.query_row(
        &format!("SELECT {} FROM recordings WHERE id = ?", RECORDING_COLUMNS),
        params![id],
        RecordingRow::from_row,
    ).optional().context("Failed to get recording")?;

    row.map(RecordingRow::decode).transpose()
}

fn list_recordings_impl(conn: &Connection) -> Result<Vec<Recording>> {
    query_recordings(conn, "", [])
}

fn query_recordings<P: rusqlite::Params>(conn: &Connection, filter: &str, params: P) -> Result<Vec<Recording>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM recordings {} ORDER BY recorded_at DESC",
        RECORDING_COLUMNS, filter
    )).context("Failed to prepare recordings query")?;

    let rows = stmt.query_map(params, RecordingRow::from_row)
        .context("Failed to query recordings")?;

    let mut recordings = Vec::new();
    for row in rows {
        let row = row.context("Failed to read recording row")?;
        recordings.push(row.decode()?);
    }
    Ok(recordings)
}

/// Load every recording, setting aside rows that fail to decode
pub(crate) fn load_recordings_lenient(conn: &Connection) -> Result<(Vec<Recording>, Vec<UndecodableRow>)> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM recordings", RECORDING_COLUMNS))
        .context("Failed to prepare recordings scan")?;
    let rows = stmt.query_map([], RecordingRow::from_row)
        .context("Failed to scan recordings")?;

    let mut recordings = Vec::new();
    let mut undecodable = Vec::new();
    for row in rows {
        let row = row.context("Failed to read recording row")?;
        let id = row.id().to_string();
        match row.decode() {
            Ok(recording) => recordings.push(recording),
            Err(e) => {
                log::warn!("Skipping undecodable recording {}: {:#}", id, e);
                undecodable.push(UndecodableRow {
                    kind: EntityKind::Recording,
                    id,
                    owner_id: None,
                    error: format!("{:#}", e),
                });
            }
        }
    }
    Ok((recordings, undecodable))
}

/// Delete only the recording row; owned children must already be re-parented
pub(crate) fn delete_recording_row_impl(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM recordings WHERE id = ?", params![id])
        .context("Failed to delete recording")?;
    Ok(deleted > 0)
}

fn delete_recording_cascade_impl(conn: &Connection, id: &str) -> Result<bool> {
    conn.execute("DELETE FROM transcripts WHERE owner_id = ?", params![id])
        .context("Failed to delete owned transcripts")?;
    conn.execute("DELETE FROM summaries WHERE owner_id = ?", params![id])
        .context("Failed to delete owned summaries")?;
    let deleted = delete_recording_row_impl(conn, id)?;
    if deleted {
        log::info!("Deleted recording {} and its owned content", id);
    }
    Ok(deleted)
}
