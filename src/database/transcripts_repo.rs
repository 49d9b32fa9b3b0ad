// Transcripts repository
// Handles CRUD operations for transcripts

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::Transcript;
use super::rows::{format_timestamp, EntityKind, TranscriptRow, UndecodableRow, TRANSCRIPT_COLUMNS};
use super::DatabaseManager;

impl DatabaseManager {
    /// Insert a transcript, or replace the stored row with the same id
    pub fn upsert_transcript(&self, transcript: &mut Transcript) -> Result<()> {
        self.with_connection(|conn| {
            upsert_transcript_impl(conn, transcript)
        })
    }

    /// Get a transcript by ID
    pub fn get_transcript(&self, id: &str) -> Result<Option<Transcript>> {
        self.with_connection(|conn| {
            get_transcript_impl(conn, id)
        })
    }

    /// All transcripts whose owner_id is `recording_id` (newest first)
    pub fn find_transcripts_by_owner(&self, recording_id: &str) -> Result<Vec<Transcript>> {
        self.with_connection(|conn| {
            find_transcripts_by_owner_impl(conn, recording_id)
        })
    }

    /// Get all transcripts
    pub fn list_transcripts(&self) -> Result<Vec<Transcript>> {
        self.with_connection(|conn| {
            query_transcripts(conn, "", [])
        })
    }

    /// Delete a single transcript row
    pub fn delete_transcript(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            delete_transcript_impl(conn, id)
        })
    }
}

pub(crate) fn upsert_transcript_impl(conn: &Connection, transcript: &mut Transcript) -> Result<()> {
    transcript.modified_at = Utc::now();

    let segments_json = serde_json::to_string(&transcript.segments)
        .context("Failed to encode transcript segments")?;

    conn.execute(
        r#"
        INSERT INTO transcripts (
            id, owner_id, segments_json, created_at, modified_at,
            engine, processing_duration, confidence
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            owner_id = excluded.owner_id,
            segments_json = excluded.segments_json,
            created_at = excluded.created_at,
            modified_at = excluded.modified_at,
            engine = excluded.engine,
            processing_duration = excluded.processing_duration,
            confidence = excluded.confidence
        "#,
        params![
            transcript.id,
            transcript.owner_id,
            segments_json,
            format_timestamp(&transcript.created_at),
            format_timestamp(&transcript.modified_at),
            transcript.engine,
            transcript.processing_duration,
            transcript.confidence,
        ],
    ).context("Failed to save transcript")?;

    Ok(())
}

pub(crate) fn get_transcript_impl(conn: &Connection, id: &str) -> Result<Option<Transcript>> {
    let row = conn.query_row(
        &format!("SELECT {} FROM transcripts WHERE id = ?", TRANSCRIPT_COLUMNS),
        params![id],
        TranscriptRow::from_row,
    ).optional().context("Failed to get transcript")?;

    row.map(TranscriptRow::decode).transpose()
}

pub(crate) fn find_transcripts_by_owner_impl(conn: &Connection, recording_id: &str) -> Result<Vec<Transcript>> {
    query_transcripts(conn, "WHERE owner_id = ?1", params![recording_id])
}

fn query_transcripts<P: rusqlite::Params>(conn: &Connection, filter: &str, params: P) -> Result<Vec<Transcript>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transcripts {} ORDER BY modified_at DESC",
        TRANSCRIPT_COLUMNS, filter
    )).context("Failed to prepare transcripts query")?;

    let rows = stmt.query_map(params, TranscriptRow::from_row)
        .context("Failed to query transcripts")?;

    let mut transcripts = Vec::new();
    for row in rows {
        let row = row.context("Failed to read transcript row")?;
        transcripts.push(row.decode()?);
    }
    Ok(transcripts)
}

/// Load every transcript, setting aside rows that fail to decode
pub(crate) fn load_transcripts_lenient(conn: &Connection) -> Result<(Vec<Transcript>, Vec<UndecodableRow>)> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM transcripts", TRANSCRIPT_COLUMNS))
        .context("Failed to prepare transcripts scan")?;
    let rows = stmt.query_map([], TranscriptRow::from_row)
        .context("Failed to scan transcripts")?;

    let mut transcripts = Vec::new();
    let mut undecodable = Vec::new();
    for row in rows {
        let row = row.context("Failed to read transcript row")?;
        let id = row.id().to_string();
        let owner_id = row.owner_id().to_string();
        match row.decode() {
            Ok(transcript) => transcripts.push(transcript),
            Err(e) => {
                log::warn!("Skipping undecodable transcript {}: {:#}", id, e);
                undecodable.push(UndecodableRow {
                    kind: EntityKind::Transcript,
                    id,
                    owner_id: Some(owner_id),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    Ok((transcripts, undecodable))
}

pub(crate) fn delete_transcript_impl(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM transcripts WHERE id = ?", params![id])
        .context("Failed to delete transcript")?;
    Ok(deleted > 0)
}
