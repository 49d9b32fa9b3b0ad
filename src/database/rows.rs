// Raw row mapping for the entity tables
//
// Rows are read as plain text and untyped values first and decoded afterwards
// so a single corrupt row (bad JSON, bad timestamp, text in a numeric column)
// can be isolated by the caller instead of failing the whole query.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::models::{
    ContentType, GeoLocation, ProcessingState, Recording, Summary, Transcript,
};

pub(crate) const RECORDING_COLUMNS: &str = "id, name, recorded_at, media_token, file_size, duration, \
    location_json, transcription_state, summary_state, transcript_id, summary_id, last_modified";

pub(crate) const TRANSCRIPT_COLUMNS: &str = "id, owner_id, segments_json, created_at, modified_at, \
    engine, processing_duration, confidence";

pub(crate) const SUMMARY_COLUMNS: &str = "id, owner_id, transcript_id, text, tasks_json, reminders_json, \
    titles_json, content_type, method, generated_at, modified_at, version, word_count, \
    original_length, compression_ratio";

/// Which entity table a row came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Recording,
    Transcript,
    Summary,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Recording => "recording",
            EntityKind::Transcript => "transcript",
            EntityKind::Summary => "summary",
        }
    }
}

/// A row that exists in the database but could not be decoded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UndecodableRow {
    pub kind: EntityKind,
    pub id: String,
    pub owner_id: Option<String>,
    pub error: String,
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    // SQLite's datetime('now') format
    let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Invalid timestamp: {}", value))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn real_column(value: &Value, column: &str) -> Result<f64> {
    match value {
        Value::Real(v) => Ok(*v),
        Value::Integer(v) => Ok(*v as f64),
        other => Err(anyhow!("Column {} holds {}, expected a number", column, other.data_type())),
    }
}

fn integer_column(value: &Value, column: &str) -> Result<i64> {
    match value {
        Value::Integer(v) => Ok(*v),
        Value::Real(v) if v.fract() == 0.0 => Ok(*v as i64),
        other => Err(anyhow!("Column {} holds {}, expected an integer", column, other.data_type())),
    }
}

pub(crate) struct RecordingRow {
    id: String,
    name: String,
    recorded_at: String,
    media_token: Option<String>,
    file_size: Value,
    duration: Value,
    location_json: Option<String>,
    transcription_state: String,
    summary_state: String,
    transcript_id: Option<String>,
    summary_id: Option<String>,
    last_modified: String,
}

impl RecordingRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            recorded_at: row.get(2)?,
            media_token: row.get(3)?,
            file_size: row.get(4)?,
            duration: row.get(5)?,
            location_json: row.get(6)?,
            transcription_state: row.get(7)?,
            summary_state: row.get(8)?,
            transcript_id: row.get(9)?,
            summary_id: row.get(10)?,
            last_modified: row.get(11)?,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn decode(self) -> Result<Recording> {
        let location = match self.location_json.as_deref() {
            None | Some("") => None,
            Some(json) => match serde_json::from_str::<GeoLocation>(json) {
                Ok(location) => Some(location),
                Err(e) => {
                    // Location is auxiliary metadata; keep the recording usable
                    log::warn!("Dropping undecodable location on recording {}: {}", self.id, e);
                    None
                }
            },
        };

        let file_size = integer_column(&self.file_size, "file_size")
            .with_context(|| format!("Malformed recording {}", self.id))?;
        let duration = real_column(&self.duration, "duration")
            .with_context(|| format!("Malformed recording {}", self.id))?;

        Ok(Recording {
            recorded_at: parse_timestamp(&self.recorded_at)?,
            last_modified: parse_timestamp(&self.last_modified)?,
            id: self.id,
            name: self.name,
            media_token: self.media_token,
            file_size,
            duration,
            location,
            transcription_state: ProcessingState::from_str(&self.transcription_state),
            summary_state: ProcessingState::from_str(&self.summary_state),
            transcript_id: self.transcript_id.filter(|id| !id.is_empty()),
            summary_id: self.summary_id.filter(|id| !id.is_empty()),
        })
    }
}

pub(crate) struct TranscriptRow {
    id: String,
    owner_id: String,
    segments_json: String,
    created_at: String,
    modified_at: String,
    engine: String,
    processing_duration: Value,
    confidence: Value,
}

impl TranscriptRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            segments_json: row.get(2)?,
            created_at: row.get(3)?,
            modified_at: row.get(4)?,
            engine: row.get(5)?,
            processing_duration: row.get(6)?,
            confidence: row.get(7)?,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub(crate) fn decode(self) -> Result<Transcript> {
        let segments = serde_json::from_str(&self.segments_json)
            .with_context(|| format!("Malformed segments on transcript {}", self.id))?;

        let processing_duration = real_column(&self.processing_duration, "processing_duration")
            .with_context(|| format!("Malformed transcript {}", self.id))?;
        let confidence = real_column(&self.confidence, "confidence")
            .with_context(|| format!("Malformed transcript {}", self.id))?;

        Ok(Transcript {
            created_at: parse_timestamp(&self.created_at)?,
            modified_at: parse_timestamp(&self.modified_at)?,
            id: self.id,
            owner_id: self.owner_id,
            segments,
            engine: self.engine,
            processing_duration,
            confidence,
        })
    }
}

pub(crate) struct SummaryRow {
    id: String,
    owner_id: String,
    transcript_id: Option<String>,
    text: String,
    tasks_json: String,
    reminders_json: String,
    titles_json: String,
    content_type: String,
    method: String,
    generated_at: String,
    modified_at: String,
    version: Value,
    word_count: Value,
    original_length: Value,
    compression_ratio: Value,
}

impl SummaryRow {
    pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            transcript_id: row.get(2)?,
            text: row.get(3)?,
            tasks_json: row.get(4)?,
            reminders_json: row.get(5)?,
            titles_json: row.get(6)?,
            content_type: row.get(7)?,
            method: row.get(8)?,
            generated_at: row.get(9)?,
            modified_at: row.get(10)?,
            version: row.get(11)?,
            word_count: row.get(12)?,
            original_length: row.get(13)?,
            compression_ratio: row.get(14)?,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub(crate) fn decode(self) -> Result<Summary> {
        let tasks = serde_json::from_str(&self.tasks_json)
            .with_context(|| format!("Malformed tasks on summary {}", self.id))?;
        let reminders = serde_json::from_str(&self.reminders_json)
            .with_context(|| format!("Malformed reminders on summary {}", self.id))?;
        let titles = serde_json::from_str(&self.titles_json)
            .with_context(|| format!("Malformed titles on summary {}", self.id))?;

        let malformed = || format!("Malformed counters on summary {}", self.id);
        let version = integer_column(&self.version, "version").with_context(&malformed)?;
        let word_count = integer_column(&self.word_count, "word_count").with_context(&malformed)?;
        let original_length =
            integer_column(&self.original_length, "original_length").with_context(&malformed)?;
        let compression_ratio =
            real_column(&self.compression_ratio, "compression_ratio").with_context(&malformed)?;

        Ok(Summary {
            generated_at: parse_timestamp(&self.generated_at)?,
            modified_at: parse_timestamp(&self.modified_at)?,
            id: self.id,
            owner_id: self.owner_id,
            transcript_id: self.transcript_id.filter(|id| !id.is_empty()),
            text: self.text,
            tasks,
            reminders,
            titles,
            content_type: ContentType::from_str(&self.content_type),
            method: self.method,
            version,
            word_count,
            original_length,
            compression_ratio,
        })
    }
}
