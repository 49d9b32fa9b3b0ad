// Database models - Recording
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of the transcription or summary workflow for a recording
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    NotStarted,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::NotStarted => "not_started",
            ProcessingState::Queued => "queued",
            ProcessingState::Processing => "processing",
            ProcessingState::Completed => "completed",
            ProcessingState::Failed => "failed",
            ProcessingState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "queued" => ProcessingState::Queued,
            "processing" => ProcessingState::Processing,
            "completed" => ProcessingState::Completed,
            "failed" => ProcessingState::Failed,
            "cancelled" => ProcessingState::Cancelled,
            _ => ProcessingState::NotStarted,
        }
    }
}

/// Where a recording was captured
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    /// Reverse-geocoded address, if one was resolved
    #[serde(default)]
    pub address: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl GeoLocation {
    /// Two locations describe the same capture spot when their coordinates are identical
    pub fn same_position(&self, other: &GeoLocation) -> bool {
        (self.latitude - other.latitude).abs() < 1e-9
            && (self.longitude - other.longitude).abs() < 1e-9
    }
}

/// A single audio capture or import
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recording {
    pub id: String,
    pub name: String,
    pub recorded_at: DateTime<Utc>,
    /// Storage-root-relative token of the media file. `None` when the audio was
    /// removed but the transcript/summary were kept.
    pub media_token: Option<String>,
    pub file_size: i64,
    pub duration: f64,
    pub location: Option<GeoLocation>,
    pub transcription_state: ProcessingState,
    pub summary_state: ProcessingState,
    pub transcript_id: Option<String>,
    pub summary_id: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl Recording {
    pub fn new(name: &str, recorded_at: DateTime<Utc>, media_token: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            recorded_at,
            media_token,
            file_size: 0,
            duration: 0.0,
            location: None,
            transcription_state: ProcessingState::NotStarted,
            summary_state: ProcessingState::NotStarted,
            transcript_id: None,
            summary_id: None,
            last_modified: Utc::now(),
        }
    }

    /// Final path component of the media token, if any
    pub fn media_file_name(&self) -> Option<&str> {
        self.media_token
            .as_deref()
            .and_then(|token| token.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
    }
}

/// A recording together with whatever transcript and summary it currently owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRecord {
    pub recording: Recording,
    pub transcript: Option<super::Transcript>,
    pub summary: Option<super::Summary>,
}

impl CompleteRecord {
    pub fn has_content(&self) -> bool {
        self.transcript.is_some() || self.summary.is_some()
    }
}
