// Database models - Transcript
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transcript segment (one speaker turn)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub speaker: String,
    pub text: String,
    /// Offsets into the audio, in seconds
    pub start_time: f64,
    pub end_time: f64,
}

impl TranscriptSegment {
    pub fn new(speaker: &str, text: &str, start_time: f64, end_time: f64) -> Self {
        Self {
            speaker: speaker.to_string(),
            text: text.to_string(),
            start_time,
            end_time,
        }
    }
}

/// The current transcription of a recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    pub id: String,
    /// Id of the owning recording
    pub owner_id: String,
    pub segments: Vec<TranscriptSegment>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Identifier of the engine that produced the transcript (e.g. "whisper-large-v3")
    pub engine: String,
    /// Wall-clock seconds spent transcribing
    pub processing_duration: f64,
    pub confidence: f64,
}

impl Transcript {
    pub fn new(owner_id: &str, segments: Vec<TranscriptSegment>, engine: &str, confidence: f64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            segments,
            created_at: now,
            modified_at: now,
            engine: engine.to_string(),
            processing_duration: 0.0,
            confidence,
        }
    }

    /// All segment texts joined with single spaces
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn word_count(&self) -> usize {
        self.segments.iter().map(|s| s.text.split_whitespace().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_text_skips_blank_segments() {
        let transcript = Transcript::new(
            "rec",
            vec![
                TranscriptSegment::new("Speaker 1", "Hello there", 0.0, 1.5),
                TranscriptSegment::new("Speaker 2", "   ", 1.5, 2.0),
                TranscriptSegment::new("Speaker 1", "General Kenobi", 2.0, 3.5),
            ],
            "whisper",
            0.9,
        );

        assert_eq!(transcript.full_text(), "Hello there General Kenobi");
        assert_eq!(transcript.word_count(), 4);
        assert!(!transcript.is_empty());
    }

    #[test]
    fn test_transcript_without_text_is_empty() {
        let transcript = Transcript::new("rec", vec![], "whisper", 0.0);
        assert!(transcript.is_empty());
    }
}
