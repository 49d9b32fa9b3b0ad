// Database models - Re-exports all domain-specific models
//
// This module is split into focused files by entity:
// - settings.rs: Store settings
// - recording.rs: Recording data, geolocation and processing state
// - transcript.rs: Transcripts and their segments
// - summary.rs: Summaries with tasks, reminders and title candidates

mod settings;
mod recording;
mod transcript;
mod summary;

pub use settings::{Setting, StoreSettings};
pub use recording::{CompleteRecord, GeoLocation, ProcessingState, Recording};
pub use transcript::{Transcript, TranscriptSegment};
pub use summary::{
    ContentType, Priority, ReminderItem, Summary, SummaryContent, TaskItem, TitleCandidate,
};
