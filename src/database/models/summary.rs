// Database models - Summary
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence assumed for a list that has no entries
const EMPTY_LIST_CONFIDENCE: f64 = 0.5;

/// Classification of what kind of conversation a summary describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Meeting,
    Lecture,
    Interview,
    Conversation,
    PersonalNote,
    Brainstorm,
    #[default]
    General,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Meeting => "meeting",
            ContentType::Lecture => "lecture",
            ContentType::Interview => "interview",
            ContentType::Conversation => "conversation",
            ContentType::PersonalNote => "personal_note",
            ContentType::Brainstorm => "brainstorm",
            ContentType::General => "general",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "meeting" => ContentType::Meeting,
            "lecture" => ContentType::Lecture,
            "interview" => ContentType::Interview,
            "conversation" => ContentType::Conversation,
            "personal_note" => ContentType::PersonalNote,
            "brainstorm" => ContentType::Brainstorm,
            _ => ContentType::General,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// An action item extracted from the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskItem {
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due: Option<String>,
    pub confidence: f64,
}

/// Something the user should be reminded about
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReminderItem {
    pub text: String,
    #[serde(default)]
    pub time_reference: Option<String>,
    #[serde(default)]
    pub urgency: Priority,
    pub confidence: f64,
}

/// A suggested human-readable title for the recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitleCandidate {
    pub text: String,
    pub confidence: f64,
}

/// The current generated summary of a recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub id: String,
    /// Id of the owning recording
    pub owner_id: String,
    /// Transcript the summary was derived from, when known
    pub transcript_id: Option<String>,
    pub text: String,
    pub tasks: Vec<TaskItem>,
    pub reminders: Vec<ReminderItem>,
    pub titles: Vec<TitleCandidate>,
    pub content_type: ContentType,
    /// Identifier of the generating method (e.g. "local-llm", "extractive")
    pub method: String,
    pub generated_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub version: i64,
    pub word_count: i64,
    pub original_length: i64,
    pub compression_ratio: f64,
}

/// Generated content handed to `Summary::from_parts`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryContent {
    pub text: String,
    pub tasks: Vec<TaskItem>,
    pub reminders: Vec<ReminderItem>,
    pub titles: Vec<TitleCandidate>,
    pub content_type: ContentType,
    pub method: String,
    /// Word count of the source text the summary was generated from
    pub original_length: i64,
}

impl Summary {
    pub fn from_parts(owner_id: &str, transcript_id: Option<String>, content: SummaryContent) -> Self {
        let now = Utc::now();
        let mut summary = Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            transcript_id,
            text: content.text,
            tasks: content.tasks,
            reminders: content.reminders,
            titles: content.titles,
            content_type: content.content_type,
            method: content.method,
            generated_at: now,
            modified_at: now,
            version: 1,
            word_count: 0,
            original_length: content.original_length,
            compression_ratio: 0.0,
        };
        summary.recompute_statistics();
        summary
    }

    /// Refresh word count and compression ratio from the current text
    pub fn recompute_statistics(&mut self) {
        self.word_count = self.text.split_whitespace().count() as i64;
        self.compression_ratio = if self.original_length > 0 {
            self.word_count as f64 / self.original_length as f64
        } else {
            0.0
        };
    }

    /// Mean of the task, reminder and title confidences; an empty list counts as 0.5
    pub fn confidence(&self) -> f64 {
        let tasks = mean_or_default(self.tasks.iter().map(|t| t.confidence));
        let reminders = mean_or_default(self.reminders.iter().map(|r| r.confidence));
        let titles = mean_or_default(self.titles.iter().map(|t| t.confidence));
        (tasks + reminders + titles) / 3.0
    }

    /// Highest-confidence title suggestion
    pub fn best_title(&self) -> Option<&TitleCandidate> {
        self.titles
            .iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
            && self.tasks.is_empty()
            && self.reminders.is_empty()
            && self.titles.is_empty()
    }
}

fn mean_or_default(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        EMPTY_LIST_CONFIDENCE
    } else {
        sum / count as f64
    }
}
