// Database models - Settings
use serde::{Deserialize, Serialize};

/// A single setting stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub value_type: String,
    pub updated_at: String,
}

/// Store-related settings persisted in the settings table
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreSettings {
    pub storage_root: Option<String>,
    pub merge_window_minutes: Option<i64>,
    /// Extra generic-name patterns (regex) on top of the built-in ones
    pub generic_name_patterns: Vec<String>,
}
