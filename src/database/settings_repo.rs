// Settings repository
// Handles CRUD operations for store settings

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{Setting, StoreSettings};
use super::DatabaseManager;

pub const KEY_STORAGE_ROOT: &str = "storage_root";
pub const KEY_MERGE_WINDOW_MINUTES: &str = "merge_window_minutes";
pub const KEY_GENERIC_NAME_PATTERNS: &str = "generic_name_patterns";

impl DatabaseManager {
    /// Get a single setting by key
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            get_setting_impl(conn, key)
        })
    }

    /// Set a single setting
    pub fn set_setting(&self, key: &str, value: &str, value_type: &str) -> Result<()> {
        self.with_connection(|conn| {
            set_setting_impl(conn, key, value, value_type)
        })
    }

    /// Get all settings
    pub fn get_all_settings_list(&self) -> Result<Vec<Setting>> {
        self.with_connection(|conn| {
            get_all_settings_impl(conn)
        })
    }

    /// Load the store settings as a structured object
    pub fn load_store_settings(&self) -> Result<StoreSettings> {
        self.with_connection(|conn| {
            load_store_settings_impl(conn)
        })
    }

    /// Persist the store settings; unset fields are removed
    pub fn save_store_settings(&self, settings: &StoreSettings) -> Result<()> {
        self.with_transaction(|tx| {
            match &settings.storage_root {
                Some(root) => set_setting_impl(tx, KEY_STORAGE_ROOT, root, "string")?,
                None => delete_setting_impl(tx, KEY_STORAGE_ROOT)?,
            }
            match settings.merge_window_minutes {
                Some(minutes) => set_setting_impl(tx, KEY_MERGE_WINDOW_MINUTES, &minutes.to_string(), "integer")?,
                None => delete_setting_impl(tx, KEY_MERGE_WINDOW_MINUTES)?,
            }
            let patterns = serde_json::to_string(&settings.generic_name_patterns)
                .context("Failed to encode generic name patterns")?;
            set_setting_impl(tx, KEY_GENERIC_NAME_PATTERNS, &patterns, "json")?;
            Ok(())
        })
    }

    /// Delete a setting by key
    pub fn delete_setting(&self, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            delete_setting_impl(conn, key)
        })
    }
}

fn get_setting_impl(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?",
        params![key],
        |row| row.get(0),
    ).optional().context("Failed to get setting")
}

fn set_setting_impl(conn: &Connection, key: &str, value: &str, value_type: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO settings (key, value, value_type, updated_at)
        VALUES (?1, ?2, ?3, datetime('now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            value_type = excluded.value_type,
            updated_at = datetime('now')
        "#,
        params![key, value, value_type],
    ).context("Failed to set setting")?;

    Ok(())
}

fn get_all_settings_impl(conn: &Connection) -> Result<Vec<Setting>> {
    let mut stmt = conn.prepare(
        "SELECT key, value, value_type, updated_at FROM settings"
    ).context("Failed to prepare get_all_settings query")?;

    let settings = stmt.query_map([], |row| {
        Ok(Setting {
            key: row.get(0)?,
            value: row.get(1)?,
            value_type: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }).context("Failed to query settings")?;

    settings.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect settings")
}

fn load_store_settings_impl(conn: &Connection) -> Result<StoreSettings> {
    let mut settings = StoreSettings::default();

    for setting in get_all_settings_impl(conn)? {
        match setting.key.as_str() {
            KEY_STORAGE_ROOT => settings.storage_root = Some(setting.value),
            KEY_MERGE_WINDOW_MINUTES => match setting.value.parse::<i64>() {
                Ok(minutes) => settings.merge_window_minutes = Some(minutes),
                Err(e) => log::warn!("Ignoring invalid merge window '{}': {}", setting.value, e),
            },
            KEY_GENERIC_NAME_PATTERNS => match serde_json::from_str::<Vec<String>>(&setting.value) {
                Ok(patterns) => settings.generic_name_patterns = patterns,
                Err(e) => log::warn!("Ignoring invalid generic name patterns: {}", e),
            },
            _ => {
                log::debug!("Unknown setting key: {}", setting.key);
            }
        }
    }

    Ok(settings)
}

fn delete_setting_impl(conn: &Connection, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM settings WHERE key = ?",
        params![key],
    ).context("Failed to delete setting")?;

    Ok(())
}
