//! Store configuration: where the database and media live, and the
//! duplicate-detection knobs used by reconciliation.

use anyhow::{Context, Result};
use chrono::Duration;
use std::path::PathBuf;

use crate::database::{DatabaseManager, StoreSettings};

/// Recordings captured this close together are candidates for a cross-identity merge
pub const DEFAULT_MERGE_WINDOW_MINUTES: i64 = 10;

const APP_DIR_NAME: &str = "meeting-local";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    /// Current storage root that media tokens are resolved against
    pub storage_root: PathBuf,
    pub merge_window: Duration,
    /// Extra regex patterns treated as generic capture names
    pub generic_name_patterns: Vec<String>,
}

impl StoreConfig {
    /// Config rooted at an explicit data directory
    pub fn new(database_path: PathBuf, storage_root: PathBuf) -> Self {
        Self {
            database_path,
            storage_root,
            merge_window: Duration::minutes(DEFAULT_MERGE_WINDOW_MINUTES),
            generic_name_patterns: Vec::new(),
        }
    }

    /// Defaults under the platform data directory
    pub fn platform_default() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .context("Failed to get app data directory")?
            .join(APP_DIR_NAME);

        Ok(Self::new(data_dir.join("meetlocal.db"), data_dir.join("recordings")))
    }

    /// Apply overrides persisted in the settings table.
    /// A persisted storage root only wins while that directory still exists.
    pub fn apply_settings(&mut self, settings: &StoreSettings) {
        if let Some(root) = settings.storage_root.as_deref().filter(|r| !r.trim().is_empty()) {
            let persisted = PathBuf::from(root);
            if persisted.is_dir() {
                self.storage_root = persisted;
            } else if persisted != self.storage_root {
                log::warn!(
                    "Persisted storage root {:?} no longer exists; using {:?}",
                    persisted, self.storage_root
                );
            }
        }
        if let Some(minutes) = settings.merge_window_minutes {
            if minutes > 0 {
                self.merge_window = Duration::minutes(minutes);
            } else {
                log::warn!("Ignoring non-positive merge window of {} minutes", minutes);
            }
        }
        self.generic_name_patterns = settings.generic_name_patterns.clone();
    }

    /// Load settings from the database on top of the current values
    pub fn load_overrides(&mut self, db: &DatabaseManager) -> Result<()> {
        let settings = db.load_store_settings()
            .context("Failed to load store settings")?;
        self.apply_settings(&settings);
        log::info!(
            "Store config: root={:?}, merge window={} min, {} extra generic patterns",
            self.storage_root,
            self.merge_window.num_minutes(),
            self.generic_name_patterns.len()
        );
        Ok(())
    }

    /// The settings that represent this config
    pub fn to_settings(&self) -> StoreSettings {
        StoreSettings {
            storage_root: Some(self.storage_root.to_string_lossy().into_owned()),
            merge_window_minutes: Some(self.merge_window.num_minutes()),
            generic_name_patterns: self.generic_name_patterns.clone(),
        }
    }
}
