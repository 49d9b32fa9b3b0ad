// Database migrations for the recording store
// Creates and updates the database schema

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all necessary migrations to bring the database up to date
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    ).context("Failed to check for schema_version table")?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    ).context("Failed to read schema version")?;

    Ok(version.unwrap_or(0))
}

/// Initial schema creation (version 1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    log::info!("Running database migration v1");

    // No foreign keys: the owner/child ids are denormalized on purpose and
    // kept consistent by the relationship repairer.
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Settings table: Key-value store for store configuration
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            value_type TEXT NOT NULL DEFAULT 'string',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Recordings: one row per capture/import, media stored as a root-relative token
        CREATE TABLE IF NOT EXISTS recordings (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            media_token TEXT,
            file_size INTEGER NOT NULL DEFAULT 0,
            duration REAL NOT NULL DEFAULT 0,
            location_json TEXT,
            transcription_state TEXT NOT NULL DEFAULT 'not_started',
            summary_state TEXT NOT NULL DEFAULT 'not_started',
            transcript_id TEXT,
            summary_id TEXT,
            last_modified TEXT NOT NULL
        );

        -- Transcripts: the current transcription of a recording
        CREATE TABLE IF NOT EXISTS transcripts (
            id TEXT PRIMARY KEY NOT NULL,
            owner_id TEXT NOT NULL,
            segments_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            engine TEXT NOT NULL,
            processing_duration REAL NOT NULL DEFAULT 0,
            confidence REAL NOT NULL DEFAULT 0
        );

        -- Summaries: the current generated summary of a recording
        CREATE TABLE IF NOT EXISTS summaries (
            id TEXT PRIMARY KEY NOT NULL,
            owner_id TEXT NOT NULL,
            transcript_id TEXT,
            text TEXT NOT NULL DEFAULT '',
            tasks_json TEXT NOT NULL DEFAULT '[]',
            reminders_json TEXT NOT NULL DEFAULT '[]',
            titles_json TEXT NOT NULL DEFAULT '[]',
            content_type TEXT NOT NULL DEFAULT 'general',
            method TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            word_count INTEGER NOT NULL DEFAULT 0,
            original_length INTEGER NOT NULL DEFAULT 0,
            compression_ratio REAL NOT NULL DEFAULT 0
        );

        INSERT INTO schema_version (version) VALUES (1);
    "#).context("Failed to run migration v1")?;

    log::info!("Migration v1 completed successfully");
    Ok(())
}

/// Lookup indexes for owner and name predicates (version 2)
fn migrate_v2(conn: &Connection) -> Result<()> {
    log::info!("Running database migration v2 - Lookup indexes");

    conn.execute_batch(r#"
        CREATE INDEX IF NOT EXISTS idx_transcripts_owner ON transcripts(owner_id);
        CREATE INDEX IF NOT EXISTS idx_summaries_owner ON summaries(owner_id);
        CREATE INDEX IF NOT EXISTS idx_recordings_name ON recordings(name);
        CREATE INDEX IF NOT EXISTS idx_recordings_media_token ON recordings(media_token);

        INSERT INTO schema_version (version) VALUES (2);
    "#).context("Failed to run migration v2")?;

    log::info!("Migration v2 completed successfully");
    Ok(())
}
