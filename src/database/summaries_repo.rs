// Summaries repository
// Handles CRUD operations for summaries

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::Summary;
use super::rows::{format_timestamp, EntityKind, SummaryRow, UndecodableRow, SUMMARY_COLUMNS};
use super::DatabaseManager;

impl DatabaseManager {
    /// Insert a summary, or replace the stored row with the same id
    pub fn upsert_summary(&self, summary: &mut Summary) -> Result<()> {
        self.with_connection(|conn| {
            upsert_summary_impl(conn, summary)
        })
    }

    /// Get a summary by ID
    pub fn get_summary(&self, id: &str) -> Result<Option<Summary>> {
        self.with_connection(|conn| {
            get_summary_impl(conn, id)
        })
    }

    /// All summaries whose owner_id is `recording_id` (newest first)
    pub fn find_summaries_by_owner(&self, recording_id: &str) -> Result<Vec<Summary>> {
        self.with_connection(|conn| {
            find_summaries_by_owner_impl(conn, recording_id)
        })
    }

    /// Get all summaries
    pub fn list_summaries(&self) -> Result<Vec<Summary>> {
        self.with_connection(|conn| {
            query_summaries(conn, "", [])
        })
    }

    /// Delete a single summary row
    pub fn delete_summary(&self, id: &str) -> Result<bool> {
        self.with_connection(|conn| {
            delete_summary_impl(conn, id)
        })
    }
}

pub(crate) fn upsert_summary_impl(conn: &Connection, summary: &mut Summary) -> Result<()> {
    summary.modified_at = Utc::now();

    let tasks_json = serde_json::to_string(&summary.tasks)
        .context("Failed to encode summary tasks")?;
    let reminders_json = serde_json::to_string(&summary.reminders)
        .context("Failed to encode summary reminders")?;
    let titles_json = serde_json::to_string(&summary.titles)
        .context("Failed to encode summary titles")?;

    conn.execute(
        r#"
        INSERT INTO summaries (
            id, owner_id, transcript_id, text, tasks_json, reminders_json, titles_json,
            content_type, method, generated_at, modified_at, version, word_count,
            original_length, compression_ratio
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(id) DO UPDATE SET
            owner_id = excluded.owner_id,
            transcript_id = excluded.transcript_id,
            text = excluded.text,
            tasks_json = excluded.tasks_json,
            reminders_json = excluded.reminders_json,
            titles_json = excluded.titles_json,
            content_type = excluded.content_type,
            method = excluded.method,
            generated_at = excluded.generated_at,
            modified_at = excluded.modified_at,
            version = excluded.version,
            word_count = excluded.word_count,
            original_length = excluded.original_length,
            compression_ratio = excluded.compression_ratio
        "#,
        params![
            summary.id,
            summary.owner_id,
            summary.transcript_id,
            summary.text,
            tasks_json,
            reminders_json,
            titles_json,
            summary.content_type.as_str(),
            summary.method,
            format_timestamp(&summary.generated_at),
            format_timestamp(&summary.modified_at),
            summary.version,
            summary.word_count,
            summary.original_length,
            summary.compression_ratio,
        ],
    ).context("Failed to save summary")?;

    Ok(())
}

pub(crate) fn get_summary_impl(conn: &Connection, id: &str) -> Result<Option<Summary>> {
    let row = conn.query_row(
        &format!("SELECT {} FROM summaries WHERE id = ?", SUMMARY_COLUMNS),
        params![id],
        SummaryRow::from_row,
    ).optional().context("Failed to get summary")?;

    row.map(SummaryRow::decode).transpose()
}

pub(crate) fn find_summaries_by_owner_impl(conn: &Connection, recording_id: &str) -> Result<Vec<Summary>> {
    query_summaries(conn, "WHERE owner_id = ?1", params![recording_id])
}

fn query_summaries<P: rusqlite::Params>(conn: &Connection, filter: &str, params: P) -> Result<Vec<Summary>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM summaries {} ORDER BY modified_at DESC",
        SUMMARY_COLUMNS, filter
    )).context("Failed to prepare summaries query")?;

    let rows = stmt.query_map(params, SummaryRow::from_row)
        .context("Failed to query summaries")?;

    let mut summaries = Vec::new();
    for row in rows {
        let row = row.context("Failed to read summary row")?;
        summaries.push(row.decode()?);
    }
    Ok(summaries)
}

/// Load every summary, setting aside rows that fail to decode
pub(crate) fn load_summaries_lenient(conn: &Connection) -> Result<(Vec<Summary>, Vec<UndecodableRow>)> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM summaries", SUMMARY_COLUMNS))
        .context("Failed to prepare summaries scan")?;
    let rows = stmt.query_map([], SummaryRow::from_row)
        .context("Failed to scan summaries")?;

    let mut summaries = Vec::new();
    let mut undecodable = Vec::new();
    for row in rows {
        let row = row.context("Failed to read summary row")?;
        let id = row.id().to_string();
        let owner_id = row.owner_id().to_string();
        match row.decode() {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                log::warn!("Skipping undecodable summary {}: {:#}", id, e);
                undecodable.push(UndecodableRow {
                    kind: EntityKind::Summary,
                    id,
                    owner_id: Some(owner_id),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    Ok((summaries, undecodable))
}

pub(crate) fn delete_summary_impl(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM summaries WHERE id = ?", params![id])
        .context("Failed to delete summary")?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ContentType, SummaryContent, TaskItem, TitleCandidate, Priority};
    use tempfile::{tempdir, TempDir};

    fn create_test_db() -> (TempDir, DatabaseManager) {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn sample_summary(owner_id: &str) -> Summary {
        Summary::from_parts(
            owner_id,
            None,
            SummaryContent {
                text: "Agreed on the Q3 budget".to_string(),
                tasks: vec![TaskItem {
                    text: "Send revised numbers".to_string(),
                    priority: Priority::High,
                    due: Some("Friday".to_string()),
                    confidence: 0.75,
                }],
                reminders: vec![],
                titles: vec![TitleCandidate { text: "Budget Planning Meeting".to_string(), confidence: 0.5 }],
                content_type: ContentType::Meeting,
                method: "local-llm".to_string(),
                original_length: 500,
            },
        )
    }

    #[test]
    fn test_save_and_get_summary() {
        let (_dir, db) = create_test_db();

        let mut summary = sample_summary("rec_a");
        db.upsert_summary(&mut summary).unwrap();

        let retrieved = db.get_summary(&summary.id).unwrap().unwrap();
        assert_eq!(retrieved, summary);
        assert_eq!(retrieved.content_type, ContentType::Meeting);
        assert_eq!(retrieved.best_title().unwrap().text, "Budget Planning Meeting");
    }

    #[test]
    fn test_find_by_owner_and_delete() {
        let (_dir, db) = create_test_db();

        let mut summary = sample_summary("rec_a");
        db.upsert_summary(&mut summary).unwrap();

        assert_eq!(db.find_summaries_by_owner("rec_a").unwrap().len(), 1);
        assert!(db.find_summaries_by_owner("rec_b").unwrap().is_empty());

        assert!(db.delete_summary(&summary.id).unwrap());
        assert!(!db.delete_summary(&summary.id).unwrap());
        assert!(db.list_summaries().unwrap().is_empty());
    }
}
