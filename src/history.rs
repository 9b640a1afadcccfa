use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::now_millis;
use crate::models::{ImportHistory, ImportStatus};

/// Fields for a new ledger entry; id and timestamp are assigned on append.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub user_id: String,
    pub file_name: String,
    pub file_path: Option<String>,
    pub status: ImportStatus,
    pub message: String,
    pub book_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    /// UTC day (`YYYY-MM-DD`) -> attempts
    pub by_day: BTreeMap<String, i64>,
    /// lowercase extension of the attempted file -> attempts
    pub by_format: BTreeMap<String, i64>,
}

/// Append-only audit log of import attempts.
pub struct ImportHistoryLedger<'a> {
    conn: &'a Connection,
}

impl<'a> ImportHistoryLedger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        ImportHistoryLedger { conn }
    }

    pub fn append(&self, entry: &HistoryEntry) -> rusqlite::Result<ImportHistory> {
        let record = ImportHistory {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: entry.user_id.clone(),
            file_name: entry.file_name.clone(),
            file_path: entry.file_path.clone(),
            status: entry.status,
            message: entry.message.clone(),
            book_id: entry.book_id.clone(),
            created_at: now_millis(),
        };
        self.conn.execute(
            "INSERT INTO import_history (id, user_id, file_name, file_path, status, message, book_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.user_id,
                record.file_name,
                record.file_path,
                record.status.as_str(),
                record.message,
                record.book_id,
                record.created_at,
            ],
        )?;
        Ok(record)
    }

    pub fn recent(&self, user_id: Option<&str>, limit: usize) -> rusqlite::Result<Vec<ImportHistory>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, file_name, file_path, status, message, book_id, created_at \
             FROM import_history WHERE (?1 IS NULL OR user_id = ?1) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_history)?;
        rows.collect()
    }

    pub fn for_file(&self, file_name: &str) -> rusqlite::Result<Vec<ImportHistory>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, file_name, file_path, status, message, book_id, created_at \
             FROM import_history WHERE file_name = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![file_name], row_to_history)?;
        rows.collect()
    }

    pub fn stats(&self) -> rusqlite::Result<HistoryStats> {
        let mut stats = HistoryStats::default();
        let mut stmt = self
            .conn
            .prepare("SELECT file_name, status, created_at FROM import_history")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (file_name, status, created_at) = row?;
            stats.total += 1;
            *stats.by_status.entry(status).or_insert(0) += 1;
            let day = chrono::DateTime::from_timestamp_millis(created_at)
                .map(|value| value.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            *stats.by_day.entry(day).or_insert(0) += 1;
            let format = std::path::Path::new(&file_name)
                .extension()
                .and_then(|value| value.to_str())
                .map(|value| value.to_lowercase())
                .unwrap_or_else(|| "none".to_string());
            *stats.by_format.entry(format).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Operator bulk purge. The import pipeline never calls this.
    pub fn purge_before(&self, before_millis: i64) -> rusqlite::Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM import_history WHERE created_at < ?1",
            params![before_millis],
        )?;
        log::info!("purged {} import history rows", removed);
        Ok(removed)
    }
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<ImportHistory> {
    let status: String = row.get(4)?;
    Ok(ImportHistory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        file_name: row.get(2)?,
        file_path: row.get(3)?,
        status: ImportStatus::parse(&status).unwrap_or(ImportStatus::Error),
        message: row.get(5)?,
        book_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}
