use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::models::{Book, NewBook};

const MIGRATION_CATALOG_SQL: &str = include_str!("../migrations/0000_catalog.sql");
const MIGRATION_IMPORT_HISTORY_SQL: &str = include_str!("../migrations/0001_import_history.sql");

pub(crate) const BOOK_COLUMNS: &str = "id, title, author, isbn, publisher, publish_date, description, \
     category, language, rating, tags, file_path, file_name, file_size, file_type, file_hash, \
     cover_url, uploader_id, is_public, parent_book_id, created_at, updated_at";

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| IngestError::filesystem(parent, err))?;
        }
    }
    let conn = Connection::open(path)?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id TEXT PRIMARY KEY NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )?;

    apply_migration(conn, "0000_catalog", MIGRATION_CATALOG_SQL)?;
    apply_migration(conn, "0001_import_history", MIGRATION_IMPORT_HISTORY_SQL)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

fn apply_migration(conn: &Connection, id: &str, sql: &str) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM schema_migrations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }
    conn.execute_batch(sql)?;
    conn.execute(
        "INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
        params![id, now_millis()],
    )?;
    log::info!("applied migration {}", id);
    Ok(())
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn row_to_book(row: &Row<'_>) -> rusqlite::Result<Book> {
    let tags: Option<String> = row.get(10)?;
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        isbn: row.get(3)?,
        publisher: row.get(4)?,
        publish_date: row.get(5)?,
        description: row.get(6)?,
        category: row.get(7)?,
        language: row.get(8)?,
        rating: row.get(9)?,
        tags: tags
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        file_path: row.get(11)?,
        file_name: row.get(12)?,
        file_size: row.get(13)?,
        file_type: row.get(14)?,
        file_hash: row.get(15)?,
        cover_url: row.get(16)?,
        uploader_id: row.get(17)?,
        is_public: row.get::<_, i64>(18)? != 0,
        parent_book_id: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

pub(crate) fn encode_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        serde_json::to_string(tags).ok()
    }
}

pub fn insert_book(conn: &Connection, book: &NewBook) -> rusqlite::Result<Book> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_millis();
    conn.execute(
        "INSERT INTO books (id, title, author, isbn, publisher, publish_date, description, category, \
         language, tags, file_path, file_name, file_size, file_type, file_hash, uploader_id, is_public, \
         parent_book_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
        params![
            id,
            book.title,
            book.author,
            book.isbn,
            book.publisher,
            book.publish_date,
            book.description,
            book.category,
            book.language,
            encode_tags(&book.tags),
            book.file_path,
            book.file_name,
            book.file_size,
            book.file_type,
            book.file_hash,
            book.uploader_id,
            book.is_public as i64,
            book.parent_book_id,
            now,
        ],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
        params![id],
        row_to_book,
    )
}

pub fn get_book(conn: &Connection, id: &str) -> rusqlite::Result<Option<Book>> {
    conn.query_row(
        &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
        params![id],
        row_to_book,
    )
    .optional()
}

pub fn list_books(conn: &Connection) -> rusqlite::Result<Vec<Book>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM books ORDER BY created_at, rowid",
        BOOK_COLUMNS
    ))?;
    let rows = stmt.query_map([], row_to_book)?;
    rows.collect()
}

/// Alternate-format rows pointing at `root_id`, oldest first.
pub fn children_of(conn: &Connection, root_id: &str) -> rusqlite::Result<Vec<Book>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM books WHERE parent_book_id = ?1 ORDER BY created_at, rowid",
        BOOK_COLUMNS
    ))?;
    let rows = stmt.query_map(params![root_id], row_to_book)?;
    rows.collect()
}

pub fn set_cover_url(conn: &Connection, id: &str, cover_url: Option<&str>) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE books SET cover_url = ?1, updated_at = ?2 WHERE id = ?3",
        params![cover_url, now_millis(), id],
    )?;
    Ok(())
}

pub fn delete_book_row(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM books WHERE id = ?1", params![id])
}

/// Number of rows other than `except_id` whose cover is `cover_url`.
pub fn cover_references(conn: &Connection, cover_url: &str, except_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM books WHERE cover_url = ?1 AND id != ?2",
        params![cover_url, except_id],
        |row| row.get(0),
    )
}

pub fn add_to_shelf(conn: &Connection, user_id: &str, book_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO shelf_books (user_id, book_id, added_at) VALUES (?1, ?2, ?3)",
        params![user_id, book_id, now_millis()],
    )?;
    Ok(())
}

pub fn shelf_book_ids(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT book_id FROM shelf_books WHERE user_id = ?1 ORDER BY added_at, rowid")?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    rows.collect()
}

pub fn record_progress(
    conn: &Connection,
    user_id: &str,
    book_id: &str,
    position: Option<&str>,
    progress: f64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO reading_progress (user_id, book_id, position, progress, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(user_id, book_id) DO UPDATE SET position = excluded.position, \
         progress = excluded.progress, updated_at = excluded.updated_at",
        params![user_id, book_id, position, progress.clamp(0.0, 1.0), now_millis()],
    )?;
    Ok(())
}

pub fn progress_rows(conn: &Connection, book_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM reading_progress WHERE book_id = ?1",
        params![book_id],
        |row| row.get(0),
    )
}

/// True when `err` is a UNIQUE violation on `books.<column>`.
pub fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, Some(message)) => {
            failure.code == rusqlite::ErrorCode::ConstraintViolation
                && message.contains(&format!("books.{}", column))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(hash: &str, path: &str) -> NewBook {
        NewBook {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            category: "Fiction".to_string(),
            language: "en".to_string(),
            tags: vec!["classic".to_string()],
            file_path: path.to_string(),
            file_name: "Dune.epub".to_string(),
            file_size: 42,
            file_type: "epub".to_string(),
            file_hash: hash.to_string(),
            uploader_id: "u1".to_string(),
            is_public: true,
            ..NewBook::default()
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = open_in_memory().expect("db");
        migrate(&conn).expect("second migrate");
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count");
        assert_eq!(applied, 2);
    }

    #[test]
    fn inserted_book_round_trips_tags_and_visibility() {
        let conn = open_in_memory().expect("db");
        let book = insert_book(&conn, &sample("aa", "/lib/a.epub")).expect("insert");
        let loaded = get_book(&conn, &book.id).expect("query").expect("row");
        assert_eq!(loaded.tags, vec!["classic".to_string()]);
        assert!(loaded.is_public);
        assert!(loaded.is_root());
        assert_eq!(loaded.created_at, loaded.updated_at);
    }

    #[test]
    fn duplicate_hash_is_reported_as_unique_violation() {
        let conn = open_in_memory().expect("db");
        insert_book(&conn, &sample("same", "/lib/a.epub")).expect("insert");
        let err = insert_book(&conn, &sample("same", "/lib/b.epub")).expect_err("must conflict");
        assert!(is_unique_violation(&err, "file_hash"));
        assert!(!is_unique_violation(&err, "file_path"));
    }

    #[test]
    fn deleting_book_cascades_progress_and_shelf() {
        let conn = open_in_memory().expect("db");
        let book = insert_book(&conn, &sample("h1", "/lib/a.epub")).expect("insert");
        record_progress(&conn, "u1", &book.id, Some("epubcfi(/6/2)"), 0.4).expect("progress");
        add_to_shelf(&conn, "u1", &book.id).expect("shelf");

        delete_book_row(&conn, &book.id).expect("delete");

        assert_eq!(progress_rows(&conn, &book.id).expect("count"), 0);
        assert!(shelf_book_ids(&conn, "u1").expect("shelf").is_empty());
    }
}
