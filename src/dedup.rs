//! Duplicate and sibling lookups over the catalog.
//!
//! Title/author matching is exact string equality after trimming. Case,
//! punctuation and spacing variants are treated as different books.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{row_to_book, BOOK_COLUMNS};
use crate::models::Book;

/// Visibility partition searched by title/author lookups. Public books only
/// group with public books; private books only with the same uploader's.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub is_public: bool,
    pub uploader_id: &'a str,
}

pub fn normalize_key(value: &str) -> String {
    value.trim().to_string()
}

pub struct DedupIndex<'a> {
    conn: &'a Connection,
}

impl<'a> DedupIndex<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        DedupIndex { conn }
    }

    /// Exact duplicate anywhere in the catalog.
    pub fn find_by_hash(&self, hash: &str) -> rusqlite::Result<Option<Book>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM books WHERE file_hash = ?1", BOOK_COLUMNS),
                params![hash],
                row_to_book,
            )
            .optional()
    }

    /// Same logical book already stored in the same format.
    pub fn find_same_format(
        &self,
        title: &str,
        author: &str,
        file_type: &str,
        scope: Scope<'_>,
    ) -> rusqlite::Result<Option<Book>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM books \
                     WHERE title = ?1 AND author = ?2 AND file_type = ?3 AND is_public = ?4 \
                     AND (?4 = 1 OR uploader_id = ?5) \
                     ORDER BY created_at, rowid LIMIT 1",
                    BOOK_COLUMNS
                ),
                params![
                    normalize_key(title),
                    normalize_key(author),
                    file_type,
                    scope.is_public as i64,
                    scope.uploader_id
                ],
                row_to_book,
            )
            .optional()
    }

    /// Every stored format of the logical book, oldest first.
    pub fn find_siblings(
        &self,
        title: &str,
        author: &str,
        scope: Scope<'_>,
    ) -> rusqlite::Result<Vec<Book>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM books \
             WHERE title = ?1 AND author = ?2 AND is_public = ?3 AND (?3 = 1 OR uploader_id = ?4) \
             ORDER BY created_at, rowid",
            BOOK_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![
                normalize_key(title),
                normalize_key(author),
                scope.is_public as i64,
                scope.uploader_id
            ],
            row_to_book,
        )?;
        rows.collect()
    }
}

/// The row new formats should attach to: the one without a parent, else the
/// first row. Use [`Book::root_id`] on the result for the parent id.
pub fn root_of(siblings: &[Book]) -> Option<&Book> {
    siblings
        .iter()
        .find(|book| book.is_root())
        .or_else(|| siblings.first())
}
