use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db;
use crate::paths::{move_file, prune_empty_dirs, remove_file_if_exists};

/// Everything one import attempt has written so far, so a fatal failure can
/// put the catalog and the storage tree back the way they were.
#[derive(Debug)]
pub struct AttemptLog {
    storage_root: PathBuf,
    staging: Option<PathBuf>,
    files: Vec<PlacedFile>,
    rows: Vec<String>,
    covers: Vec<PathBuf>,
}

#[derive(Debug)]
struct PlacedFile {
    path: PathBuf,
    /// Where the file came from when it was moved out of the caller's source.
    restore_to: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RollbackReport {
    pub removed_rows: usize,
    pub removed_files: usize,
}

impl AttemptLog {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        AttemptLog {
            storage_root: storage_root.into(),
            staging: None,
            files: Vec::new(),
            rows: Vec::new(),
            covers: Vec::new(),
        }
    }

    pub fn staging(&mut self, dir: PathBuf) {
        self.staging = Some(dir);
    }

    pub fn placed(&mut self, path: PathBuf) {
        self.files.push(PlacedFile {
            path,
            restore_to: None,
        });
    }

    pub fn moved(&mut self, path: PathBuf, from: PathBuf) {
        self.files.push(PlacedFile {
            path,
            restore_to: Some(from),
        });
    }

    pub fn inserted(&mut self, book_id: String) {
        self.rows.push(book_id);
    }

    pub fn cover(&mut self, path: PathBuf) {
        self.covers.push(path);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.rows.is_empty() && self.covers.is_empty()
    }

    /// Drop the staging directory. Called on every exit path.
    pub fn clear_staging(&mut self) {
        if let Some(dir) = self.staging.take() {
            if let Err(err) = std::fs::remove_dir_all(&dir) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("could not clear staging {}: {}", dir.display(), err);
                }
            }
        }
    }

    /// Undo in reverse order: rows, covers, files, then empty directories.
    pub fn rollback(mut self, conn: &Connection) -> RollbackReport {
        let mut report = RollbackReport::default();

        for id in self.rows.iter().rev() {
            match db::delete_book_row(conn, id) {
                Ok(count) => report.removed_rows += count,
                Err(err) => log::error!("rollback could not delete row {}: {}", id, err),
            }
        }

        let mut dirs: Vec<PathBuf> = Vec::new();
        for cover in self.covers.iter().rev() {
            match remove_file_if_exists(cover) {
                Ok(()) => report.removed_files += 1,
                Err(err) => log::error!("rollback could not delete {}: {}", cover.display(), err),
            }
            remember_parent(&mut dirs, cover);
        }
        for file in self.files.iter().rev() {
            let undone = match &file.restore_to {
                Some(origin) => move_file(&file.path, origin),
                None => remove_file_if_exists(&file.path),
            };
            match undone {
                Ok(()) => report.removed_files += 1,
                Err(err) => log::error!("rollback could not undo {}: {}", file.path.display(), err),
            }
            remember_parent(&mut dirs, &file.path);
        }

        for dir in dirs {
            prune_empty_dirs(&dir, &self.storage_root);
        }
        self.clear_staging();
        report
    }
}

/// Remove staging directories older than `max_age`. An adapter that missed
/// its deadline keeps running detached and can still write into a staging
/// directory after its attempt cleared it.
pub fn sweep_stale_staging(staging_root: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(staging_root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        let stale = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age >= max_age)
            .unwrap_or(false);
        if !stale || !path.is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(err) => log::warn!("could not sweep staging {}: {}", path.display(), err),
        }
    }
    removed
}

fn remember_parent(dirs: &mut Vec<PathBuf>, path: &Path) {
    if let Some(parent) = path.parent() {
        if !dirs.iter().any(|dir| dir == parent) {
            dirs.push(parent.to_path_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_book, list_books, open_in_memory};
    use crate::models::NewBook;

    #[test]
    fn rollback_removes_rows_files_and_empty_dirs() {
        let root = tempfile::tempdir().expect("tempdir");
        let conn = open_in_memory().expect("db");
        let book_dir = root.path().join("public/Fiction/Bar - Foo");
        std::fs::create_dir_all(&book_dir).expect("mkdir");
        let file = book_dir.join("Foo.mobi");
        std::fs::write(&file, b"mobi").expect("write");
        let cover = book_dir.join("cover.png");
        std::fs::write(&cover, b"png").expect("write");
        let staging = root.path().join(".staging/abc");
        std::fs::create_dir_all(&staging).expect("mkdir");

        let book = insert_book(
            &conn,
            &NewBook {
                title: "Foo".to_string(),
                author: "Bar".to_string(),
                file_path: file.to_string_lossy().to_string(),
                file_hash: "h1".to_string(),
                ..NewBook::default()
            },
        )
        .expect("insert");

        let mut attempt = AttemptLog::new(root.path());
        attempt.staging(staging.clone());
        attempt.placed(file.clone());
        attempt.inserted(book.id);
        attempt.cover(cover);
        let report = attempt.rollback(&conn);

        assert_eq!(report, RollbackReport { removed_rows: 1, removed_files: 2 });
        assert!(list_books(&conn).expect("list").is_empty());
        assert!(!root.path().join("public").exists());
        assert!(!staging.exists());
        assert!(root.path().exists());
    }

    #[test]
    fn moved_sources_are_restored() {
        let root = tempfile::tempdir().expect("tempdir");
        let conn = open_in_memory().expect("db");
        let origin = root.path().join("inbox.epub");
        let dir = root.path().join("public/x");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let placed = dir.join("x.epub");
        std::fs::write(&placed, b"epub").expect("write");

        let mut attempt = AttemptLog::new(root.path());
        attempt.moved(placed.clone(), origin.clone());
        attempt.rollback(&conn);

        assert!(origin.exists());
        assert!(!placed.exists());
    }

    #[test]
    fn stale_staging_dirs_are_swept() {
        let root = tempfile::tempdir().expect("tempdir");
        let staging = root.path().join(".staging");
        std::fs::create_dir_all(staging.join("abandoned")).expect("mkdir");
        std::fs::write(staging.join("abandoned/late.epub"), b"late").expect("write");

        assert_eq!(sweep_stale_staging(&staging, Duration::from_secs(3600)), 0);
        assert!(staging.join("abandoned/late.epub").exists());

        assert_eq!(sweep_stale_staging(&staging, Duration::ZERO), 1);
        assert!(!staging.join("abandoned").exists());
        assert_eq!(sweep_stale_staging(&root.path().join("missing"), Duration::ZERO), 0);
    }
}
