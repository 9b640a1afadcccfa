//! Book lifecycle after import: metadata edits that relocate a format group,
//! and deletion with its cascade.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::db::{self, children_of, cover_references, delete_book_row, encode_tags, get_book, now_millis};
use crate::dedup::{normalize_key, DedupIndex, Scope};
use crate::error::{IngestError, Result};
use crate::models::Book;
use crate::paths::{move_file, place_file, prune_empty_dirs, remove_file_if_exists, PathPlanner, PlaceMode};

/// Partial edit. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub is_public: Option<bool>,
    /// Needed when a book becomes private and its owner cannot be read off
    /// the current path.
    pub owner_name: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publish_date: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub rating: Option<f64>,
    pub tags: Option<Vec<String>>,
}

impl BookUpdate {
    fn touches_layout(&self) -> bool {
        self.title.is_some() || self.author.is_some() || self.category.is_some() || self.is_public.is_some()
    }
}

/// What happens to alternate formats when their root is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Oldest alternate format becomes the new root.
    #[default]
    Promote,
    /// Alternate formats are deleted with the root.
    Cascade,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub promoted: Option<String>,
}

/// A file (or cover) moved during relocation, kept so it can be put back.
struct Relocation {
    from: PathBuf,
    to: PathBuf,
}

/// Apply `update` to book `id`.
///
/// Title, author, category and visibility belong to the whole format group:
/// every member moves to the newly planned directory and gets a file name
/// derived from the new title. Rows are rewritten in one transaction; if it
/// fails the files are moved back.
pub fn update_book(conn: &Connection, planner: &PathPlanner, id: &str, update: &BookUpdate) -> Result<Book> {
    let book = get_book(conn, id)?.ok_or_else(|| IngestError::NotFound(id.to_string()))?;
    let group = format_group(conn, &book)?;
    let lead = group.first().unwrap_or(&book).clone();

    let title = pick(&update.title, &lead.title);
    let author = pick(&update.author, &lead.author);
    let category = pick(&update.category, &lead.category);
    let is_public = update.is_public.unwrap_or(lead.is_public);
    if title.is_empty() || author.is_empty() {
        return Err(IngestError::Validation("title and author must not be empty".to_string()));
    }

    let layout_changed = update.touches_layout()
        && (title != lead.title || author != lead.author || category != lead.category || is_public != lead.is_public);

    let mut moves: Vec<Relocation> = Vec::new();
    let mut new_paths: Vec<(String, String, String)> = Vec::new();
    let mut cover_moves: Vec<(String, String)> = Vec::new();
    let mut old_dirs: Vec<PathBuf> = Vec::new();

    if layout_changed {
        check_group_conflicts(conn, &group, &title, &author, is_public)?;
        let owner = if is_public {
            None
        } else {
            update
                .owner_name
                .clone()
                .or_else(|| owner_from_path(planner.root(), Path::new(&lead.file_path)))
        };
        let new_dir = planner.plan(&category, &author, &title, is_public, owner.as_deref())?;

        let relocated = relocate_group(&group, &new_dir, &title, &mut moves, &mut new_paths, &mut cover_moves, &mut old_dirs);
        if let Err(err) = relocated {
            undo_moves(&moves);
            return Err(err);
        }
    }

    let committed = write_update(conn, &book, &group, update, &title, &author, &category, is_public, &new_paths, &cover_moves);
    if let Err(err) = committed {
        log::error!("update of {} failed, restoring files: {}", id, err);
        undo_moves(&moves);
        return Err(err);
    }

    for dir in old_dirs {
        prune_empty_dirs(&dir, planner.root());
    }
    log::info!("updated book {} ({} rows, {} files moved)", id, group.len(), moves.len());
    get_book(conn, id)?.ok_or_else(|| IngestError::NotFound(id.to_string()))
}

fn pick(requested: &Option<String>, current: &str) -> String {
    requested
        .as_deref()
        .map(normalize_key)
        .unwrap_or_else(|| current.to_string())
}

/// Root first, then its alternate formats oldest first.
fn format_group(conn: &Connection, book: &Book) -> Result<Vec<Book>> {
    let root_id = book.root_id().to_string();
    let mut group = Vec::new();
    match get_book(conn, &root_id)? {
        Some(root) => group.push(root),
        None => group.push(book.clone()),
    }
    group.extend(children_of(conn, &root_id)?);
    Ok(group)
}

/// Renaming a group onto another book's title/author must not produce two
/// rows with the same title, author and format, nor a second root for that
/// title and author.
fn check_group_conflicts(conn: &Connection, group: &[Book], title: &str, author: &str, is_public: bool) -> Result<()> {
    let index = DedupIndex::new(conn);
    if let Some(lead) = group.first() {
        let scope = Scope {
            is_public,
            uploader_id: &lead.uploader_id,
        };
        let siblings = index.find_siblings(title, author, scope)?;
        if let Some(other) = siblings.iter().find(|row| !group.iter().any(|book| book.id == row.id)) {
            return Err(IngestError::Validation(format!(
                "{} - {} already exists ({}); merge or delete it first",
                author,
                title,
                other.root_id()
            )));
        }
    }
    for member in group {
        let scope = Scope {
            is_public,
            uploader_id: &member.uploader_id,
        };
        if let Some(other) = index.find_same_format(title, author, &member.file_type, scope)? {
            if !group.iter().any(|book| book.id == other.id) {
                return Err(IngestError::Validation(format!(
                    "{} - {} already exists as {} ({})",
                    author, title, member.file_type, other.id
                )));
            }
        }
    }
    Ok(())
}

fn relocate_group(
    group: &[Book],
    new_dir: &Path,
    title: &str,
    moves: &mut Vec<Relocation>,
    new_paths: &mut Vec<(String, String, String)>,
    cover_moves: &mut Vec<(String, String)>,
    old_dirs: &mut Vec<PathBuf>,
) -> Result<()> {
    for member in group {
        let old_path = PathBuf::from(&member.file_path);
        if let Some(dir) = old_path.parent() {
            if !old_dirs.iter().any(|known| known == dir) {
                old_dirs.push(dir.to_path_buf());
            }
        }
        let file_name = renamed_file_name(&member.file_name, title, &member.file_type);
        if old_path.parent() == Some(new_dir) && member.file_name == file_name {
            continue;
        }
        let placed = place_file(&old_path, new_dir, &file_name, &member.file_hash, PlaceMode::Move)?;
        moves.push(Relocation {
            from: old_path,
            to: placed.clone(),
        });
        new_paths.push((
            member.id.clone(),
            placed.to_string_lossy().to_string(),
            placed
                .file_name()
                .map(|value| value.to_string_lossy().to_string())
                .unwrap_or(file_name),
        ));
    }

    // covers stored inside the old directories travel with the files
    for member in group {
        let Some(cover) = member.cover_url.as_deref() else {
            continue;
        };
        if cover_moves.iter().any(|(from, _)| from == cover) {
            continue;
        }
        let cover_path = PathBuf::from(cover);
        let in_old_dir = cover_path
            .parent()
            .map(|dir| old_dirs.iter().any(|known| known == dir) && dir != new_dir)
            .unwrap_or(false);
        if !in_old_dir || !cover_path.is_file() {
            continue;
        }
        let name = cover_path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| "cover.png".to_string());
        let placed = place_file(&cover_path, new_dir, &name, &member.file_hash, PlaceMode::Move)?;
        moves.push(Relocation {
            from: cover_path,
            to: placed.clone(),
        });
        cover_moves.push((cover.to_string(), placed.to_string_lossy().to_string()));
    }
    Ok(())
}

/// New name from the new title, keeping a collection's `NNNN_` prefix.
fn renamed_file_name(current: &str, title: &str, extension: &str) -> String {
    let prefix: Option<u32> = current
        .split_once('_')
        .filter(|(digits, _)| digits.len() == 4 && digits.chars().all(|ch| ch.is_ascii_digit()))
        .and_then(|(digits, _)| digits.parse().ok());
    match prefix {
        Some(sequence) => PathPlanner::sequenced_file_name(sequence, title, extension),
        None => PathPlanner::file_name(title, extension),
    }
}

/// `private/<owner>/...` below the storage root.
fn owner_from_path(root: &Path, file_path: &Path) -> Option<String> {
    let relative = file_path.strip_prefix(root).ok()?;
    let mut parts = relative.components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(first)), Some(Component::Normal(owner))) if first == "private" => {
            Some(owner.to_string_lossy().to_string())
        }
        _ => None,
    }
}

fn undo_moves(moves: &[Relocation]) {
    for relocation in moves.iter().rev() {
        if let Err(err) = move_file(&relocation.to, &relocation.from) {
            log::error!(
                "could not move {} back to {}: {}",
                relocation.to.display(),
                relocation.from.display(),
                err
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_update(
    conn: &Connection,
    book: &Book,
    group: &[Book],
    update: &BookUpdate,
    title: &str,
    author: &str,
    category: &str,
    is_public: bool,
    new_paths: &[(String, String, String)],
    cover_moves: &[(String, String)],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let now = now_millis();

    for member in group {
        let (file_path, file_name) = new_paths
            .iter()
            .find(|(id, _, _)| id == &member.id)
            .map(|(_, path, name)| (path.clone(), name.clone()))
            .unwrap_or_else(|| (member.file_path.clone(), member.file_name.clone()));
        let cover_url = member.cover_url.as_ref().map(|cover| {
            cover_moves
                .iter()
                .find(|(from, _)| from == cover)
                .map(|(_, to)| to.clone())
                .unwrap_or_else(|| cover.clone())
        });
        tx.execute(
            "UPDATE books SET title = ?1, author = ?2, category = ?3, is_public = ?4, \
             file_path = ?5, file_name = ?6, cover_url = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                title,
                author,
                category,
                is_public as i64,
                file_path,
                file_name,
                cover_url,
                now,
                member.id
            ],
        )?;
    }

    // descriptive fields only touch the edited row
    tx.execute(
        "UPDATE books SET isbn = COALESCE(?1, isbn), publisher = COALESCE(?2, publisher), \
         publish_date = COALESCE(?3, publish_date), description = COALESCE(?4, description), \
         language = COALESCE(?5, language), rating = COALESCE(?6, rating), \
         tags = CASE WHEN ?7 THEN ?8 ELSE tags END, updated_at = ?9 WHERE id = ?10",
        params![
            update.isbn,
            update.publisher,
            update.publish_date,
            update.description,
            update.language,
            update.rating,
            update.tags.is_some(),
            update.tags.as_deref().and_then(encode_tags),
            now,
            book.id
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// Delete book `id` with its file, its cover when nothing else uses it, and
/// the directory once empty. Progress and shelf rows cascade in the schema.
pub fn delete_book(conn: &Connection, storage_root: &Path, id: &str, policy: DeletePolicy) -> Result<DeleteReport> {
    let book = get_book(conn, id)?.ok_or_else(|| IngestError::NotFound(id.to_string()))?;
    let mut report = DeleteReport::default();

    if book.is_root() {
        let children = children_of(conn, &book.id)?;
        match policy {
            DeletePolicy::Cascade => {
                for child in &children {
                    remove_book(conn, storage_root, child)?;
                    report.deleted.push(child.id.clone());
                }
            }
            DeletePolicy::Promote => {
                if let Some((heir, rest)) = children.split_first() {
                    promote(conn, &heir.id, rest)?;
                    report.promoted = Some(heir.id.clone());
                }
            }
        }
    }

    remove_book(conn, storage_root, &book)?;
    report.deleted.push(book.id.clone());
    log::info!("deleted book {} ({} rows)", id, report.deleted.len());
    Ok(report)
}

fn promote(conn: &Connection, heir_id: &str, rest: &[Book]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let now = now_millis();
    tx.execute(
        "UPDATE books SET parent_book_id = NULL, updated_at = ?1 WHERE id = ?2",
        params![now, heir_id],
    )?;
    for sibling in rest {
        tx.execute(
            "UPDATE books SET parent_book_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![heir_id, now, sibling.id],
        )?;
    }
    tx.commit()?;
    log::info!("promoted {} to group root", heir_id);
    Ok(())
}

/// Row first, then files: a failed unlink leaves a stray file, never a row
/// pointing at nothing.
fn remove_book(conn: &Connection, storage_root: &Path, book: &Book) -> Result<()> {
    delete_book_row(conn, &book.id)?;

    let path = Path::new(&book.file_path);
    if let Err(err) = remove_file_if_exists(path) {
        log::warn!("could not remove {}: {}", path.display(), err);
    }
    if let Some(cover) = book.cover_url.as_deref() {
        if cover_references(conn, cover, &book.id)? == 0 {
            if let Err(err) = remove_file_if_exists(Path::new(cover)) {
                log::warn!("could not remove cover {}: {}", cover, err);
            }
        }
    }
    if let Some(dir) = path.parent() {
        prune_empty_dirs(dir, storage_root);
    }
    Ok(())
}

/// Convenience for callers that only hold a connection.
pub fn record_progress(conn: &Connection, user_id: &str, book_id: &str, position: Option<&str>, progress: f64) -> Result<()> {
    if get_book(conn, book_id)?.is_none() {
        return Err(IngestError::NotFound(book_id.to_string()));
    }
    db::record_progress(conn, user_id, book_id, position, progress)?;
    Ok(())
}
