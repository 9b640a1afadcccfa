use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::hasher::short_hash;

const MAX_SEGMENT_CHARS: usize = 120;
const MAX_COLLISION_ATTEMPTS: usize = 64;

/// Whether the source survives placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceMode {
    Move,
    Copy,
}

/// Derives canonical locations below the storage root:
/// `<root>/[public | private/<owner>]/<category>/<Author> - <Title>/`.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    root: PathBuf,
}

impl PathPlanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PathPlanner { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plan(
        &self,
        category: &str,
        author: &str,
        title: &str,
        is_public: bool,
        owner_name: Option<&str>,
    ) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        if is_public {
            dir.push("public");
        } else {
            let owner = owner_name
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    IngestError::Validation("private books need an owner name".to_string())
                })?;
            dir.push("private");
            dir.push(sanitize_segment(owner, "user"));
        }
        dir.push(sanitize_segment(category, "Uncategorized"));
        dir.push(format!(
            "{} - {}",
            sanitize_segment(author, "Unknown"),
            sanitize_segment(title, "Untitled")
        ));
        Ok(dir)
    }

    pub fn file_name(title: &str, extension: &str) -> String {
        let ext = extension.trim_start_matches('.').to_lowercase();
        let stem = sanitize_segment(title, "Untitled");
        if ext.is_empty() {
            stem
        } else {
            format!("{}.{}", stem, ext)
        }
    }

    /// File name with the `NNNN_` prefix used for multi-part collections.
    pub fn sequenced_file_name(sequence: u32, title: &str, extension: &str) -> String {
        format!("{:04}_{}", sequence, Self::file_name(title, extension))
    }
}

/// Make one path segment safe: path separators and reserved characters become
/// `-`, whitespace collapses, trailing dots go. Empty input yields `fallback`.
pub fn sanitize_segment(value: &str, fallback: &str) -> String {
    let cleaned = value
        .chars()
        .filter(|ch| !ch.is_control())
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            _ => ch,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ");
    let trimmed: String = cleaned
        .trim()
        .trim_end_matches('.')
        .trim()
        .chars()
        .take(MAX_SEGMENT_CHARS)
        .collect();
    let trimmed = trimmed.trim().to_string();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        fallback.to_string()
    } else {
        trimmed
    }
}

/// `<stem>_<first 8 hex of hash><.ext>`
pub fn collision_name(file_name: &str, hash: &str) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(file_name);
    match path.extension().and_then(|value| value.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, short_hash(hash), ext),
        None => format!("{}_{}", stem, short_hash(hash)),
    }
}

fn candidate_names(file_name: &str, hash: &str) -> Vec<String> {
    let suffixed = collision_name(file_name, hash);
    let mut names = vec![file_name.to_string(), suffixed.clone()];
    let path = Path::new(&suffixed);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or(&suffixed)
        .to_string();
    let ext = path.extension().and_then(|value| value.to_str());
    for index in 2..MAX_COLLISION_ATTEMPTS {
        names.push(match ext {
            Some(ext) => format!("{}_{}.{}", stem, index, ext),
            None => format!("{}_{}", stem, index),
        });
    }
    names
}

/// Put `source` into `dir` under `file_name` without ever overwriting.
///
/// The target is claimed with an exclusive create; when the name is taken the
/// hash-suffixed name is tried next. Returns the path actually written.
pub fn place_file(
    source: &Path,
    dir: &Path,
    file_name: &str,
    hash: &str,
    mode: PlaceMode,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|err| IngestError::filesystem(dir, err))?;

    for name in candidate_names(file_name, hash) {
        let target = dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(_) => {
                if let Err(err) = transfer(source, &target, mode) {
                    let _ = std::fs::remove_file(&target);
                    return Err(IngestError::filesystem(&target, err));
                }
                if name != file_name {
                    log::info!("name collision for {}, stored as {}", file_name, name);
                }
                return Ok(target);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(IngestError::filesystem(&target, err)),
        }
    }

    Err(IngestError::filesystem(
        dir.join(file_name),
        std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
    ))
}

fn transfer(source: &Path, target: &Path, mode: PlaceMode) -> std::io::Result<()> {
    match mode {
        PlaceMode::Copy => {
            std::fs::copy(source, target)?;
            Ok(())
        }
        PlaceMode::Move => move_file(source, target),
    }
}

/// Rename, falling back to copy + delete for cross-filesystem moves.
pub fn move_file(source: &Path, target: &Path) -> std::io::Result<()> {
    if std::fs::rename(source, target).is_ok() {
        return Ok(());
    }
    std::fs::copy(source, target)?;
    if let Err(err) = std::fs::remove_file(source) {
        log::warn!("copied {} but could not remove original: {}", source.display(), err);
    }
    Ok(())
}

/// Remove `dir` when it has no entries left. Missing directories are fine.
pub fn remove_dir_if_empty(dir: &Path) {
    // remove_dir refuses non-empty directories
    if std::fs::remove_dir(dir).is_ok() {
        log::info!("removed empty directory {}", dir.display());
    }
}

/// Remove `dir` and its empty ancestors, never touching `stop_at` or
/// anything outside it.
pub fn prune_empty_dirs(dir: &Path, stop_at: &Path) {
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        remove_dir_if_empty(dir);
        if dir.exists() {
            break;
        }
        current = dir.parent();
    }
}

pub fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
