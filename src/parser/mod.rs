pub mod epub;
pub mod pdf;

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::ExtractionError;
use crate::models::BookFormat;

static ISBN_RE: OnceLock<Regex> = OnceLock::new();

/// Cover bytes found inside a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverImage {
    pub bytes: Vec<u8>,
    /// Extension without dot (`jpg`, `png`, ...).
    pub extension: String,
}

/// Descriptive metadata read from a source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub publisher: Option<String>,
    pub publish_date: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub cover: Option<CoverImage>,
}

impl Metadata {
    /// What the pipeline uses when a reader fails: the file stem as title and
    /// an unknown author.
    pub fn fallback(file_name: &str) -> Self {
        let title = Path::new(file_name)
            .file_stem()
            .and_then(|value| value.to_str())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        Metadata {
            title: Some(title),
            author: Some("Unknown".to_string()),
            ..Metadata::default()
        }
    }
}

/// Reads metadata out of a source file.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path, format: BookFormat) -> Result<Metadata, ExtractionError>;
}

/// Built-in readers: EPUB (OPF) and PDF (Info dictionary). Other formats
/// report `Unsupported`, which the pipeline treats as a recoverable failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatExtractor;

impl MetadataExtractor for FormatExtractor {
    fn extract(&self, path: &Path, format: BookFormat) -> Result<Metadata, ExtractionError> {
        match format {
            BookFormat::Epub => epub::read_epub(path),
            BookFormat::Pdf => pdf::read_pdf(path),
            other => Err(ExtractionError::Unsupported(other.extension().to_string())),
        }
    }
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pull ISBN-10/13 candidates out of free text, normalized to bare digits.
pub fn extract_isbn_candidates(text: &str) -> Vec<String> {
    let re = ISBN_RE.get_or_init(|| {
        Regex::new(r"(?i)(?:97[89][\s-]?)?(?:\d[\s-]?){9}[\dX]").expect("valid isbn regex")
    });
    let mut found: Vec<String> = Vec::new();
    for candidate in re.find_iter(text) {
        if let Some(isbn) = normalize_isbn(candidate.as_str()) {
            if !found.contains(&isbn) {
                found.push(isbn);
            }
        }
    }
    found
}

pub fn normalize_isbn(value: &str) -> Option<String> {
    let cleaned: String = value
        .trim()
        .trim_start_matches("urn:isbn:")
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == 'X' || *ch == 'x')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if cleaned.len() == 13 && is_valid_isbn13(&cleaned) {
        return Some(cleaned);
    }
    if cleaned.len() == 10 && is_valid_isbn10(&cleaned) {
        return Some(cleaned);
    }
    None
}

fn is_valid_isbn10(value: &str) -> bool {
    let mut sum = 0u32;
    for (index, ch) in value.chars().enumerate() {
        let digit = match ch {
            'X' if index == 9 => 10,
            _ => match ch.to_digit(10) {
                Some(digit) => digit,
                None => return false,
            },
        };
        sum += digit * (10 - index as u32);
    }
    sum % 11 == 0
}

fn is_valid_isbn13(value: &str) -> bool {
    let mut sum = 0u32;
    for (index, ch) in value.chars().enumerate() {
        let Some(digit) = ch.to_digit(10) else {
            return false;
        };
        sum += if index % 2 == 0 { digit } else { digit * 3 };
    }
    sum % 10 == 0
}

pub(crate) fn map_cover_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}
