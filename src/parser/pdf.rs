use lopdf::{Document, Object};
use std::path::Path;

use super::{extract_isbn_candidates, non_empty, Metadata};
use crate::error::ExtractionError;

const ISBN_SCAN_PAGES: usize = 10;

pub fn read_pdf(path: &Path) -> Result<Metadata, ExtractionError> {
    let doc = Document::load(path).map_err(|err| ExtractionError::Malformed(err.to_string()))?;
    let mut metadata = Metadata::default();

    if let Ok(info) = doc.trailer.get(b"Info") {
        let info = match info {
            Object::Reference(id) => doc.get_object(*id).ok(),
            other => Some(other),
        };
        if let Some(Ok(info)) = info.map(|value| value.as_dict()) {
            metadata.title = dict_string(info, b"Title");
            metadata.author = dict_string(info, b"Author");
            metadata.description = dict_string(info, b"Subject");
            metadata.publish_date = dict_string(info, b"CreationDate").and_then(|raw| pdf_date(&raw));
            if let Some(keywords) = dict_string(info, b"Keywords") {
                metadata.isbn = extract_isbn_candidates(&keywords).into_iter().next();
            }
        }
    }

    if metadata.isbn.is_none() {
        let pages: Vec<u32> = doc.get_pages().keys().take(ISBN_SCAN_PAGES).cloned().collect();
        if !pages.is_empty() {
            if let Ok(text) = doc.extract_text(&pages) {
                metadata.isbn = extract_isbn_candidates(&text).into_iter().next();
            }
        }
    }

    Ok(metadata)
}

fn dict_string(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    let value = dict.get(key).ok()?;
    let raw = match value {
        Object::String(data, _) => decode_pdf_text(data),
        Object::Name(name) => String::from_utf8_lossy(name).to_string(),
        _ => return None,
    };
    non_empty(raw)
}

/// PDF text strings are either UTF-16BE with a BOM or PDFDocEncoding (close
/// enough to Latin-1 for metadata).
fn decode_pdf_text(data: &[u8]) -> String {
    if data.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = data[2..]
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => data.iter().map(|byte| *byte as char).collect(),
    }
}

/// `D:YYYYMMDDHHmmSS...` -> `YYYY-MM-DD` (or just the year when that is all there is).
fn pdf_date(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim_start_matches("D:")
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    match digits.len() {
        0..=3 => None,
        4..=7 => Some(digits[..4].to_string()),
        _ => Some(format!("{}-{}-{}", &digits[..4], &digits[4..6], &digits[6..8])),
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_pdf_text, pdf_date, read_pdf};

    #[test]
    fn decodes_utf16_and_latin1() {
        assert_eq!(decode_pdf_text(&[0xFE, 0xFF, 0x00, 0x44, 0x00, 0x75]), "Du");
        assert_eq!(decode_pdf_text(b"Plain"), "Plain");
        assert_eq!(decode_pdf_text(&[0x43, 0xE9]), "C\u{e9}");
    }

    #[test]
    fn parses_pdf_dates() {
        assert_eq!(pdf_date("D:19650801120000Z").as_deref(), Some("1965-08-01"));
        assert_eq!(pdf_date("D:1965").as_deref(), Some("1965"));
        assert_eq!(pdf_date("garbage"), None);
    }

    #[test]
    fn invalid_pdf_is_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").expect("write");
        assert!(read_pdf(&path).is_err());
    }
}
