use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

use super::{map_cover_extension, non_empty, normalize_isbn, CoverImage, Metadata};
use crate::error::ExtractionError;

#[derive(Default)]
struct OpfPackage {
    title: Option<String>,
    creator: Option<String>,
    language: Option<String>,
    publisher: Option<String>,
    description: Option<String>,
    date: Option<String>,
    isbn: Option<String>,
    cover_id: Option<String>,
    cover_href: Option<String>,
    cover_mime: Option<String>,
    manifest: Vec<ManifestItem>,
}

struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Creator,
    Language,
    Publisher,
    Description,
    Date,
    Identifier,
}

pub fn read_epub(path: &Path) -> Result<Metadata, ExtractionError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    // 1. META-INF/container.xml points at the OPF package document
    let opf_path = find_opf_path(&mut archive)?;

    // 2. OPF carries the Dublin Core metadata and the manifest
    let mut opf = String::new();
    archive.by_name(&opf_path)?.read_to_string(&mut opf)?;
    let package = parse_opf(&opf)?;

    // 3. cover bytes, resolved relative to the OPF directory
    let cover = read_cover(&mut archive, &opf_path, &package);

    Ok(Metadata {
        title: package.title,
        author: package.creator,
        isbn: package.isbn,
        publisher: package.publisher,
        publish_date: package.date,
        description: package.description,
        language: package.language,
        cover,
    })
}

fn find_opf_path(archive: &mut ZipArchive<File>) -> Result<String, ExtractionError> {
    let mut container = archive
        .by_name("META-INF/container.xml")
        .map_err(|_| ExtractionError::Malformed("missing META-INF/container.xml".to_string()))?;
    let mut xml = String::new();
    container.read_to_string(&mut xml)?;

    let mut reader = Reader::from_str(&xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    if let Some(full_path) = attribute(&e, b"full-path") {
                        return Ok(full_path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Malformed(e.to_string())),
            _ => (),
        }
        buf.clear();
    }

    Err(ExtractionError::Malformed(
        "no rootfile in container.xml".to_string(),
    ))
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

fn parse_opf(xml: &str) -> Result<OpfPackage, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut package = OpfPackage::default();
    let mut current: Option<Field> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current = match e.local_name().as_ref() {
                    b"title" => Some(Field::Title),
                    b"creator" => Some(Field::Creator),
                    b"language" => Some(Field::Language),
                    b"publisher" => Some(Field::Publisher),
                    b"description" => Some(Field::Description),
                    b"date" => Some(Field::Date),
                    b"identifier" => Some(Field::Identifier),
                    _ => {
                        read_element(&e, &mut package);
                        None
                    }
                };
            }
            Ok(Event::Empty(e)) => read_element(&e, &mut package),
            Ok(Event::Text(e)) => {
                if let Some(field) = current {
                    let text = e.unescape().map(|t| t.into_owned()).unwrap_or_default();
                    store_field(&mut package, field, text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(field) = current {
                    let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                    store_field(&mut package, field, text);
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Malformed(e.to_string())),
            _ => (),
        }
        buf.clear();
    }

    resolve_cover_href(&mut package);
    Ok(package)
}

fn store_field(package: &mut OpfPackage, field: Field, text: String) {
    let Some(text) = non_empty(text) else {
        return;
    };
    // first occurrence wins for every field
    let slot = match field {
        Field::Title => &mut package.title,
        Field::Creator => &mut package.creator,
        Field::Language => &mut package.language,
        Field::Publisher => &mut package.publisher,
        Field::Description => &mut package.description,
        Field::Date => &mut package.date,
        // identifiers may be UUIDs or URIs; keep the first valid ISBN
        Field::Identifier => {
            if package.isbn.is_none() {
                package.isbn = normalize_isbn(&text);
            }
            return;
        }
    };
    if slot.is_none() {
        *slot = Some(text);
    }
}

fn read_element(element: &BytesStart<'_>, package: &mut OpfPackage) {
    match element.local_name().as_ref() {
        // <meta name="cover" content="cover-image-id" />
        b"meta" => {
            if attribute(element, b"name").as_deref() == Some("cover") {
                package.cover_id = attribute(element, b"content");
            }
        }
        b"item" => package.manifest.push(ManifestItem {
            id: attribute(element, b"id").unwrap_or_default(),
            href: attribute(element, b"href").unwrap_or_default(),
            media_type: attribute(element, b"media-type").unwrap_or_default(),
            properties: attribute(element, b"properties").unwrap_or_default(),
        }),
        _ => (),
    }
}

fn resolve_cover_href(package: &mut OpfPackage) {
    // EPUB 3 marks the cover with properties="cover-image"; EPUB 2 uses <meta name="cover">
    let by_property = package
        .manifest
        .iter()
        .find(|item| item.properties.split_whitespace().any(|p| p == "cover-image"));
    let by_meta = package.cover_id.as_ref().and_then(|cover_id| {
        package.manifest.iter().find(|item| &item.id == cover_id)
    });
    let found = by_property
        .or(by_meta)
        .map(|item| (item.href.clone(), item.media_type.clone()));
    if let Some((href, mime)) = found {
        package.cover_href = Some(href);
        package.cover_mime = Some(mime);
    }
}

fn read_cover(
    archive: &mut ZipArchive<File>,
    opf_path: &str,
    package: &OpfPackage,
) -> Option<CoverImage> {
    let href = package.cover_href.as_ref()?;
    let opf_dir = Path::new(opf_path)
        .parent()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_default();
    let joined = if opf_dir.is_empty() {
        href.clone()
    } else {
        format!("{}/{}", opf_dir, href)
    };

    // some archives are sloppy about relative paths
    let candidates = [
        joined.replace('\\', "/"),
        href.replace('\\', "/"),
        href.trim_start_matches("./").to_string(),
    ];
    for candidate in candidates {
        let Ok(mut entry) = archive.by_name(&candidate) else {
            continue;
        };
        let mut bytes = Vec::new();
        if entry.read_to_end(&mut bytes).is_ok() && !bytes.is_empty() {
            let extension = package
                .cover_mime
                .as_deref()
                .and_then(map_cover_extension)
                .map(str::to_string)
                .or_else(|| {
                    Path::new(href)
                        .extension()
                        .and_then(|value| value.to_str())
                        .map(|value| value.to_lowercase())
                })
                .unwrap_or_else(|| "jpg".to_string());
            return Some(CoverImage { bytes, extension });
        }
    }
    log::info!("epub cover listed but not found in archive: {}", href);
    None
}
