use ab_glyph::{FontVec, PxScale};
use image::codecs::png::PngEncoder;
use image::{ImageBuffer, ImageEncoder, Rgba};
use imageproc::drawing::draw_text_mut;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoverError;
use crate::parser::{map_cover_extension, CoverImage};
use crate::timeout::run_with_timeout;

const COVER_WIDTH: u32 = 400;
const COVER_HEIGHT: u32 = 600;
const MAX_COVER_NAMES: usize = 32;

/// Renders a placeholder cover from title and author.
pub trait CoverGenerator: Send + Sync {
    fn generate(&self, title: &str, author: &str) -> Result<CoverImage, CoverError>;
}

/// A cover the caller supplied explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverInput {
    File(PathBuf),
    Url(String),
}

/// Which link of the chain produced the cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverSource {
    Embedded,
    User,
    Generated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCover {
    pub path: PathBuf,
    pub source: CoverSource,
    /// Failures of earlier links, in chain order.
    pub fell_through: Vec<String>,
}

/// 400x600 PNG card: beige background, double frame, author on top and the
/// wrapped title centred. Without a font only the frame is drawn.
pub struct TextCoverGenerator {
    font: Option<FontVec>,
}

impl TextCoverGenerator {
    pub fn new(font_path: Option<&Path>) -> Result<Self, CoverError> {
        let font = match font_path {
            Some(path) => {
                let data = std::fs::read(path)?;
                let font = FontVec::try_from_vec(data)
                    .map_err(|err| CoverError::Render(format!("font {}: {}", path.display(), err)))?;
                Some(font)
            }
            None => None,
        };
        Ok(TextCoverGenerator { font })
    }

    pub fn without_font() -> Self {
        TextCoverGenerator { font: None }
    }
}

impl CoverGenerator for TextCoverGenerator {
    fn generate(&self, title: &str, author: &str) -> Result<CoverImage, CoverError> {
        let bg_color = Rgba([250u8, 245, 235, 255]);
        let mut img: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(COVER_WIDTH, COVER_HEIGHT, bg_color);

        let border_color = Rgba([180u8, 160, 140, 255]);
        let border_width = 8u32;
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            if x < border_width
                || x >= COVER_WIDTH - border_width
                || y < border_width
                || y >= COVER_HEIGHT - border_width
            {
                *pixel = border_color;
            }
        }

        let line_color = Rgba([160u8, 140, 120, 255]);
        let inner_margin = 20u32;
        for x in inner_margin..(COVER_WIDTH - inner_margin) {
            img.put_pixel(x, inner_margin, line_color);
            img.put_pixel(x, COVER_HEIGHT - inner_margin - 1, line_color);
        }
        for y in inner_margin..(COVER_HEIGHT - inner_margin) {
            img.put_pixel(inner_margin, y, line_color);
            img.put_pixel(COVER_WIDTH - inner_margin - 1, y, line_color);
        }

        if let Some(font) = &self.font {
            let author_color = Rgba([100u8, 90, 80, 255]);
            let text_color = Rgba([60u8, 50, 40, 255]);
            draw_text_mut(
                &mut img,
                author_color,
                40,
                50,
                PxScale::from(22.0),
                font,
                &truncate_chars(author, 35),
            );

            let lines = wrap_title(title, 18, 6);
            let line_height = 42i32;
            let total_height = (lines.len() as i32) * line_height;
            let start_y = ((COVER_HEIGHT as i32) - total_height) / 2;
            for (i, line) in lines.iter().enumerate() {
                let y = start_y + (i as i32) * line_height;
                draw_text_mut(&mut img, text_color, 40, y, PxScale::from(32.0), font, line);
            }
        }

        let mut png_bytes: Vec<u8> = Vec::new();
        PngEncoder::new(&mut png_bytes)
            .write_image(
                img.as_raw(),
                COVER_WIDTH,
                COVER_HEIGHT,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|err| CoverError::Render(err.to_string()))?;

        Ok(CoverImage {
            bytes: png_bytes,
            extension: "png".to_string(),
        })
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        let head: String = value.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        value.to_string()
    }
}

/// Greedy word wrap; overflowing titles end in `...`.
fn wrap_title(title: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in title.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.len() > max_lines {
        lines.truncate(max_lines - 1);
        if let Some(last) = lines.last_mut() {
            *last = format!("{}...", last.trim_end_matches('.'));
        }
    }
    lines
}

/// Fallback chain for a book's cover: embedded -> user supplied -> generated.
/// First success wins; when every link fails the book simply has no cover.
pub struct CoverResolver {
    generator: Arc<dyn CoverGenerator>,
    adapter_timeout: Duration,
    download_timeout: Duration,
}

impl CoverResolver {
    pub fn new(
        generator: Arc<dyn CoverGenerator>,
        adapter_timeout: Duration,
        download_timeout: Duration,
    ) -> Self {
        CoverResolver {
            generator,
            adapter_timeout,
            download_timeout,
        }
    }

    pub fn resolve(
        &self,
        book_dir: &Path,
        title: &str,
        author: &str,
        embedded: Option<&CoverImage>,
        user: Option<&CoverInput>,
    ) -> Option<ResolvedCover> {
        let mut fell_through = Vec::new();

        if let Some(image) = embedded {
            match write_cover(book_dir, image) {
                Ok(path) => return Some(resolved(path, CoverSource::Embedded, fell_through)),
                Err(err) => fell_through.push(format!("embedded: {}", err)),
            }
        }

        if let Some(input) = user {
            match self.load_user_cover(input).and_then(|image| write_cover(book_dir, &image)) {
                Ok(path) => return Some(resolved(path, CoverSource::User, fell_through)),
                Err(err) => fell_through.push(format!("user: {}", err)),
            }
        }

        match self.generate(title, author).and_then(|image| write_cover(book_dir, &image)) {
            Ok(path) => return Some(resolved(path, CoverSource::Generated, fell_through)),
            Err(err) => fell_through.push(format!("generated: {}", err)),
        }

        log::warn!(
            "no cover for {} - {}: {}",
            author,
            title,
            fell_through.join("; ")
        );
        None
    }

    fn generate(&self, title: &str, author: &str) -> Result<CoverImage, CoverError> {
        let generator = Arc::clone(&self.generator);
        let title = title.to_string();
        let author = author.to_string();
        run_with_timeout("cover-generate", self.adapter_timeout, move || {
            generator.generate(&title, &author)
        })?
    }

    pub fn load_user_cover(&self, input: &CoverInput) -> Result<CoverImage, CoverError> {
        match input {
            CoverInput::File(path) => {
                let bytes = std::fs::read(path)?;
                image_from_bytes(bytes, None)
            }
            CoverInput::Url(url) => self.download(url),
        }
    }

    fn download(&self, url: &str) -> Result<CoverImage, CoverError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CoverError::Rejected(format!("unsupported cover url {}", url)));
        }
        log::info!("fetching cover from url: {}", url);
        let client = reqwest::blocking::Client::builder()
            .timeout(self.download_timeout)
            .build()?;
        let response = client.get(url).send()?;
        if !response.status().is_success() {
            return Err(CoverError::Rejected(format!(
                "status {} for {}",
                response.status(),
                url
            )));
        }
        let mime_extension = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| map_cover_extension(value.split(';').next().unwrap_or("").trim()));
        let bytes = response.bytes()?.to_vec();
        image_from_bytes(bytes, mime_extension)
    }
}

fn resolved(path: PathBuf, source: CoverSource, fell_through: Vec<String>) -> ResolvedCover {
    ResolvedCover {
        path,
        source,
        fell_through,
    }
}

/// User-supplied bytes must look like an image; the magic bytes decide the
/// extension when the transport did not.
fn image_from_bytes(bytes: Vec<u8>, hinted: Option<&str>) -> Result<CoverImage, CoverError> {
    if bytes.is_empty() {
        return Err(CoverError::Rejected("empty image".to_string()));
    }
    let sniffed = image::guess_format(&bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied());
    let extension = match (sniffed, hinted) {
        (Some(ext), _) => ext,
        (None, Some(ext)) => ext,
        (None, None) => return Err(CoverError::Rejected("not an image".to_string())),
    };
    Ok(CoverImage {
        bytes,
        extension: extension.to_string(),
    })
}

/// Write `cover.<ext>` into `dir`, never replacing a cover already there.
pub fn write_cover(dir: &Path, image: &CoverImage) -> Result<PathBuf, CoverError> {
    std::fs::create_dir_all(dir)?;
    let ext = image.extension.trim_start_matches('.').to_lowercase();
    for index in 1..=MAX_COVER_NAMES {
        let name = if index == 1 {
            format!("cover.{}", ext)
        } else {
            format!("cover_{}.{}", index, ext)
        };
        let target = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(&image.bytes) {
                    drop(file);
                    let _ = std::fs::remove_file(&target);
                    return Err(err.into());
                }
                log::info!("cover saved: {}", target.display());
                return Ok(target);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(CoverError::Rejected(format!(
        "no free cover name in {}",
        dir.display()
    )))
}
