//! Payload classification
//!
//! Turns an untyped capture request into a typed draft item: attachments become
//! files or images, coordinates become locations, a bare URL becomes a link and
//! any other text becomes a note.

use crate::config::CaptureLimits;
use crate::interface::{Attachment, ClassificationError, ItemPayload, RawAttachment, RawPayload};
use crate::models::{non_blank, DraftItem};
use once_cell::sync::Lazy;
use regex::Regex;

/// `geo:` URI (RFC 5870), optional parameters ignored
static GEO_URI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^geo:\s*([-+]?\d{1,3}(?:\.\d+)?)\s*,\s*([-+]?\d{1,3}(?:\.\d+)?)(?:,[-+]?\d+(?:\.\d+)?)?(?:[;?].*)?$").unwrap()
});

/// Bare "lat, lon" pair. Both halves need a decimal part so "3,5" stays a note.
static COORDINATE_PAIR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([-+]?\d{1,3}\.\d+)\s*,\s*([-+]?\d{1,3}\.\d+)$").unwrap()
});

/// Common protocols accepted as links. Exotic schemes like javascript:,
/// data:, or custom-app:// stay notes.
const LINK_PROTOCOLS: &[&str] = &["http://", "https://", "ftp://", "ftps://"];

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("avif", "image/avif"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
];

const FILE_EXTENSIONS: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("json", "application/json"),
    ("zip", "application/zip"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
];

const FALLBACK_MIME: &str = "application/octet-stream";

/// Check if a string looks like a URL with a common protocol
pub fn is_valid_url(text: &str) -> bool {
    let trimmed = text.trim();

    // validator doesn't check for newlines/length limits
    if trimmed.len() > 2000 || trimmed.contains(char::is_whitespace) {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if !LINK_PROTOCOLS.iter().any(|p| lower.starts_with(p)) {
        return false;
    }

    validator::validate_url(trimmed)
}

fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Parse text that is nothing but a coordinate pair
pub fn parse_coordinates(text: &str) -> Option<(f64, f64)> {
    let trimmed = text.trim();
    let caps = GEO_URI_REGEX
        .captures(trimmed)
        .or_else(|| COORDINATE_PAIR_REGEX.captures(trimmed))?;
    let lat: f64 = caps[1].parse().ok()?;
    let lon: f64 = caps[2].parse().ok()?;
    valid_coordinates(lat, lon).then_some((lat, lon))
}

fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Best-effort MIME type from a filename extension
pub fn guess_mime_type(filename: &str) -> &'static str {
    extension(filename)
        .and_then(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .chain(FILE_EXTENSIONS)
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(FALLBACK_MIME)
}

fn is_image(mime_type: &str) -> bool {
    mime_type.to_ascii_lowercase().starts_with("image/")
}

/// Strip any directory components a client may have sent along
fn base_filename(filename: &str) -> &str {
    filename.rsplit(&['/', '\\'][..]).next().unwrap_or(filename).trim()
}

fn classify_attachment(
    raw: RawAttachment,
    caption: Option<String>,
    limits: &CaptureLimits,
) -> Result<ItemPayload, ClassificationError> {
    if raw.size_bytes > limits.max_file_bytes {
        return Err(ClassificationError::TooLarge {
            size: raw.size_bytes,
            limit: limits.max_file_bytes,
        });
    }
    if raw.storage_ref.trim().is_empty() {
        return Err(ClassificationError::Unrecognized("attachment has no storage reference".to_string()));
    }
    let filename = base_filename(&raw.filename);
    if filename.is_empty() {
        return Err(ClassificationError::Unrecognized("attachment has no filename".to_string()));
    }

    let mime_type = raw
        .mime_type
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| m.to_ascii_lowercase())
        .unwrap_or_else(|| guess_mime_type(filename).to_string());

    let attachment = Attachment {
        storage_ref: raw.storage_ref,
        filename: filename.to_string(),
        mime_type,
        size_bytes: raw.size_bytes,
        caption,
    };

    Ok(if is_image(&attachment.mime_type) {
        ItemPayload::Image(attachment)
    } else {
        ItemPayload::File(attachment)
    })
}

/// Classify a raw payload into a draft item.
///
/// Precedence: attachment, explicit location, URL, coordinate text, note.
pub fn classify(raw: RawPayload, limits: &CaptureLimits) -> Result<DraftItem, ClassificationError> {
    let RawPayload { text, attachment, location } = raw;

    if let Some(text) = &text {
        let size = text.len() as u64;
        if size > limits.max_text_bytes {
            return Err(ClassificationError::TooLarge { size, limit: limits.max_text_bytes });
        }
    }
    let text = text.filter(|t| !t.trim().is_empty());

    let payload = match (attachment, location) {
        (Some(_), Some(_)) => return Err(ClassificationError::Ambiguous),
        (Some(attachment), None) => {
            let caption = text.as_deref().and_then(non_blank);
            classify_attachment(attachment, caption, limits)?
        }
        (None, Some(location)) => {
            if !valid_coordinates(location.lat, location.lon) {
                return Err(ClassificationError::Unrecognized(format!(
                    "coordinates out of range: {}, {}",
                    location.lat, location.lon
                )));
            }
            let label = location
                .label
                .as_deref()
                .and_then(non_blank)
                .or_else(|| text.as_deref().and_then(non_blank));
            ItemPayload::Location { lat: location.lat, lon: location.lon, label }
        }
        (None, None) => {
            let text = text.ok_or(ClassificationError::Empty)?;
            let trimmed = text.trim();
            if is_valid_url(trimmed) {
                ItemPayload::Link { url: trimmed.to_string(), card: None }
            } else if let Some((lat, lon)) = parse_coordinates(trimmed) {
                ItemPayload::Location { lat, lon, label: None }
            } else {
                ItemPayload::Note { text }
            }
        }
    };

    Ok(DraftItem::new(payload))
}
