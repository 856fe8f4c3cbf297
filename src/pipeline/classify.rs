//! Content-type classification.
//!
//! Upstream metadata is frequently wrong (a `.pdf` URL can 200 with an HTML
//! error page), so the declared type is only a fallback. Precedence:
//! byte-signature sniffing, then the declared MIME type, then the extension
//! of the source URL.

pub const CONTENT_TYPE_PDF: &str = "application/pdf";
pub const CONTENT_TYPE_HTML: &str = "text/html";
pub const CONTENT_TYPE_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const CONTENT_TYPE_DOC: &str = "application/msword";

/// Closed set of content kinds the router dispatches on. Adding a kind is a
/// compile-time-checked exhaustive match, not a string comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Html,
    Office,
    /// Sniffed/declared type with no known conversion path. A normal,
    /// expected outcome, not an error.
    Unsupported(String),
}

impl ContentKind {
    /// Canonical MIME string for output records.
    pub fn mime(&self) -> &str {
        match self {
            ContentKind::Pdf => CONTENT_TYPE_PDF,
            ContentKind::Html => CONTENT_TYPE_HTML,
            ContentKind::Office => CONTENT_TYPE_DOCX,
            ContentKind::Unsupported(declared) => declared,
        }
    }
}

/// Best-known true content type for a payload.
pub fn classify(bytes: &[u8], declared: Option<&str>, source_url: Option<&str>) -> ContentKind {
    if let Some(kind) = sniff(bytes) {
        return kind;
    }
    if let Some(kind) = declared.and_then(from_mime) {
        return kind;
    }
    if let Some(kind) = source_url.and_then(from_extension) {
        return kind;
    }
    let fallback = declared
        .map(normalize_mime)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    ContentKind::Unsupported(fallback)
}

/// Magic-byte sniffing; `None` when inconclusive.
fn sniff(bytes: &[u8]) -> Option<ContentKind> {
    let trimmed = strip_leading_noise(bytes);

    if trimmed.starts_with(b"%PDF-") {
        return Some(ContentKind::Pdf);
    }
    if looks_like_html(trimmed) {
        return Some(ContentKind::Html);
    }
    // OOXML packages are ZIP containers; require an office marker in the
    // central directory area so an arbitrary ZIP is not misrouted.
    if trimmed.starts_with(b"PK\x03\x04") && contains_office_marker(bytes) {
        return Some(ContentKind::Office);
    }
    // Legacy Compound File Binary header (.doc).
    if trimmed.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
        return Some(ContentKind::Office);
    }
    None
}

fn strip_leading_noise(bytes: &[u8]) -> &[u8] {
    let without_bom = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let start = without_bom
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(without_bom.len());
    &without_bom[start..]
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head: Vec<u8> = bytes
        .iter()
        .take(64)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    head.starts_with(b"<!doctype html") || head.starts_with(b"<html")
}

fn contains_office_marker(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(8192)];
    find_subsequence(window, b"[Content_Types].xml") || find_subsequence(window, b"word/")
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or(raw).trim().to_lowercase()
}

fn from_mime(raw: &str) -> Option<ContentKind> {
    match normalize_mime(raw).as_str() {
        CONTENT_TYPE_PDF => Some(ContentKind::Pdf),
        CONTENT_TYPE_HTML | "application/xhtml+xml" => Some(ContentKind::Html),
        CONTENT_TYPE_DOCX | CONTENT_TYPE_DOC => Some(ContentKind::Office),
        _ => None,
    }
}

fn from_extension(source_url: &str) -> Option<ContentKind> {
    let path = source_url
        .split(['?', '#'])
        .next()
        .unwrap_or(source_url);
    let ext = path.rsplit('.').next()?.to_lowercase();
    match ext.as_str() {
        "pdf" => Some(ContentKind::Pdf),
        "html" | "htm" => Some(ContentKind::Html),
        "doc" | "docx" => Some(ContentKind::Office),
        _ => None,
    }
}
