use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Hex-encoded MD5 digest of a byte stream.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Lowercase, dash-separated slug derived from a document name.
pub fn slugify(name: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Trim a string to at most `max_bytes` of UTF-8 without splitting a char.
pub fn trim_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
