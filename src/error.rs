use thiserror::Error;

use crate::pipeline::fetch::FetchError;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, IngestError>;

/// The Error type for ingest operations.
///
/// Run-level variants (`MalformedBatch`, `StateUnreadable`, `ConfigError`)
/// abort before any worker starts. Everything else is captured per document
/// and converted into a `ProcessingResult` by the worker that produced it.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("malformed update batch: {0}")]
    MalformedBatch(String),

    #[error("prior execution state unreadable: {0}")]
    StateUnreadable(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("fetch failed for '{url}': {source}")]
    Fetch { url: String, source: FetchError },

    #[error("fetch attempts exhausted for '{url}': {source}")]
    FetchExhausted { url: String, source: FetchError },

    #[error("conversion backend '{backend}' failed: {reason}")]
    ConversionFailed { backend: &'static str, reason: String },

    #[error("content type '{0}' has no conversion path")]
    UnsupportedContentType(String),

    #[error("archive upload failed for '{key}': {reason}")]
    ArchiveFailed { key: String, reason: String },

    #[error("object store error: {0}")]
    Storage(String),

    #[error("run deadline exceeded before document was dispatched")]
    DeadlineExceeded,
}

impl IngestError {
    /// True for errors that abort the whole run rather than a single document.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::MalformedBatch(_)
                | IngestError::StateUnreadable(_)
                | IngestError::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_run_level_errors_are_fatal() {
        assert!(IngestError::MalformedBatch("not json".into()).is_fatal());
        assert!(IngestError::StateUnreadable("bad state".into()).is_fatal());
        assert!(IngestError::ConfigError("no bucket".into()).is_fatal());

        assert!(!IngestError::UnsupportedContentType("image/gif".into()).is_fatal());
        assert!(!IngestError::ArchiveFailed {
            key: "k".into(),
            reason: "io".into()
        }
        .is_fatal());
        assert!(!IngestError::DeadlineExceeded.is_fatal());
    }
}
