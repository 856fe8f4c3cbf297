use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{md5_hex, slugify};

/// Descriptive metadata supplied by the upstream content-metadata API.
///
/// Everything here is carried through to the output record untouched; the
/// pipeline itself only reads `geography` and `publication_ts` (for the
/// storage key) and treats the rest as opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub publication_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub geography: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A single document record from the incoming update batch.
///
/// Identity is `id`; every other field may change between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_url: Option<String>,
    /// Content type as declared upstream. Frequently wrong; the classifier
    /// only consults it when byte sniffing is inconclusive.
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Slug used in storage keys and output records. Falls back to a slug
    /// derived from the document name when upstream did not supply one.
    pub fn slug(&self) -> String {
        match &self.slug {
            Some(s) if !s.is_empty() => s.clone(),
            _ => slugify(&self.name),
        }
    }

    /// Digest over the declared fields, used by the reader's first-level
    /// diff: if this matches the prior run's digest the document is tagged
    /// `Unchanged` and never enters the fetch pipeline.
    pub fn descriptor_digest(&self) -> String {
        let serialized =
            serde_json::to_vec(self).expect("document serialization is infallible");
        md5_hex(&serialized)
    }

    /// Tombstone for a document present in prior state but absent from the
    /// current batch.
    pub fn tombstone(id: &str) -> Self {
        Document {
            id: id.to_string(),
            name: String::new(),
            description: String::new(),
            source_url: None,
            content_type: None,
            slug: None,
            metadata: DocumentMetadata::default(),
        }
    }
}

/// Action tag attached to each document by the reader diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Added,
    Updated,
    Deleted,
    Unchanged,
}

/// A Document plus the action the pipeline should take for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub document: Document,
    pub kind: UpdateKind,
}

/// Terminal status of one document's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Skipped,
    Failed,
    Deleted,
}

/// Per-document outcome. Created exactly once by the worker that owned the
/// document; immutable after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub document_id: String,
    pub status: ProcessingStatus,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub cdn_object: Option<String>,
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn success(
        document_id: &str,
        content_type: String,
        content_hash: String,
        cdn_object: String,
    ) -> Self {
        ProcessingResult {
            document_id: document_id.to_string(),
            status: ProcessingStatus::Success,
            content_type: Some(content_type),
            content_hash: Some(content_hash),
            cdn_object: Some(cdn_object),
            error: None,
        }
    }

    pub fn skipped(document_id: &str, content_type: Option<String>, reason: String) -> Self {
        ProcessingResult {
            document_id: document_id.to_string(),
            status: ProcessingStatus::Skipped,
            content_type,
            content_hash: None,
            cdn_object: None,
            error: Some(reason),
        }
    }

    pub fn failed(document_id: &str, error: String) -> Self {
        ProcessingResult {
            document_id: document_id.to_string(),
            status: ProcessingStatus::Failed,
            content_type: None,
            content_hash: None,
            cdn_object: None,
            error: Some(error),
        }
    }

    pub fn deleted(document_id: &str) -> Self {
        ProcessingResult {
            document_id: document_id.to_string(),
            status: ProcessingStatus::Deleted,
            content_type: None,
            content_hash: None,
            cdn_object: None,
            error: None,
        }
    }
}

/// What the execution state remembers about one document between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentState {
    pub status: ProcessingStatus,
    pub content_hash: Option<String>,
    /// Digest of the declared document fields (see
    /// [`Document::descriptor_digest`]), for the first-level unchanged check.
    pub descriptor_digest: Option<String>,
    pub cdn_object: Option<String>,
    pub content_type: Option<String>,
    /// Source URL at the time of the prior run; a change forces prior
    /// artifacts to be archived so downstream stages regenerate cleanly.
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Persisted id -> state mapping enabling incremental runs.
///
/// Read once at run start as an immutable snapshot, fully rewritten once at
/// run end. Never partially written mid-run: a crash leaves the previous
/// snapshot intact and the next run reprocesses in full.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: Option<String>,
    #[serde(default)]
    pub documents: HashMap<String, DocumentState>,
}

impl ExecutionState {
    pub fn get(&self, document_id: &str) -> Option<&DocumentState> {
        self.documents.get(document_id)
    }
}

/// One structured output record per document, consumed by the parser /
/// embedding / indexing stages downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserInputRecord {
    pub document_id: String,
    pub document_name: String,
    pub document_description: String,
    pub document_source_url: Option<String>,
    pub document_cdn_object: Option<String>,
    pub document_content_type: Option<String>,
    pub document_md5_sum: Option<String>,
    pub document_slug: String,
    pub document_metadata: DocumentMetadata,
    /// Left empty here; later pipeline stages populate it.
    #[serde(default)]
    pub pipeline_metadata: serde_json::Map<String, serde_json::Value>,
}

impl ParserInputRecord {
    /// Merge a document's descriptive fields with its processing outcome.
    pub fn build(document: &Document, result: &ProcessingResult) -> Self {
        ParserInputRecord {
            document_id: document.id.clone(),
            document_name: document.name.clone(),
            document_description: document.description.clone(),
            document_source_url: document.source_url.clone(),
            document_cdn_object: result.cdn_object.clone(),
            document_content_type: result.content_type.clone(),
            document_md5_sum: result.content_hash.clone(),
            document_slug: document.slug(),
            document_metadata: document.metadata.clone(),
            pipeline_metadata: serde_json::Map::new(),
        }
    }
}
