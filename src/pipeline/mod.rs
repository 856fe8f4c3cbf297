pub mod archive;
pub mod classify;
pub mod convert;
pub mod emit;
pub mod fetch;
pub mod reader;
pub mod update_actions;

use std::sync::Arc;

use tracing::{error, info};

use crate::config::IngestConfig;
use crate::data_model::{Document, ExecutionState, ProcessingResult};
use crate::error::IngestError;
use crate::pipeline::archive::{Archiver, ObjectStore};
use crate::pipeline::classify::classify;
use crate::pipeline::convert::{Conversion, ConverterRouter};
use crate::pipeline::fetch::Fetcher;

/// Everything a worker needs to run one document's pipeline. Shared across
/// workers behind an `Arc`; all members are safe for concurrent use.
pub struct PipelineContext {
    pub config: Arc<IngestConfig>,
    pub fetcher: Arc<dyn Fetcher>,
    pub router: Arc<ConverterRouter>,
    pub archiver: Arc<Archiver>,
    pub pipeline_store: Arc<dyn ObjectStore>,
    /// Immutable snapshot of the prior run's state.
    pub prior: Arc<ExecutionState>,
}

/// Run fetch -> classify -> convert -> archive for one document.
///
/// Never returns an error: every failure is captured in the returned
/// `ProcessingResult` so one bad document cannot abort the batch.
pub async fn process_document(ctx: &PipelineContext, document: &Document) -> ProcessingResult {
    let Some(url) = document.source_url.as_deref().filter(|u| !u.is_empty()) else {
        info!(document_id = %document.id, "skipping document without a source URL");
        return ProcessingResult::skipped(
            &document.id,
            document.content_type.clone(),
            "document has no source URL".to_string(),
        );
    };

    let payload = match ctx.fetcher.fetch(url).await {
        Ok(payload) => payload,
        Err(source) => {
            let err = if source.is_transient() {
                IngestError::FetchExhausted {
                    url: url.to_string(),
                    source,
                }
            } else {
                IngestError::Fetch {
                    url: url.to_string(),
                    source,
                }
            };
            error!(document_id = %document.id, error = %err, "fetch failed");
            return ProcessingResult::failed(&document.id, err.to_string());
        }
    };

    // The transport header is the freshest declared type; the batch record
    // is the fallback. Both rank below byte sniffing.
    let declared = payload
        .content_type
        .as_deref()
        .or(document.content_type.as_deref());
    let kind = classify(&payload.bytes, declared, Some(url));
    info!(document_id = %document.id, content_type = kind.mime(), "classified source document");

    let canonical = match ctx.router.to_canonical(payload.bytes, &kind).await {
        Ok(Conversion::Pdf(bytes)) => bytes,
        Ok(Conversion::Skipped(content_type)) => {
            return ProcessingResult::skipped(
                &document.id,
                Some(content_type.clone()),
                IngestError::UnsupportedContentType(content_type).to_string(),
            );
        }
        Err(err) => {
            error!(document_id = %document.id, error = %err, "conversion failed");
            return ProcessingResult::failed(&document.id, err.to_string());
        }
    };

    let prior_hash = ctx
        .prior
        .get(&document.id)
        .and_then(|state| state.content_hash.as_deref());
    match ctx
        .archiver
        .store_canonical(document, &canonical, prior_hash)
        .await
    {
        Ok(outcome) => ProcessingResult::success(
            &document.id,
            kind.mime().to_string(),
            outcome.md5_sum,
            outcome.key,
        ),
        Err(err) => {
            error!(document_id = %document.id, error = %err, "archiving failed");
            ProcessingResult::failed(&document.id, err.to_string())
        }
    }
}
