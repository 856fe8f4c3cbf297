use std::sync::Arc;

use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::data_model::{Document, ExecutionState, ParserInputRecord, ProcessingResult};
use crate::error::{IngestError, Result};
use crate::pipeline::archive::ObjectStore;
use crate::retry::RetryPolicy;

/// Writes per-document output records and, after the pool drains, the
/// consolidated execution-state snapshot.
///
/// Receives results in arbitrary completion order and keys every record by
/// document id. The state snapshot is written exactly once, never
/// incrementally: a crash mid-run leaves the previous snapshot intact and
/// the next run reprocesses in full rather than skipping silently.
pub struct Emitter {
    store: Arc<dyn ObjectStore>,
    config: Arc<IngestConfig>,
    retry: RetryPolicy,
}

impl Emitter {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<IngestConfig>, retry: RetryPolicy) -> Self {
        Emitter {
            store,
            config,
            retry,
        }
    }

    /// Write one structured output record for a document.
    pub async fn emit_record(
        &self,
        document: &Document,
        result: &ProcessingResult,
    ) -> Result<String> {
        let record = ParserInputRecord::build(document, result);
        let key = self.config.output_key(&document.id);
        let data = serde_json::to_vec_pretty(&record)?;
        self.put_with_retry(&key, &data).await?;
        info!(document_id = %document.id, %key, status = ?result.status, "emitted output record");
        Ok(key)
    }

    /// Write the consolidated state snapshot for the next run's diff.
    pub async fn write_state(&self, state: &ExecutionState) -> Result<()> {
        let key = self.config.state_key();
        let data = serde_json::to_vec_pretty(state)?;
        self.put_with_retry(&key, &data).await?;
        info!(%key, documents = state.documents.len(), "wrote execution state snapshot");
        Ok(())
    }

    /// Write the aggregated error report next to the input batch. No file
    /// is written for a clean run.
    pub async fn write_errors(&self, errors: &[String]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let key = self.config.errors_key();
        let data = serde_json::to_vec_pretty(errors)?;
        self.put_with_retry(&key, &data).await?;
        warn!(%key, count = errors.len(), "wrote error report");
        Ok(())
    }

    async fn put_with_retry(&self, key: &str, data: &[u8]) -> Result<()> {
        self.retry
            .run(
                "emit_write",
                |e: &IngestError| matches!(e, IngestError::Storage(_) | IngestError::Io { .. }),
                || self.store.put(key, data),
            )
            .await
    }
}
