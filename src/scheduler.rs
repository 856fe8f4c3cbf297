use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};

use crate::data_model::{
    DocumentState, DocumentUpdate, ExecutionState, ProcessingResult, ProcessingStatus, UpdateKind,
};
use crate::error::{IngestError, Result};
use crate::pipeline::emit::Emitter;
use crate::pipeline::{process_document, update_actions, PipelineContext};
use crate::retry::RetryPolicy;

/// Aggregate outcome of one ingest run.
#[derive(Debug)]
pub struct RunSummary {
    /// One terminal result per document id, regardless of worker count.
    pub results: HashMap<String, ProcessingResult>,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// True when any document ended `Failed`; drives the process exit code
    /// so automated pipelines can detect partial failure.
    pub fn any_failed(&self) -> bool {
        self.count(ProcessingStatus::Failed) > 0
    }
}

/// One worker's contribution, streamed to the emitter as it completes.
struct WorkerOutput {
    update: DocumentUpdate,
    result: ProcessingResult,
    errors: Vec<String>,
}

/// Execute every update with at most `worker_count` pipelines in flight,
/// stream results to the emitter, and write the consolidated state snapshot
/// after the pool drains.
///
/// `Unchanged` and `Deleted` updates never enter the fetch pipeline.
/// Completion order is arbitrary; every record is keyed by document id.
pub async fn run_ingest(
    ctx: Arc<PipelineContext>,
    updates: Vec<DocumentUpdate>,
) -> Result<RunSummary> {
    let emitter = Emitter::new(
        ctx.pipeline_store.clone(),
        ctx.config.clone(),
        RetryPolicy::upload(),
    );
    let archive_timestamp = Utc::now().format("%Y-%m-%d-%H-%M-%S").to_string();
    let deadline = ctx.config.run_deadline.map(|d| Instant::now() + d);
    let semaphore = Arc::new(Semaphore::new(ctx.config.worker_count));
    let (tx, mut rx) = mpsc::channel::<WorkerOutput>(updates.len().max(1));

    info!(
        documents = updates.len(),
        workers = ctx.config.worker_count,
        "starting ingest run"
    );

    for update in updates {
        let document_id = update.document.id.clone();
        match update.kind {
            UpdateKind::Unchanged => {
                // First-level cache hit: re-emit the prior outcome without
                // fetching anything.
                let result = match ctx.prior.get(&document_id) {
                    Some(state) => ProcessingResult {
                        document_id: document_id.clone(),
                        status: ProcessingStatus::Success,
                        content_type: state.content_type.clone(),
                        content_hash: state.content_hash.clone(),
                        cdn_object: state.cdn_object.clone(),
                        error: None,
                    },
                    None => ProcessingResult::failed(
                        &document_id,
                        "unchanged document missing from prior state".to_string(),
                    ),
                };
                let _ = tx
                    .send(WorkerOutput {
                        update,
                        result,
                        errors: Vec::new(),
                    })
                    .await;
            }
            UpdateKind::Deleted => {
                let ctx = ctx.clone();
                let tx = tx.clone();
                let semaphore = semaphore.clone();
                let timestamp = archive_timestamp.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    let errors = update_actions::archive_document_artifacts(
                        ctx.pipeline_store.as_ref(),
                        &ctx.config,
                        &update.document.id,
                        &timestamp,
                    )
                    .await;
                    let result = ProcessingResult::deleted(&update.document.id);
                    let _ = tx
                        .send(WorkerOutput {
                            update,
                            result,
                            errors,
                        })
                        .await;
                });
            }
            UpdateKind::Added | UpdateKind::Updated => {
                let ctx = ctx.clone();
                let tx = tx.clone();
                let semaphore = semaphore.clone();
                let timestamp = archive_timestamp.clone();
                let span = info_span!("document_pipeline", document_id = %document_id);
                tokio::spawn(
                    async move {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };

                        // Items still queued when the run deadline passes are
                        // abandoned before starting; in-flight work finishes.
                        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                            let result = ProcessingResult::failed(
                                &update.document.id,
                                IngestError::DeadlineExceeded.to_string(),
                            );
                            let _ = tx
                                .send(WorkerOutput {
                                    update,
                                    result,
                                    errors: Vec::new(),
                                })
                                .await;
                            return;
                        }

                        let mut errors = Vec::new();
                        if update.kind == UpdateKind::Updated {
                            let source_changed = ctx
                                .prior
                                .get(&update.document.id)
                                .map(|state| state.source_url != update.document.source_url)
                                .unwrap_or(false);
                            if source_changed {
                                errors.extend(
                                    update_actions::archive_document_artifacts(
                                        ctx.pipeline_store.as_ref(),
                                        &ctx.config,
                                        &update.document.id,
                                        &timestamp,
                                    )
                                    .await,
                                );
                            } else {
                                errors.extend(
                                    update_actions::patch_emitted_records(
                                        ctx.pipeline_store.as_ref(),
                                        &ctx.config,
                                        &update.document,
                                    )
                                    .await,
                                );
                            }
                        }

                        let result = process_document(&ctx, &update.document).await;
                        let _ = tx
                            .send(WorkerOutput {
                                update,
                                result,
                                errors,
                            })
                            .await;
                    }
                    .instrument(span),
                );
            }
        }
    }
    drop(tx);

    // Single consumer: one slot per document id, written exactly once by the
    // worker that owned it, inserted here by the only reader of the channel.
    let mut results = HashMap::new();
    let mut errors = Vec::new();
    let mut next_state = ExecutionState {
        execution_id: Some(ctx.config.execution_id.clone()),
        documents: HashMap::new(),
    };

    while let Some(output) = rx.recv().await {
        let document = &output.update.document;

        if let Err(e) = emitter.emit_record(document, &output.result).await {
            error!(document_id = %document.id, error = %e, "failed to emit output record");
            errors.push(format!("ERROR emitting '{}': {e}", document.id));
        }
        errors.extend(output.errors);
        if output.result.status == ProcessingStatus::Failed {
            if let Some(detail) = &output.result.error {
                errors.push(format!("ERROR ingesting '{}': {detail}", document.id));
            }
        }

        if output.result.status != ProcessingStatus::Deleted {
            next_state.documents.insert(
                document.id.clone(),
                DocumentState {
                    status: output.result.status,
                    content_hash: output.result.content_hash.clone(),
                    descriptor_digest: Some(document.descriptor_digest()),
                    cdn_object: output.result.cdn_object.clone(),
                    content_type: output.result.content_type.clone(),
                    source_url: document.source_url.clone(),
                },
            );
        }
        results.insert(document.id.clone(), output.result);
    }

    // Strict barrier: every worker has returned before the snapshot is
    // written, and it is written exactly once.
    emitter.write_state(&next_state).await?;
    emitter.write_errors(&errors).await?;

    info!(
        success = results.values().filter(|r| r.status == ProcessingStatus::Success).count(),
        skipped = results.values().filter(|r| r.status == ProcessingStatus::Skipped).count(),
        failed = results.values().filter(|r| r.status == ProcessingStatus::Failed).count(),
        deleted = results.values().filter(|r| r.status == ProcessingStatus::Deleted).count(),
        "ingest run complete"
    );

    Ok(RunSummary { results, errors })
}
