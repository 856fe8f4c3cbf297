use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use doc_ingest::config::IngestConfig;
use doc_ingest::pipeline::archive::{Archiver, FsObjectStore};
use doc_ingest::pipeline::convert::{BrowserRenderer, ConverterRouter, SofficeConverter};
use doc_ingest::pipeline::fetch::HttpFetcher;
use doc_ingest::pipeline::reader::{load_execution_state, load_update_batch};
use doc_ingest::pipeline::PipelineContext;
use doc_ingest::retry::RetryPolicy;
use doc_ingest::scheduler::run_ingest;

/// Ingest stage: fetch source documents, normalise them to canonical PDFs,
/// archive them content-addressed, and emit parser input records.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directory backing the object stores; each bucket is a
    /// subdirectory beneath it.
    #[arg(long, default_value = ".")]
    data_root: PathBuf,

    /// Bucket from which to read/write pipeline input/output files
    #[arg(long)]
    pipeline_bucket: String,

    /// Bucket in which to store cached canonical documents
    #[arg(long)]
    document_bucket: String,

    /// Key of the JSON document-update batch inside the pipeline bucket
    #[arg(long)]
    updates_file_key: String,

    /// Prefix for output records; this directory is the parser input
    #[arg(long, default_value = "parser_input")]
    output_prefix: String,

    /// Prefix containing the embeddings input files
    #[arg(long, default_value = "embeddings_input")]
    embeddings_input_prefix: String,

    /// Prefix containing the indexer input files
    #[arg(long, default_value = "indexer_input")]
    indexer_input_prefix: String,

    /// Prefix under which stale documents are archived
    #[arg(long, default_value = "archive")]
    archive_prefix: String,

    /// Number of concurrent document pipelines
    #[arg(long, default_value_t = 4)]
    worker_count: usize,

    /// Unique identifier for this execution
    #[arg(long)]
    execution_id: String,

    /// Prefix for the execution-state snapshot
    #[arg(long, default_value = "execution_data")]
    execution_data_prefix: String,

    /// Optional wall-clock bound for the whole run, in seconds
    #[arg(long)]
    run_deadline_secs: Option<u64>,

    /// Timeout applied to each fetch, conversion and upload, in seconds
    #[arg(long, default_value_t = 60)]
    operation_timeout_secs: u64,

    /// Office conversion backend binary
    #[arg(long, default_value = "soffice")]
    office_binary: String,

    /// Browser rendering backend binary
    #[arg(long, default_value = "chromium")]
    browser_binary: String,

    /// Emit logs as structured JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Arc::new(IngestConfig {
        pipeline_bucket: args.pipeline_bucket,
        document_bucket: args.document_bucket,
        updates_file_key: args.updates_file_key,
        output_prefix: args.output_prefix,
        embeddings_input_prefix: args.embeddings_input_prefix,
        indexer_input_prefix: args.indexer_input_prefix,
        archive_prefix: args.archive_prefix,
        worker_count: args.worker_count,
        execution_id: args.execution_id,
        execution_data_prefix: args.execution_data_prefix,
        run_deadline: args.run_deadline_secs.map(Duration::from_secs),
    });
    config.validate().context("invalid configuration")?;

    let pipeline_store = Arc::new(FsObjectStore::new(
        args.data_root.join(&config.pipeline_bucket),
    ));
    let document_store = Arc::new(FsObjectStore::new(
        args.data_root.join(&config.document_bucket),
    ));

    let prior = load_execution_state(pipeline_store.as_ref(), &config.state_key())
        .await
        .context("loading prior execution state")?;
    let updates = load_update_batch(pipeline_store.as_ref(), &config.updates_file_key, &prior)
        .await
        .context("reading update batch")?;

    let operation_timeout = Duration::from_secs(args.operation_timeout_secs);
    let ctx = Arc::new(PipelineContext {
        config: config.clone(),
        fetcher: Arc::new(HttpFetcher::new(operation_timeout, RetryPolicy::fetch())?),
        router: Arc::new(ConverterRouter::new(
            Arc::new(SofficeConverter::new(args.office_binary, operation_timeout)),
            Arc::new(BrowserRenderer::new(args.browser_binary, operation_timeout)),
            RetryPolicy::conversion(),
        )),
        archiver: Arc::new(Archiver::new(document_store, RetryPolicy::upload())),
        pipeline_store,
        prior: Arc::new(prior),
    });

    let summary = run_ingest(ctx, updates).await?;

    if summary.any_failed() {
        warn!(
            failed = summary.count(doc_ingest::data_model::ProcessingStatus::Failed),
            "run completed with document failures"
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
