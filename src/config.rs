use std::time::Duration;

use serde::Deserialize;

use crate::error::{IngestError, Result};

/// Run configuration consumed by the core pipeline.
///
/// The CLI layer in `main.rs` populates this one-to-one from flags; the core
/// never reads the environment or arguments itself.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Bucket holding pipeline inputs/outputs (update batch, parser input,
    /// execution state, archive).
    pub pipeline_bucket: String,
    /// Bucket holding cached canonical documents.
    pub document_bucket: String,
    /// Key of the JSON update-batch file inside the pipeline bucket.
    pub updates_file_key: String,
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    #[serde(default = "default_embeddings_prefix")]
    pub embeddings_input_prefix: String,
    #[serde(default = "default_indexer_prefix")]
    pub indexer_input_prefix: String,
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Unique identifier for this execution, recorded in the state snapshot.
    pub execution_id: String,
    #[serde(default = "default_execution_data_prefix")]
    pub execution_data_prefix: String,
    /// Optional wall-clock bound for the whole run. Documents not yet
    /// started at the deadline are failed without being dispatched.
    #[serde(default, with = "optional_secs")]
    pub run_deadline: Option<Duration>,
}

fn default_output_prefix() -> String {
    "parser_input".to_string()
}

fn default_embeddings_prefix() -> String {
    "embeddings_input".to_string()
}

fn default_indexer_prefix() -> String {
    "indexer_input".to_string()
}

fn default_archive_prefix() -> String {
    "archive".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_execution_data_prefix() -> String {
    "execution_data".to_string()
}

mod optional_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pipeline_bucket.trim().is_empty() {
            return Err(IngestError::ConfigError(
                "pipeline_bucket cannot be empty".to_string(),
            ));
        }
        if self.document_bucket.trim().is_empty() {
            return Err(IngestError::ConfigError(
                "document_bucket cannot be empty".to_string(),
            ));
        }
        if self.updates_file_key.trim().is_empty() {
            return Err(IngestError::ConfigError(
                "updates_file_key cannot be empty".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(IngestError::ConfigError(
                "worker_count must be greater than 0".to_string(),
            ));
        }
        if self.execution_id.trim().is_empty() {
            return Err(IngestError::ConfigError(
                "execution_id cannot be empty".to_string(),
            ));
        }
        for (name, prefix) in [
            ("output_prefix", &self.output_prefix),
            ("embeddings_input_prefix", &self.embeddings_input_prefix),
            ("indexer_input_prefix", &self.indexer_input_prefix),
            ("archive_prefix", &self.archive_prefix),
            ("execution_data_prefix", &self.execution_data_prefix),
        ] {
            if prefix.trim().is_empty() || prefix.starts_with('/') {
                return Err(IngestError::ConfigError(format!(
                    "{name} must be a non-empty relative key prefix, got '{prefix}'"
                )));
            }
        }
        Ok(())
    }

    /// Key of the consolidated execution-state snapshot.
    pub fn state_key(&self) -> String {
        format!("{}/state.json", self.execution_data_prefix)
    }

    /// Key of the per-document output record.
    pub fn output_key(&self, document_id: &str) -> String {
        format!("{}/{}.json", self.output_prefix, document_id)
    }

    /// Key of the run's error report, next to the input batch.
    pub fn errors_key(&self) -> String {
        let stem = self
            .updates_file_key
            .strip_suffix(".json")
            .unwrap_or(&self.updates_file_key);
        format!("{stem}.json_errors")
    }
}
