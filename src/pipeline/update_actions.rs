//! Maintenance of previously emitted artifacts when a document changes
//! between runs.
//!
//! Metadata-only changes are patched into the already-emitted records so
//! the embedding and indexing stages pick them up without reprocessing;
//! a source-URL change or a deletion archives every prior artifact for the
//! id so downstream stages regenerate from scratch.

use tracing::{debug, info};

use crate::config::IngestConfig;
use crate::data_model::Document;
use crate::pipeline::archive::ObjectStore;

fn downstream_prefixes(config: &IngestConfig) -> [&str; 3] {
    [
        config.output_prefix.as_str(),
        config.embeddings_input_prefix.as_str(),
        config.indexer_input_prefix.as_str(),
    ]
}

/// Patch the descriptive fields of every emitted record for this document.
///
/// A record that does not exist under some prefix is a no-op, not an error.
/// Returns per-file error strings; failures here never abort the run.
pub async fn patch_emitted_records(
    store: &dyn ObjectStore,
    config: &IngestConfig,
    document: &Document,
) -> Vec<String> {
    let mut errors = Vec::new();

    for prefix in downstream_prefixes(config) {
        let key = format!("{prefix}/{}.json", document.id);
        if let Err(e) = patch_one(store, &key, document).await {
            errors.push(format!("ERROR updating '{key}': {e}"));
        }
    }

    errors
}

async fn patch_one(
    store: &dyn ObjectStore,
    key: &str,
    document: &Document,
) -> crate::error::Result<()> {
    let Some(raw) = store.get(key).await? else {
        debug!(%key, "no emitted record to patch");
        return Ok(());
    };

    let mut record: serde_json::Value = serde_json::from_slice(&raw)?;
    record["document_name"] = serde_json::Value::String(document.name.clone());
    record["document_description"] = serde_json::Value::String(document.description.clone());
    record["document_slug"] = serde_json::Value::String(document.slug());
    record["document_metadata"] = serde_json::to_value(&document.metadata)?;

    store.put(key, &serde_json::to_vec_pretty(&record)?).await?;
    info!(document_id = %document.id, %key, "patched emitted record");
    Ok(())
}

/// Archive every emitted artifact for a document id under the archive
/// prefix, timestamped so repeated archives never collide:
/// `<archive_prefix>/<prefix>/<id>/<timestamp>.json`.
///
/// Used when a document's source URL changed (stale artifacts would no
/// longer describe the stored content) and when a document is deleted.
pub async fn archive_document_artifacts(
    store: &dyn ObjectStore,
    config: &IngestConfig,
    document_id: &str,
    timestamp: &str,
) -> Vec<String> {
    let mut errors = Vec::new();

    for prefix in downstream_prefixes(config) {
        let from = format!("{prefix}/{document_id}.json");
        let to = format!(
            "{}/{prefix}/{document_id}/{timestamp}.json",
            config.archive_prefix
        );
        match store.rename(&from, &to).await {
            Ok(true) => info!(document_id, %from, %to, "archived emitted artifact"),
            Ok(false) => debug!(document_id, %from, "no artifact to archive"),
            Err(e) => errors.push(format!("ERROR archiving '{from}': {e}")),
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::DocumentMetadata;
    use crate::pipeline::archive::MemoryObjectStore;

    fn test_config() -> IngestConfig {
        serde_json::from_value(serde_json::json!({
            "pipeline_bucket": "pipeline",
            "document_bucket": "documents",
            "updates_file_key": "input/updates.json",
            "execution_id": "run-0001"
        }))
        .unwrap()
    }

    fn renamed_document() -> Document {
        Document {
            id: "DOC.1".to_string(),
            name: "New Name".to_string(),
            description: "New description".to_string(),
            source_url: Some("https://example.org/1.pdf".to_string()),
            content_type: Some("application/pdf".to_string()),
            slug: None,
            metadata: DocumentMetadata {
                geography: Some("DNK".to_string()),
                ..DocumentMetadata::default()
            },
        }
    }

    fn emitted_record() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "document_id": "DOC.1",
            "document_name": "Old Name",
            "document_description": "Old description",
            "document_slug": "old-name",
            "document_metadata": {},
            "document_md5_sum": "abc"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn patches_existing_records_in_every_prefix() {
        let store = MemoryObjectStore::new();
        let config = test_config();
        store.put("parser_input/DOC.1.json", &emitted_record()).await.unwrap();
        store.put("embeddings_input/DOC.1.json", &emitted_record()).await.unwrap();
        // no indexer record: patching must tolerate its absence

        let errors = patch_emitted_records(&store, &config, &renamed_document()).await;
        assert!(errors.is_empty());

        for key in ["parser_input/DOC.1.json", "embeddings_input/DOC.1.json"] {
            let raw = store.get(key).await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
            assert_eq!(value["document_name"], "New Name");
            assert_eq!(value["document_slug"], "new-name");
            // outcome fields survive the patch untouched
            assert_eq!(value["document_md5_sum"], "abc");
        }
    }

    #[tokio::test]
    async fn archives_artifacts_under_timestamped_keys() {
        let store = MemoryObjectStore::new();
        let config = test_config();
        store.put("parser_input/DOC.1.json", &emitted_record()).await.unwrap();
        store.put("indexer_input/DOC.1.json", &emitted_record()).await.unwrap();

        let errors =
            archive_document_artifacts(&store, &config, "DOC.1", "2021-12-25-10-30-00").await;
        assert!(errors.is_empty());

        assert!(!store.exists("parser_input/DOC.1.json").await.unwrap());
        assert!(store
            .exists("archive/parser_input/DOC.1/2021-12-25-10-30-00.json")
            .await
            .unwrap());
        assert!(store
            .exists("archive/indexer_input/DOC.1/2021-12-25-10-30-00.json")
            .await
            .unwrap());
    }
}
