use std::collections::HashSet;

use tracing::info;

use crate::data_model::{
    Document, DocumentUpdate, ExecutionState, ProcessingStatus, UpdateKind,
};
use crate::error::{IngestError, Result};
use crate::pipeline::archive::ObjectStore;

/// Read the prior run's execution state from the pipeline store.
///
/// An absent snapshot is a normal first run (empty state); an unparseable
/// one is fatal, because an incremental run against garbage state could
/// silently skip work.
pub async fn load_execution_state(
    store: &dyn ObjectStore,
    state_key: &str,
) -> Result<ExecutionState> {
    match store.get(state_key).await? {
        None => {
            info!(key = state_key, "no prior execution state, treating as first run");
            Ok(ExecutionState::default())
        }
        Some(raw) => serde_json::from_slice(&raw)
            .map_err(|e| IngestError::StateUnreadable(format!("{state_key}: {e}"))),
    }
}

/// Parse the raw update batch and diff it against the prior state.
///
/// Tagging rules:
/// - id absent from prior state -> `Added`
/// - declared fields and source URL identical to the prior *successful*
///   run -> `Unchanged` (short-circuits to emission, never fetched)
/// - anything else present in the batch -> `Updated`
/// - id present in prior state but absent from the batch -> `Deleted`
///   (emitted so downstream stages can retract the document)
pub fn read_update_batch(raw: &[u8], prior: &ExecutionState) -> Result<Vec<DocumentUpdate>> {
    let documents: Vec<Document> = serde_json::from_slice(raw)
        .map_err(|e| IngestError::MalformedBatch(e.to_string()))?;

    let mut seen: HashSet<String> = HashSet::new();
    for document in &documents {
        if !seen.insert(document.id.clone()) {
            return Err(IngestError::MalformedBatch(format!(
                "duplicate document id '{}'",
                document.id
            )));
        }
    }

    let mut updates: Vec<DocumentUpdate> = documents
        .into_iter()
        .map(|document| {
            let kind = match prior.get(&document.id) {
                None => UpdateKind::Added,
                Some(state) => {
                    let unchanged = state.status == ProcessingStatus::Success
                        && state.descriptor_digest.as_deref()
                            == Some(document.descriptor_digest().as_str());
                    if unchanged {
                        UpdateKind::Unchanged
                    } else {
                        UpdateKind::Updated
                    }
                }
            };
            DocumentUpdate { document, kind }
        })
        .collect();

    let mut deleted_ids: Vec<&String> = prior
        .documents
        .keys()
        .filter(|id| !seen.contains(*id))
        .collect();
    deleted_ids.sort();
    updates.extend(deleted_ids.into_iter().map(|id| DocumentUpdate {
        document: Document::tombstone(id),
        kind: UpdateKind::Deleted,
    }));

    let counts = updates.iter().fold([0usize; 4], |mut acc, u| {
        match u.kind {
            UpdateKind::Added => acc[0] += 1,
            UpdateKind::Updated => acc[1] += 1,
            UpdateKind::Deleted => acc[2] += 1,
            UpdateKind::Unchanged => acc[3] += 1,
        }
        acc
    });
    info!(
        added = counts[0],
        updated = counts[1],
        deleted = counts[2],
        unchanged = counts[3],
        "read update batch"
    );

    Ok(updates)
}

/// Load the batch file from the pipeline store and diff it. A missing batch
/// file is fatal; there is nothing valid to process.
pub async fn load_update_batch(
    store: &dyn ObjectStore,
    updates_file_key: &str,
    prior: &ExecutionState,
) -> Result<Vec<DocumentUpdate>> {
    let raw = store
        .get(updates_file_key)
        .await?
        .ok_or_else(|| {
            IngestError::MalformedBatch(format!("updates file '{updates_file_key}' not found"))
        })?;
    read_update_batch(&raw, prior)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::DocumentState;

    fn batch_json(ids: &[&str]) -> Vec<u8> {
        let docs: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "name": format!("Document {id}"),
                    "description": "d",
                    "source_url": format!("https://example.org/{id}.pdf"),
                    "content_type": "application/pdf"
                })
            })
            .collect();
        serde_json::to_vec(&docs).unwrap()
    }

    fn prior_with(entries: &[(&str, ProcessingStatus, Option<String>)]) -> ExecutionState {
        let mut state = ExecutionState::default();
        for (id, status, digest) in entries {
            state.documents.insert(
                id.to_string(),
                DocumentState {
                    status: *status,
                    content_hash: Some("hash".to_string()),
                    descriptor_digest: digest.clone(),
                    cdn_object: Some("DNK/2021/x_hash.pdf".to_string()),
                    content_type: Some("application/pdf".to_string()),
                    source_url: Some(format!("https://example.org/{id}.pdf")),
                },
            );
        }
        state
    }

    #[test]
    fn malformed_batch_is_fatal() {
        let err = read_update_batch(b"{not json", &ExecutionState::default()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedBatch(_)));

        // An object where an array is expected is also malformed.
        let err = read_update_batch(b"{\"id\": \"X\"}", &ExecutionState::default()).unwrap_err();
        assert!(matches!(err, IngestError::MalformedBatch(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = read_update_batch(&batch_json(&["A", "A"]), &ExecutionState::default())
            .unwrap_err();
        assert!(err.to_string().contains("duplicate document id"));
    }

    #[test]
    fn new_ids_are_added() {
        let updates = read_update_batch(&batch_json(&["A", "B"]), &ExecutionState::default())
            .unwrap();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.kind == UpdateKind::Added));
    }

    #[test]
    fn unchanged_requires_matching_digest_and_prior_success() {
        let raw = batch_json(&["A", "B", "C"]);
        let documents: Vec<Document> = serde_json::from_slice(&raw).unwrap();

        let prior = prior_with(&[
            // A: digest matches a successful prior run -> Unchanged
            (
                "A",
                ProcessingStatus::Success,
                Some(documents[0].descriptor_digest()),
            ),
            // B: prior run failed, must be reprocessed even if digest matches
            (
                "B",
                ProcessingStatus::Failed,
                Some(documents[1].descriptor_digest()),
            ),
            // C: digest differs -> Updated
            ("C", ProcessingStatus::Success, Some("stale".to_string())),
        ]);

        let updates = read_update_batch(&raw, &prior).unwrap();
        let kind_of = |id: &str| {
            updates
                .iter()
                .find(|u| u.document.id == id)
                .map(|u| u.kind)
                .unwrap()
        };
        assert_eq!(kind_of("A"), UpdateKind::Unchanged);
        assert_eq!(kind_of("B"), UpdateKind::Updated);
        assert_eq!(kind_of("C"), UpdateKind::Updated);
    }

    #[test]
    fn missing_documents_become_deleted_tombstones() {
        let prior = prior_with(&[("GONE", ProcessingStatus::Success, None)]);
        let updates = read_update_batch(&batch_json(&["A"]), &prior).unwrap();
        assert_eq!(updates.len(), 2);
        let deleted = updates.iter().find(|u| u.kind == UpdateKind::Deleted).unwrap();
        assert_eq!(deleted.document.id, "GONE");
    }
}
