use qbank_core::types::DatasetMetadata;

use crate::fetch::ChunkClient;

/// Determines whether `dataset` is served chunked and returns its layout.
///
/// `None` routes the caller to whole-dataset loading. That covers a missing
/// or malformed descriptor, an unchunked or single-chunk dataset, and any
/// transient network failure: a broken chunk endpoint must degrade to
/// slow-but-correct loading instead of failing the dataset open.
pub async fn probe(client: &ChunkClient, dataset: &str) -> Option<DatasetMetadata> {
    let doc = match client.fetch_metadata(dataset).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            tracing::debug!(
                target: "qbank",
                event = "probe_fallback",
                dataset,
                reason = "metadata_absent",
                "no chunk metadata; falling back to whole-dataset loading"
            );
            return None;
        }
        Err(err) => {
            tracing::debug!(
                target: "qbank",
                event = "probe_fallback",
                dataset,
                reason = "metadata_unavailable",
                error = %err,
                "metadata fetch failed; falling back to whole-dataset loading"
            );
            return None;
        }
    };

    match doc.try_to_core() {
        Ok(meta) => {
            tracing::info!(
                target: "qbank",
                event = "dataset_chunked",
                dataset,
                total_questions = meta.total_questions,
                chunk_size = meta.chunk_size,
                total_chunks = meta.total_chunks,
                "dataset is chunked"
            );
            Some(meta)
        }
        Err(err) => {
            tracing::debug!(
                target: "qbank",
                event = "probe_fallback",
                dataset,
                reason = %err,
                "metadata rejected; falling back to whole-dataset loading"
            );
            None
        }
    }
}
