use std::time::Duration;

use qbank_core::types::{Chunk, DatasetMetadata};
use thiserror::Error;

use crate::wire::{ChunkDocError, MetadataDoc};

#[derive(Debug, Error)]
pub enum FetchError {
    /// Chunk id out of range or 404 from the repository. Signals a
    /// metadata/cache mismatch rather than a transient condition.
    #[error("chunk {chunk_id} not found for dataset {dataset}")]
    NotFound { dataset: String, chunk_id: u64 },
    /// Transport failure or non-404 HTTP status. Retryable on a later access.
    #[error("network error fetching chunk {chunk_id} of {dataset}")]
    Network {
        dataset: String,
        chunk_id: u64,
        #[source]
        source: reqwest::Error,
    },
    /// Body did not parse into the expected shape or failed full-chunk
    /// validation. Treated like a network error for retry purposes since the
    /// resource could be fixed server-side.
    #[error("malformed chunk {chunk_id} of {dataset}: {reason}")]
    Malformed {
        dataset: String,
        chunk_id: u64,
        reason: String,
    },
}

impl FetchError {
    pub fn chunk_id(&self) -> u64 {
        match self {
            FetchError::NotFound { chunk_id, .. }
            | FetchError::Network { chunk_id, .. }
            | FetchError::Malformed { chunk_id, .. } => *chunk_id,
        }
    }
}

/// HTTP access to the chunked dataset repository.
///
/// Stateless by design: no caching and no retries live here. Retry policy is
/// the access coordinator's concern.
#[derive(Debug, Clone)]
pub struct ChunkClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChunkClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self::with_http(http, base_url))
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn metadata_url(&self, dataset: &str) -> String {
        format!("{}/{dataset}/metadata.json", self.base_url)
    }

    pub fn chunk_url(&self, dataset: &str, chunk_id: u64) -> String {
        format!("{}/{dataset}/chunks/chunk_{chunk_id}.json", self.base_url)
    }

    /// One GET of the metadata descriptor. Raw transport/parse outcome; the
    /// probe decides how failures map to "not chunked".
    pub async fn fetch_metadata(&self, dataset: &str) -> Result<Option<MetadataDoc>, reqwest::Error> {
        let url = self.metadata_url(dataset);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let doc = resp.json::<MetadataDoc>().await?;
        Ok(Some(doc))
    }

    /// One GET of one chunk resource, validated into a full [`Chunk`].
    pub async fn fetch_chunk(
        &self,
        dataset: &str,
        meta: &DatasetMetadata,
        chunk_id: u64,
    ) -> Result<Chunk, FetchError> {
        if !meta.is_chunk(chunk_id) {
            return Err(FetchError::NotFound {
                dataset: dataset.to_string(),
                chunk_id,
            });
        }

        let url = self.chunk_url(dataset, chunk_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Network {
                dataset: dataset.to_string(),
                chunk_id,
                source,
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                dataset: dataset.to_string(),
                chunk_id,
            });
        }
        let resp = resp
            .error_for_status()
            .map_err(|source| FetchError::Network {
                dataset: dataset.to_string(),
                chunk_id,
                source,
            })?;

        let body = resp.bytes().await.map_err(|source| FetchError::Network {
            dataset: dataset.to_string(),
            chunk_id,
            source,
        })?;

        let doc: crate::wire::ChunkDoc =
            serde_json::from_slice(&body).map_err(|err| FetchError::Malformed {
                dataset: dataset.to_string(),
                chunk_id,
                reason: err.to_string(),
            })?;

        doc.try_to_core(meta, chunk_id)
            .map_err(|err: ChunkDocError| FetchError::Malformed {
                dataset: dataset.to_string(),
                chunk_id,
                reason: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn out_of_range_chunk_is_not_found_before_any_request() {
        // Unroutable base: reaching the network would surface as Network, so
        // NotFound proves the range guard fired first.
        let client = ChunkClient::with_http(reqwest::Client::new(), "http://127.0.0.1:9/data");
        let meta = DatasetMetadata {
            dataset_title: "CAD".to_string(),
            total_questions: 120,
            chunk_size: 50,
            total_chunks: 3,
        };
        match client.fetch_chunk("CAD", &meta, 3).await {
            Err(FetchError::NotFound { chunk_id: 3, .. }) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn urls_follow_repository_layout() {
        let client = ChunkClient::with_http(reqwest::Client::new(), "http://host:1234/data/");
        assert_eq!(
            client.metadata_url("CAD"),
            "http://host:1234/data/CAD/metadata.json"
        );
        assert_eq!(
            client.chunk_url("CAD", 7),
            "http://host:1234/data/CAD/chunks/chunk_7.json"
        );
    }
}
