//! JSON documents as served by the dataset repository, plus conversion into
//! the validated core types. Unknown fields are ignored so the repository can
//! grow its manifest format without breaking older viewers.

use qbank_core::types::{Chunk, DatasetMetadata, Question};
use serde::Deserialize;
use thiserror::Error;

/// `{dataset}/metadata.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataDoc {
    #[serde(default)]
    pub exam_name: Option<String>,
    #[serde(default)]
    pub exam_code: Option<String>,
    #[serde(default)]
    pub chunked: bool,
    #[serde(default)]
    pub chunk_size: u64,
    #[serde(default)]
    pub total_chunks: u64,
    #[serde(default)]
    pub total_questions: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataDocError {
    #[error("dataset is not chunked")]
    NotChunked,
    #[error("dataset fits in a single chunk ({total_questions} <= {chunk_size})")]
    SingleChunk {
        total_questions: u64,
        chunk_size: u64,
    },
    #[error(transparent)]
    Invalid(#[from] qbank_core::types::MetadataError),
}

impl MetadataDoc {
    /// Validated conversion. Datasets that are unchunked or would fit in one
    /// chunk are rejected here; the caller falls back to whole-dataset
    /// loading for those.
    pub fn try_to_core(&self) -> Result<DatasetMetadata, MetadataDocError> {
        if !self.chunked {
            return Err(MetadataDocError::NotChunked);
        }
        if self.chunk_size == 0 || self.total_questions <= self.chunk_size {
            return Err(MetadataDocError::SingleChunk {
                total_questions: self.total_questions,
                chunk_size: self.chunk_size,
            });
        }
        let title = self
            .exam_name
            .clone()
            .or_else(|| self.exam_code.clone())
            .unwrap_or_default();
        let meta = DatasetMetadata {
            dataset_title: title,
            total_questions: self.total_questions,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
        };
        meta.validate()?;
        Ok(meta)
    }
}

/// `{dataset}/chunks/chunk_{id}.json`. `start_question`/`end_question` are
/// 1-based inclusive, matching the repository generator.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDoc {
    #[serde(default)]
    pub chunk_id: Option<u64>,
    #[serde(default)]
    pub start_question: Option<u64>,
    #[serde(default)]
    pub end_question: Option<u64>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkDocError {
    #[error("chunk body carries id {body} but was fetched as chunk {requested}")]
    IdMismatch { requested: u64, body: u64 },
    #[error("expected {expected} questions, body has {actual}")]
    WrongLength { expected: u64, actual: u64 },
    #[error("question range {start}-{end} does not match chunk range {expected_start}-{expected_end}")]
    RangeMismatch {
        start: u64,
        end: u64,
        expected_start: u64,
        expected_end: u64,
    },
}

impl ChunkDoc {
    /// Validated conversion into a full [`Chunk`]. Partial chunks never pass:
    /// the question count must equal the layout's expected length for
    /// `chunk_id`, and the 1-based range fields must agree when present.
    pub fn try_to_core(
        self,
        meta: &DatasetMetadata,
        chunk_id: u64,
    ) -> Result<Chunk, ChunkDocError> {
        if let Some(body) = self.chunk_id {
            if body != chunk_id {
                return Err(ChunkDocError::IdMismatch {
                    requested: chunk_id,
                    body,
                });
            }
        }

        let expected = meta.chunk_len(chunk_id);
        let actual = self.questions.len() as u64;
        if actual != expected {
            return Err(ChunkDocError::WrongLength { expected, actual });
        }

        let expected_start = meta.chunk_start(chunk_id) + 1;
        let expected_end = meta.chunk_start(chunk_id) + expected;
        if let (Some(start), Some(end)) = (self.start_question, self.end_question) {
            if start != expected_start || end != expected_end {
                return Err(ChunkDocError::RangeMismatch {
                    start,
                    end,
                    expected_start,
                    expected_end,
                });
            }
        }

        Ok(Chunk {
            id: chunk_id,
            questions: self.questions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DatasetMetadata {
        DatasetMetadata {
            dataset_title: "CAD".to_string(),
            total_questions: 120,
            chunk_size: 50,
            total_chunks: 3,
        }
    }

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question(serde_json::json!({ "question": format!("q{i}") })))
            .collect()
    }

    #[test]
    fn metadata_doc_rejects_unchunked_and_single_chunk() {
        let doc: MetadataDoc =
            serde_json::from_str(r#"{"chunked": false, "chunk_size": 50, "total_chunks": 3, "total_questions": 120}"#)
                .unwrap();
        assert_eq!(doc.try_to_core().unwrap_err(), MetadataDocError::NotChunked);

        let doc: MetadataDoc =
            serde_json::from_str(r#"{"chunked": true, "chunk_size": 50, "total_chunks": 1, "total_questions": 40}"#)
                .unwrap();
        assert!(matches!(
            doc.try_to_core().unwrap_err(),
            MetadataDocError::SingleChunk { .. }
        ));
    }

    #[test]
    fn metadata_doc_checks_ceil_invariant() {
        let doc: MetadataDoc = serde_json::from_str(
            r#"{"exam_name": "CAD", "chunked": true, "chunk_size": 50, "total_chunks": 2, "total_questions": 120}"#,
        )
        .unwrap();
        assert!(matches!(
            doc.try_to_core().unwrap_err(),
            MetadataDocError::Invalid(_)
        ));
    }

    #[test]
    fn metadata_doc_ignores_unknown_fields() {
        let doc: MetadataDoc = serde_json::from_str(
            r#"{"exam_code": "CAD", "exam_name": "Cert Admin", "chunked": true,
                "chunk_size": 50, "total_chunks": 3, "total_questions": 120,
                "created_chunks": [0, 1, 2], "created_at": "2025-07-13"}"#,
        )
        .unwrap();
        let m = doc.try_to_core().unwrap();
        assert_eq!(m, meta_with_title("Cert Admin"));
    }

    fn meta_with_title(title: &str) -> DatasetMetadata {
        DatasetMetadata {
            dataset_title: title.to_string(),
            ..meta()
        }
    }

    #[test]
    fn chunk_doc_accepts_full_chunk() {
        let doc = ChunkDoc {
            chunk_id: Some(2),
            start_question: Some(101),
            end_question: Some(120),
            questions: questions(20),
        };
        let chunk = doc.try_to_core(&meta(), 2).unwrap();
        assert_eq!(chunk.id, 2);
        assert_eq!(chunk.len(), 20);
    }

    #[test]
    fn chunk_doc_rejects_partial_chunk() {
        let doc = ChunkDoc {
            chunk_id: Some(0),
            start_question: None,
            end_question: None,
            questions: questions(30),
        };
        assert_eq!(
            doc.try_to_core(&meta(), 0).unwrap_err(),
            ChunkDocError::WrongLength {
                expected: 50,
                actual: 30
            }
        );
    }

    #[test]
    fn chunk_doc_rejects_wrong_range() {
        let doc = ChunkDoc {
            chunk_id: None,
            start_question: Some(1),
            end_question: Some(50),
            questions: questions(50),
        };
        assert!(matches!(
            doc.try_to_core(&meta(), 1).unwrap_err(),
            ChunkDocError::RangeMismatch { .. }
        ));
    }

    #[test]
    fn chunk_doc_rejects_id_mismatch() {
        let doc = ChunkDoc {
            chunk_id: Some(1),
            start_question: None,
            end_question: None,
            questions: questions(50),
        };
        assert_eq!(
            doc.try_to_core(&meta(), 0).unwrap_err(),
            ChunkDocError::IdMismatch {
                requested: 0,
                body: 1
            }
        );
    }
}
