use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chunk layout of one dataset, fixed at probe time.
///
/// Invariants (checked by [`DatasetMetadata::validate`]):
/// - `chunk_size > 0`
/// - `total_chunks == total_questions.div_ceil(chunk_size)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_title: String,
    pub total_questions: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,
    #[error("total_chunks {actual} does not match ceil({total_questions} / {chunk_size}) = {expected}")]
    ChunkCountMismatch {
        total_questions: u64,
        chunk_size: u64,
        expected: u64,
        actual: u64,
    },
}

impl DatasetMetadata {
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.chunk_size == 0 {
            return Err(MetadataError::ZeroChunkSize);
        }
        let expected = self.total_questions.div_ceil(self.chunk_size);
        if self.total_chunks != expected {
            return Err(MetadataError::ChunkCountMismatch {
                total_questions: self.total_questions,
                chunk_size: self.chunk_size,
                expected,
                actual: self.total_chunks,
            });
        }
        Ok(())
    }

    /// Chunk owning `index`, or `None` when the index is out of range.
    pub fn chunk_for_index(&self, index: u64) -> Option<u64> {
        if self.chunk_size == 0 || index >= self.total_questions {
            return None;
        }
        Some(index / self.chunk_size)
    }

    /// Absolute index of the first question in `chunk_id`.
    pub fn chunk_start(&self, chunk_id: u64) -> u64 {
        chunk_id.saturating_mul(self.chunk_size)
    }

    /// Number of questions in `chunk_id`: `chunk_size` for every chunk except
    /// possibly the last, which covers the remainder. Zero when out of range.
    pub fn chunk_len(&self, chunk_id: u64) -> u64 {
        if chunk_id >= self.total_chunks {
            return 0;
        }
        let start = self.chunk_start(chunk_id);
        self.total_questions.saturating_sub(start).min(self.chunk_size)
    }

    /// Half-open index range `[start, end)` covered by `chunk_id`.
    pub fn chunk_range(&self, chunk_id: u64) -> Option<(u64, u64)> {
        if chunk_id >= self.total_chunks {
            return None;
        }
        let start = self.chunk_start(chunk_id);
        Some((start, start + self.chunk_len(chunk_id)))
    }

    pub fn is_chunk(&self, chunk_id: u64) -> bool {
        chunk_id < self.total_chunks
    }
}

/// One question record. The paging cache never interprets its fields; they are
/// carried verbatim for the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Question(pub serde_json::Value);

/// A fully loaded contiguous slice of the dataset, the unit of fetch and
/// caching. A `Chunk` is never partial: the fetcher rejects short or oversized
/// bodies before construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: u64,
    pub questions: Vec<Question>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// One position of the assembled view: either a real question or a stand-in
/// for a position whose owning chunk is not cached yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Question(Question),
    Placeholder { index: u64, chunk_id: u64 },
}

impl Slot {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Slot::Placeholder { .. })
    }

    pub fn question(&self) -> Option<&Question> {
        match self {
            Slot::Question(q) => Some(q),
            Slot::Placeholder { .. } => None,
        }
    }

    /// Owning chunk id of a placeholder slot.
    pub fn placeholder_chunk(&self) -> Option<u64> {
        match self {
            Slot::Placeholder { chunk_id, .. } => Some(*chunk_id),
            Slot::Question(_) => None,
        }
    }
}

/// The full-length ordered sequence combining real questions and placeholders.
///
/// Derived state: always reconstructable from metadata plus cache contents and
/// never the source of truth. Consumers hold it as an `Arc` snapshot and
/// re-read after a successful load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledView {
    slots: Vec<Slot>,
}

impl AssembledView {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Slot> {
        usize::try_from(index).ok().and_then(|i| self.slots.get(i))
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn loaded_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_placeholder()).count()
    }
}
