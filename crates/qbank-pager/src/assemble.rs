use qbank_core::types::{AssembledView, DatasetMetadata, Slot};

use crate::cache::ChunkCache;

/// Builds the full-length ordered view: real questions for cached chunks,
/// placeholders tagged with owning chunk id and absolute index for the rest.
///
/// Pure and deterministic. Recomputed whole rather than patched because the
/// cache changes in whole-chunk bursts and recomputation is linear in
/// `total_questions`.
pub fn assemble(meta: &DatasetMetadata, cache: &ChunkCache) -> AssembledView {
    let mut slots = Vec::with_capacity(usize::try_from(meta.total_questions).unwrap_or(0));

    for chunk_id in 0..meta.total_chunks {
        let start = meta.chunk_start(chunk_id);
        let len = meta.chunk_len(chunk_id);

        match cache.get(chunk_id) {
            Some(chunk) => {
                for q in &chunk.questions {
                    slots.push(Slot::Question(q.clone()));
                }
            }
            None => {
                for offset in 0..len {
                    slots.push(Slot::Placeholder {
                        index: start + offset,
                        chunk_id,
                    });
                }
            }
        }
    }

    AssembledView::new(slots)
}
