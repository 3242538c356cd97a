use std::collections::HashMap;

use qbank_core::types::Chunk;

/// Keyed store of loaded chunks for one dataset session.
///
/// Owned exclusively by the access coordinator; every other component either
/// reads it by reference (assembler) or is handed explicit chunk ids
/// (fetcher, prefetcher). Only full chunks reach `put`: the fetcher rejects
/// partial bodies before a `Chunk` can exist.
#[derive(Debug, Default)]
pub struct ChunkCache {
    chunks: HashMap<u64, Chunk>,
}

impl ChunkCache {
    pub fn get(&self, chunk_id: u64) -> Option<&Chunk> {
        self.chunks.get(&chunk_id)
    }

    /// Inserts or replaces. A fetch always replaces, never merges.
    pub fn put(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.id, chunk);
    }

    pub fn has(&self, chunk_id: u64) -> bool {
        self.chunks.contains_key(&chunk_id)
    }

    pub fn evict(&mut self, chunk_id: u64) -> bool {
        self.chunks.remove(&chunk_id).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.chunks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Evicts every chunk outside `[center - keep_radius, center + keep_radius]`
    /// and returns the evicted ids. Only cached chunks are candidates; fetches
    /// in flight are tracked elsewhere and unaffected.
    pub fn retain_window(&mut self, center: u64, keep_radius: u64) -> Vec<u64> {
        let low = center.saturating_sub(keep_radius);
        let high = center.saturating_add(keep_radius);
        let evicted: Vec<u64> = self
            .chunks
            .keys()
            .copied()
            .filter(|id| *id < low || *id > high)
            .collect();
        for id in &evicted {
            self.chunks.remove(id);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbank_core::types::Question;

    fn chunk(id: u64, len: usize) -> Chunk {
        Chunk {
            id,
            questions: (0..len)
                .map(|i| Question(serde_json::json!({ "q": i })))
                .collect(),
        }
    }

    #[test]
    fn put_replaces_existing_chunk() {
        let mut cache = ChunkCache::default();
        cache.put(chunk(1, 50));
        cache.put(chunk(1, 50));
        assert_eq!(cache.len(), 1);
        assert!(cache.has(1));
        assert!(!cache.has(0));
    }

    #[test]
    fn retain_window_keeps_only_window() {
        let mut cache = ChunkCache::default();
        for id in 0..6 {
            cache.put(chunk(id, 10));
        }

        let mut evicted = cache.retain_window(3, 1);
        evicted.sort_unstable();
        assert_eq!(evicted, vec![0, 1, 5]);

        let mut kept: Vec<u64> = cache.keys().collect();
        kept.sort_unstable();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn retain_window_near_zero_does_not_underflow() {
        let mut cache = ChunkCache::default();
        cache.put(chunk(0, 10));
        cache.put(chunk(1, 10));
        cache.put(chunk(2, 10));

        let evicted = cache.retain_window(0, 0);
        assert_eq!(evicted.len(), 2);
        let kept: Vec<u64> = cache.keys().collect();
        assert_eq!(kept, vec![0]);
    }

    #[test]
    fn retain_window_noop_when_all_inside() {
        let mut cache = ChunkCache::default();
        for id in 0..3 {
            cache.put(chunk(id, 10));
        }
        assert!(cache.retain_window(1, 1).is_empty());
        assert_eq!(cache.len(), 3);
    }
}
