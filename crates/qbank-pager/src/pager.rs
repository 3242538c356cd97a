use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use qbank_core::types::{AssembledView, Chunk, DatasetMetadata};
use qbank_observe::metrics::{Counter, Gauge};
use thiserror::Error;
use tokio::sync::watch;

use crate::assemble::assemble;
use crate::cache::ChunkCache;
use crate::fetch::{ChunkClient, FetchError};
use crate::prefetch;
use crate::probe::probe;

/// Operator-configured paging caps.
///
/// `keep_radius` is applied as `max(keep_radius, prefetch_radius)` so a
/// prefetch pass is never immediately undone by eviction.
#[derive(Debug, Clone, Copy)]
pub struct PagerCaps {
    /// Chunks prefetched on each side of the chunk just loaded.
    pub prefetch_radius: u64,
    /// Chunks retained on each side of the last loaded chunk.
    pub keep_radius: u64,
}

impl Default for PagerCaps {
    fn default() -> Self {
        Self {
            prefetch_radius: 1,
            keep_radius: 2,
        }
    }
}

impl PagerCaps {
    fn effective_keep_radius(&self) -> u64 {
        self.keep_radius.max(self.prefetch_radius)
    }
}

#[derive(Debug, Default)]
pub struct PagerMetrics {
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub chunks_fetched: Counter,
    pub fetch_failures: Counter,
    pub prefetches_scheduled: Counter,
    pub chunks_evicted: Counter,
    pub cached_chunks: Gauge,
    pub cached_chunks_high_water: Gauge,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no chunked dataset is open")]
    NoDataset,
    #[error("index {index} out of range (dataset has {total_questions} questions)")]
    OutOfRange { index: u64, total_questions: u64 },
    #[error("dataset changed while loading chunk {chunk_id}")]
    Superseded { chunk_id: u64 },
    /// An in-flight fetch for this chunk was awaited and it failed. No second
    /// request was issued; a later access retries.
    #[error("chunk {chunk_id} is unavailable")]
    ChunkUnavailable { chunk_id: u64 },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Completion signal broadcast to accesses deduplicated onto one in-flight
/// fetch. `Pending` is only ever the initial value; observing it after the
/// channel closed means the fetch owner was dropped mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    Pending,
    Installed,
    Failed,
    Superseded,
}

/// One open dataset session: metadata, cache, in-flight registry, and the
/// current view snapshot. Replaced wholesale on dataset switch.
struct Session {
    dataset: String,
    meta: DatasetMetadata,
    cache: ChunkCache,
    /// At most one outstanding fetch per chunk id. Waiters clone the receiver
    /// and await completion instead of issuing a duplicate request.
    pending: HashMap<u64, watch::Receiver<FetchOutcome>>,
    view: Arc<AssembledView>,
}

struct Inner {
    /// Bumped on every open/close. Fetch completions carrying a stale
    /// generation are discarded so a new dataset's cache can never be
    /// populated with the old dataset's chunks.
    generation: u64,
    session: Option<Session>,
}

/// Access coordinator for the chunked lazy-loading paging cache.
///
/// Owns the chunk cache for the lifetime of one dataset session. All session
/// state sits behind one mutex with short critical sections; no lock is held
/// across an await. Cheap to clone (shared state).
#[derive(Clone)]
pub struct QuestionPager {
    client: ChunkClient,
    caps: PagerCaps,
    metrics: Arc<PagerMetrics>,
    inner: Arc<Mutex<Inner>>,
}

enum Step {
    /// Owning chunk already cached.
    Hit,
    /// Owning chunk is in flight; await the existing fetch.
    Wait {
        rx: watch::Receiver<FetchOutcome>,
        chunk_id: u64,
    },
    /// This caller performs the fetch.
    Fetch {
        tx: watch::Sender<FetchOutcome>,
        generation: u64,
        dataset: String,
        meta: DatasetMetadata,
        chunk_id: u64,
    },
}

/// Clears the in-flight entry when the fetch owner is dropped before
/// completing, e.g. a load cancelled by a caller-side timeout. Without this
/// the dead entry would route every later access to a closed channel and the
/// chunk could never leave the in-flight state.
struct FetchGuard {
    pager: QuestionPager,
    generation: u64,
    chunk_id: u64,
    armed: bool,
}

impl FetchGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.pager.lock();
        if inner.generation != self.generation {
            return;
        }
        if let Some(session) = inner.session.as_mut() {
            session.pending.remove(&self.chunk_id);
        }
    }
}

impl QuestionPager {
    pub fn new(base_url: &str, caps: PagerCaps) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(ChunkClient::new(base_url)?, caps))
    }

    pub fn with_client(client: ChunkClient, caps: PagerCaps) -> Self {
        Self {
            client,
            caps,
            metrics: Arc::new(PagerMetrics::default()),
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                session: None,
            })),
        }
    }

    pub fn metrics(&self) -> Arc<PagerMetrics> {
        self.metrics.clone()
    }

    pub fn caps(&self) -> PagerCaps {
        self.caps
    }

    pub(crate) fn client(&self) -> &ChunkClient {
        &self.client
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probes `dataset` and, when it is chunked, installs a fresh session
    /// (empty cache, all-placeholder view). Any previous session is dropped
    /// first and its in-flight fetches are invalidated by the generation bump.
    ///
    /// `None` means "not chunked": the caller falls back to whole-dataset
    /// loading outside this subsystem.
    pub async fn open_dataset(&self, dataset: &str) -> Option<DatasetMetadata> {
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.session = None;
            self.metrics.cached_chunks.set(0);
            inner.generation
        };

        let meta = probe(&self.client, dataset).await?;

        let mut inner = self.lock();
        if inner.generation != generation {
            // A later open/close superseded this probe.
            return None;
        }
        let cache = ChunkCache::default();
        let view = Arc::new(assemble(&meta, &cache));
        inner.session = Some(Session {
            dataset: dataset.to_string(),
            meta: meta.clone(),
            cache,
            pending: HashMap::new(),
            view,
        });
        tracing::info!(
            target: "qbank",
            event = "session_opened",
            dataset,
            generation,
            total_chunks = meta.total_chunks,
            "chunked dataset session opened"
        );
        Some(meta)
    }

    /// Drops the current session, if any.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.session = None;
        self.metrics.cached_chunks.set(0);
    }

    pub fn is_open(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn metadata(&self) -> Option<DatasetMetadata> {
        self.lock().session.as_ref().map(|s| s.meta.clone())
    }

    /// Current assembled view snapshot. A successful load invalidates earlier
    /// snapshots; re-read after `ensure_loaded`.
    pub fn view(&self) -> Option<Arc<AssembledView>> {
        self.lock().session.as_ref().map(|s| s.view.clone())
    }

    /// Makes the chunk owning `index` resident, blocking only on that chunk.
    ///
    /// Fast path: already cached, no network. Otherwise either awaits the
    /// chunk's in-flight fetch or performs the single fetch itself; on success
    /// the cache is trimmed to the keep-window around the new chunk, the view
    /// is recomputed, and a background prefetch pass is started.
    ///
    /// Failure caches nothing and leaves the chunk Unloaded, so every later
    /// access is a fresh retry. That holds under cancellation too: a load
    /// dropped mid-fetch clears its in-flight entry, and a waiter that finds
    /// the fetch owner gone retries from scratch.
    pub async fn ensure_loaded(&self, index: u64) -> Result<(), LoadError> {
        // Hit/miss are counted once per call, on the first decision.
        let mut first_decision = true;
        loop {
            // Decide under the lock, then release it before any await.
            let step = {
                let mut inner = self.lock();
                let generation = inner.generation;
                let session = inner.session.as_mut().ok_or(LoadError::NoDataset)?;
                let chunk_id = session
                    .meta
                    .chunk_for_index(index)
                    .ok_or(LoadError::OutOfRange {
                        index,
                        total_questions: session.meta.total_questions,
                    })?;

                if session.cache.has(chunk_id) {
                    if first_decision {
                        self.metrics.cache_hits.inc();
                    }
                    Step::Hit
                } else {
                    if first_decision {
                        self.metrics.cache_misses.inc();
                    }
                    if let Some(rx) = session.pending.get(&chunk_id) {
                        Step::Wait {
                            rx: rx.clone(),
                            chunk_id,
                        }
                    } else {
                        let (tx, rx) = watch::channel(FetchOutcome::Pending);
                        session.pending.insert(chunk_id, rx);
                        Step::Fetch {
                            tx,
                            generation,
                            dataset: session.dataset.clone(),
                            meta: session.meta.clone(),
                            chunk_id,
                        }
                    }
                }
            };
            first_decision = false;

            match step {
                Step::Hit => return Ok(()),
                Step::Wait { mut rx, chunk_id } => {
                    // Wakes on the owner's completion send, or errs if the
                    // owner was dropped before sending.
                    let _ = rx.changed().await;
                    let outcome = *rx.borrow();
                    match outcome {
                        FetchOutcome::Installed => return Ok(()),
                        FetchOutcome::Failed => {
                            return Err(LoadError::ChunkUnavailable { chunk_id })
                        }
                        FetchOutcome::Superseded => {
                            return Err(LoadError::Superseded { chunk_id })
                        }
                        FetchOutcome::Pending => {
                            // The owning load was cancelled mid-fetch. Clear
                            // the dead entry, then retry from scratch.
                            self.remove_dead_entry(chunk_id, &rx);
                        }
                    }
                }
                Step::Fetch {
                    tx,
                    generation,
                    dataset,
                    meta,
                    chunk_id,
                } => {
                    let mut guard = FetchGuard {
                        pager: self.clone(),
                        generation,
                        chunk_id,
                        armed: true,
                    };
                    let fetched = self.client.fetch_chunk(&dataset, &meta, chunk_id).await;
                    guard.disarm();
                    return match fetched {
                        Ok(chunk) => {
                            if !self.install_chunk(generation, chunk, Some(chunk_id)) {
                                let _ = tx.send(FetchOutcome::Superseded);
                                return Err(LoadError::Superseded { chunk_id });
                            }
                            let _ = tx.send(FetchOutcome::Installed);
                            self.spawn_prefetch(dataset, chunk_id, generation);
                            Ok(())
                        }
                        Err(err) => {
                            tracing::warn!(
                                target: "qbank",
                                event = "chunk_load_failed",
                                dataset = %dataset,
                                chunk_id,
                                generation,
                                error = %err,
                                "chunk fetch failed; positions stay placeholders"
                            );
                            self.finish_failed(generation, chunk_id);
                            let _ = tx.send(FetchOutcome::Failed);
                            Err(LoadError::Fetch(err))
                        }
                    };
                }
            }
        }
    }

    /// Removes the in-flight entry for `chunk_id` if it is still the given
    /// dead channel. A fresh fetch registered in the meantime is left alone.
    fn remove_dead_entry(&self, chunk_id: u64, rx: &watch::Receiver<FetchOutcome>) {
        let mut inner = self.lock();
        if let Some(session) = inner.session.as_mut() {
            if session
                .pending
                .get(&chunk_id)
                .is_some_and(|cur| cur.same_channel(rx))
            {
                session.pending.remove(&chunk_id);
            }
        }
    }

    /// Records a completed fetch: clears the in-flight entry, caches the
    /// chunk, optionally trims to the keep-window around `evict_center`, and
    /// recomputes the view. Returns `false` (and caches nothing) when the
    /// session generation moved on while the fetch was in flight.
    pub(crate) fn install_chunk(
        &self,
        generation: u64,
        chunk: Chunk,
        evict_center: Option<u64>,
    ) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(
                target: "qbank",
                event = "stale_chunk_discarded",
                chunk_id = chunk.id,
                generation,
                current_generation = inner.generation,
                "discarding fetch completion from a superseded session"
            );
            return false;
        }
        let Some(session) = inner.session.as_mut() else {
            return false;
        };

        let chunk_id = chunk.id;
        session.pending.remove(&chunk_id);
        session.cache.put(chunk);

        let mut evicted = 0u64;
        if let Some(center) = evict_center {
            let ids = session
                .cache
                .retain_window(center, self.caps.effective_keep_radius());
            evicted = ids.len() as u64;
            self.metrics.chunks_evicted.inc_by(evicted);
        }

        session.view = Arc::new(assemble(&session.meta, &session.cache));

        self.metrics.chunks_fetched.inc();
        let cached = session.cache.len() as u64;
        self.metrics.cached_chunks.set(cached);
        self.metrics.cached_chunks_high_water.max(cached);
        tracing::info!(
            target: "qbank",
            event = "chunk_loaded",
            dataset = %session.dataset,
            chunk_id,
            cached_chunks = cached,
            evicted,
            generation,
            "chunk cached"
        );
        true
    }

    /// Clears the in-flight entry after a failed fetch so the chunk returns
    /// to Unloaded and the next access retries. A completion from a
    /// superseded session leaves the current session's state and failure
    /// count untouched.
    pub(crate) fn finish_failed(&self, generation: u64, chunk_id: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if let Some(session) = inner.session.as_mut() {
            session.pending.remove(&chunk_id);
        }
        // Counted under the lock so a caller observing the failure also sees
        // the in-flight entry cleared.
        self.metrics.fetch_failures.inc();
    }

    /// Registers in-flight entries for every prefetchable chunk in the window
    /// around `center` and returns the fetch plan, or `None` when there is
    /// nothing to do (session gone, generation stale, or window fully
    /// cached/in-flight).
    pub(crate) fn plan_prefetch(
        &self,
        dataset: &str,
        center: u64,
        generation: u64,
    ) -> Option<(DatasetMetadata, Vec<(u64, watch::Sender<FetchOutcome>)>)> {
        let mut inner = self.lock();
        if inner.generation != generation {
            return None;
        }
        let session = inner.session.as_mut()?;
        if session.dataset != dataset {
            return None;
        }

        let (low, high) =
            prefetch::window_bounds(center, self.caps.prefetch_radius, session.meta.total_chunks)?;

        let mut plan = Vec::new();
        for chunk_id in low..=high {
            if session.cache.has(chunk_id) || session.pending.contains_key(&chunk_id) {
                continue;
            }
            let (tx, rx) = watch::channel(FetchOutcome::Pending);
            session.pending.insert(chunk_id, rx);
            plan.push((chunk_id, tx));
        }
        if plan.is_empty() {
            return None;
        }

        self.metrics.prefetches_scheduled.inc_by(plan.len() as u64);
        tracing::debug!(
            target: "qbank",
            event = "prefetch_window",
            dataset,
            center,
            low,
            high,
            scheduled = plan.len() as u64,
            generation,
            "prefetching neighbor chunks"
        );
        Some((session.meta.clone(), plan))
    }

    fn spawn_prefetch(&self, dataset: String, center: u64, generation: u64) {
        if self.caps.prefetch_radius == 0 {
            return;
        }
        let pager = self.clone();
        tokio::spawn(async move {
            prefetch::run(pager, dataset, center, generation).await;
        });
    }
}
