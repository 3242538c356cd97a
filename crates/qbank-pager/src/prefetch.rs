use tokio::task::JoinSet;

use crate::pager::{FetchOutcome, QuestionPager};

/// Inclusive chunk-id window `[center - radius, center + radius]` clamped to
/// the dataset's chunk range. `None` when the dataset has no chunks or the
/// center lies past the end.
pub fn window_bounds(center: u64, radius: u64, total_chunks: u64) -> Option<(u64, u64)> {
    if total_chunks == 0 || center >= total_chunks {
        return None;
    }
    let low = center.saturating_sub(radius);
    let high = center.saturating_add(radius).min(total_chunks - 1);
    Some((low, high))
}

/// One prefetch pass around `center`.
///
/// Launches concurrent fetches for every window chunk that is neither cached
/// nor already in flight, and settles them all. Individual failures are
/// logged and leave the chunk uncached for retry on next access or pass:
/// prefetching is an optimization, never a correctness requirement.
/// Completions belonging to a superseded session generation are discarded.
pub(crate) async fn run(pager: QuestionPager, dataset: String, center: u64, generation: u64) {
    let Some((meta, plan)) = pager.plan_prefetch(&dataset, center, generation) else {
        return;
    };

    let mut fetches = JoinSet::new();
    for (chunk_id, done_tx) in plan {
        let client = pager.client().clone();
        let dataset = dataset.clone();
        let meta = meta.clone();
        fetches.spawn(async move {
            let result = client.fetch_chunk(&dataset, &meta, chunk_id).await;
            (chunk_id, done_tx, result)
        });
    }

    while let Some(joined) = fetches.join_next().await {
        let Ok((chunk_id, done_tx, result)) = joined else {
            continue;
        };
        match result {
            Ok(chunk) => {
                let outcome = if pager.install_chunk(generation, chunk, None) {
                    FetchOutcome::Installed
                } else {
                    FetchOutcome::Superseded
                };
                let _ = done_tx.send(outcome);
            }
            Err(err) => {
                tracing::warn!(
                    target: "qbank",
                    event = "prefetch_failed",
                    dataset = %dataset,
                    chunk_id,
                    generation,
                    error = %err,
                    "prefetch fetch failed; chunk stays uncached"
                );
                pager.finish_failed(generation, chunk_id);
                let _ = done_tx.send(FetchOutcome::Failed);
            }
        }
    }
}
