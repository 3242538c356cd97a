use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `QBANK_LOG` first, then `RUST_LOG`,
/// then a default.
///
/// Log field contract for qbank events:
/// - Always include `dataset` once a dataset session is open.
/// - Include `chunk_id` on any fetch/cache/eviction event.
/// - Include `generation` on any event that can race a dataset switch.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("QBANK_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
