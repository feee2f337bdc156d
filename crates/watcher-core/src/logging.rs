/// Initialise the global tracing subscriber.
///
/// Honors `RUST_LOG` if set, otherwise falls back to `default_filter`
/// (e.g. `"watcher=info,tower_http=warn"`), following the standard
/// `tracing_subscriber::fmt()...with_env_filter(...)` bootstrap.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
