pub mod inference;
pub mod node;

/// Env var selecting JSON log lines (`json`) instead of plain text.
pub const LOG_FORMAT_ENV: &str = "OLLAMA_GENERATE_LOG_FORMAT";

/// Initialize the tracing subscriber for binaries and tools built on this crate.
///
/// Logs go to stderr so stdout stays free for generated text. The filter
/// comes from `RUST_LOG`, defaulting to `ollama_generate=info,warn`. Library
/// code never calls this; hosts install their own subscriber.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ollama_generate=info,warn"));

    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    // A subscriber may already be installed by the embedding program.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "tracing initialized");
}
