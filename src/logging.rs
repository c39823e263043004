use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber, writing to standard error.
///
/// The filter is read from `RUST_LOG` and defaults to `info`, which shows cut-flows, the pool
/// size and every written artifact. Use `RUST_LOG=stackhist=debug` to also see per-sample reads
/// and fills.
///
/// ```no_run
/// stackhist::logging::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .init();
}

/// Install a verbose subscriber which writes through the test harness. Safe to call from every
/// test.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
