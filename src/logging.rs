//! Tracing subscriber setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `libris` logs at `info`, or `debug`
/// with `--verbose`. Safe to call more than once: later calls are ignored.
pub fn init(verbose: bool) {
    let default = if verbose { "libris=debug" } else { "libris=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
