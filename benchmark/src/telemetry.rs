//! Logging setup for the command line driver.
//!
//! Logs go to stderr so the result tables on stdout stay clean. `RUST_LOG`
//! narrows or widens the filter, e.g. `RUST_LOG=engine_bench=debug`.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
