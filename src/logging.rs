//! Logging configuration
//!
//! Structured logging with tracing. Output goes to stderr so that stdout
//! stays reserved for control-utility output (tables, JSON).

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Initialize logging with environment-based filtering.
///
/// `RUST_LOG` overrides everything; otherwise the default level is `info`,
/// raised to `debug` when `verbose` is set.
pub fn init(verbose: bool) {
    let default = if verbose {
        "dovecot_loadbalancer=debug"
    } else {
        "dovecot_loadbalancer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
