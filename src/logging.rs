//! Diagnostics go to stderr so stdout stays free for results.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

/// Number of `-v` flags to a level: none shows warnings only.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbosity`.
/// Calling this again is a no-op.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level_for(verbosity).into()));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::Uptime::default())
        .with_target(verbosity > 2)
        .finish()
        .try_init();
}
