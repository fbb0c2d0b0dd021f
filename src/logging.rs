//! Log output for the engine and its jobs.
//!
//! Everything logs through `tracing`. `init()` installs a compact stderr formatter filtered by
//! the `DISTMR_LOG` environment variable (same syntax as `RUST_LOG`, default `info`).

use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "DISTMR_LOG";

static INIT: Once = Once::new();

/// Installs the global subscriber. Later calls do nothing, and neither does the first one if
/// some other subscriber is already installed.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy();
    let l = fmt::layer()
        .compact()
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let _ = tracing_subscriber::registry().with(l).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init();
        init();
        tracing::info!("logging initialized");
    }
}
