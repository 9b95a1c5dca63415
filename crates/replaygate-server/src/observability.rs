//! Log output for the replaygate binary.
//!
//! The filter sits behind a reload layer so the level from `replaygate.toml`
//! can replace the startup level once configuration has been read.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

const STARTUP_LEVEL: &str = "info";

/// Installs the global subscriber at `info`, or at `RUST_LOG` when set.
/// Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STARTUP_LEVEL));
    let (filter, handle) = reload::Layer::new(filter);
    if FILTER.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Switches to the configured `logging.level`. `RUST_LOG` wins if present.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = FILTER.get() else {
        return;
    };
    if let Err(e) = handle.modify(|filter| *filter = EnvFilter::new(level)) {
        tracing::warn!(error = %e, requested = level, "could not apply logging level");
    }
}
