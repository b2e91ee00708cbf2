//! Tracing subscriber setup for the `replication` binary.

use std::io;
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a formatted subscriber on stderr, filtered by `RUST_LOG` and
/// falling back to `info`. Later calls are no-ops.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(io::stderr)
            .try_init();
        if installed.is_err() {
            tracing::debug!("a global tracing subscriber was already installed");
        }
    });
}
