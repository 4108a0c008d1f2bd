use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT_TRACING: Once = Once::new();

const LOG_ENV: &str = "MANEJATE_LOG";
const DEFAULT_DIRECTIVE: &str = "manejate=warn";

/// Installs the global stderr subscriber. Filter comes from `MANEJATE_LOG` when set.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    });
}
