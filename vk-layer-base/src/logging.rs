use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::layer::Layer;

static INIT: Once = Once::new();

/// Installs the layer's `tracing` subscriber the first time it is called.
///
/// The filter comes from `L::LOG_ENV` and defaults to `warn`. A subscriber
/// the host already installed is left in place.
pub fn ensure_initialized<L: Layer>() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(L::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok();

        tracing::info!(
            layer = L::INFO.name,
            version = %L::INFO.version_string(),
            installed,
            "layer loaded"
        );
    });
}
