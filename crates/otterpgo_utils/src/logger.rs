use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing subscriber once per process.
///
/// `RUST_LOG` wins when set; otherwise pipeline crates log at `info`, or at
/// `debug` when `verbose` is requested.
pub fn init_logging(verbose: bool) {
    INIT.call_once(|| {
        let default_directive = if verbose {
            "otterpgo=debug"
        } else {
            "otterpgo=info"
        };
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    });
}
