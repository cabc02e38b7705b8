//! Diagnostic logging setup for the `xmd` binary.
//!
//! Logs go to stderr so stdout stays the rendered document.  `RUST_LOG`
//! overrides the default level (`warn`, or `debug` with `-d`).

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install the global subscriber.  Later calls are no-ops.
pub fn init(debug: bool) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let default_level = if debug { "debug" } else { "warn" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(debug)
                    .with_level(true),
            )
            .with(filter)
            .init();
    });
}
