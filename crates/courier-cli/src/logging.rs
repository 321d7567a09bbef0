//! Logging setup using `tracing-subscriber`.
//!
//! Output goes to stderr so the JSON summary on stdout stays machine-readable.
//! Controlled by `RUST_LOG` (default: `info`).

use tracing_subscriber::EnvFilter;

pub fn init(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
