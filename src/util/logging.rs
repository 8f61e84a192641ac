//! Tracing setup for the binary.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(level: &str) -> String {
    format!("production_value_scanner={level},reqwest=warn")
}

/// Install a compact stderr subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    // stdout carries the reports
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();
}
