//! Tracing subscriber setup for the binary.
//!
//! `RUST_LOG` takes precedence over the `--log-level` flag. Logs go to stderr
//! so stdout carries only the dump.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub fn init(level: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_names(true),
    );
    subscriber.init();
}
