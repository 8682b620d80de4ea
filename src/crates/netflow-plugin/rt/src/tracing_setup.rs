//! Tracing configuration for netflow plugins
//!
//! This module provides simple tracing initialization with automatic environment detection:
//! - Systemd journal logging (when the host configured a journal path)
//! - Stderr logging (for terminal output)
//!
//! The configuration automatically detects the environment via NETFLOW_SYSTEMD_JOURNAL_PATH
//! and sets up appropriate logging layers.

use tracing_subscriber::{EnvFilter, prelude::*};

const JOURNAL_PATH_ENV: &str = "NETFLOW_SYSTEMD_JOURNAL_PATH";

/// Output destination for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOutput {
    /// Write to systemd journal with structured logging
    Journal,
    /// Write to stderr with formatted text
    Stderr,
}

impl LogOutput {
    fn detect() -> Self {
        if std::env::var(JOURNAL_PATH_ENV).is_ok() {
            LogOutput::Journal
        } else {
            LogOutput::Stderr
        }
    }

    fn description(&self) -> &'static str {
        match self {
            LogOutput::Journal => "systemd journal",
            LogOutput::Stderr => "stderr",
        }
    }
}

/// Initialize tracing with automatic environment detection.
///
/// Respects RUST_LOG env var, otherwise uses the provided default filter.
/// Outputs to systemd journal if NETFLOW_SYSTEMD_JOURNAL_PATH is set, stderr otherwise.
/// If journald cannot be reached the subscriber falls back to stderr.
pub fn init_tracing(default_filter: &str) {
    let mut output = LogOutput::detect();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    let journald_layer = match output {
        LogOutput::Journal => match tracing_journald::layer() {
            Ok(layer) => Some(layer),
            Err(err) => {
                eprintln!("failed to connect to journald, logging to stderr: {err}");
                output = LogOutput::Stderr;
                None
            }
        },
        LogOutput::Stderr => None,
    };

    match journald_layer {
        Some(layer) => registry.with(layer).init(),
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(false);
            registry.with(fmt_layer).init();
        }
    }

    tracing::info!(
        output = ?output,
        "tracing initialized, logging to {} with filter '{}'",
        output.description(),
        default_filter,
    );
}
