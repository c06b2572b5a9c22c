//! Logging and tracing setup
//!
//! Console output goes through a pretty `fmt` layer. JSON lines can also be
//! written to a daily rotated file for bug reports. `RUST_LOG` takes
//! precedence over the configured filter.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::settings_file::log_dir;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Whether to enable pretty console output
    pub enable_console_logs: bool,

    /// Whether to write JSON lines to files under `log_dir`
    pub enable_json_logs: bool,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open and close events
    pub enable_spans: bool,

    /// Default filter when `RUST_LOG` is not set
    pub default_filter: String,

    /// Directory for JSON log files, defaults to the platform data dir
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enable_console_logs: true,
            enable_json_logs: false,
            include_location: cfg!(debug_assertions),
            enable_spans: false,
            default_filter: "info".to_string(),
            log_dir: None,
        }
    }
}

impl LoggingSettings {
    /// Console only with verbose output
    pub fn development() -> Self {
        Self {
            include_location: true,
            enable_spans: true,
            default_filter: "info,weebase_core=debug,weebase_drivers=debug,\
                             weebase_connection=debug,weebase_services=debug"
                .to_string(),
            ..Self::default()
        }
    }

    /// JSON files only, quiet dependencies
    pub fn production() -> Self {
        Self {
            enable_console_logs: false,
            enable_json_logs: true,
            include_location: false,
            enable_spans: false,
            default_filter: "warn,weebase_core=info,weebase_connection=info,weebase_services=info"
                .to_string(),
            log_dir: None,
        }
    }

    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(log_dir)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the JSON file writer when dropped, so keep it
/// alive for the life of the process. Fails when a subscriber is already set.
pub fn init(config: &LoggingSettings) -> anyhow::Result<Option<WorkerGuard>> {
    // NEW fires once per span; ENTER would fire on every poll of an async span
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();
    let mut guard = None;

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_ansi(true)
            .pretty()
            .with_filter(config.filter())
            .boxed();

        layers.push(console_layer);
    }

    if config.enable_json_logs {
        let dir = config.resolved_log_dir();
        std::fs::create_dir_all(&dir)?;

        let file_appender = tracing_appender::rolling::daily(&dir, "weebase.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(config.filter())
            .boxed();

        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::info!(
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "Logging system initialized"
    );

    Ok(guard)
}
