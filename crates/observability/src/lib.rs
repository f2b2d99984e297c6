// crates/observability/src/lib.rs
//! Tracing subscriber setup shared by Explainer binaries.
//!
//! Human-readable output goes to stderr; `EXPLAINER_LOG_FORMAT=json` switches
//! it to JSON lines. `EXPLAINER_LOG_DIR` adds a daily-rolling JSON log file.
//! `RUST_LOG` overrides the default filter.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_FORMAT_ENV: &str = "EXPLAINER_LOG_FORMAT";
pub const LOG_DIR_ENV: &str = "EXPLAINER_LOG_DIR";
const LOG_FILE_PREFIX: &str = "explainer.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingOptions {
    /// Filter used when `RUST_LOG` is unset, e.g. `warn,explainer_client=info`.
    pub default_filter: String,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

impl TracingOptions {
    pub fn new(default_filter: impl Into<String>) -> Self {
        Self {
            default_filter: default_filter.into(),
            json: false,
            log_dir: None,
        }
    }

    pub fn from_env(default_filter: impl Into<String>) -> Self {
        Self::new(default_filter).with_overrides(
            std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
            std::env::var(LOG_DIR_ENV).ok().as_deref(),
        )
    }

    fn with_overrides(mut self, format: Option<&str>, dir: Option<&str>) -> Self {
        self.json = format.is_some_and(|f| f.trim().eq_ignore_ascii_case("json"));
        self.log_dir = dir.map(str::trim).filter(|d| !d.is_empty()).map(PathBuf::from);
        self
    }
}

/// Keeps the file writer flushing. Hold it until the process exits.
pub struct TracingGuard {
    _file: Option<WorkerGuard>,
}

pub fn init_tracing(options: &TracingOptions) -> anyhow::Result<TracingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.default_filter))
        .with_context(|| format!("invalid log filter {:?}", options.default_filter))?;

    let stderr_layer = if options.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer.and_then(file_layer).with_filter(filter))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(TracingGuard { _file: guard })
}
