//! Tracing subscriber initialisation.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Filter used when neither the config nor `RUST_LOG` says otherwise.
pub const DEFAULT_FILTER: &str = "warn,trainwatch_core=info,trainwatch_monitor=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. Falls back to `RUST_LOG`, then [`DEFAULT_FILTER`].
    pub filter: Option<String>,
    /// Format of the stderr output.
    pub format: LogFormat,
    pub ansi: bool,
    /// When set, JSON logs are also written to a daily-rolling file here.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            format: LogFormat::Plain,
            ansi: true,
            log_dir: None,
            file_prefix: "trainwatch.log".into(),
        }
    }
}

type FilteredRegistry = tracing_subscriber::layer::Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Resolve the effective filter.
pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    match &config.filter {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {directives:?}")),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install the global subscriber.
///
/// Returns the file appender's guard when file logging is enabled; keep it
/// alive for the lifetime of the process or buffered lines are lost.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let stderr_layer: BoxedLayer = match config.format {
        LogFormat::Plain => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };
    let mut layers = vec![stderr_layer];

    let guard = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().json().with_writer(writer).with_ansi(false).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .context("global tracing subscriber already installed")?;

    tracing::debug!(
        format = ?config.format,
        file = config.log_dir.is_some(),
        "Tracing initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_from_toml() {
        let config: LoggingConfig = toml::from_str(
            r#"
            filter = "debug"
            format = "json"
            log_dir = "/var/log/trainwatch"
            "#,
        )
        .unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.as_deref(), Some("debug"));
        assert_eq!(config.file_prefix, "trainwatch.log");
        assert!(config.ansi);
    }

    #[test]
    #[serial]
    fn test_explicit_filter_wins() {
        let config = LoggingConfig {
            filter: Some("trainwatch_monitor=debug".into()),
            ..LoggingConfig::default()
        };
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("trainwatch_monitor=debug"));
    }

    #[test]
    #[serial]
    fn test_default_filter_without_env() {
        std::env::remove_var("RUST_LOG");
        let filter = build_filter(&LoggingConfig::default()).unwrap();
        assert!(filter.to_string().contains("trainwatch_monitor=info"));
    }

    #[test]
    #[serial]
    fn test_init_with_file_then_reject_second_install() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            filter: Some("info".into()),
            ansi: false,
            log_dir: Some(dir.path().join("logs")),
            ..LoggingConfig::default()
        };

        let guard = init_tracing(&config).unwrap();
        assert!(guard.is_some());
        assert!(dir.path().join("logs").is_dir());

        assert!(init_tracing(&LoggingConfig::default()).is_err());
    }
}
