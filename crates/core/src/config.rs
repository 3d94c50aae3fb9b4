// crates/core/src/config.rs
//! Monitor configuration: polling cadence, buffer limits and the marker
//! vocabulary embedded by the external worker.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! poll_interval_ms = 1000
//! stale_threshold_secs = 120
//!
//! [vocabulary]
//! stage_pattern = '\[STAGE=(?P<stage>[A-Za-z0-9_\-]+)\]'
//!
//! [[vocabulary.milestones]]
//! name = "training"
//! aliases = ["train"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::PollingPolicy;
use crate::error::ConfigError;
use crate::markers::MarkerParser;

pub const ENV_POLL_INTERVAL_MS: &str = "TRAINWATCH_POLL_INTERVAL_MS";
pub const ENV_STALE_THRESHOLD_SECS: &str = "TRAINWATCH_STALE_THRESHOLD_SECS";
pub const ENV_LINE_WINDOW: &str = "TRAINWATCH_LINE_WINDOW";

/// A named one-way progress flag and the stage names that reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl MilestoneSpec {
    pub fn new(name: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Marker vocabulary: the regular expressions that recognise markers in log
/// lines, plus the milestone set they feed.
///
/// Patterns must expose named capture groups: `stage` for stage markers,
/// `current` (and optionally `total`) for epoch markers, `device` (and
/// optionally `reason`) for device-selection markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerVocabulary {
    pub stage_pattern: String,
    pub epoch_pattern: String,
    pub device_pattern: String,
    pub milestones: Vec<MilestoneSpec>,
    /// Milestone whose stage marker hints at success (advisory only).
    pub success_milestone: Option<String>,
    /// Milestone whose stage marker hints at failure (advisory only).
    pub failure_milestone: Option<String>,
}

impl Default for MarkerVocabulary {
    fn default() -> Self {
        Self {
            stage_pattern: r"\[STAGE=(?P<stage>[A-Za-z0-9_\-]+)\]".into(),
            epoch_pattern: r"\[EPOCH=(?P<current>\d+)(?:/(?P<total>\d+))?\]".into(),
            device_pattern: r"\[DEVICE=(?P<device>[^\]\s]+)(?:\s+reason=(?P<reason>[^\]]*))?\]"
                .into(),
            milestones: vec![
                MilestoneSpec::new("starting", &["start", "init", "initializing"]),
                MilestoneSpec::new("dataset_loaded", &["data_loaded", "dataset_ready"]),
                MilestoneSpec::new("training", &["train"]),
                MilestoneSpec::new("evaluating", &["evaluation", "eval", "validating"]),
                MilestoneSpec::new(
                    "writing_artifacts",
                    &["saving", "writing_results", "exporting"],
                ),
                MilestoneSpec::new("completed", &["done", "finished", "succeeded"]),
                MilestoneSpec::new("failed", &["error", "crashed"]),
            ],
            success_milestone: Some("completed".into()),
            failure_milestone: Some("failed".into()),
        }
    }
}

/// Top-level configuration of a monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Base polling interval, used whenever fresh data is arriving.
    pub poll_interval_ms: u64,
    pub min_poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    /// Geometric growth applied to the interval while the log is idle.
    pub backoff_factor: f64,
    pub stale_threshold_secs: u64,
    /// Lines read from the end of the file when (re)seeding.
    pub seed_tail_lines: usize,
    /// Upper bound on lines consumed by one delta read.
    pub delta_max_lines: usize,
    /// Capacity of the published recent-lines window.
    pub line_window_capacity: usize,
    /// How long a "file was reset" notice stays visible.
    pub reset_notice_ttl_ms: u64,
    pub vocabulary: MarkerVocabulary,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            min_poll_interval_ms: 250,
            max_poll_interval_ms: 30_000,
            backoff_factor: 2.0,
            stale_threshold_secs: 60,
            seed_tail_lines: 1_000,
            delta_max_lines: 5_000,
            line_window_capacity: 2_000,
            reset_notice_ttl_ms: 5_000,
            vocabulary: MarkerVocabulary::default(),
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded monitor config");
        Ok(config)
    }

    /// Apply `TRAINWATCH_*` environment overrides. Unparseable values are
    /// ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = env_u64(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = ms;
        }
        if let Some(secs) = env_u64(ENV_STALE_THRESHOLD_SECS) {
            self.stale_threshold_secs = secs;
        }
        if let Some(cap) = env_u64(ENV_LINE_WINDOW) {
            self.line_window_capacity = cap as usize;
        }
        self
    }

    /// Check interval bounds, limits and marker patterns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_poll_interval_ms <= self.poll_interval_ms
            && self.poll_interval_ms <= self.max_poll_interval_ms)
        {
            return Err(ConfigError::InvalidIntervals {
                min_ms: self.min_poll_interval_ms,
                base_ms: self.poll_interval_ms,
                max_ms: self.max_poll_interval_ms,
            });
        }
        if self.min_poll_interval_ms == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "min_poll_interval_ms",
            });
        }
        if !(self.backoff_factor >= 1.0) {
            return Err(ConfigError::InvalidBackoff(self.backoff_factor));
        }
        if self.seed_tail_lines == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "seed_tail_lines",
            });
        }
        if self.delta_max_lines == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "delta_max_lines",
            });
        }
        if self.line_window_capacity == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "line_window_capacity",
            });
        }
        MarkerParser::new(&self.vocabulary)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn reset_notice_ttl(&self) -> Duration {
        Duration::from_millis(self.reset_notice_ttl_ms)
    }

    /// The classifier's view of the cadence settings.
    pub fn polling_policy(&self) -> PollingPolicy {
        PollingPolicy {
            base_interval: self.poll_interval(),
            min_interval: Duration::from_millis(self.min_poll_interval_ms),
            max_interval: Duration::from_millis(self.max_poll_interval_ms),
            backoff_factor: self.backoff_factor,
            stale_threshold: self.stale_threshold(),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn test_empty_toml_is_default() {
        let config = MonitorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = MonitorConfig::from_toml_str(
            r#"
            poll_interval_ms = 500
            stale_threshold_secs = 10

            [vocabulary]
            success_milestone = "done"

            [[vocabulary.milestones]]
            name = "done"
            aliases = ["finished"]
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.stale_threshold(), Duration::from_secs(10));
        assert_eq!(config.vocabulary.milestones.len(), 1);
        assert_eq!(config.vocabulary.success_milestone.as_deref(), Some("done"));
        // Unspecified vocabulary fields keep their defaults.
        assert_eq!(
            config.vocabulary.epoch_pattern,
            MarkerVocabulary::default().epoch_pattern
        );
    }

    #[test]
    fn test_rejects_inverted_intervals() {
        let err = MonitorConfig::from_toml_str("min_poll_interval_ms = 5000").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIntervals { .. }));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let err = MonitorConfig::from_toml_str("backoff_factor = 0.5").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackoff(_)));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let err = MonitorConfig::from_toml_str(
            r#"
            [vocabulary]
            stage_pattern = '\[STAGE=('
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { field: "stage", .. }));
    }

    #[test]
    fn test_rejects_pattern_without_group() {
        let err = MonitorConfig::from_toml_str(
            r#"
            [vocabulary]
            epoch_pattern = '\[EPOCH=\d+\]'
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCaptureGroup {
                field: "epoch",
                group: "current"
            }
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let err = MonitorConfig::from_toml_str("poll_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainwatch.toml");
        std::fs::write(&path, "line_window_capacity = 64\n").unwrap();
        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.line_window_capacity, 64);

        let missing = MonitorConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::NotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_POLL_INTERVAL_MS, "750");
        std::env::set_var(ENV_STALE_THRESHOLD_SECS, "not-a-number");
        let config = MonitorConfig::default().with_env_overrides();
        std::env::remove_var(ENV_POLL_INTERVAL_MS);
        std::env::remove_var(ENV_STALE_THRESHOLD_SECS);

        assert_eq!(config.poll_interval_ms, 750);
        assert_eq!(config.stale_threshold_secs, 60);
    }

    #[test]
    fn test_polling_policy_mirrors_config() {
        let policy = MonitorConfig::default().polling_policy();
        assert_eq!(policy.base_interval, Duration::from_secs(1));
        assert_eq!(policy.min_interval, Duration::from_millis(250));
        assert_eq!(policy.max_interval, Duration::from_secs(30));
        assert_eq!(policy.stale_threshold, Duration::from_secs(60));
    }
}
