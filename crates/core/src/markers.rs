//! Token parser: recognises the progress markers the external worker embeds
//! in otherwise free-form log lines.
//!
//! Parsing is line-local and stateless. Most lines carry no marker at all and
//! yield `None`; malformed markers (numeric overflow, an epoch beyond its
//! total) are treated the same way and only traced.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::config::MarkerVocabulary;
use crate::error::ConfigError;

/// One structured event extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerEvent {
    /// The worker entered a named stage.
    Stage { name: String },
    /// Epoch progress; `total == 0` means the total is unknown.
    Epoch { current: u32, total: u32 },
    /// The worker selected a compute device.
    Device {
        device: String,
        reason: Option<String>,
    },
}

/// Compiled marker vocabulary.
#[derive(Debug, Clone)]
pub struct MarkerParser {
    stage: Regex,
    epoch: Regex,
    device: Regex,
}

impl MarkerParser {
    /// Compile the vocabulary's patterns, checking the required capture groups.
    pub fn new(vocabulary: &MarkerVocabulary) -> Result<Self, ConfigError> {
        Ok(Self {
            stage: compile("stage", &vocabulary.stage_pattern, &["stage"])?,
            epoch: compile("epoch", &vocabulary.epoch_pattern, &["current"])?,
            device: compile("device", &vocabulary.device_pattern, &["device"])?,
        })
    }

    /// Parse one line into at most one event.
    ///
    /// When a line carries several markers, stage wins over epoch, which wins
    /// over device.
    pub fn parse(&self, line: &str) -> Option<MarkerEvent> {
        if let Some(caps) = self.stage.captures(line) {
            let name = caps.name("stage")?.as_str().trim();
            if !name.is_empty() {
                return Some(MarkerEvent::Stage {
                    name: name.to_string(),
                });
            }
        }

        if let Some(caps) = self.epoch.captures(line) {
            return parse_epoch(
                caps.name("current").map(|m| m.as_str()),
                caps.name("total").map(|m| m.as_str()),
                line,
            );
        }

        if let Some(caps) = self.device.captures(line) {
            let device = caps.name("device")?.as_str().trim();
            if device.is_empty() {
                return None;
            }
            let reason = caps
                .name("reason")
                .map(|m| m.as_str().trim())
                .filter(|r| !r.is_empty())
                .map(str::to_string);
            return Some(MarkerEvent::Device {
                device: device.to_string(),
                reason,
            });
        }

        None
    }
}

impl Default for MarkerParser {
    fn default() -> Self {
        // The built-in vocabulary is covered by tests; failing here is a bug.
        Self::new(&MarkerVocabulary::default()).expect("default marker vocabulary compiles")
    }
}

fn compile(
    field: &'static str,
    pattern: &str,
    groups: &[&'static str],
) -> Result<Regex, ConfigError> {
    let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        field,
        message: e.to_string(),
    })?;
    for &group in groups {
        if !regex.capture_names().flatten().any(|name| name == group) {
            return Err(ConfigError::MissingCaptureGroup { field, group });
        }
    }
    Ok(regex)
}

fn parse_epoch(current: Option<&str>, total: Option<&str>, line: &str) -> Option<MarkerEvent> {
    let Some(Ok(current)) = current.map(str::parse::<u32>) else {
        tracing::trace!(line, "Ignoring epoch marker with unparseable current value");
        return None;
    };
    let total = match total {
        None => 0,
        Some(raw) => match raw.parse::<u32>() {
            Ok(t) => t,
            Err(_) => {
                tracing::trace!(line, "Ignoring epoch marker with unparseable total");
                return None;
            }
        },
    };
    if total > 0 && current > total {
        tracing::trace!(line, current, total, "Ignoring epoch marker beyond its total");
        return None;
    }
    Some(MarkerEvent::Epoch { current, total })
}
