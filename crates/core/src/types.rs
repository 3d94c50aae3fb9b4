//! Value types shared by the reader, classifier and monitor loop.
//!
//! Everything here is an immutable snapshot handed to consumers, so all
//! public types serialize with camelCase field names for UI layers.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally-reported terminal result of a run.
///
/// Sourced from a result artifact this crate never parses; `None` in an
/// `Option<RunStatus>` means the run is still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn from_succeeded(succeeded: bool) -> Self {
        if succeeded {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

/// Health of the monitored log as of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// Fresh bytes arrived within the stale threshold.
    Receiving,
    /// No writes for longer than the stale threshold while the run is in progress.
    Stale,
    /// The run finished successfully (mirrors the external result).
    Completed,
    /// The run failed (mirrors the external result).
    Failed,
    /// The log file has never existed.
    NoLogs,
}

impl LogStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a previously-consumed byte offset stopped being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// Same file, but it shrank below the consumed offset.
    Truncated,
    /// A different file now lives at the path.
    Replaced,
    /// The file disappeared.
    Deleted,
}

impl ResetReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::Replaced => "replaced",
            Self::Deleted => "deleted",
        }
    }

    /// Human-readable notice text for consumers.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Truncated => "Log file was truncated; reloading from the current end",
            Self::Replaced => "Log file was replaced by a new file; reloading",
            Self::Deleted => "Log file was deleted; waiting for it to reappear",
        }
    }
}

/// File-level change detected between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChange {
    #[default]
    None,
    Truncated,
    Replaced,
    Deleted,
}

impl FileChange {
    pub fn reset_reason(self) -> Option<ResetReason> {
        match self {
            Self::None => None,
            Self::Truncated => Some(ResetReason::Truncated),
            Self::Replaced => Some(ResetReason::Replaced),
            Self::Deleted => Some(ResetReason::Deleted),
        }
    }
}

impl From<ResetReason> for FileChange {
    fn from(reason: ResetReason) -> Self {
        match reason {
            ResetReason::Truncated => Self::Truncated,
            ResetReason::Replaced => Self::Replaced,
            ResetReason::Deleted => Self::Deleted,
        }
    }
}

/// Metadata observed for the log file at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Birth time, when the filesystem reports one.
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    /// Inode number on unix; `None` elsewhere.
    pub file_id: Option<u64>,
}

impl FileStat {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            created: meta.created().ok(),
            modified: meta.modified().ok(),
            file_id: file_id(meta),
        }
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Immutable per-poll health snapshot of one monitored log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSnapshot {
    pub status: LogStatus,
    pub file_size_bytes: u64,
    pub total_line_count: u64,
    #[serde(with = "duration_ms")]
    pub time_since_last_update: Duration,
    pub file_change: FileChange,
    #[serde(with = "duration_ms")]
    pub recommended_polling_interval: Duration,
    pub file_exists: bool,
    pub byte_offset: u64,
    pub observed_at: DateTime<Utc>,
}

/// Serialize a `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_change_reset_reason_round_trip() {
        for reason in [ResetReason::Truncated, ResetReason::Replaced, ResetReason::Deleted] {
            assert_eq!(FileChange::from(reason).reset_reason(), Some(reason));
        }
        assert_eq!(FileChange::None.reset_reason(), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(LogStatus::Completed.is_terminal());
        assert!(LogStatus::Failed.is_terminal());
        assert!(!LogStatus::Stale.is_terminal());
        assert!(!LogStatus::NoLogs.is_terminal());
    }

    #[test]
    fn test_snapshot_serializes_camel_case_millis() {
        let snapshot = LogSnapshot {
            status: LogStatus::Stale,
            file_size_bytes: 2048,
            total_line_count: 12,
            time_since_last_update: Duration::from_secs(90),
            file_change: FileChange::Truncated,
            recommended_polling_interval: Duration::from_millis(1500),
            file_exists: true,
            byte_offset: 2048,
            observed_at: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"status\":\"stale\""));
        assert!(json.contains("\"fileChange\":\"truncated\""));
        assert!(json.contains("\"timeSinceLastUpdate\":90000"));
        assert!(json.contains("\"recommendedPollingInterval\":1500"));
        assert!(json.contains("\"fileSizeBytes\":2048"));
    }
}
