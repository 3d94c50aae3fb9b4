//! Types published by a [`LogMonitor`](crate::LogMonitor).

use std::path::PathBuf;

use serde::Serialize;

use trainwatch_core::{LogSnapshot, TimelineState};

use crate::notice::ResetNotice;

/// Lifecycle of one monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    NotStarted,
    Monitoring,
    Stopped,
}

/// Why a polling loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` was called, or the loop was replaced by a new `start()`.
    Cancelled,
    /// The run reached a terminal status and the final update was published.
    RunFinished,
}

/// Latest fused state of one monitored run, as seen by poll-style consumers.
///
/// Rebuilt and swapped in whole after every poll; consumers never observe a
/// half-updated view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorView {
    pub run_id: String,
    pub path: Option<PathBuf>,
    pub phase: MonitorPhase,
    /// Sequence number of the poll that produced this view.
    pub sequence: u64,
    /// `None` until the first poll has been classified.
    pub snapshot: Option<LogSnapshot>,
    pub timeline: TimelineState,
    /// Most recent lines, oldest first, capped by the line window.
    pub recent_lines: Vec<String>,
    /// Set while a reset notice is showing.
    pub notice: Option<ResetNotice>,
    pub paused: bool,
}

impl MonitorView {
    pub(crate) fn new(run_id: String, timeline: TimelineState) -> Self {
        Self {
            run_id,
            path: None,
            phase: MonitorPhase::NotStarted,
            sequence: 0,
            snapshot: None,
            timeline,
            recent_lines: Vec::new(),
            notice: None,
            paused: false,
        }
    }
}

/// Events broadcast to push-style consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A poll completed. `sequence` strictly increases per monitor.
    Updated {
        #[serde(rename = "runId")]
        run_id: String,
        sequence: u64,
        snapshot: LogSnapshot,
        timeline: TimelineState,
        /// Lines consumed by this poll only.
        #[serde(rename = "newLines")]
        new_lines: Vec<String>,
    },
    /// A truncation, replacement or deletion was detected. Raised once per reset.
    ResetDetected {
        #[serde(rename = "runId")]
        run_id: String,
        notice: ResetNotice,
    },
    /// A reset notice expired.
    NoticeCleared {
        #[serde(rename = "runId")]
        run_id: String,
        #[serde(rename = "noticeId")]
        notice_id: u64,
    },
    /// The polling loop exited.
    Stopped {
        #[serde(rename = "runId")]
        run_id: String,
        reason: StopReason,
    },
}

impl MonitorEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Updated { run_id, .. }
            | Self::ResetDetected { run_id, .. }
            | Self::NoticeCleared { run_id, .. }
            | Self::Stopped { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainwatch_core::{ResetReason, TimelineEngine, MarkerVocabulary};

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = MonitorEvent::Stopped {
            run_id: "run-1".into(),
            reason: StopReason::RunFinished,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stopped");
        assert_eq!(json["runId"], "run-1");
        assert_eq!(json["reason"], "run_finished");
    }

    #[test]
    fn test_reset_event_carries_notice() {
        let notice = ResetNotice::new(3, ResetReason::Truncated);
        let event = MonitorEvent::ResetDetected {
            run_id: "run-1".into(),
            notice,
        };
        assert_eq!(event.run_id(), "run-1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reset_detected");
        assert_eq!(json["notice"]["id"], 3);
        assert_eq!(json["notice"]["reason"], "truncated");
    }

    #[test]
    fn test_fresh_view_is_not_started() {
        let engine = TimelineEngine::new(&MarkerVocabulary::default()).unwrap();
        let view = MonitorView::new("run-9".into(), engine.create_timeline());
        assert_eq!(view.phase, MonitorPhase::NotStarted);
        assert!(view.snapshot.is_none());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["runId"], "run-9");
        assert_eq!(json["phase"], "not_started");
        assert!(json["recentLines"].as_array().unwrap().is_empty());
    }
}
