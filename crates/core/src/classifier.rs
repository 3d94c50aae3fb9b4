// crates/core/src/classifier.rs
//! Change/status classifier for a monitored log file.
//!
//! Pure function of the current file metadata, the previous poll's
//! [`MonitorState`], the externally-reported run status and the clock.
//! Detection order:
//! - File absent: `NoLogs` if it never existed, otherwise `Deleted` on the
//!   poll where it disappeared
//! - Identity changed (birth time or inode): `Replaced`, regardless of size
//! - Same identity but smaller: `Truncated`
//!
//! Status then mirrors a finished run, or falls back to a staleness check.
//! The classifier only *recommends* the next polling interval; applying it is
//! the caller's job.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::state::MonitorState;
use crate::types::{FileChange, FileStat, LogSnapshot, LogStatus, RunStatus};

/// Cadence and staleness settings consumed by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollingPolicy {
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    pub stale_threshold: Duration,
}

impl PollingPolicy {
    pub fn clamp(&self, interval: Duration) -> Duration {
        interval.clamp(self.min_interval, self.max_interval)
    }

    /// Next interval while idle: geometric growth, bounded by `max_interval`.
    pub fn backoff(&self, current: Duration) -> Duration {
        let grown = Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .unwrap_or(self.max_interval);
        self.clamp(grown)
    }

    pub fn base(&self) -> Duration {
        self.clamp(self.base_interval)
    }
}

/// Classify the log's health as of `now`.
pub fn classify(
    stat: Option<&FileStat>,
    state: &MonitorState,
    run_status: Option<RunStatus>,
    policy: &PollingPolicy,
    now: SystemTime,
) -> LogSnapshot {
    let observed_at: DateTime<Utc> = now.into();

    let Some(stat) = stat else {
        return classify_absent(state, run_status, policy, now, observed_at);
    };

    let file_change = if state.present_at_last_poll {
        detect_change(stat, state)
    } else {
        FileChange::None
    };

    let last_write = stat.modified.or(state.last_write_time);
    let age = elapsed_since(last_write, now);
    let grew = state.ever_existed && stat.size > state.last_file_size;

    let status = match run_status {
        Some(rs) => terminal_status(rs),
        None if grew || age <= policy.stale_threshold => LogStatus::Receiving,
        None => LogStatus::Stale,
    };

    let recommended_polling_interval = match status {
        LogStatus::Stale => policy.backoff(state.current_polling_interval),
        _ => policy.base(),
    };

    LogSnapshot {
        status,
        file_size_bytes: stat.size,
        total_line_count: state.lines_consumed,
        time_since_last_update: if grew { Duration::ZERO } else { age },
        file_change,
        recommended_polling_interval,
        file_exists: true,
        byte_offset: state.last_byte_offset,
        observed_at,
    }
}

fn classify_absent(
    state: &MonitorState,
    run_status: Option<RunStatus>,
    policy: &PollingPolicy,
    now: SystemTime,
    observed_at: DateTime<Utc>,
) -> LogSnapshot {
    let (status, file_change) = if !state.ever_existed {
        (LogStatus::NoLogs, FileChange::None)
    } else {
        let change = if state.present_at_last_poll {
            FileChange::Deleted
        } else {
            FileChange::None
        };
        (run_status.map(terminal_status).unwrap_or(LogStatus::Stale), change)
    };

    let recommended_polling_interval = if status.is_terminal() {
        policy.base()
    } else {
        policy.backoff(state.current_polling_interval)
    };

    LogSnapshot {
        status,
        file_size_bytes: 0,
        total_line_count: state.lines_consumed,
        time_since_last_update: elapsed_since(state.last_write_time, now),
        file_change,
        recommended_polling_interval,
        file_exists: false,
        byte_offset: state.last_byte_offset,
        observed_at,
    }
}

fn detect_change(stat: &FileStat, state: &MonitorState) -> FileChange {
    let created_changed = matches!(
        (stat.created, state.last_creation_time),
        (Some(now), Some(before)) if now != before
    );
    let id_changed = matches!(
        (stat.file_id, state.last_file_id),
        (Some(now), Some(before)) if now != before
    );

    if created_changed || id_changed {
        FileChange::Replaced
    } else if stat.size < state.last_file_size || stat.size < state.last_byte_offset {
        FileChange::Truncated
    } else {
        FileChange::None
    }
}

fn terminal_status(run_status: RunStatus) -> LogStatus {
    match run_status {
        RunStatus::Succeeded => LogStatus::Completed,
        RunStatus::Failed => LogStatus::Failed,
    }
}

fn elapsed_since(then: Option<SystemTime>, now: SystemTime) -> Duration {
    then.and_then(|t| now.duration_since(t).ok())
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(T0 + secs)
    }

    fn policy() -> PollingPolicy {
        PollingPolicy {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(8),
            backoff_factor: 2.0,
            stale_threshold: Duration::from_secs(60),
        }
    }

    fn stat(size: u64, created: u64, modified: u64) -> FileStat {
        FileStat {
            size,
            created: Some(at(created)),
            modified: Some(at(modified)),
            file_id: Some(42),
        }
    }

    fn observed(size: u64, created: u64, modified: u64) -> MonitorState {
        let mut state = MonitorState::new(Duration::from_secs(1));
        state.observe(Some(&stat(size, created, modified)));
        state.advance(size, size, 0);
        state
    }

    #[test]
    fn test_never_existed_is_no_logs() {
        let state = MonitorState::new(Duration::from_secs(1));
        let snap = classify(None, &state, None, &policy(), at(10));
        assert_eq!(snap.status, LogStatus::NoLogs);
        assert_eq!(snap.file_change, FileChange::None);
        assert!(!snap.file_exists);
    }

    #[test]
    fn test_no_logs_even_when_run_finished() {
        let state = MonitorState::new(Duration::from_secs(1));
        let snap = classify(None, &state, Some(RunStatus::Succeeded), &policy(), at(10));
        assert_eq!(snap.status, LogStatus::NoLogs);
    }

    #[test]
    fn test_disappearance_reports_deleted_once() {
        let mut state = observed(100, 0, 5);
        let snap = classify(None, &state, None, &policy(), at(10));
        assert_eq!(snap.file_change, FileChange::Deleted);
        assert_eq!(snap.status, LogStatus::Stale);

        state.observe(None);
        let snap = classify(None, &state, None, &policy(), at(11));
        assert_eq!(snap.file_change, FileChange::None);
        assert!(!snap.file_exists);
    }

    #[test]
    fn test_shrink_same_creation_is_truncated() {
        let state = observed(2000, 0, 5);
        let snap = classify(Some(&stat(500, 0, 6)), &state, None, &policy(), at(7));
        assert_eq!(snap.file_change, FileChange::Truncated);
        assert_eq!(snap.file_size_bytes, 500);
    }

    #[test]
    fn test_creation_change_is_replaced_even_when_larger() {
        let state = observed(2000, 0, 5);
        let snap = classify(Some(&stat(5000, 3, 6)), &state, None, &policy(), at(7));
        assert_eq!(snap.file_change, FileChange::Replaced);
    }

    #[test]
    fn test_creation_change_is_replaced_when_smaller() {
        let state = observed(2000, 0, 5);
        let snap = classify(Some(&stat(10, 3, 6)), &state, None, &policy(), at(7));
        assert_eq!(snap.file_change, FileChange::Replaced);
    }

    #[test]
    fn test_inode_change_without_birth_time_is_replaced() {
        let mut state = MonitorState::new(Duration::from_secs(1));
        let before = FileStat {
            size: 100,
            created: None,
            modified: Some(at(1)),
            file_id: Some(1),
        };
        state.observe(Some(&before));
        let after = FileStat {
            file_id: Some(2),
            ..before
        };
        let snap = classify(Some(&after), &state, None, &policy(), at(2));
        assert_eq!(snap.file_change, FileChange::Replaced);
    }

    #[test]
    fn test_first_sighting_is_not_a_change() {
        let state = MonitorState::new(Duration::from_secs(1));
        let snap = classify(Some(&stat(10, 0, 0)), &state, None, &policy(), at(1));
        assert_eq!(snap.file_change, FileChange::None);
        assert_eq!(snap.status, LogStatus::Receiving);
    }

    #[test]
    fn test_stale_after_threshold() {
        let state = observed(100, 0, 0);
        let fresh = classify(Some(&stat(100, 0, 0)), &state, None, &policy(), at(59));
        assert_eq!(fresh.status, LogStatus::Receiving);
        let stale = classify(Some(&stat(100, 0, 0)), &state, None, &policy(), at(61));
        assert_eq!(stale.status, LogStatus::Stale);
        assert_eq!(stale.time_since_last_update, Duration::from_secs(61));
    }

    #[test]
    fn test_growth_counts_as_fresh_despite_old_mtime() {
        let state = observed(100, 0, 0);
        let snap = classify(Some(&stat(180, 0, 0)), &state, None, &policy(), at(600));
        assert_eq!(snap.status, LogStatus::Receiving);
        assert_eq!(snap.time_since_last_update, Duration::ZERO);
    }

    #[test]
    fn test_run_status_overrides_staleness() {
        let state = observed(100, 0, 0);
        let snap = classify(
            Some(&stat(100, 0, 0)),
            &state,
            Some(RunStatus::Failed),
            &policy(),
            at(3600),
        );
        assert_eq!(snap.status, LogStatus::Failed);

        let snap = classify(
            Some(&stat(100, 0, 0)),
            &state,
            Some(RunStatus::Succeeded),
            &policy(),
            at(3600),
        );
        assert_eq!(snap.status, LogStatus::Completed);
        assert_eq!(snap.recommended_polling_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_grows_then_caps_then_resets() {
        let p = policy();
        let mut state = observed(100, 0, 0);
        let mut seen = Vec::new();
        for _ in 0..5 {
            let snap = classify(Some(&stat(100, 0, 0)), &state, None, &p, at(120));
            assert_eq!(snap.status, LogStatus::Stale);
            state.current_polling_interval = snap.recommended_polling_interval;
            seen.push(snap.recommended_polling_interval.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 8, 8]);

        let snap = classify(Some(&stat(150, 0, 0)), &state, None, &p, at(121));
        assert_eq!(snap.status, LogStatus::Receiving);
        assert_eq!(snap.recommended_polling_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_future_mtime_is_not_stale() {
        let state = observed(100, 0, 500);
        let snap = classify(Some(&stat(100, 0, 500)), &state, None, &policy(), at(10));
        assert_eq!(snap.status, LogStatus::Receiving);
        assert_eq!(snap.time_since_last_update, Duration::ZERO);
    }
}
