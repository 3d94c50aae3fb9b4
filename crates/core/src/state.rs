//! Per-run mutable read position and file identity.

use std::time::{Duration, SystemTime};

use crate::types::FileStat;

/// Read position and last observed metadata for one monitored log.
///
/// Owned exclusively by a single monitoring loop. `last_byte_offset` never
/// exceeds `last_file_size` except immediately after a detected reset, and it
/// only moves forward until the next reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorState {
    /// Bytes already consumed (always at a line boundary).
    pub last_byte_offset: u64,
    /// Size observed at the last poll.
    pub last_file_size: u64,
    pub last_creation_time: Option<SystemTime>,
    pub last_write_time: Option<SystemTime>,
    /// Inode (unix) observed at the last poll.
    pub last_file_id: Option<u64>,
    /// Adaptive interval, always within the policy bounds.
    pub current_polling_interval: Duration,
    /// Whether the file has been seen at least once during this run.
    pub ever_existed: bool,
    /// Whether the file was present at the last poll.
    pub present_at_last_poll: bool,
    /// Complete lines consumed since the last (re)seed.
    pub lines_consumed: u64,
}

impl MonitorState {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            last_byte_offset: 0,
            last_file_size: 0,
            last_creation_time: None,
            last_write_time: None,
            last_file_id: None,
            current_polling_interval: base_interval,
            ever_existed: false,
            present_at_last_poll: false,
            lines_consumed: 0,
        }
    }

    /// Fresh state after a truncation, replacement or deletion.
    ///
    /// Offsets and identity are discarded; only the knowledge that the file
    /// existed survives, so a later absence is not misreported as "no logs".
    pub fn after_reset(&self, base_interval: Duration) -> Self {
        Self {
            ever_existed: self.ever_existed,
            ..Self::new(base_interval)
        }
    }

    /// Record the metadata seen at this poll.
    pub fn observe(&mut self, stat: Option<&FileStat>) {
        match stat {
            Some(stat) => {
                self.last_file_size = stat.size.max(self.last_byte_offset);
                self.last_creation_time = stat.created;
                self.last_write_time = stat.modified.or(self.last_write_time);
                self.last_file_id = stat.file_id;
                self.ever_existed = true;
                self.present_at_last_poll = true;
            }
            None => {
                self.present_at_last_poll = false;
            }
        }
    }

    /// Advance past newly consumed lines. Offsets never move backwards here;
    /// going back is only possible through [`MonitorState::after_reset`].
    pub fn advance(&mut self, new_offset: u64, file_size: u64, lines: usize) {
        if new_offset < self.last_byte_offset {
            tracing::warn!(
                current = self.last_byte_offset,
                requested = new_offset,
                "Refusing to move read offset backwards outside a reset"
            );
            return;
        }
        self.last_byte_offset = new_offset;
        self.last_file_size = self.last_file_size.max(file_size).max(new_offset);
        self.lines_consumed += lines as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(size: u64) -> FileStat {
        FileStat {
            size,
            created: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(100)),
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(200)),
            file_id: Some(7),
        }
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = MonitorState::new(Duration::from_secs(1));
        assert_eq!(state.last_byte_offset, 0);
        assert!(!state.ever_existed);
        assert_eq!(state.current_polling_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_observe_records_identity() {
        let mut state = MonitorState::new(Duration::from_secs(1));
        state.observe(Some(&stat(120)));
        assert!(state.ever_existed);
        assert!(state.present_at_last_poll);
        assert_eq!(state.last_file_size, 120);
        assert_eq!(state.last_file_id, Some(7));

        state.observe(None);
        assert!(state.ever_existed);
        assert!(!state.present_at_last_poll);
        assert_eq!(state.last_file_size, 120);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut state = MonitorState::new(Duration::from_secs(1));
        state.advance(50, 60, 3);
        state.advance(40, 60, 1);
        assert_eq!(state.last_byte_offset, 50);
        assert_eq!(state.lines_consumed, 3);
        assert!(state.last_byte_offset <= state.last_file_size);
    }

    #[test]
    fn test_after_reset_keeps_existence_only() {
        let mut state = MonitorState::new(Duration::from_secs(1));
        state.observe(Some(&stat(2000)));
        state.advance(2000, 2000, 10);
        state.current_polling_interval = Duration::from_secs(8);

        let fresh = state.after_reset(Duration::from_secs(1));
        assert_eq!(fresh.last_byte_offset, 0);
        assert_eq!(fresh.last_file_size, 0);
        assert_eq!(fresh.last_creation_time, None);
        assert_eq!(fresh.lines_consumed, 0);
        assert_eq!(fresh.current_polling_interval, Duration::from_secs(1));
        assert!(fresh.ever_existed);
        assert!(!fresh.present_at_last_poll);
    }
}
