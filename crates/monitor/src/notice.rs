//! Transient reset notices that clear themselves after a delay.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use trainwatch_core::ResetReason;

use crate::events::{MonitorEvent, MonitorView};

/// User-facing notice raised when the monitored file was reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetNotice {
    /// Unique per monitor; lets the clear timer tell notices apart.
    pub id: u64,
    pub reason: ResetReason,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl ResetNotice {
    pub fn new(id: u64, reason: ResetReason) -> Self {
        Self {
            id,
            reason,
            message: reason.describe().to_string(),
            raised_at: Utc::now(),
        }
    }
}

/// Clear notice `id` from the view once `ttl` has elapsed.
///
/// A newer notice raised in the meantime is left alone. Cancelling the
/// monitor abandons the timer; the view keeps whatever it shows.
pub(crate) fn schedule_clear(
    id: u64,
    ttl: Duration,
    run_id: String,
    view_tx: Arc<watch::Sender<MonitorView>>,
    events_tx: broadcast::Sender<MonitorEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(ttl) => {}
        }

        let cleared = view_tx.send_if_modified(|view| {
            if view.notice.as_ref().is_some_and(|n| n.id == id) {
                view.notice = None;
                true
            } else {
                false
            }
        });

        if cleared {
            tracing::debug!(run_id = %run_id, notice_id = id, "Reset notice cleared");
            let _ = events_tx.send(MonitorEvent::NoticeCleared {
                run_id,
                notice_id: id,
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainwatch_core::{MarkerVocabulary, TimelineEngine};

    fn channels() -> (Arc<watch::Sender<MonitorView>>, broadcast::Sender<MonitorEvent>) {
        let engine = TimelineEngine::new(&MarkerVocabulary::default()).unwrap();
        let (view_tx, _) = watch::channel(MonitorView::new("r".into(), engine.create_timeline()));
        let (events_tx, _) = broadcast::channel(16);
        (Arc::new(view_tx), events_tx)
    }

    #[test]
    fn test_notice_message_matches_reason() {
        let notice = ResetNotice::new(1, ResetReason::Replaced);
        assert_eq!(notice.message, ResetReason::Replaced.describe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_clears_after_ttl() {
        let (view_tx, events_tx) = channels();
        let mut events = events_tx.subscribe();
        view_tx.send_modify(|v| v.notice = Some(ResetNotice::new(7, ResetReason::Truncated)));

        schedule_clear(
            7,
            Duration::from_secs(5),
            "r".into(),
            view_tx.clone(),
            events_tx.clone(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(view_tx.borrow().notice.is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(view_tx.borrow().notice.is_none());
        match events.recv().await.unwrap() {
            MonitorEvent::NoticeCleared { notice_id, .. } => assert_eq!(notice_id, 7),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_notice_is_not_cleared_by_old_timer() {
        let (view_tx, events_tx) = channels();
        view_tx.send_modify(|v| v.notice = Some(ResetNotice::new(1, ResetReason::Truncated)));
        schedule_clear(
            1,
            Duration::from_secs(5),
            "r".into(),
            view_tx.clone(),
            events_tx,
            CancellationToken::new(),
        );

        view_tx.send_modify(|v| v.notice = Some(ResetNotice::new(2, ResetReason::Replaced)));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(view_tx.borrow().notice.as_ref().map(|n| n.id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_timer() {
        let (view_tx, events_tx) = channels();
        let cancel = CancellationToken::new();
        view_tx.send_modify(|v| v.notice = Some(ResetNotice::new(4, ResetReason::Deleted)));
        schedule_clear(
            4,
            Duration::from_secs(5),
            "r".into(),
            view_tx.clone(),
            events_tx,
            cancel.clone(),
        );

        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(view_tx.borrow().notice.is_some());
    }
}
