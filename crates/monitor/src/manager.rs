// crates/monitor/src/manager.rs
//! Orchestrator for one monitored run.
//!
//! A [`LogMonitor`] owns at most one polling loop. Each iteration waits the
//! adaptive interval (or wakes early on cancellation or a run-status change),
//! probes the file, classifies it, consumes appended lines, feeds them through
//! the timeline engine and publishes the fused result.
//!
//! The loop exclusively owns its [`MonitorState`] and [`TimelineState`];
//! everything consumers see goes through the watch/broadcast channels.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trainwatch_core::tail;
use trainwatch_core::{
    classify, ConfigError, FileStat, LogSnapshot, MonitorConfig, MonitorState, PollingPolicy,
    ReadError, ResetReason, RunStatus, TimelineEngine, TimelineState,
};

use crate::events::{MonitorEvent, MonitorPhase, MonitorView, StopReason};
use crate::metrics;
use crate::notice::{self, ResetNotice};
use crate::window::LineWindow;

/// Buffered events per monitor before slow subscribers start lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State shared between the public handle and its polling loop.
struct Shared {
    run_id: String,
    config: Arc<MonitorConfig>,
    engine: Arc<TimelineEngine>,
    paused: AtomicBool,
    sequence: AtomicU64,
    next_notice_id: AtomicU64,
    view_tx: Arc<watch::Sender<MonitorView>>,
    events_tx: broadcast::Sender<MonitorEvent>,
    /// Cancelled when the handle is dropped; loops run on child tokens.
    root: CancellationToken,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningLoop {
    async fn shutdown(self, run_id: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!(run_id, "Polling loop panicked: {e}");
            }
        }
    }
}

/// Live monitor for one run's log file.
pub struct LogMonitor {
    shared: Arc<Shared>,
    run_status_tx: watch::Sender<Option<RunStatus>>,
    running: Mutex<Option<RunningLoop>>,
}

impl LogMonitor {
    /// Build a monitor from a configuration, validating it first.
    pub fn new(run_id: impl Into<String>, config: MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = TimelineEngine::new(&config.vocabulary)?;
        Ok(Self::with_engine(run_id, Arc::new(config), Arc::new(engine)))
    }

    /// Build a monitor sharing an already-validated configuration and engine.
    pub(crate) fn with_engine(
        run_id: impl Into<String>,
        config: Arc<MonitorConfig>,
        engine: Arc<TimelineEngine>,
    ) -> Self {
        let run_id = run_id.into();
        let view = MonitorView::new(run_id.clone(), engine.create_timeline());
        let (view_tx, _) = watch::channel(view);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (run_status_tx, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                run_id,
                config,
                engine,
                paused: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
                next_notice_id: AtomicU64::new(0),
                view_tx: Arc::new(view_tx),
                events_tx,
                root: CancellationToken::new(),
            }),
            run_status_tx,
            running: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> MonitorPhase {
        self.shared.view_tx.borrow().phase
    }

    /// Start monitoring `path`.
    ///
    /// Any previous loop is stopped and awaited first. The file is seeded
    /// from one tail read before this returns; polling then continues on a
    /// spawned task. The run status is cleared for the new lifecycle.
    pub async fn start(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            previous.shutdown(&self.shared.run_id).await;
        }

        self.run_status_tx.send_replace(None);
        let cancel = self.shared.root.child_token();
        let mut poll_loop = PollLoop::new(
            self.shared.clone(),
            path.clone(),
            self.run_status_tx.subscribe(),
            cancel.clone(),
        );
        poll_loop.seed().await;

        info!(
            run_id = %self.shared.run_id,
            path = %path.display(),
            offset = poll_loop.state.last_byte_offset,
            lines = poll_loop.window.len(),
            "Log monitoring started"
        );

        let handle = tokio::spawn(poll_loop.run());
        *running = Some(RunningLoop { cancel, handle });
    }

    /// Stop the polling loop and wait for it to exit.
    ///
    /// Idempotent; a no-op when monitoring was never started.
    pub async fn stop(&self) {
        let previous = self.running.lock().await.take();
        if let Some(previous) = previous {
            previous.shutdown(&self.shared.run_id).await;
        }
    }

    /// Stop consuming lines. Classification and publishing continue.
    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    fn set_paused(&self, paused: bool) {
        let previous = self.shared.paused.swap(paused, Ordering::Relaxed);
        if previous != paused {
            debug!(run_id = %self.shared.run_id, paused, "Pause state changed");
            self.shared.view_tx.send_modify(|view| view.paused = paused);
        }
    }

    /// Supply the externally-reported run result (`None` while in progress).
    ///
    /// Wakes the loop immediately; a terminal status produces one final
    /// update, after which the loop stops.
    pub fn set_run_status(&self, status: Option<RunStatus>) {
        self.run_status_tx.send_replace(status);
    }

    pub fn run_status(&self) -> Option<RunStatus> {
        *self.run_status_tx.borrow()
    }

    /// Current view (cloned).
    pub fn view(&self) -> MonitorView {
        self.shared.view_tx.borrow().clone()
    }

    /// Receiver that always holds the latest view.
    pub fn watch(&self) -> watch::Receiver<MonitorView> {
        self.shared.view_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Events as a `Stream`. Lagging consumers see `Err(Lagged)` items.
    pub fn updates(&self) -> BroadcastStream<MonitorEvent> {
        BroadcastStream::new(self.subscribe())
    }
}

impl Drop for LogMonitor {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

enum PollOutcome {
    Continue,
    Finished,
    Cancelled,
}

/// The polling loop itself. Moved into its task; owns all mutable state.
struct PollLoop {
    shared: Arc<Shared>,
    path: PathBuf,
    policy: PollingPolicy,
    run_status_rx: watch::Receiver<Option<RunStatus>>,
    cancel: CancellationToken,
    state: MonitorState,
    timeline: TimelineState,
    window: LineWindow,
}

impl PollLoop {
    fn new(
        shared: Arc<Shared>,
        path: PathBuf,
        run_status_rx: watch::Receiver<Option<RunStatus>>,
        cancel: CancellationToken,
    ) -> Self {
        let policy = shared.config.polling_policy();
        let timeline = shared.engine.create_timeline();
        let window = LineWindow::new(shared.config.line_window_capacity);
        Self {
            shared,
            path,
            policy,
            run_status_rx,
            cancel,
            state: MonitorState::new(policy.base()),
            timeline,
            window,
        }
    }

    fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    /// Initial tail read and first publish.
    async fn seed(&mut self) {
        let lines = self.load_tail().await;
        self.ingest(&lines);

        let stat = last_known(&self.state);
        let snapshot = classify(
            stat.as_ref(),
            &self.state,
            None,
            &self.policy,
            SystemTime::now(),
        );

        let path = self.path.clone();
        let paused = self.shared.paused.load(Ordering::Relaxed);
        self.shared.view_tx.send_modify(|view| {
            view.path = Some(path);
            view.phase = MonitorPhase::Monitoring;
            view.notice = None;
            view.paused = paused;
        });
        self.publish(snapshot, lines);
    }

    async fn run(mut self) {
        metrics::monitor_started();

        let reason = loop {
            let interval = self.state.current_polling_interval;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
                changed = self.run_status_rx.changed() => {
                    if changed.is_err() {
                        break StopReason::Cancelled;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }

            match self.poll_once().await {
                PollOutcome::Continue => {}
                PollOutcome::Finished => break StopReason::RunFinished,
                PollOutcome::Cancelled => break StopReason::Cancelled,
            }
        };

        metrics::monitor_stopped();
        self.shared
            .view_tx
            .send_modify(|view| view.phase = MonitorPhase::Stopped);
        info!(run_id = %self.run_id(), ?reason, "Log monitoring stopped");
        let _ = self.shared.events_tx.send(MonitorEvent::Stopped {
            run_id: self.shared.run_id.clone(),
            reason,
        });
    }

    async fn poll_once(&mut self) -> PollOutcome {
        let started = Instant::now();
        let run_status = *self.run_status_rx.borrow_and_update();

        let (stat, stat_ok) = match tail::stat(&self.path).await {
            Ok(stat) => (stat, true),
            Err(e) => {
                self.read_failed("stat", &e);
                (last_known(&self.state), false)
            }
        };
        if self.cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        let mut snapshot = classify(
            stat.as_ref(),
            &self.state,
            run_status,
            &self.policy,
            SystemTime::now(),
        );
        self.state.current_polling_interval = snapshot.recommended_polling_interval;

        let paused = self.shared.paused.load(Ordering::Relaxed);
        let mut new_lines = Vec::new();

        if let Some(reason) = snapshot.file_change.reset_reason() {
            new_lines = self.reset(reason, paused).await;
        } else {
            if stat_ok {
                self.state.observe(stat.as_ref());
            }
            if stat.is_some() && stat_ok && !paused {
                let drain = run_status.is_some();
                if let Some(reason) = self.read_appended(drain, &mut new_lines).await {
                    snapshot.file_change = reason.into();
                    new_lines = self.reset(reason, paused).await;
                }
            }
        }

        self.ingest(&new_lines);
        if let Some(status) = run_status {
            self.timeline = self
                .shared
                .engine
                .set_completed(&self.timeline, status == RunStatus::Succeeded);
        }

        snapshot.total_line_count = self.state.lines_consumed;
        snapshot.byte_offset = self.state.last_byte_offset;

        debug!(
            run_id = %self.run_id(),
            status = ?snapshot.status,
            offset = snapshot.byte_offset,
            lines = new_lines.len(),
            interval_ms = snapshot.recommended_polling_interval.as_millis() as u64,
            "Poll complete"
        );

        self.publish(snapshot, new_lines);
        metrics::record_poll(started.elapsed());

        if run_status.is_some() {
            PollOutcome::Finished
        } else {
            PollOutcome::Continue
        }
    }

    /// Consume appended lines into `out`. When `drain` is set, keep reading
    /// until a read consumes nothing or reaches the observed end of file.
    /// Returned line counts skip blank lines, so they never decide this.
    ///
    /// Returns the reason if the read itself discovered a reset.
    async fn read_appended(&mut self, drain: bool, out: &mut Vec<String>) -> Option<ResetReason> {
        let max_lines = self.shared.config.delta_max_lines;
        loop {
            let from = self.state.last_byte_offset;
            let delta = match tail::read_delta(&self.path, from, max_lines).await {
                Ok(delta) => delta,
                Err(e) => {
                    self.read_failed("delta read", &e);
                    return None;
                }
            };

            if delta.was_reset {
                return Some(delta.reset_reason.unwrap_or(ResetReason::Truncated));
            }

            let bytes = delta.new_offset.saturating_sub(from);
            let count = delta.lines.len();
            self.state.advance(delta.new_offset, delta.file_size, count);
            metrics::record_lines(count, bytes);
            out.extend(delta.lines);

            if !drain || bytes == 0 || delta.new_offset >= delta.file_size {
                return None;
            }
        }
    }

    /// Discard the read position after a truncation, replacement or
    /// deletion, and reseed from the file's current tail.
    async fn reset(&mut self, reason: ResetReason, paused: bool) -> Vec<String> {
        info!(
            run_id = %self.run_id(),
            path = %self.path.display(),
            reason = reason.as_str(),
            offset = self.state.last_byte_offset,
            "Log reset detected"
        );
        metrics::record_reset(reason);
        self.raise_notice(reason);

        self.state = self.state.after_reset(self.state.current_polling_interval);
        self.window.clear();

        match reason {
            ResetReason::Deleted => {
                self.state.observe(None);
                Vec::new()
            }
            _ if paused => {
                // Resume picks the whole file up from offset 0.
                match tail::stat(&self.path).await {
                    Ok(stat) => self.state.observe(stat.as_ref()),
                    Err(e) => self.read_failed("stat", &e),
                }
                Vec::new()
            }
            _ => self.load_tail().await,
        }
    }

    /// Tail-read the file and position the state just past the last complete
    /// line. Returns the lines read.
    async fn load_tail(&mut self) -> Vec<String> {
        let max_lines = self.shared.config.seed_tail_lines;
        let tail_read = match tail::read_tail(&self.path, max_lines).await {
            Ok(tail_read) => tail_read,
            Err(e) => {
                self.read_failed("tail read", &e);
                return Vec::new();
            }
        };

        match tail::stat(&self.path).await {
            Ok(stat) => self.state.observe(stat.as_ref()),
            Err(e) => self.read_failed("stat", &e),
        }
        self.state.advance(
            tail_read.offset,
            tail_read.total_bytes,
            tail_read.lines.len(),
        );
        metrics::record_lines(tail_read.lines.len(), 0);
        tail_read.lines
    }

    fn ingest(&mut self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        self.timeline = self.shared.engine.process_lines(&self.timeline, lines);
        self.window.extend(lines.iter().cloned());
    }

    fn raise_notice(&self, reason: ResetReason) {
        let id = self.shared.next_notice_id.fetch_add(1, Ordering::Relaxed) + 1;
        let notice = ResetNotice::new(id, reason);

        self.shared
            .view_tx
            .send_modify(|view| view.notice = Some(notice.clone()));
        let _ = self.shared.events_tx.send(MonitorEvent::ResetDetected {
            run_id: self.shared.run_id.clone(),
            notice,
        });

        notice::schedule_clear(
            id,
            self.shared.config.reset_notice_ttl(),
            self.shared.run_id.clone(),
            self.shared.view_tx.clone(),
            self.shared.events_tx.clone(),
            self.shared.root.clone(),
        );
    }

    fn publish(&self, snapshot: LogSnapshot, new_lines: Vec<String>) {
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let recent_lines = self.window.to_vec();
        let paused = self.shared.paused.load(Ordering::Relaxed);

        self.shared.view_tx.send_modify(|view| {
            view.sequence = sequence;
            view.snapshot = Some(snapshot.clone());
            view.timeline = self.timeline.clone();
            view.recent_lines = recent_lines;
            view.paused = paused;
        });

        // No subscribers is fine.
        let _ = self.shared.events_tx.send(MonitorEvent::Updated {
            run_id: self.shared.run_id.clone(),
            sequence,
            snapshot,
            timeline: self.timeline.clone(),
            new_lines,
        });
    }

    fn read_failed(&self, op: &'static str, err: &ReadError) {
        warn!(
            run_id = %self.run_id(),
            path = %self.path.display(),
            op,
            error = %err,
            "Log read failed; retrying next poll"
        );
        metrics::record_read_error();
    }
}

/// Metadata as recorded at the last successful probe, if the file was there.
fn last_known(state: &MonitorState) -> Option<FileStat> {
    state.present_at_last_poll.then(|| FileStat {
        size: state.last_file_size,
        created: state.last_creation_time,
        modified: state.last_write_time,
        file_id: state.last_file_id,
    })
}
