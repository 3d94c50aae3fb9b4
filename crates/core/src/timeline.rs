//! Timeline engine: folds parsed marker events into an immutable progress
//! timeline (stage history, milestones, epoch progress, outcome).
//!
//! Every transition takes the previous [`TimelineState`] by reference and
//! returns a new one. Transitions are idempotent: replaying lines that were
//! already folded in changes nothing, which keeps reseeds after a file reset
//! from duplicating history or timestamps.
//!
//! Timestamps are the monitor's wall clock at processing time, never times
//! parsed from the log, since the worker's clock is not comparable.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MarkerVocabulary;
use crate::error::ConfigError;
use crate::markers::{MarkerEvent, MarkerParser};

/// First entry into a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEntry {
    pub stage: String,
    pub entered_at: DateTime<Utc>,
}

/// A one-way progress flag. `reached_at` stays `None` until reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub name: String,
    pub is_reached: bool,
    pub reached_at: Option<DateTime<Utc>>,
}

/// Epoch progress; `total == 0` means the total is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpochProgress {
    pub current: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    #[default]
    None,
    Succeeded,
    Failed,
}

/// Last compute device the worker reported selecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    pub device: String,
    pub reason: Option<String>,
}

/// Time spent in one stage, derived from the stage history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDuration {
    pub stage: String,
    pub duration: Duration,
}

/// Immutable progress timeline of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineState {
    /// Stages in order of first entry. Append-only.
    pub stage_history: Vec<StageEntry>,
    /// The configured milestone set, in configuration order.
    pub milestones: Vec<Milestone>,
    pub epoch_progress: Option<EpochProgress>,
    /// Set once from the externally-reported result; never changes afterwards.
    pub terminal_outcome: TerminalOutcome,
    /// Most recent stage marker seen.
    pub current_stage: Option<String>,
    pub device: Option<DeviceSelection>,
    /// Outcome suggested by a completed/failed stage marker. Advisory only:
    /// the external result always wins.
    pub advisory_outcome: TerminalOutcome,
}

impl TimelineState {
    pub fn milestone(&self, name: &str) -> Option<&Milestone> {
        let key = normalize(name);
        self.milestones.iter().find(|m| normalize(&m.name) == key)
    }

    pub fn is_reached(&self, name: &str) -> bool {
        self.milestone(name).is_some_and(|m| m.is_reached)
    }

    /// The authoritative outcome if known, otherwise the log's hint.
    pub fn effective_outcome(&self) -> TerminalOutcome {
        match self.terminal_outcome {
            TerminalOutcome::None => self.advisory_outcome,
            outcome => outcome,
        }
    }

    /// Fraction of epochs done, when the total is known.
    pub fn progress_fraction(&self) -> Option<f64> {
        let progress = self.epoch_progress?;
        (progress.total > 0).then(|| f64::from(progress.current) / f64::from(progress.total))
    }

    /// Time spent in each stage; the last stage runs until `now`.
    pub fn stage_durations(&self, now: DateTime<Utc>) -> Vec<StageDuration> {
        self.stage_history
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let end = self
                    .stage_history
                    .get(i + 1)
                    .map(|next| next.entered_at)
                    .unwrap_or(now);
                StageDuration {
                    stage: entry.stage.clone(),
                    duration: (end - entry.entered_at).to_std().unwrap_or_default(),
                }
            })
            .collect()
    }
}

/// Pure state-transition functions over [`TimelineState`], configured with
/// a marker vocabulary and milestone set.
#[derive(Debug, Clone)]
pub struct TimelineEngine {
    parser: MarkerParser,
    milestone_names: Vec<String>,
    /// Normalized stage name or alias -> milestone name.
    stage_to_milestone: HashMap<String, String>,
    success_milestone: Option<String>,
    failure_milestone: Option<String>,
}

impl TimelineEngine {
    pub fn new(vocabulary: &MarkerVocabulary) -> Result<Self, ConfigError> {
        let parser = MarkerParser::new(vocabulary)?;
        let mut stage_to_milestone = HashMap::new();
        for spec in &vocabulary.milestones {
            stage_to_milestone.insert(normalize(&spec.name), spec.name.clone());
            for alias in &spec.aliases {
                stage_to_milestone
                    .entry(normalize(alias))
                    .or_insert_with(|| spec.name.clone());
            }
        }
        Ok(Self {
            parser,
            milestone_names: vocabulary.milestones.iter().map(|m| m.name.clone()).collect(),
            stage_to_milestone,
            success_milestone: vocabulary.success_milestone.clone(),
            failure_milestone: vocabulary.failure_milestone.clone(),
        })
    }

    pub fn parser(&self) -> &MarkerParser {
        &self.parser
    }

    /// Empty timeline: every milestone unreached, no history, no outcome.
    pub fn create_timeline(&self) -> TimelineState {
        TimelineState {
            stage_history: Vec::new(),
            milestones: self
                .milestone_names
                .iter()
                .map(|name| Milestone {
                    name: name.clone(),
                    is_reached: false,
                    reached_at: None,
                })
                .collect(),
            epoch_progress: None,
            terminal_outcome: TerminalOutcome::None,
            current_stage: None,
            device: None,
            advisory_outcome: TerminalOutcome::None,
        }
    }

    /// Fold `lines` into `state`, stamping new entries with the current time.
    pub fn process_lines<S: AsRef<str>>(
        &self,
        state: &TimelineState,
        lines: &[S],
    ) -> TimelineState {
        self.process_lines_at(state, lines, Utc::now())
    }

    pub fn process_lines_at<S: AsRef<str>>(
        &self,
        state: &TimelineState,
        lines: &[S],
        now: DateTime<Utc>,
    ) -> TimelineState {
        let mut next = state.clone();
        for line in lines {
            if let Some(event) = self.parser.parse(line.as_ref()) {
                self.apply(&mut next, event, now);
            }
        }
        next
    }

    /// Record the externally-reported result. Only the first call has any
    /// effect; the outcome is immutable once set.
    pub fn set_completed(&self, state: &TimelineState, succeeded: bool) -> TimelineState {
        self.set_completed_at(state, succeeded, Utc::now())
    }

    pub fn set_completed_at(
        &self,
        state: &TimelineState,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> TimelineState {
        let mut next = state.clone();
        if next.terminal_outcome != TerminalOutcome::None {
            return next;
        }
        let (outcome, milestone) = if succeeded {
            (TerminalOutcome::Succeeded, self.success_milestone.as_deref())
        } else {
            (TerminalOutcome::Failed, self.failure_milestone.as_deref())
        };
        next.terminal_outcome = outcome;
        if let Some(name) = milestone {
            reach(&mut next, name, now);
        }
        next
    }

    fn apply(&self, state: &mut TimelineState, event: MarkerEvent, now: DateTime<Utc>) {
        match event {
            MarkerEvent::Stage { name } => self.apply_stage(state, name, now),
            MarkerEvent::Epoch { current, total } => {
                let incoming = EpochProgress { current, total };
                // Epochs never regress; replays of older markers are no-ops.
                if state.epoch_progress.map_or(true, |existing| incoming > existing) {
                    state.epoch_progress = Some(incoming);
                }
            }
            MarkerEvent::Device { device, reason } => {
                state.device = Some(DeviceSelection { device, reason });
            }
        }
    }

    fn apply_stage(&self, state: &mut TimelineState, name: String, now: DateTime<Utc>) {
        let key = normalize(&name);
        if !state.stage_history.iter().any(|e| normalize(&e.stage) == key) {
            state.stage_history.push(StageEntry {
                stage: name.clone(),
                entered_at: now,
            });
        }

        if let Some(milestone) = self.stage_to_milestone.get(&key) {
            reach(state, milestone, now);
            if self.success_milestone.as_deref() == Some(milestone.as_str()) {
                state.advisory_outcome = TerminalOutcome::Succeeded;
            } else if self.failure_milestone.as_deref() == Some(milestone.as_str()) {
                state.advisory_outcome = TerminalOutcome::Failed;
            }
        }

        state.current_stage = Some(name);
    }
}

impl Default for TimelineEngine {
    fn default() -> Self {
        Self::new(&MarkerVocabulary::default()).expect("default marker vocabulary compiles")
    }
}

/// Mark a milestone reached. Already-reached milestones keep their time.
fn reach(state: &mut TimelineState, name: &str, now: DateTime<Utc>) {
    let key = normalize(name);
    if let Some(m) = state
        .milestones
        .iter_mut()
        .find(|m| normalize(&m.name) == key)
    {
        if !m.is_reached {
            m.is_reached = true;
            m.reached_at = Some(now);
        }
    }
}

/// Case-insensitive, with `-`, `_` and spaces treated alike.
fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
