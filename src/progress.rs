//! Progress reporting
//!
//! Maps the orchestrator's sequence of stages onto a single 0-100% figure.
//! Every stage owns an equal share of the range; a stage announces how many
//! steps it will report when it starts, and each step advances progress by
//! its fraction of that share. Each report publishes an [`Event::Status`]
//! carrying the percentage reached *before* the step is counted, so the first
//! report of a stage shows where the stage started.

use crate::types::{Event, Stage};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

struct State {
    stage: Stage,
    started: usize,
    step_share: f64,
    percent: f64,
    message: String,
}

/// Progress reporter for one bundling run
pub struct ProgressReporter {
    events: broadcast::Sender<Event>,
    state: Mutex<State>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProgressReporter")
            .field("stage", &state.stage)
            .field("percent", &state.percent)
            .finish()
    }
}

impl ProgressReporter {
    /// Create a reporter publishing on `events`
    pub fn new(events: broadcast::Sender<Event>) -> Self {
        Self {
            events,
            state: Mutex::new(State {
                stage: Stage::Configuration,
                started: 0,
                step_share: 0.0,
                percent: 0.0,
                message: String::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin `stage`, which will report `steps` units of work
    pub fn start_stage(&self, stage: Stage, steps: u64) {
        let mut state = self.lock();
        let floor = stage_boundary(state.started);
        state.percent = state.percent.max(floor);
        state.started += 1;
        state.stage = stage;
        state.step_share = if steps > 0 { 1.0 / steps as f64 } else { 0.0 };
        state.message = stage.label().to_string();

        tracing::info!(stage = %stage, steps, percent = state.percent, "Stage started");
        // No subscribers is fine
        let _ = self.events.send(Event::StageStarted { stage, steps });
        self.publish(&state, None);
    }

    /// Report one unit of work on `file`
    pub fn report(&self, file: impl Into<String>) {
        self.report_n(1, file);
    }

    /// Report `n` units of work on `file`
    pub fn report_n(&self, n: u64, file: impl Into<String>) {
        let mut state = self.lock();
        self.publish(&state, Some(file.into()));
        let ceiling = stage_boundary(state.started);
        let advanced = state.percent + 100.0 * state.step_share * n as f64 / Stage::COUNT as f64;
        state.percent = advanced.min(ceiling);
    }

    /// Current overall progress
    pub fn percent(&self) -> f32 {
        self.lock().percent as f32
    }

    fn publish(&self, state: &State, file: Option<String>) {
        if let Some(file) = &file {
            tracing::debug!(stage = %state.stage, file = %file, percent = state.percent, "Progress");
        }
        let _ = self.events.send(Event::Status {
            stage: state.stage,
            message: state.message.clone(),
            file,
            percent: state.percent as f32,
        });
    }
}

/// Percentage at which stage number `started` (0-based) begins
fn stage_boundary(started: usize) -> f64 {
    (100.0 * started as f64 / Stage::COUNT as f64).min(100.0)
}
