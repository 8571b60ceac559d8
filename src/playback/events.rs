use serde::Serialize;

use crate::models::PlaybackStep;

use super::{CompletedRest, PlaybackState, PlaybackStatus};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PlaybackEvent {
    /// A different step became current (load, tick across a boundary, skip, reset).
    StepStarted { index: usize, step: PlaybackStep },
    StatusChanged {
        from: PlaybackStatus,
        to: PlaybackStatus,
    },
    RestCompleted { rest: CompletedRest },
    /// The loaded timer was discarded.
    Cleared,
}

/// The parts of a state that transitions are detected from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    timer_id: Option<String>,
    step_id: Option<String>,
    index: usize,
    status: PlaybackStatus,
    last_rest: Option<CompletedRest>,
    loaded: bool,
}

impl Marker {
    pub fn of(state: &PlaybackState) -> Self {
        Self {
            timer_id: state.snapshot.timer_id.clone(),
            step_id: state.snapshot.current_step().map(|step| step.id.clone()),
            index: state.current_index(),
            status: state.status(),
            last_rest: state.session.last_completed_rest.clone(),
            loaded: state.is_loaded(),
        }
    }
}

/// Events implied by moving from `before` to `after`, in the order consumers
/// should react to them.
pub fn detect(before: &Marker, after: &PlaybackState) -> Vec<PlaybackEvent> {
    let now = Marker::of(after);
    let mut events = Vec::new();

    if before.loaded && !now.loaded && now.timer_id.is_none() {
        events.push(PlaybackEvent::Cleared);
    }

    if now.last_rest != before.last_rest {
        if let Some(rest) = now.last_rest.clone() {
            events.push(PlaybackEvent::RestCompleted { rest });
        }
    }

    let restarted = before.status == PlaybackStatus::Finished && now.status != PlaybackStatus::Finished;
    let step_changed = now.index != before.index
        || now.step_id != before.step_id
        || now.timer_id != before.timer_id
        || restarted;
    if step_changed {
        if let Some(step) = after.snapshot.current_step() {
            events.push(PlaybackEvent::StepStarted {
                index: now.index,
                step: step.clone(),
            });
        }
    }

    if now.status != before.status {
        events.push(PlaybackEvent::StatusChanged {
            from: before.status,
            to: now.status,
        });
    }

    events
}
