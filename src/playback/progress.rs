use serde::Serialize;

use crate::models::{PlaybackStep, StepKind};
use crate::queue::total_seconds;

use super::{CompletedRest, PlaybackState, PlaybackStatus};

/// Work and rest counters for progress display.
///
/// "Completed" counts every step up to and including the current one, so the
/// step in progress is already counted.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackProgress {
    pub work_completed: usize,
    pub work_total: usize,
    pub rest_completed: usize,
    pub rest_total: usize,
}

impl PlaybackProgress {
    pub fn of(queue: &[PlaybackStep], current_index: usize) -> Self {
        if queue.is_empty() {
            return Self::default();
        }
        let reached = &queue[..=current_index.min(queue.len() - 1)];

        Self {
            work_completed: count(reached, is_work),
            work_total: count(queue, is_work),
            rest_completed: count(reached, StepKind::is_rest),
            rest_total: count(queue, StepKind::is_rest),
        }
    }
}

fn is_work(kind: &StepKind) -> bool {
    *kind == StepKind::Work
}

fn count(steps: &[PlaybackStep], pred: fn(&StepKind) -> bool) -> usize {
    steps.iter().filter(|step| pred(&step.kind)).count()
}

/// Read-only view handed to UI and cue consumers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackView {
    pub timer_id: Option<String>,
    pub timer_name: Option<String>,
    pub status: PlaybackStatus,
    pub current_index: usize,
    pub remaining_seconds: u32,
    pub current_step: Option<PlaybackStep>,
    pub step_count: usize,
    pub extra_seconds_applied_to_current_step: i64,
    pub last_completed_rest: Option<CompletedRest>,
    pub progress: PlaybackProgress,
    pub elapsed_seconds: u64,
    pub total_seconds: u64,
}

impl From<&PlaybackState> for PlaybackView {
    fn from(state: &PlaybackState) -> Self {
        let snapshot = &state.snapshot;
        let total = total_seconds(&snapshot.queue);
        let before_current: u64 = snapshot
            .queue
            .iter()
            .take(snapshot.current_index)
            .map(|step| step.duration_seconds as u64)
            .sum();
        let current_duration = snapshot
            .current_step()
            .map(|step| step.duration_seconds as u64)
            .unwrap_or(0);
        // Manual adjustments can push remaining time above the step length.
        let elapsed = (before_current + current_duration)
            .saturating_sub(snapshot.remaining_seconds as u64)
            .min(total);

        Self {
            timer_id: snapshot.timer_id.clone(),
            timer_name: snapshot.timer_name.clone(),
            status: snapshot.status,
            current_index: snapshot.current_index,
            remaining_seconds: snapshot.remaining_seconds,
            current_step: snapshot.current_step().cloned(),
            step_count: snapshot.queue.len(),
            extra_seconds_applied_to_current_step: state
                .session
                .extra_seconds_applied_to_current_step,
            last_completed_rest: state.session.last_completed_rest.clone(),
            progress: PlaybackProgress::of(&snapshot.queue, snapshot.current_index),
            elapsed_seconds: elapsed,
            total_seconds: total,
        }
    }
}
