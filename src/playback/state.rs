use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PlaybackStep, TimerDefinition};
use crate::queue::build_queue;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
}

impl PlaybackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Running => "running",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Finished => "finished",
        }
    }
}

/// The fields written to durable storage after every mutation, and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub timer_id: Option<String>,
    pub timer_name: Option<String>,
    pub queue: Vec<PlaybackStep>,
    pub current_index: usize,
    pub remaining_seconds: u32,
    pub status: PlaybackStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated_at: DateTime<Utc>,
}

impl PersistedSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            timer_id: None,
            timer_name: None,
            queue: Vec::new(),
            current_index: 0,
            remaining_seconds: 0,
            status: PlaybackStatus::Idle,
            last_updated_at: now,
        }
    }

    pub fn current_step(&self) -> Option<&PlaybackStep> {
        self.queue.get(self.current_index)
    }

    fn last_index(&self) -> usize {
        self.queue.len().saturating_sub(1)
    }

    fn duration_at(&self, index: usize) -> u32 {
        self.queue
            .get(index)
            .map(|step| step.duration_seconds)
            .unwrap_or(0)
    }
}

/// A rest that ran to completion, with manual adjustments folded in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRest {
    pub step_id: String,
    pub effective_seconds: i64,
    pub completed_at: DateTime<Utc>,
}

/// Transient facts that only live for the current process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOnly {
    /// Sum of the deltas `adjust_seconds` actually applied to the current step.
    pub extra_seconds_applied_to_current_step: i64,
    pub last_completed_rest: Option<CompletedRest>,
}

/// Playback state machine. Every command is total: misuse is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackState {
    pub snapshot: PersistedSnapshot,
    pub session: SessionOnly,
}

impl PlaybackState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::from_snapshot(PersistedSnapshot::empty(now))
    }

    pub fn from_snapshot(snapshot: PersistedSnapshot) -> Self {
        Self {
            snapshot,
            session: SessionOnly::default(),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.snapshot.status
    }

    pub fn current_index(&self) -> usize {
        self.snapshot.current_index
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.snapshot.remaining_seconds
    }

    pub fn queue(&self) -> &[PlaybackStep] {
        &self.snapshot.queue
    }

    pub fn is_loaded(&self) -> bool {
        !self.snapshot.queue.is_empty()
    }

    pub fn load(&mut self, definition: &TimerDefinition, now: DateTime<Utc>) {
        let queue = build_queue(definition);
        let status = if queue.is_empty() {
            PlaybackStatus::Idle
        } else {
            PlaybackStatus::Paused
        };

        self.snapshot = PersistedSnapshot {
            timer_id: Some(definition.id.clone()),
            timer_name: Some(definition.name.clone()),
            remaining_seconds: queue.first().map(|s| s.duration_seconds).unwrap_or(0),
            queue,
            current_index: 0,
            status,
            last_updated_at: now,
        };
        self.session = SessionOnly::default();
    }

    pub fn play(&mut self, now: DateTime<Utc>) {
        if !self.is_loaded() {
            return;
        }

        match self.snapshot.status {
            PlaybackStatus::Finished => {
                self.move_to(0);
                self.snapshot.status = PlaybackStatus::Running;
            }
            PlaybackStatus::Idle | PlaybackStatus::Paused => {
                if self.snapshot.remaining_seconds == 0 {
                    self.snapshot.remaining_seconds =
                        self.snapshot.duration_at(self.snapshot.current_index);
                }
                self.snapshot.status = PlaybackStatus::Running;
            }
            PlaybackStatus::Running => return,
        }
        self.snapshot.last_updated_at = now;
    }

    /// Continues a paused run; unlike `play` it never restarts a finished one.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.snapshot.status == PlaybackStatus::Paused {
            self.play(now);
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.snapshot.status == PlaybackStatus::Running {
            self.snapshot.status = PlaybackStatus::Paused;
            self.snapshot.last_updated_at = now;
        }
    }

    /// Advances playback by exactly one second.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if self.snapshot.status != PlaybackStatus::Running || !self.is_loaded() {
            return;
        }

        if self.snapshot.remaining_seconds > 1 {
            self.snapshot.remaining_seconds -= 1;
        } else {
            self.record_completed_rest(now);
            self.complete_current_step();
        }
        self.snapshot.last_updated_at = now;
    }

    pub fn next(&mut self, now: DateTime<Utc>) {
        if !self.is_loaded() || self.snapshot.status == PlaybackStatus::Finished {
            return;
        }

        self.complete_current_step();
        self.snapshot.last_updated_at = now;
    }

    /// Steps back one step at full duration, keeping the status.
    ///
    /// A finished run is the exception: the last step is reopened and the
    /// status becomes `Paused`, since there is no running position to keep.
    pub fn previous(&mut self, now: DateTime<Utc>) {
        if !self.is_loaded() {
            return;
        }

        if self.snapshot.status == PlaybackStatus::Finished {
            // Reopen the final step so the run can be continued by hand.
            self.move_to(self.snapshot.last_index());
            self.snapshot.status = PlaybackStatus::Paused;
        } else {
            self.move_to(self.snapshot.current_index.saturating_sub(1));
        }
        self.snapshot.last_updated_at = now;
    }

    /// Shifts the remaining time of the current step, never below one second.
    pub fn adjust_seconds(&mut self, delta: i64, now: DateTime<Utc>) {
        if !self.is_loaded()
            || matches!(
                self.snapshot.status,
                PlaybackStatus::Finished | PlaybackStatus::Idle
            )
        {
            return;
        }

        let current = self.snapshot.remaining_seconds as i64;
        let target = current.saturating_add(delta).clamp(1, u32::MAX as i64);
        self.snapshot.remaining_seconds = target as u32;
        self.session.extra_seconds_applied_to_current_step += target - current;
        self.snapshot.last_updated_at = now;
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.move_to(0);
        self.snapshot.status = if self.is_loaded() {
            PlaybackStatus::Paused
        } else {
            PlaybackStatus::Idle
        };
        self.snapshot.last_updated_at = now;
    }

    /// Discards the loaded timer entirely.
    pub fn stop(&mut self, now: DateTime<Utc>) {
        self.snapshot = PersistedSnapshot::empty(now);
        self.session = SessionOnly::default();
    }

    /// Moves past the current step, finishing the run after the last one.
    fn complete_current_step(&mut self) {
        let last = self.snapshot.last_index();
        if self.snapshot.current_index >= last {
            self.snapshot.current_index = last;
            self.snapshot.remaining_seconds = 0;
            self.snapshot.status = PlaybackStatus::Finished;
            self.session.extra_seconds_applied_to_current_step = 0;
        } else {
            self.move_to(self.snapshot.current_index + 1);
        }
    }

    fn move_to(&mut self, index: usize) {
        self.snapshot.current_index = index;
        self.snapshot.remaining_seconds = self.snapshot.duration_at(index);
        self.session.extra_seconds_applied_to_current_step = 0;
    }

    fn record_completed_rest(&mut self, now: DateTime<Utc>) {
        let Some(step) = self.snapshot.current_step() else {
            return;
        };
        if !step.kind.is_rest() {
            return;
        }

        self.session.last_completed_rest = Some(CompletedRest {
            step_id: step.id.clone(),
            effective_seconds: step.duration_seconds as i64
                + self.session.extra_seconds_applied_to_current_step,
            completed_at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Segment, StepKind};
    use crate::queue::total_seconds;
    use chrono::{Duration, TimeZone};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap()
    }

    fn tabata() -> TimerDefinition {
        TimerDefinition::new("tabata")
            .with_lead_in(3)
            .with_segment(Segment::new(20, 10, 5, 2))
    }

    fn loaded(def: &TimerDefinition) -> PlaybackState {
        let mut state = PlaybackState::new(t0());
        state.load(def, t0());
        state
    }

    #[test]
    fn load_starts_paused_at_first_step() {
        let state = loaded(&tabata());

        assert_eq!(state.status(), PlaybackStatus::Paused);
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.remaining_seconds(), 3);
        assert_eq!(state.snapshot.timer_name.as_deref(), Some("tabata"));
    }

    #[test]
    fn load_of_empty_definition_stays_idle() {
        let mut state = PlaybackState::new(t0());
        state.load(&TimerDefinition::new("empty"), t0());

        assert_eq!(state.status(), PlaybackStatus::Idle);
        assert_eq!(state.remaining_seconds(), 0);

        state.play(t0());
        assert_eq!(state.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn ticking_total_duration_finishes() {
        let mut state = loaded(&tabata());
        state.play(t0());

        for i in 0..62 {
            state.tick(t0() + Duration::seconds(i + 1));
            assert_eq!(state.status(), PlaybackStatus::Running, "tick {}", i + 1);
        }
        state.tick(t0() + Duration::seconds(63));

        assert_eq!(state.status(), PlaybackStatus::Finished);
        assert_eq!(state.current_index(), 4);
        assert_eq!(state.remaining_seconds(), 0);
        assert_eq!(state.snapshot.last_updated_at, t0() + Duration::seconds(63));
    }

    #[test]
    fn tick_is_ignored_unless_running() {
        let mut state = loaded(&tabata());
        let before = state.clone();

        state.tick(t0() + Duration::seconds(5));
        assert_eq!(state, before);

        let mut idle = PlaybackState::new(t0());
        idle.tick(t0());
        assert_eq!(idle.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn play_from_finished_restarts() {
        let def = TimerDefinition::new("short").with_segment(Segment::new(2, 1, 0, 1));
        let mut state = loaded(&def);
        state.play(t0());
        for _ in 0..3 {
            state.tick(t0());
        }
        assert_eq!(state.status(), PlaybackStatus::Finished);

        state.play(t0());
        assert_eq!(state.status(), PlaybackStatus::Running);
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.remaining_seconds(), 2);
    }

    #[test]
    fn play_from_idle_with_queue_resumes_in_place() {
        let mut state = loaded(&tabata());
        state.snapshot.status = PlaybackStatus::Idle;
        state.snapshot.current_index = 2;
        state.snapshot.remaining_seconds = 4;

        state.play(t0());

        assert_eq!(state.status(), PlaybackStatus::Running);
        assert_eq!(state.current_index(), 2);
        assert_eq!(state.remaining_seconds(), 4);
    }

    #[test]
    fn pause_and_resume() {
        let mut state = loaded(&tabata());
        state.resume(t0());
        assert_eq!(state.status(), PlaybackStatus::Running);

        state.tick(t0());
        state.pause(t0() + Duration::seconds(9));
        assert_eq!(state.status(), PlaybackStatus::Paused);
        assert_eq!(state.remaining_seconds(), 2);
        assert_eq!(state.snapshot.last_updated_at, t0() + Duration::seconds(9));

        state.pause(t0() + Duration::seconds(20));
        assert_eq!(state.snapshot.last_updated_at, t0() + Duration::seconds(9));
    }

    #[test]
    fn resume_does_not_restart_finished_runs() {
        let def = TimerDefinition::new("one").with_segment(Segment::new(1, 0, 0, 1));
        let mut state = loaded(&def);
        state.play(t0());
        state.tick(t0());
        assert_eq!(state.status(), PlaybackStatus::Finished);

        state.resume(t0());
        assert_eq!(state.status(), PlaybackStatus::Finished);
    }

    #[test]
    fn next_and_previous_keep_status() {
        let mut state = loaded(&tabata());
        state.adjust_seconds(10, t0());

        state.next(t0());
        assert_eq!(state.status(), PlaybackStatus::Paused);
        assert_eq!(state.current_index(), 1);
        assert_eq!(state.remaining_seconds(), 20);
        assert_eq!(state.session.extra_seconds_applied_to_current_step, 0);

        state.previous(t0());
        state.previous(t0());
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.remaining_seconds(), 3);
    }

    #[test]
    fn next_past_the_end_finishes() {
        let mut state = loaded(&tabata());
        state.play(t0());
        for _ in 0..5 {
            state.next(t0());
        }

        assert_eq!(state.status(), PlaybackStatus::Finished);
        assert_eq!(state.current_index(), 4);
        assert_eq!(state.remaining_seconds(), 0);

        state.next(t0());
        assert_eq!(state.current_index(), 4);

        state.previous(t0());
        assert_eq!(state.status(), PlaybackStatus::Paused);
        assert_eq!(state.current_index(), 4);
        assert_eq!(state.remaining_seconds(), 10);
    }

    #[test]
    fn adjust_is_floored_at_one_second() {
        let mut state = loaded(&tabata());
        state.next(t0());
        assert_eq!(state.remaining_seconds(), 20);

        state.adjust_seconds(-50, t0());
        assert_eq!(state.remaining_seconds(), 1);
        assert_eq!(state.session.extra_seconds_applied_to_current_step, -19);

        state.adjust_seconds(15, t0());
        assert_eq!(state.remaining_seconds(), 16);
        assert_eq!(state.session.extra_seconds_applied_to_current_step, -4);
    }

    #[test]
    fn adjust_floor_holds_for_random_deltas() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut state = loaded(&tabata());
        state.play(t0());

        for _ in 0..1_000 {
            match rng.gen_range(0..3) {
                0 => state.adjust_seconds(rng.gen_range(-500..0), t0()),
                1 => state.adjust_seconds(rng.gen_range(-20..20), t0()),
                _ => state.tick(t0()),
            }
            if state.status() == PlaybackStatus::Finished {
                state.play(t0());
            }
            assert!(state.remaining_seconds() >= 1);
        }
    }

    #[test]
    fn adjust_is_ignored_once_finished() {
        let mut state = loaded(&tabata());
        state.play(t0());
        for _ in 0..5 {
            state.next(t0());
        }
        let finished = state.clone();

        state.adjust_seconds(30, t0() + Duration::seconds(1));

        assert_eq!(state, finished);
    }

    #[test]
    fn adjust_is_ignored_while_idle_with_a_queue() {
        let mut state = loaded(&tabata());
        state.snapshot.status = PlaybackStatus::Idle;
        let idle = state.clone();

        state.adjust_seconds(-2, t0() + Duration::seconds(1));

        assert_eq!(state, idle);
        assert_eq!(state.session.extra_seconds_applied_to_current_step, 0);
    }

    #[test]
    fn skipping_a_rest_records_no_completion() {
        let mut state = loaded(&tabata());
        state.play(t0());
        state.next(t0());
        state.next(t0());
        assert_eq!(state.queue()[state.current_index()].kind, StepKind::Rest);
        state.adjust_seconds(4, t0());

        state.next(t0() + Duration::seconds(2));

        assert_eq!(state.current_index(), 3);
        assert!(state.session.last_completed_rest.is_none());
        assert_eq!(state.session.extra_seconds_applied_to_current_step, 0);
    }

    #[test]
    fn adjust_without_queue_is_noop() {
        let mut state = PlaybackState::new(t0());
        state.adjust_seconds(30, t0() + Duration::seconds(1));

        assert_eq!(state, PlaybackState::new(t0()));
    }

    #[test]
    fn completed_rest_includes_adjustments() {
        let def = TimerDefinition::new("rest").with_segment(Segment::new(2, 5, 0, 2));
        let mut state = loaded(&def);
        state.play(t0());
        state.tick(t0());
        state.tick(t0());
        assert_eq!(state.queue()[state.current_index()].kind, StepKind::Rest);

        state.adjust_seconds(3, t0());
        for _ in 0..7 {
            state.tick(t0() + Duration::seconds(30));
        }
        assert!(state.session.last_completed_rest.is_none());
        state.tick(t0() + Duration::seconds(31));

        let rest = state.session.last_completed_rest.clone().unwrap();
        assert_eq!(rest.step_id, "0-rest-0-0");
        assert_eq!(rest.effective_seconds, 8);
        assert_eq!(rest.completed_at, t0() + Duration::seconds(31));
        assert_eq!(state.session.extra_seconds_applied_to_current_step, 0);
    }

    #[test]
    fn reset_returns_to_start_paused() {
        let mut state = loaded(&tabata());
        state.play(t0());
        state.next(t0());
        state.adjust_seconds(4, t0());

        state.reset(t0());

        assert_eq!(state.status(), PlaybackStatus::Paused);
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.remaining_seconds(), 3);
        assert_eq!(state.session.extra_seconds_applied_to_current_step, 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut state = loaded(&tabata());
        state.play(t0());

        state.stop(t0());
        let once = state.clone();
        state.stop(t0());

        assert_eq!(state, once);
        assert_eq!(state.status(), PlaybackStatus::Idle);
        assert!(state.queue().is_empty());
        assert!(state.snapshot.timer_id.is_none());
    }

    #[test]
    fn ticks_never_move_backwards() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let mut def = TimerDefinition::new("random").with_lead_in(rng.gen_range(0..4));
            for _ in 0..rng.gen_range(1..4) {
                def = def.with_segment(Segment::new(
                    rng.gen_range(1..8),
                    rng.gen_range(0..8),
                    rng.gen_range(0..8),
                    rng.gen_range(1..4),
                ));
            }
            let mut state = loaded(&def);
            state.play(t0());

            let total = total_seconds(state.queue());
            let mut last_index = 0;
            for _ in 0..total {
                state.tick(t0());
                assert!(state.current_index() >= last_index);
                last_index = state.current_index();
            }
            assert_eq!(state.status(), PlaybackStatus::Finished);
        }
    }

    #[test]
    fn snapshot_json_uses_expected_field_names() {
        let state = loaded(&tabata());
        let value = serde_json::to_value(&state.snapshot).unwrap();

        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "currentIndex",
                "lastUpdatedAt",
                "queue",
                "remainingSeconds",
                "status",
                "timerId",
                "timerName"
            ]
        );
        assert_eq!(value["lastUpdatedAt"], t0().timestamp_millis());
        assert_eq!(value["status"], "paused");
    }
}
