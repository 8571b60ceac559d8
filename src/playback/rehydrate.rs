use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;

use crate::models::StepKind;

use super::catch_up::catch_up;
use super::{PersistedSnapshot, PlaybackState, PlaybackStatus};

/// What startup recovery did with the stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RehydrateOutcome {
    /// Nothing was stored.
    Empty,
    /// The snapshot was unusable and has been replaced by an idle state.
    Discarded,
    /// Restored as stored; only running snapshots have time replayed.
    /// `elapsed_seconds` counts playback seconds, one per tick interval.
    Restored { elapsed_seconds: i64 },
}

/// Reasons a stored snapshot cannot be resumed.
fn validate(snapshot: &PersistedSnapshot) -> Result<(), String> {
    if snapshot.queue.is_empty() {
        if snapshot.status != PlaybackStatus::Idle {
            return Err(format!(
                "empty queue with status {}",
                snapshot.status.as_str()
            ));
        }
        return Ok(());
    }
    if snapshot.current_index >= snapshot.queue.len() {
        return Err(format!(
            "current index {} outside queue of {} steps",
            snapshot.current_index,
            snapshot.queue.len()
        ));
    }
    if let Some(step) = snapshot.queue.iter().find(|step| step.duration_seconds == 0) {
        return Err(format!("step {} has zero duration", step.id));
    }
    if snapshot
        .queue
        .iter()
        .skip(1)
        .any(|step| step.kind == StepKind::LeadIn)
    {
        return Err("lead-in step is not first".into());
    }
    Ok(())
}

/// Brings a stored snapshot up to `now`.
///
/// Running snapshots are fast-forwarded by the whole tick intervals elapsed
/// since they were written, so a restored run keeps the pace it was played
/// at; any other status is restored verbatim. The result is always stamped
/// with `now` so a later restart never replays the same interval twice.
pub fn rehydrate(
    stored: Option<PersistedSnapshot>,
    now: DateTime<Utc>,
    tick_interval: Duration,
) -> (PlaybackState, RehydrateOutcome) {
    let Some(mut snapshot) = stored else {
        return (PlaybackState::new(now), RehydrateOutcome::Empty);
    };

    if let Err(reason) = validate(&snapshot) {
        warn!("Discarding stored playback snapshot: {reason}");
        return (PlaybackState::new(now), RehydrateOutcome::Discarded);
    }

    let mut elapsed_seconds = 0;
    if snapshot.status == PlaybackStatus::Running {
        // Clock moved backwards: treat as no time passed.
        let elapsed_ms = (now - snapshot.last_updated_at).num_milliseconds().max(0);
        let interval_ms = i64::try_from(tick_interval.as_millis())
            .unwrap_or(i64::MAX)
            .max(1);
        elapsed_seconds = elapsed_ms / interval_ms;
        let replayed = catch_up(
            &snapshot.queue,
            snapshot.current_index,
            snapshot.remaining_seconds,
            elapsed_seconds,
        );
        snapshot.current_index = replayed.index;
        snapshot.remaining_seconds = replayed.remaining_seconds;
        snapshot.status = replayed.status;
    }
    snapshot.last_updated_at = now;

    (
        PlaybackState::from_snapshot(snapshot),
        RehydrateOutcome::Restored { elapsed_seconds },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Segment, TimerDefinition};
    use chrono::{Duration, TimeZone};

    const SECOND: std::time::Duration = std::time::Duration::from_secs(1);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 18, 30, 0).unwrap()
    }

    fn running_snapshot() -> PersistedSnapshot {
        let def = TimerDefinition::new("intervals")
            .with_lead_in(5)
            .with_segment(Segment::new(10, 10, 0, 1));
        let mut state = PlaybackState::new(t0());
        state.load(&def, t0());
        state.play(t0());
        state.snapshot
    }

    #[test]
    fn nothing_stored_is_idle() {
        let (state, outcome) = rehydrate(None, t0(), SECOND);

        assert_eq!(outcome, RehydrateOutcome::Empty);
        assert_eq!(state.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn running_snapshot_is_fast_forwarded() {
        let snapshot = running_snapshot();
        let now = t0() + Duration::milliseconds(7_900);

        let (state, outcome) = rehydrate(Some(snapshot), now, SECOND);

        assert_eq!(outcome, RehydrateOutcome::Restored { elapsed_seconds: 7 });
        // 5s lead-in closes after 5 ticks, two more into the 10s work step.
        assert_eq!(state.current_index(), 1);
        assert_eq!(state.remaining_seconds(), 8);
        assert_eq!(state.status(), PlaybackStatus::Running);
        assert_eq!(state.snapshot.last_updated_at, now);
    }

    #[test]
    fn long_suspension_finishes_instead_of_overrunning() {
        let mut snapshot = running_snapshot();
        snapshot.current_index = 1;
        snapshot.remaining_seconds = 10;

        let (state, _) = rehydrate(Some(snapshot), t0() + Duration::seconds(45), SECOND);

        assert_eq!(state.status(), PlaybackStatus::Finished);
        assert_eq!(state.current_index(), 2);
        assert_eq!(state.remaining_seconds(), 0);
    }

    #[test]
    fn paused_snapshot_keeps_its_position() {
        let mut snapshot = running_snapshot();
        snapshot.status = PlaybackStatus::Paused;
        snapshot.remaining_seconds = 2;

        let now = t0() + Duration::hours(3);
        let (state, outcome) = rehydrate(Some(snapshot), now, SECOND);

        assert_eq!(outcome, RehydrateOutcome::Restored { elapsed_seconds: 0 });
        assert_eq!(state.status(), PlaybackStatus::Paused);
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.remaining_seconds(), 2);
        assert_eq!(state.snapshot.last_updated_at, now);
    }

    #[test]
    fn clock_skew_replays_nothing() {
        let snapshot = running_snapshot();

        let (state, outcome) = rehydrate(Some(snapshot), t0() - Duration::seconds(30), SECOND);

        assert_eq!(outcome, RehydrateOutcome::Restored { elapsed_seconds: 0 });
        assert_eq!(state.remaining_seconds(), 5);
    }

    #[test]
    fn out_of_range_index_is_discarded() {
        let mut snapshot = running_snapshot();
        snapshot.current_index = 9;

        let (state, outcome) = rehydrate(Some(snapshot), t0(), SECOND);

        assert_eq!(outcome, RehydrateOutcome::Discarded);
        assert_eq!(state.status(), PlaybackStatus::Idle);
        assert!(state.queue().is_empty());
    }

    #[test]
    fn replay_follows_the_tick_interval() {
        let snapshot = running_snapshot();
        let now = t0() + Duration::milliseconds(1_900);

        let (state, outcome) = rehydrate(
            Some(snapshot),
            now,
            std::time::Duration::from_millis(250),
        );

        // Seven quarter-second ticks: the 5s lead-in plus two into work.
        assert_eq!(outcome, RehydrateOutcome::Restored { elapsed_seconds: 7 });
        assert_eq!(state.current_index(), 1);
        assert_eq!(state.remaining_seconds(), 8);
    }

    #[test]
    fn replay_records_no_rest_completion() {
        let mut snapshot = running_snapshot();
        snapshot.current_index = 2;
        snapshot.remaining_seconds = 3;

        // Closes the final rest step and finishes.
        let (state, _) = rehydrate(Some(snapshot), t0() + Duration::seconds(10), SECOND);

        assert_eq!(state.status(), PlaybackStatus::Finished);
        assert!(state.session.last_completed_rest.is_none());
        assert_eq!(state.session.extra_seconds_applied_to_current_step, 0);
    }

    #[test]
    fn inconsistent_snapshots_are_discarded() {
        let mut no_queue = running_snapshot();
        no_queue.queue.clear();
        no_queue.current_index = 0;

        let mut zero_step = running_snapshot();
        zero_step.queue[2].duration_seconds = 0;

        let mut misplaced_lead_in = running_snapshot();
        misplaced_lead_in.queue.swap(0, 1);

        for snapshot in [no_queue, zero_step, misplaced_lead_in] {
            let (_, outcome) = rehydrate(Some(snapshot), t0(), SECOND);
            assert_eq!(outcome, RehydrateOutcome::Discarded);
        }
    }
}
