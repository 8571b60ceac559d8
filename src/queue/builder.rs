use crate::models::{PlaybackStep, Segment, StepKind, TimerDefinition};

const LEAD_IN_STEP_ID: &str = "lead-in";

/// Negative durations are treated as zero.
fn to_duration(seconds: i64) -> u32 {
    seconds.clamp(0, u32::MAX as i64) as u32
}

fn step_id(segment_index: usize, kind: StepKind, workout_loop: u32, lap_index: u32) -> String {
    format!("{segment_index}-{}-{workout_loop}-{lap_index}", kind.as_str())
}

/// Materialises a definition into the flat list of countdown steps.
///
/// Pure and total: anything that cannot be played is skipped rather than
/// reported, so an unusable definition yields an empty queue.
pub fn build_queue(definition: &TimerDefinition) -> Vec<PlaybackStep> {
    let mut queue = Vec::new();

    let lead_in = to_duration(definition.lead_in_seconds.unwrap_or(0));
    if lead_in > 0 {
        queue.push(PlaybackStep {
            id: LEAD_IN_STEP_ID.to_string(),
            kind: StepKind::LeadIn,
            duration_seconds: lead_in,
            segment_index: -1,
            lap_index: 0,
        });
    }

    let workout_laps = definition.workout_laps.max(1).min(u32::MAX as i64) as u32;
    // Skipped segments never close a set, so the set rest boundary is the
    // last segment that actually plays.
    let last_playable = definition.segments.iter().rposition(Segment::is_playable);

    for workout_loop in 0..workout_laps {
        for (segment_index, segment) in definition.segments.iter().enumerate() {
            if !segment.is_playable() {
                continue;
            }
            push_segment(
                &mut queue,
                segment,
                segment_index,
                workout_loop,
                Some(segment_index) != last_playable,
            );
        }
    }

    queue
}

fn push_segment(
    queue: &mut Vec<PlaybackStep>,
    segment: &Segment,
    segment_index: usize,
    workout_loop: u32,
    emit_set_rest: bool,
) {
    let exercise = to_duration(segment.exercise_seconds);
    let rest = to_duration(segment.rest_seconds);
    let set_rest = to_duration(segment.set_rest_seconds);
    let laps = segment.laps.clamp(1, u32::MAX as i64) as u32;

    let mut push = |kind: StepKind, duration_seconds: u32, lap_index: u32| {
        queue.push(PlaybackStep {
            id: step_id(segment_index, kind, workout_loop, lap_index),
            kind,
            duration_seconds,
            segment_index: segment_index as i32,
            lap_index,
        });
    };

    for lap_index in 0..laps {
        if exercise > 0 {
            push(StepKind::Work, exercise, lap_index);
        }
        if rest > 0 {
            push(StepKind::Rest, rest, lap_index);
        }
    }

    // Once per set, never after the final playable segment.
    if emit_set_rest && set_rest > 0 {
        push(StepKind::SetRest, set_rest, laps - 1);
    }
}

/// Sum of all step durations: the number of ticks needed to finish.
pub fn total_seconds(queue: &[PlaybackStep]) -> u64 {
    queue.iter().map(|step| step.duration_seconds as u64).sum()
}
