use serde::Serialize;

use crate::models::PlaybackStep;

use super::PlaybackStatus;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatchUp {
    pub index: usize,
    pub remaining_seconds: u32,
    pub status: PlaybackStatus,
}

/// Replays `elapsed_seconds` worth of ticks against a running position in
/// closed form, one step per iteration.
///
/// Produces exactly what `elapsed_seconds` calls to `PlaybackState::tick`
/// would, including the extra second spent crossing each step boundary.
pub fn catch_up(
    queue: &[PlaybackStep],
    start_index: usize,
    start_remaining: u32,
    elapsed_seconds: i64,
) -> CatchUp {
    if elapsed_seconds <= 0 || queue.is_empty() {
        return CatchUp {
            index: start_index,
            remaining_seconds: start_remaining,
            status: PlaybackStatus::Running,
        };
    }

    let last = queue.len() - 1;
    let finished = CatchUp {
        index: last,
        remaining_seconds: 0,
        status: PlaybackStatus::Finished,
    };
    if start_index > last {
        return finished;
    }

    let mut index = start_index;
    let mut remaining = start_remaining as u64;
    let mut seconds_left = elapsed_seconds as u64;

    loop {
        let within_step = remaining.saturating_sub(1).min(seconds_left);
        remaining -= within_step;
        seconds_left -= within_step;

        if seconds_left == 0 {
            return CatchUp {
                index,
                remaining_seconds: remaining as u32,
                status: PlaybackStatus::Running,
            };
        }

        // The tick that closes this step.
        seconds_left -= 1;
        if index == last {
            return finished;
        }
        index += 1;
        remaining = queue[index].duration_seconds as u64;
    }
}
