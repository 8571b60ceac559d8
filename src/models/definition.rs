//! Timer definitions as handed to the engine by the definition store.
//!
//! A definition is read-only once loaded; the engine never writes one back.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One building block of a timer: `laps` repetitions of work followed by rest,
/// then an optional set rest before the next segment.
///
/// Durations are signed so that malformed input survives deserialization and
/// can be normalised by the queue builder instead of being rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub exercise_seconds: i64,
    #[serde(default)]
    pub rest_seconds: i64,
    #[serde(default)]
    pub set_rest_seconds: i64,
    #[serde(default = "default_laps")]
    pub laps: i64,
}

fn default_laps() -> i64 {
    1
}

impl Segment {
    pub fn new(exercise_seconds: i64, rest_seconds: i64, set_rest_seconds: i64, laps: i64) -> Self {
        Self {
            id: None,
            exercise_seconds,
            rest_seconds,
            set_rest_seconds,
            laps,
        }
    }

    /// A segment that contributes no playable step is skipped by the builder.
    pub fn is_playable(&self) -> bool {
        self.laps >= 1 && (self.exercise_seconds > 0 || self.rest_seconds > 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub lead_in_seconds: Option<i64>,
    #[serde(default = "default_laps")]
    pub workout_laps: i64,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl TimerDefinition {
    /// Creates an empty definition with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            lead_in_seconds: None,
            workout_laps: 1,
            segments: Vec::new(),
        }
    }

    pub fn with_lead_in(mut self, seconds: i64) -> Self {
        self.lead_in_seconds = Some(seconds);
        self
    }

    pub fn with_workout_laps(mut self, laps: i64) -> Self {
        self.workout_laps = laps;
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }
}
