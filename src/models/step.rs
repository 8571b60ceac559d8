use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    LeadIn,
    Work,
    Rest,
    SetRest,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::LeadIn => "lead-in",
            StepKind::Work => "work",
            StepKind::Rest => "rest",
            StepKind::SetRest => "set-rest",
        }
    }

    /// Rest and set rest both count as recovery time.
    pub fn is_rest(&self) -> bool {
        matches!(self, StepKind::Rest | StepKind::SetRest)
    }
}

/// One countdown unit of the materialised queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStep {
    /// Stable across rebuilds of the same definition; consumers key cues on it.
    pub id: String,
    pub kind: StepKind,
    pub duration_seconds: u32,
    /// `-1` for the lead-in.
    pub segment_index: i32,
    pub lap_index: u32,
}
