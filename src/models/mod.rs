pub mod definition;
pub mod step;

pub use definition::{Segment, TimerDefinition};
pub use step::{PlaybackStep, StepKind};
