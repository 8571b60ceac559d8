pub mod catch_up;
pub mod controller;
pub mod events;
pub mod progress;
pub mod rehydrate;
pub mod state;

pub use catch_up::{catch_up, CatchUp};
pub use controller::PlaybackController;
pub use events::PlaybackEvent;
pub use progress::{PlaybackProgress, PlaybackView};
pub use rehydrate::{rehydrate, RehydrateOutcome};
pub use state::{CompletedRest, PersistedSnapshot, PlaybackState, PlaybackStatus, SessionOnly};
