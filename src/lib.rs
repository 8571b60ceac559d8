//! Interval workout timer engine.
//!
//! A [`TimerDefinition`] is materialised into a flat queue of countdown steps,
//! played back one second at a time by a [`PlaybackController`], and persisted
//! after every change so a killed or suspended process resumes at the right
//! step.

pub mod db;
pub mod models;
pub mod playback;
pub mod queue;
pub mod settings;
pub mod utils;

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

pub use db::Database;
pub use models::{PlaybackStep, Segment, StepKind, TimerDefinition};
pub use playback::{
    catch_up, PlaybackController, PlaybackEvent, PlaybackState, PlaybackStatus, PlaybackView,
    RehydrateOutcome,
};
pub use queue::build_queue;
pub use settings::{EngineSettings, SettingsStore};

const DATABASE_FILE: &str = "tabata.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

/// Everything a host needs, wired together from one data directory.
pub struct Engine {
    pub db: Database,
    pub playback: PlaybackController,
    pub settings: SettingsStore,
}

impl Engine {
    /// Opens (or creates) the engine state under `data_dir` and resumes any
    /// playback that was in progress when the previous process went away.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<(Self, RehydrateOutcome)> {
        utils::init_logging();

        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let database = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;

        let (playback, outcome) = PlaybackController::restore(database.clone(), &settings.engine())
            .await
            .context("failed to restore playback state")?;

        info!("Timer engine ready ({outcome:?})");

        Ok((
            Self {
                db: database,
                playback,
                settings,
            },
            outcome,
        ))
    }
}
