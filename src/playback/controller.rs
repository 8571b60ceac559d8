use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{db::Database, models::TimerDefinition, settings::EngineSettings};

use super::{
    events::{detect, Marker},
    rehydrate::{rehydrate, RehydrateOutcome},
    PersistedSnapshot, PlaybackEvent, PlaybackState, PlaybackStatus, PlaybackView,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Owns the playback state for one engine instance and everything that has to
/// happen around a command: persisting the snapshot, publishing events and
/// keeping the one-second ticker alive exactly while playback is running.
#[derive(Clone)]
pub struct PlaybackController {
    state: Arc<Mutex<PlaybackState>>,
    db: Database,
    events: broadcast::Sender<PlaybackEvent>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    tick_interval: Duration,
}

impl PlaybackController {
    pub fn new(db: Database, settings: &EngineSettings) -> Self {
        Self::with_state(db, settings, PlaybackState::new(Utc::now()))
    }

    fn with_state(db: Database, settings: &EngineSettings, state: PlaybackState) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(state)),
            db,
            events,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: settings.tick_interval(),
        }
    }

    /// Rebuilds the controller from the stored snapshot, replaying the time
    /// that passed while no process was ticking.
    pub async fn restore(db: Database, settings: &EngineSettings) -> Result<(Self, RehydrateOutcome)> {
        let payload = db
            .load_snapshot_payload()
            .await
            .context("failed to load playback snapshot")?;

        let mut corrupt = false;
        let stored = payload.and_then(|raw| {
            serde_json::from_str::<PersistedSnapshot>(&raw)
                .map_err(|err| {
                    log_warn!("Stored playback snapshot is not valid JSON: {err}");
                    corrupt = true;
                })
                .ok()
        });

        let (state, mut outcome) = rehydrate(stored, Utc::now(), settings.tick_interval());
        if corrupt {
            outcome = RehydrateOutcome::Discarded;
        }

        match outcome {
            RehydrateOutcome::Empty => {}
            RehydrateOutcome::Discarded => {
                if let Err(err) = db.clear_snapshot().await {
                    log_error!("Failed to clear discarded playback snapshot: {err:?}");
                }
            }
            RehydrateOutcome::Restored { elapsed_seconds } => {
                log_info!(
                    "Restored timer {:?} as {} after replaying {}s",
                    state.snapshot.timer_name,
                    state.status().as_str(),
                    elapsed_seconds
                );
                persist(&db, &state.snapshot);
            }
        }

        let running = state.status() == PlaybackStatus::Running;
        let controller = Self::with_state(db, settings, state);
        if running {
            controller.sync_ticker(PlaybackStatus::Running).await;
        }
        Ok((controller, outcome))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub async fn view(&self) -> PlaybackView {
        PlaybackView::from(&*self.state.lock().await)
    }

    pub async fn load(&self, definition: &TimerDefinition) -> PlaybackView {
        self.apply(|state, now| state.load(definition, now)).await
    }

    /// Loads a definition from the store. `None` when the id is unknown; the
    /// current playback is left untouched in that case.
    pub async fn load_timer(&self, timer_id: &str) -> Result<Option<PlaybackView>> {
        let Some(definition) = self
            .db
            .get_definition(timer_id)
            .await
            .with_context(|| format!("failed to fetch timer definition {timer_id}"))?
        else {
            log_warn!("Timer definition {timer_id} not found");
            return Ok(None);
        };

        Ok(Some(self.load(&definition).await))
    }

    pub async fn play(&self) -> PlaybackView {
        self.apply(PlaybackState::play).await
    }

    pub async fn resume(&self) -> PlaybackView {
        self.apply(PlaybackState::resume).await
    }

    pub async fn pause(&self) -> PlaybackView {
        self.apply(PlaybackState::pause).await
    }

    pub async fn stop(&self) -> PlaybackView {
        self.apply(PlaybackState::stop).await
    }

    pub async fn reset(&self) -> PlaybackView {
        self.apply(PlaybackState::reset).await
    }

    pub async fn next(&self) -> PlaybackView {
        self.apply(PlaybackState::next).await
    }

    pub async fn previous(&self) -> PlaybackView {
        self.apply(PlaybackState::previous).await
    }

    pub async fn adjust_seconds(&self, delta: i64) -> PlaybackView {
        self.apply(|state, now| state.adjust_seconds(delta, now)).await
    }

    /// One second of playback. The owned ticker calls this on its own; it is
    /// public for hosts that drive time themselves.
    pub async fn tick(&self) -> PlaybackView {
        self.apply(PlaybackState::tick).await
    }

    /// Stops the ticker without touching the state.
    pub async fn shutdown(&self) {
        self.sync_ticker(PlaybackStatus::Idle).await;
    }

    async fn apply<F>(&self, command: F) -> PlaybackView
    where
        F: FnOnce(&mut PlaybackState, DateTime<Utc>),
    {
        let (view, status) = apply_command(&self.state, &self.db, &self.events, command).await;
        self.sync_ticker(status).await;
        view
    }

    async fn sync_ticker(&self, status: PlaybackStatus) {
        let mut guard = self.ticker.lock().await;

        if status != PlaybackStatus::Running {
            if let Some(ticker) = guard.take() {
                ticker.cancel_token.cancel();
                log_info!("Ticker stopped ({})", status.as_str());
            }
            return;
        }

        if guard.as_ref().is_some_and(|ticker| !ticker.handle.is_finished()) {
            return;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            self.state.clone(),
            self.ticker.clone(),
            self.db.clone(),
            self.events.clone(),
            self.tick_interval,
            cancel_token.clone(),
        ));
        log_info!("Ticker started every {:?}", self.tick_interval);
        *guard = Some(Ticker {
            handle,
            cancel_token,
        });
    }
}

async fn tick_loop(
    state: Arc<Mutex<PlaybackState>>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    db: Database,
    events: broadcast::Sender<PlaybackEvent>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    // The first tick is due one full period after playback starts.
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let (_, status) = apply_command(&state, &db, &events, PlaybackState::tick).await;
                if status == PlaybackStatus::Running {
                    continue;
                }

                // Re-check under the slot lock: a command may have restarted
                // playback between our tick and now.
                let mut slot = ticker.lock().await;
                if state.lock().await.status() == PlaybackStatus::Running {
                    continue;
                }
                // An uncancelled token means the slot still holds this loop.
                if !cancel_token.is_cancelled() {
                    slot.take();
                }
                break;
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

/// Runs one command under the state lock, then persists and publishes while
/// still holding it so snapshots and events keep command order.
async fn apply_command<F>(
    state: &Mutex<PlaybackState>,
    db: &Database,
    events: &broadcast::Sender<PlaybackEvent>,
    command: F,
) -> (PlaybackView, PlaybackStatus)
where
    F: FnOnce(&mut PlaybackState, DateTime<Utc>),
{
    let mut guard = state.lock().await;
    let marker = Marker::of(&guard);
    let previous = guard.snapshot.clone();

    command(&mut *guard, Utc::now());

    if guard.snapshot != previous {
        persist(db, &guard.snapshot);
    }
    for event in detect(&marker, &guard) {
        // No subscribers is not an error.
        let _ = events.send(event);
    }

    (PlaybackView::from(&*guard), guard.status())
}

/// Storage failures are logged, never turned into a playback failure.
fn persist(db: &Database, snapshot: &PersistedSnapshot) {
    if let Err(err) = db.save_snapshot(snapshot) {
        log_error!("Failed to persist playback snapshot: {err:?}");
    }
}
