use std::{
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Receiver, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;
use super::repositories::snapshots::write_snapshot;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Work for the storage thread. Playback writes a snapshot on every tick, so
/// snapshots travel as plain payloads the thread can collapse instead of as
/// opaque jobs.
enum Request {
    Query(Job),
    Snapshot(String),
    Close,
}

/// The newest snapshot payload not yet on disk.
#[derive(Default)]
struct PendingSnapshot {
    payload: Option<String>,
    superseded: usize,
}

impl PendingSnapshot {
    fn replace(&mut self, payload: String) {
        if self.payload.replace(payload).is_some() {
            self.superseded += 1;
        }
    }

    fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    fn flush(&mut self, conn: &Connection) {
        let Some(payload) = self.payload.take() else {
            return;
        };
        if let Err(err) = write_snapshot(conn, &payload) {
            error!("Failed to write playback snapshot: {err:?}");
        }
        if self.superseded > 0 {
            debug!("Skipped {} superseded snapshot writes", self.superseded);
            self.superseded = 0;
        }
    }
}

struct Worker {
    requests: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        // The thread writes any pending snapshot before it exits.
        if self.requests.send(Request::Close).is_err() {
            warn!("Database thread already stopped");
        }
        if let Err(err) = handle.join() {
            error!("Failed to join database thread: {err:?}");
        }
    }
}

/// Handle to the SQLite connection owned by a dedicated storage thread.
///
/// Cloning is cheap; every clone feeds the same thread, so requests are
/// applied in submission order. Snapshot writes are the one exception to
/// "one request, one statement": while a backlog builds up only the newest
/// queued snapshot is written, and it always lands before any later query.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let conn = open_connection(&db_path)?;
        let (requests, inbox) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("tabata-db".into())
            .spawn(move || serve(conn, inbox))
            .context("failed to spawn database thread")?;

        info!("Database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                requests,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Runs `task` on the storage thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(Request::Query(Box::new(move |conn: &mut Connection| {
            // The caller may have given up waiting.
            let _ = reply_tx.send(task(conn));
        })))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread dropped the request"))?
    }

    /// Hands a serialized snapshot to the storage thread without waiting.
    pub(crate) fn submit_snapshot(&self, payload: String) -> Result<()> {
        self.send(Request::Snapshot(payload))
    }

    fn send(&self, request: Request) -> Result<()> {
        self.worker
            .requests
            .send(request)
            .map_err(|_| anyhow!("database thread is not running"))
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    if let Err(err) =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
    {
        warn!("Failed to enable WAL journal: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, inbox: Receiver<Request>) {
    let mut pending = PendingSnapshot::default();

    loop {
        // Block only once nothing is waiting to be flushed.
        let request = if pending.is_empty() {
            match inbox.recv() {
                Ok(request) => request,
                Err(_) => break,
            }
        } else {
            match inbox.try_recv() {
                Ok(request) => request,
                Err(TryRecvError::Empty) => {
                    pending.flush(&conn);
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
            }
        };

        match request {
            Request::Snapshot(payload) => pending.replace(payload),
            Request::Query(job) => {
                pending.flush(&conn);
                job(&mut conn);
            }
            Request::Close => break,
        }
    }

    pending.flush(&conn);
    info!("Database thread shutting down");
}
