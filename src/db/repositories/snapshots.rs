use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::connection::Database;
use crate::playback::PersistedSnapshot;

/// Upserts the single snapshot row. Last writer wins.
pub(crate) fn write_snapshot(conn: &Connection, payload: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO playback_snapshot (slot, payload, updated_at)
         VALUES (0, ?1, ?2)
         ON CONFLICT(slot) DO UPDATE SET
             payload = excluded.payload,
             updated_at = excluded.updated_at",
        params![payload, Utc::now().to_rfc3339()],
    )
    .context("failed to write playback snapshot")?;
    Ok(())
}

impl Database {
    /// Queues the snapshot for writing and returns without waiting for disk.
    ///
    /// A write still queued when a newer snapshot arrives is dropped, and
    /// write failures are logged by the storage thread. Reads issued after
    /// this call always see this snapshot or a newer one.
    pub fn save_snapshot(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let payload =
            serde_json::to_string(snapshot).context("failed to serialize playback snapshot")?;
        self.submit_snapshot(payload)
    }

    /// Raw JSON as stored; parsing is left to startup recovery so that a
    /// corrupt payload degrades to idle instead of failing the caller.
    pub async fn load_snapshot_payload(&self) -> Result<Option<String>> {
        self.execute(|conn| {
            conn.query_row(
                "SELECT payload FROM playback_snapshot WHERE slot = 0",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to read playback snapshot")
        })
        .await
    }

    pub async fn clear_snapshot(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM playback_snapshot", [])
                .context("failed to clear playback snapshot")?;
            Ok(())
        })
        .await
    }
}
