use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{connection::Database, helpers::parse_datetime};
use crate::models::{Segment, TimerDefinition};

/// A definition together with its bookkeeping timestamps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDefinition {
    pub definition: TimerDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_segment(row: &Row) -> rusqlite::Result<Segment> {
    Ok(Segment {
        id: row.get("segment_id")?,
        exercise_seconds: row.get("exercise_seconds")?,
        rest_seconds: row.get("rest_seconds")?,
        set_rest_seconds: row.get("set_rest_seconds")?,
        laps: row.get("laps")?,
    })
}

fn load_segments(conn: &Connection, timer_id: &str) -> Result<Vec<Segment>> {
    let mut stmt = conn.prepare(
        "SELECT segment_id, exercise_seconds, rest_seconds, set_rest_seconds, laps
         FROM timer_segments
         WHERE timer_id = ?1
         ORDER BY position ASC",
    )?;
    let segments = stmt
        .query_map(params![timer_id], row_to_segment)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to load segments for timer {timer_id}"))?;
    Ok(segments)
}

fn load_definition(conn: &Connection, timer_id: &str) -> Result<Option<StoredDefinition>> {
    let header = conn
        .query_row(
            "SELECT id, name, lead_in_seconds, workout_laps, created_at, updated_at
             FROM timer_definitions
             WHERE id = ?1",
            params![timer_id],
            |row| {
                Ok((
                    row.get::<_, String>("id")?,
                    row.get::<_, String>("name")?,
                    row.get::<_, Option<i64>>("lead_in_seconds")?,
                    row.get::<_, i64>("workout_laps")?,
                    row.get::<_, String>("created_at")?,
                    row.get::<_, String>("updated_at")?,
                ))
            },
        )
        .optional()
        .context("failed to query timer definition")?;

    let Some((id, name, lead_in_seconds, workout_laps, created_at, updated_at)) = header else {
        return Ok(None);
    };

    let segments = load_segments(conn, &id)?;
    Ok(Some(StoredDefinition {
        definition: TimerDefinition {
            id,
            name,
            lead_in_seconds,
            workout_laps,
            segments,
        },
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    }))
}

impl Database {
    /// Inserts or replaces a definition and its segments atomically.
    pub async fn upsert_definition(&self, definition: &TimerDefinition) -> Result<()> {
        let record = definition.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO timer_definitions (id, name, lead_in_seconds, workout_laps, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     lead_in_seconds = excluded.lead_in_seconds,
                     workout_laps = excluded.workout_laps,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.name,
                    record.lead_in_seconds,
                    record.workout_laps,
                    now,
                ],
            )
            .context("failed to upsert timer definition")?;

            tx.execute(
                "DELETE FROM timer_segments WHERE timer_id = ?1",
                params![record.id],
            )?;
            for (position, segment) in record.segments.iter().enumerate() {
                tx.execute(
                    "INSERT INTO timer_segments
                         (timer_id, position, segment_id, exercise_seconds, rest_seconds, set_rest_seconds, laps)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.id,
                        position as i64,
                        segment.id,
                        segment.exercise_seconds,
                        segment.rest_seconds,
                        segment.set_rest_seconds,
                        segment.laps,
                    ],
                )
                .with_context(|| format!("failed to insert segment {position}"))?;
            }

            tx.commit().context("failed to commit timer definition")?;
            Ok(())
        })
        .await
    }

    pub async fn get_definition(&self, timer_id: &str) -> Result<Option<TimerDefinition>> {
        let timer_id = timer_id.to_string();
        self.execute(move |conn| {
            Ok(load_definition(conn, &timer_id)?.map(|stored| stored.definition))
        })
        .await
    }

    /// All definitions, most recently edited first.
    pub async fn list_definitions(&self) -> Result<Vec<StoredDefinition>> {
        self.execute(|conn| {
            let ids = {
                let mut stmt =
                    conn.prepare("SELECT id FROM timer_definitions ORDER BY updated_at DESC, name ASC")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut definitions = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(stored) = load_definition(conn, &id)? {
                    definitions.push(stored);
                }
            }
            Ok(definitions)
        })
        .await
    }
}
