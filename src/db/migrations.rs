use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Schema scripts in order. Applying entry `n` takes a database to
/// `user_version = n + 1`.
const MIGRATIONS: &[&str] = &[include_str!("schemas/schema_v1.sql")];

fn schema_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    usize::try_from(version).with_context(|| format!("invalid schema version {version}"))
}

/// Brings the schema up to date in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let target = MIGRATIONS.len();
    let current = schema_version(conn)?;

    if current > target {
        bail!("database schema v{current} is newer than this build supports (v{target})");
    }
    if current == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (index, script) in MIGRATIONS.iter().enumerate().skip(current) {
        tx.execute_batch(script)
            .with_context(|| format!("schema migration to v{} failed", index + 1))?;
    }
    tx.pragma_update(None, "user_version", target as i64)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit schema migrations")?;

    info!("Database schema migrated from v{current} to v{target}");
    Ok(())
}
