use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema scripts in order; entry `n` brings the store to version `n + 1`.
const SCHEMA_SCRIPTS: [(&str, &str); 2] = [
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
];

pub const CURRENT_SCHEMA_VERSION: i32 = SCHEMA_SCRIPTS.len() as i32;

pub fn schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")
}

/// Brings a read-write store up to [`CURRENT_SCHEMA_VERSION`] in one
/// transaction. A store written by a newer build is refused.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version = schema_version(conn)?;
    if version > CURRENT_SCHEMA_VERSION {
        bail!("store schema {version} is newer than this build understands ({CURRENT_SCHEMA_VERSION})");
    }

    let pending = &SCHEMA_SCRIPTS[version.max(0) as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to begin schema upgrade")?;
    for (name, script) in pending {
        tx.execute_batch(script)
            .with_context(|| format!("failed to apply {name}"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to record schema version")?;
    tx.commit().context("failed to commit schema upgrade")?;
    Ok(())
}

/// Read-only handles never migrate; they only accept a schema the primary
/// process has already brought up to date.
pub fn ensure_current_schema(conn: &Connection) -> Result<()> {
    let version = schema_version(conn)?;
    if version != CURRENT_SCHEMA_VERSION {
        bail!("store schema {version} does not match supported schema {CURRENT_SCHEMA_VERSION}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_fresh_database_to_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        // Second run is a no-op.
        run_migrations(&mut conn).unwrap();
        ensure_current_schema(&conn).unwrap();

        let column_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('tasks') WHERE name = 'completed_at'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(column_count, 1);
    }

    #[test]
    fn refuses_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
        assert!(ensure_current_schema(&conn).is_err());
    }
}
