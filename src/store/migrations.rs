//! Versioned schema migrations.
//!
//! Migration files live under `schema/<dialect>/` and are embedded at
//! compile time. A file is named `<set>_<NNN>.sql`; the leading integer of
//! `NNN` is the version. Applied versions are recorded in `_migrations`.
//! Each file runs in its own transaction, so a failure leaves the
//! previously-applied set intact. Opening a database whose applied version
//! is newer than the binary knows fails with `CONFIG_INVALID`.

use std::collections::HashSet;

use rusqlite::Connection;
use rust_embed::RustEmbed;
use tracing::debug;

use crate::errors::{OrcError, OrcResult};
use crate::store::dialect::Dialect;

#[derive(RustEmbed)]
#[folder = "schema/"]
struct SchemaFiles;

/// Which migration family to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSet {
    Global,
    Project,
}

impl SchemaSet {
    fn prefix(&self) -> &'static str {
        match self {
            SchemaSet::Global => "global_",
            SchemaSet::Project => "project_",
        }
    }
}

struct Migration {
    version: i64,
    name: String,
    sql: String,
}

fn load_migrations(dialect: Dialect, set: SchemaSet) -> OrcResult<Vec<Migration>> {
    let dir = format!("{}/", dialect.schema_dir());
    let prefix = set.prefix();
    let mut migrations = Vec::new();

    for path in SchemaFiles::iter() {
        let Some(name) = path.strip_prefix(&dir) else {
            continue;
        };
        let Some(rest) = name.strip_prefix(prefix) else {
            continue;
        };
        let Some(stem) = rest.strip_suffix(".sql") else {
            continue;
        };
        let version: i64 = stem.parse().map_err(|_| {
            OrcError::config_invalid(format!("Migration file {path} has a non-numeric version"))
        })?;
        let file = SchemaFiles::get(&path).expect("iterated path must exist");
        let sql = String::from_utf8(file.data.into_owned()).map_err(|_| {
            OrcError::config_invalid(format!("Migration file {path} is not valid UTF-8"))
        })?;
        migrations.push(Migration {
            version,
            name: name.to_string(),
            sql,
        });
    }

    migrations.sort_by_key(|m| m.version);
    Ok(migrations)
}

/// Apply all pending migrations for the given set, in version order.
/// Idempotent: already-applied versions are skipped.
pub fn migrate(conn: &mut Connection, dialect: Dialect, set: SchemaSet) -> OrcResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;

    let migrations = load_migrations(dialect, set)?;
    let newest_known = migrations.last().map(|m| m.version).unwrap_or(0);

    let applied: HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM _migrations")?;
        let versions = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        versions.collect::<Result<_, _>>()?
    };

    if let Some(&newest_applied) = applied.iter().max()
        && newest_applied > newest_known
    {
        return Err(OrcError::config_invalid(format!(
            "Database schema version {newest_applied} is newer than this binary supports ({newest_known})"
        ))
        .with_why("The database was created by a newer orc release")
        .with_fix("Upgrade orc to open this project"));
    }

    for migration in migrations {
        if applied.contains(&migration.version) {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            OrcError::wrap(e, format!("Migration {} failed", migration.name))
        })?;
        tx.execute(
            &format!(
                "INSERT INTO _migrations (version, applied_at) VALUES (?, {})",
                Dialect::Sqlite.now_expr()
            ),
            [migration.version],
        )?;
        tx.commit()?;
        debug!(version = migration.version, name = %migration.name, "applied migration");
    }

    Ok(())
}
