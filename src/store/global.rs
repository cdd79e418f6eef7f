//! Global registry store: projects, cross-project costs, budgets.
//!
//! Lives at `<home>/.orc/orc.db`. The contract is dialect-aware (see
//! [`crate::store::dialect`]); the shipped driver is SQLite, with the
//! PostgreSQL schema kept in lockstep under `schema/postgres/`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::cost::{Budget, CostEntry, CostSummary};
use crate::errors::{ErrorCode, OrcError, OrcResult};
use crate::store::dialect::Dialect;
use crate::store::migrations::{self, SchemaSet};
use crate::store::project::{parse_ts, ts};

/// Registry entry for one orc project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

pub struct GlobalStore {
    conn: Mutex<Connection>,
}

impl GlobalStore {
    pub fn open(path: &Path) -> OrcResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| OrcError::wrap(e, format!("Failed to open {}", path.display())))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> OrcResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OrcError::wrap(e, "Failed to open in-memory database"))?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> OrcResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )?;
        migrations::migrate(&mut conn, Dialect::Sqlite, SchemaSet::Global)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> OrcResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| OrcError::new(ErrorCode::Unknown, "Global store lock poisoned"))
    }

    // ── Project registry ─────────────────────────────────────────────

    pub fn register_project(&self, record: &ProjectRecord) -> OrcResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (id, name, path, language, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                path = excluded.path,
                language = excluded.language",
            params![
                record.id,
                record.name,
                record.path,
                record.language,
                ts(record.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> OrcResult<Option<ProjectRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, path, language, created_at FROM projects WHERE id = ?1",
        )?;
        let row = stmt
            .query_row([id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()?;
        row.map(|(id, name, path, language, created_at)| {
            Ok(ProjectRecord {
                id,
                name,
                path,
                language,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    pub fn list_projects(&self) -> OrcResult<Vec<ProjectRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, path, language, created_at FROM projects ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut projects = Vec::new();
        for row in rows {
            let (id, name, path, language, created_at) = row?;
            projects.push(ProjectRecord {
                id,
                name,
                path,
                language,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(projects)
    }

    // ── Costs ────────────────────────────────────────────────────────

    /// Record a cost entry against its project and fold the spend into the
    /// project's budget for the entry's month.
    pub fn record_cost(&self, entry: &CostEntry) -> OrcResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO costs (project_id, task_id, phase, model, iteration, cost_usd,
                                input_tokens, output_tokens, cache_creation_tokens,
                                cache_read_tokens, duration_ms, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.project_id,
                entry.task_id,
                entry.phase,
                entry.model,
                entry.iteration,
                entry.cost_usd,
                entry.input_tokens as i64,
                entry.output_tokens as i64,
                entry.cache_creation_tokens as i64,
                entry.cache_read_tokens as i64,
                entry.duration_ms as i64,
                ts(entry.timestamp),
            ],
        )?;

        let month = entry.month();
        let existing: Option<(String, f64)> = tx
            .query_row(
                "SELECT current_month, current_month_spent FROM budgets WHERE project_id = ?1",
                [&entry.project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((current_month, spent)) = existing {
            let spent = if current_month == month { spent } else { 0.0 };
            tx.execute(
                "UPDATE budgets SET current_month = ?2, current_month_spent = ?3
                 WHERE project_id = ?1",
                params![entry.project_id, month, spent + entry.cost_usd],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Aggregate costs for a project within a YYYY-MM month.
    pub fn month_costs(&self, project_id: &str, month: &str) -> OrcResult<CostSummary> {
        let conn = self.lock()?;
        let like = format!("{month}-%");
        let summary = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(cost_usd), 0),
                    COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0)
             FROM costs WHERE project_id = ?1 AND timestamp LIKE ?2",
            params![project_id, like],
            |row| {
                Ok(CostSummary {
                    entries: row.get::<_, i64>(0)? as u64,
                    cost_usd: row.get(1)?,
                    input_tokens: row.get::<_, i64>(2)? as u64,
                    output_tokens: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(summary)
    }

    // ── Budgets ──────────────────────────────────────────────────────

    pub fn set_budget(&self, budget: &Budget) -> OrcResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO budgets (project_id, monthly_limit_usd, alert_threshold_percent,
                                  current_month, current_month_spent)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project_id) DO UPDATE SET
                monthly_limit_usd = excluded.monthly_limit_usd,
                alert_threshold_percent = excluded.alert_threshold_percent,
                current_month = excluded.current_month,
                current_month_spent = excluded.current_month_spent",
            params![
                budget.project_id,
                budget.monthly_limit_usd,
                budget.alert_threshold_percent,
                budget.current_month,
                budget.current_month_spent,
            ],
        )?;
        Ok(())
    }

    pub fn get_budget(&self, project_id: &str) -> OrcResult<Option<Budget>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, monthly_limit_usd, alert_threshold_percent,
                    current_month, current_month_spent
             FROM budgets WHERE project_id = ?1",
        )?;
        let budget = stmt
            .query_row([project_id], |row| {
                Ok(Budget {
                    project_id: row.get(0)?,
                    monthly_limit_usd: row.get(1)?,
                    alert_threshold_percent: row.get::<_, i64>(2)? as u8,
                    current_month: row.get(3)?,
                    current_month_spent: row.get(4)?,
                })
            })
            .optional()?;
        Ok(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> GlobalStore {
        GlobalStore::open_in_memory().unwrap()
    }

    fn project(store: &GlobalStore, id: &str) -> ProjectRecord {
        let record = ProjectRecord {
            id: id.into(),
            name: id.into(),
            path: format!("/work/{id}"),
            language: "rust".into(),
            created_at: Utc::now(),
        };
        store.register_project(&record).unwrap();
        record
    }

    fn cost(project_id: &str, usd: f64, at: DateTime<Utc>) -> CostEntry {
        CostEntry {
            project_id: project_id.into(),
            task_id: "TASK-001".into(),
            phase: "implement".into(),
            model: "sonnet".into(),
            iteration: 1,
            cost_usd: usd,
            input_tokens: 1000,
            output_tokens: 400,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            duration_ms: 9000,
            timestamp: at,
        }
    }

    #[test]
    fn register_and_list_projects() {
        let store = store();
        project(&store, "alpha");
        project(&store, "beta");

        let all = store.list_projects().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "alpha");
        assert!(store.get_project("beta").unwrap().is_some());
        assert!(store.get_project("gamma").unwrap().is_none());
    }

    #[test]
    fn register_is_an_upsert() {
        let store = store();
        let mut record = project(&store, "alpha");
        record.path = "/moved/alpha".into();
        store.register_project(&record).unwrap();

        let loaded = store.get_project("alpha").unwrap().unwrap();
        assert_eq!(loaded.path, "/moved/alpha");
        assert_eq!(store.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn month_costs_aggregate_within_the_month() {
        let store = store();
        project(&store, "alpha");
        let march = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap();
        store.record_cost(&cost("alpha", 0.50, march)).unwrap();
        store.record_cost(&cost("alpha", 0.25, march)).unwrap();
        store.record_cost(&cost("alpha", 9.99, april)).unwrap();

        let summary = store.month_costs("alpha", "2024-03").unwrap();
        assert_eq!(summary.entries, 2);
        assert!((summary.cost_usd - 0.75).abs() < 1e-9);
        assert_eq!(summary.input_tokens, 2000);
    }

    #[test]
    fn budget_round_trip_and_spend_rollover() {
        let store = store();
        project(&store, "alpha");
        let mut budget = Budget::new("alpha", 50.0);
        budget.current_month = "2024-03".into();
        store.set_budget(&budget).unwrap();

        let march = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        store.record_cost(&cost("alpha", 10.0, march)).unwrap();
        let loaded = store.get_budget("alpha").unwrap().unwrap();
        assert_eq!(loaded.current_month, "2024-03");
        assert!((loaded.current_month_spent - 10.0).abs() < 1e-9);

        // New month: spend counter resets before adding.
        let april = Utc.with_ymd_and_hms(2024, 4, 2, 8, 0, 0).unwrap();
        store.record_cost(&cost("alpha", 3.0, april)).unwrap();
        let loaded = store.get_budget("alpha").unwrap().unwrap();
        assert_eq!(loaded.current_month, "2024-04");
        assert!((loaded.current_month_spent - 3.0).abs() < 1e-9);
    }

    #[test]
    fn budget_absent_is_none() {
        let store = store();
        assert!(store.get_budget("nope").unwrap().is_none());
    }
}
