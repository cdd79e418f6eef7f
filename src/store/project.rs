//! Per-project store: tasks, initiatives, event log, costs, id sequences.
//!
//! One store per project database. All access funnels through a single
//! connection behind a mutex; SQLite runs in WAL mode so external readers
//! (the hook script, observers) are never blocked by the writer.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use crate::cost::CostEntry;
use crate::errors::{ErrorCode, OrcError, OrcResult};
use crate::event::EventLogRow;
use crate::store::dialect::Dialect;
use crate::store::migrations::{self, SchemaSet};
use crate::task::{
    Category, Decision, ExecutionState, Initiative, InitiativeStatus, Priority, Queue, Task,
    TaskStatus, Weight,
};

/// Default bound applied to event queries that do not set a limit.
pub const DEFAULT_QUERY_LIMIT: usize = 500;

/// Filter for [`ProjectStore::query_events`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub task_id: Option<String>,
    pub event_types: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn since(mut self, t: DateTime<Utc>) -> Self {
        self.since = Some(t);
        self
    }

    pub fn until(mut self, t: DateTime<Utc>) -> Self {
        self.until = Some(t);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub struct ProjectStore {
    conn: Mutex<Connection>,
}

impl ProjectStore {
    /// Open (or create) the project database and apply pending migrations.
    pub fn open(path: &Path) -> OrcResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| OrcError::wrap(e, format!("Failed to open {}", path.display())))?;
        Self::init(conn)
    }

    /// In-memory store for tests.
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
        migrations::migrate(&mut conn, Dialect::Sqlite, SchemaSet::Project)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> OrcResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| OrcError::new(ErrorCode::Unknown, "Project store lock poisoned"))
    }

    // ── Tasks ────────────────────────────────────────────────────────

    /// Upsert a task. `updated_at` is bumped to now; the caller's copy is
    /// not mutated.
    pub fn save_task(&self, task: &Task) -> OrcResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, title, description, status, queue, priority, category,
                                weight, current_phase, execution_state, initiative_id,
                                blocked_by, related_to, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                status = excluded.status,
                queue = excluded.queue,
                priority = excluded.priority,
                category = excluded.category,
                weight = excluded.weight,
                current_phase = excluded.current_phase,
                execution_state = excluded.execution_state,
                initiative_id = excluded.initiative_id,
                blocked_by = excluded.blocked_by,
                related_to = excluded.related_to,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.queue.as_str(),
                task.priority.as_str(),
                task.category.as_str(),
                task.weight.as_str(),
                task.current_phase,
                to_json(&task.execution_state)?,
                task.initiative_id,
                to_json(&task.blocked_by)?,
                to_json(&task.related_to)?,
                to_json(&task.metadata)?,
                ts(task.created_at),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn load_task(&self, id: &str) -> OrcResult<Task> {
        let conn = self.lock()?;
        let row = Self::query_task_row(&conn, id)?.ok_or_else(|| OrcError::task_not_found(id))?;
        let mut task = row.into_task()?;
        let existing = Self::task_id_set(&conn)?;
        task.normalize(&existing);
        Ok(task)
    }

    /// All tasks, references pruned against the live id set.
    pub fn load_all_tasks(&self) -> OrcResult<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"))?;
        let rows = stmt.query_map([], TaskRow::from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        let existing: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
        for task in &mut tasks {
            task.normalize(&existing);
        }
        Ok(tasks)
    }

    pub fn task_exists(&self, id: &str) -> OrcResult<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM tasks WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete_task(&self, id: &str) -> OrcResult<bool> {
        let conn = self.lock()?;
        let count = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(count > 0)
    }

    /// Allocate the next `TASK-NNN` id. Monotone per project even across
    /// deletes; runs under a transaction.
    pub fn next_task_id(&self) -> OrcResult<String> {
        self.next_id("task", "tasks", "TASK")
    }

    /// Allocate the next `INIT-NNN` id.
    pub fn next_initiative_id(&self) -> OrcResult<String> {
        self.next_id("initiative", "initiatives", "INIT")
    }

    fn next_id(&self, sequence: &str, table: &str, prefix: &str) -> OrcResult<String> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT value FROM sequences WHERE name = ?1",
                [sequence],
                |row| row.get(0),
            )
            .optional()?;
        let current = match current {
            Some(value) => value,
            None => {
                // First allocation: seed from the highest id already in the
                // table so legacy databases keep their numbering.
                let seed = Self::max_id_suffix(&tx, table, prefix)?;
                tx.execute(
                    "INSERT INTO sequences (name, value) VALUES (?1, ?2)",
                    params![sequence, seed],
                )?;
                seed
            }
        };
        let next = current + 1;
        tx.execute(
            "UPDATE sequences SET value = ?2 WHERE name = ?1",
            params![sequence, next],
        )?;
        tx.commit()?;
        Ok(format!("{prefix}-{next:03}"))
    }

    fn max_id_suffix(conn: &Connection, table: &str, prefix: &str) -> OrcResult<i64> {
        let mut stmt = conn.prepare(&format!("SELECT id FROM {table}"))?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut max = 0i64;
        for id in ids {
            let id = id?;
            if let Some(n) = id
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('-'))
                .and_then(|n| n.parse::<i64>().ok())
            {
                max = max.max(n);
            }
        }
        Ok(max)
    }

    fn query_task_row(conn: &Connection, id: &str) -> OrcResult<Option<TaskRow>> {
        let mut stmt =
            conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
        Ok(stmt.query_row([id], TaskRow::from_row).optional()?)
    }

    fn task_id_set(conn: &Connection) -> OrcResult<HashSet<String>> {
        let mut stmt = conn.prepare("SELECT id FROM tasks")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for id in ids {
            set.insert(id?);
        }
        Ok(set)
    }

    // ── Initiatives ──────────────────────────────────────────────────

    pub fn save_initiative(&self, initiative: &Initiative) -> OrcResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO initiatives (id, title, vision, status, decisions, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                vision = excluded.vision,
                status = excluded.status,
                decisions = excluded.decisions,
                updated_at = excluded.updated_at",
            params![
                initiative.id,
                initiative.title,
                initiative.vision,
                initiative.status.as_str(),
                to_json(&initiative.decisions)?,
                ts(initiative.created_at),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn load_initiative(&self, id: &str) -> OrcResult<Option<Initiative>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, vision, status, decisions, created_at, updated_at
             FROM initiatives WHERE id = ?1",
        )?;
        let row = stmt.query_row([id], InitiativeRow::from_row).optional()?;
        row.map(InitiativeRow::into_initiative).transpose()
    }

    pub fn load_all_initiatives(&self) -> OrcResult<Vec<Initiative>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, vision, status, decisions, created_at, updated_at
             FROM initiatives ORDER BY id",
        )?;
        let rows = stmt.query_map([], InitiativeRow::from_row)?;
        let mut initiatives = Vec::new();
        for row in rows {
            initiatives.push(row?.into_initiative()?);
        }
        Ok(initiatives)
    }

    // ── Event log ────────────────────────────────────────────────────

    /// Insert one event row. Returns `false` when the dedup key already
    /// exists. Fails with `TASK_NOT_FOUND` when the task row is missing.
    pub fn save_event(&self, row: &EventLogRow) -> OrcResult<bool> {
        let conn = self.lock()?;
        let inserted = Self::insert_event(&conn, row)?;
        Ok(inserted)
    }

    /// Batch insert. Duplicates are silently ignored; rows whose task is
    /// unknown are dropped with a warning (never queued). Returns the
    /// number of rows actually inserted.
    pub fn save_events(&self, rows: &[EventLogRow]) -> OrcResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for row in rows {
            match Self::insert_event(&tx, row) {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) if e.is(ErrorCode::TaskNotFound) => {
                    warn!(
                        task_id = %row.task_id,
                        event_type = %row.event_type,
                        "dropping event for unknown task"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_event(conn: &Connection, row: &EventLogRow) -> OrcResult<bool> {
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO event_log
                    (task_id, phase, iteration, event_type, data, source, created_at, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.task_id,
                    row.phase,
                    row.iteration,
                    row.event_type,
                    row.data,
                    row.source,
                    ts(row.created_at),
                    row.duration_ms,
                ],
            )
            .map_err(|e| map_constraint_to_task_not_found(&row.task_id, e))?;
        Ok(changed > 0)
    }

    /// Query the event log, `created_at` descending, bounded by
    /// [`DEFAULT_QUERY_LIMIT`] unless the filter narrows it.
    pub fn query_events(&self, filter: &EventFilter) -> OrcResult<Vec<EventLogRow>> {
        let conn = self.lock()?;
        let mut sql = String::from(
            "SELECT id, task_id, phase, iteration, event_type, data, source, created_at, duration_ms
             FROM event_log",
        );
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(task_id) = &filter.task_id {
            args.push(task_id.clone());
            clauses.push(format!("task_id = ?{}", args.len()));
        }
        if !filter.event_types.is_empty() {
            let start = args.len() + 1;
            for event_type in &filter.event_types {
                args.push(event_type.clone());
            }
            let placeholders: Vec<String> = (0..filter.event_types.len())
                .map(|i| format!("?{}", start + i))
                .collect();
            clauses.push(format!("event_type IN ({})", placeholders.join(", ")));
        }
        if let Some(since) = filter.since {
            args.push(ts(since));
            clauses.push(format!("created_at >= ?{}", args.len()));
        }
        if let Some(until) = filter.until {
            args.push(ts(until));
            clauses.push(format!("created_at <= ?{}", args.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        sql.push_str(&format!(" LIMIT {limit}"));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), event_row_from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    // ── Costs ────────────────────────────────────────────────────────

    /// Record per-phase cost telemetry. The task row must exist.
    pub fn record_cost(&self, entry: &CostEntry) -> OrcResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO costs (task_id, phase, model, iteration, cost_usd, input_tokens,
                                output_tokens, cache_creation_tokens, cache_read_tokens,
                                duration_ms, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
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
        )
        .map_err(|e| map_constraint_to_task_not_found(&entry.task_id, e))?;
        Ok(())
    }

    /// All cost entries for a task, oldest first.
    pub fn task_costs(&self, task_id: &str) -> OrcResult<Vec<CostEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, phase, model, iteration, cost_usd, input_tokens, output_tokens,
                    cache_creation_tokens, cache_read_tokens, duration_ms, timestamp
             FROM costs WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([task_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (task_id, phase, model, iteration, cost_usd, input, output, cache_creation,
                cache_read, duration_ms, timestamp) = row?;
            entries.push(CostEntry {
                project_id: String::new(),
                task_id,
                phase,
                model,
                iteration: iteration as u32,
                cost_usd,
                input_tokens: input as u64,
                output_tokens: output as u64,
                cache_creation_tokens: cache_creation as u64,
                cache_read_tokens: cache_read as u64,
                duration_ms: duration_ms as u64,
                timestamp: parse_ts(&timestamp)?,
            });
        }
        Ok(entries)
    }
}

// ── Row conversion ────────────────────────────────────────────────────

const TASK_COLUMNS: &str = "id, title, description, status, queue, priority, category, weight,
    current_phase, execution_state, initiative_id, blocked_by, related_to, metadata,
    created_at, updated_at";

struct TaskRow {
    id: String,
    title: String,
    description: String,
    status: String,
    queue: String,
    priority: String,
    category: String,
    weight: String,
    current_phase: Option<String>,
    execution_state: String,
    initiative_id: Option<String>,
    blocked_by: String,
    related_to: String,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            queue: row.get(4)?,
            priority: row.get(5)?,
            category: row.get(6)?,
            weight: row.get(7)?,
            current_phase: row.get(8)?,
            execution_state: row.get(9)?,
            initiative_id: row.get(10)?,
            blocked_by: row.get(11)?,
            related_to: row.get(12)?,
            metadata: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_task(self) -> OrcResult<Task> {
        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status: TaskStatus::from_str(&self.status).map_err(OrcError::config_invalid)?,
            queue: Queue::from_str(&self.queue).map_err(OrcError::config_invalid)?,
            priority: Priority::from_str(&self.priority).map_err(OrcError::config_invalid)?,
            category: Category::from_str(&self.category).map_err(OrcError::config_invalid)?,
            weight: Weight::from_str(&self.weight).map_err(OrcError::config_invalid)?,
            current_phase: self.current_phase,
            execution_state: from_json::<ExecutionState>(&self.execution_state)?,
            initiative_id: self.initiative_id,
            blocked_by: from_json(&self.blocked_by)?,
            related_to: from_json(&self.related_to)?,
            metadata: from_json(&self.metadata)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct InitiativeRow {
    id: String,
    title: String,
    vision: String,
    status: String,
    decisions: String,
    created_at: String,
    updated_at: String,
}

impl InitiativeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            vision: row.get(2)?,
            status: row.get(3)?,
            decisions: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_initiative(self) -> OrcResult<Initiative> {
        Ok(Initiative {
            id: self.id,
            title: self.title,
            vision: self.vision,
            status: InitiativeStatus::from_str(&self.status).map_err(OrcError::config_invalid)?,
            decisions: from_json::<Vec<Decision>>(&self.decisions)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn event_row_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventLogRow> {
    let created_at: String = row.get(7)?;
    Ok(EventLogRow {
        id: Some(row.get(0)?),
        task_id: row.get(1)?,
        phase: row.get(2)?,
        iteration: row.get(3)?,
        event_type: row.get(4)?,
        data: row.get(5)?,
        source: row.get(6)?,
        created_at: parse_ts(&created_at).unwrap_or_default(),
        duration_ms: row.get(8)?,
    })
}

// ── Helpers ───────────────────────────────────────────────────────────

/// RFC 3339 with fixed millisecond precision: lexical order equals
/// chronological order, which the DESC index relies on.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(s: &str) -> OrcResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| OrcError::wrap(e, format!("Invalid timestamp in store: {s}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> OrcResult<String> {
    serde_json::to_string(value).map_err(|e| OrcError::wrap(e, "Failed to serialize column"))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> OrcResult<T> {
    serde_json::from_str(s).map_err(|e| OrcError::wrap(e, "Failed to parse stored JSON column"))
}

/// `INSERT OR IGNORE` swallows dedup conflicts, so a surviving constraint
/// violation on the event tables means the referenced task row is missing.
fn map_constraint_to_task_not_found(task_id: &str, err: rusqlite::Error) -> OrcError {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err
        && ffi_err.code == rusqlite::ErrorCode::ConstraintViolation
    {
        return OrcError::task_not_found(task_id).with_cause(err);
    }
    err.into()
}
