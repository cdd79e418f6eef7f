//! Pre-tool-use hook protocol.
//!
//! The external hook script feeds one JSON object on stdin
//! (`{"tool_name": ..., "tool_input": {"file_path": ...}}`) and expects
//! either empty stdout (allow) or `{"decision": "block", "reason": ...}`.
//! The hook finds its context through `ORC_TASK_ID` and `ORC_DB_PATH`.
//!
//! The policy is deliberately fail-open: a missing environment variable,
//! an unreadable database, or an unknown task all allow the write. The
//! orchestrator being absent must never wedge the assistant.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::policy::{block_reason, is_test_file};

pub const ENV_TASK_ID: &str = "ORC_TASK_ID";
pub const ENV_DB_PATH: &str = "ORC_DB_PATH";

/// Phase during which the test-file-only rule applies.
pub const TDD_WRITE_PHASE: &str = "tdd_write";

/// Tools whose file writes are subject to classification. Everything else
/// (`Read`, `Bash`, ...) always allows.
pub const GUARDED_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit"];

#[derive(Debug, Clone, Deserialize)]
pub struct HookInput {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: ToolInput,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolInput {
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlockDecision {
    pub decision: &'static str,
    pub reason: String,
}

impl BlockDecision {
    fn new(reason: String) -> Self {
        Self {
            decision: "block",
            reason,
        }
    }
}

/// Evaluate a hook input against the task's current phase.
///
/// Returns `None` to allow, `Some` with the block decision otherwise.
pub fn evaluate(
    input: &HookInput,
    task_id: Option<&str>,
    db_path: Option<&Path>,
) -> Option<BlockDecision> {
    // No orchestrator context: fail open.
    let (task_id, db_path) = match (task_id, db_path) {
        (Some(t), Some(p)) if !t.is_empty() => (t, p),
        _ => return None,
    };

    if !GUARDED_TOOLS.contains(&input.tool_name.as_str()) {
        return None;
    }
    let file_path = input.tool_input.file_path.as_deref()?;

    // Database unreadable or task unknown: fail open.
    let phase = match current_phase(db_path, task_id) {
        Ok(Some(phase)) => phase,
        _ => return None,
    };

    if phase == TDD_WRITE_PHASE && !is_test_file(file_path) {
        return Some(BlockDecision::new(block_reason(file_path)));
    }
    None
}

/// Full hook entry: parse stdin JSON, read the env context, produce the
/// stdout payload. Empty string means allow. Never errors — every failure
/// mode allows.
pub fn process(stdin_json: &str) -> String {
    let Ok(input) = serde_json::from_str::<HookInput>(stdin_json) else {
        return String::new();
    };
    let task_id = std::env::var(ENV_TASK_ID).ok();
    let db_path = std::env::var(ENV_DB_PATH).ok();
    match evaluate(
        &input,
        task_id.as_deref(),
        db_path.as_deref().map(Path::new),
    ) {
        Some(decision) => serde_json::to_string(&decision).unwrap_or_default(),
        None => String::new(),
    }
}

/// Read the task's current phase straight from the project database,
/// read-only so the hook never takes the write lock.
fn current_phase(db_path: &Path, task_id: &str) -> rusqlite::Result<Option<String>> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.query_row(
        "SELECT current_phase FROM tasks WHERE id = ?1",
        [task_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(Option::flatten)
}
