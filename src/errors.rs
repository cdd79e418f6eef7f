//! Structured error model for the orc core.
//!
//! Every failure surfaced by the core carries:
//! - a stable `ErrorCode` (identity: two errors match if their codes match)
//! - `what` — a single-sentence description
//! - `why` — the underlying cause in user terms
//! - `fix` — actionable remediation
//! - `docs_url` — canonical documentation link
//! - an optional wrapped `cause`
//!
//! A fixed code → category mapping yields an HTTP status for any RPC
//! surface that needs one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes. The serialized form is the wire-visible identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TaskNotFound,
    TaskInvalidState,
    TaskRunning,
    ClaudeUnavailable,
    ClaudeTimeout,
    PhaseStuck,
    MaxRetriesExceeded,
    GitDirty,
    GitBranchExists,
    ConfigInvalid,
    ConfigMissing,
    OrcNotInitialized,
    OrcAlreadyInitialized,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TaskNotFound => "TASK_NOT_FOUND",
            ErrorCode::TaskInvalidState => "TASK_INVALID_STATE",
            ErrorCode::TaskRunning => "TASK_RUNNING",
            ErrorCode::ClaudeUnavailable => "CLAUDE_UNAVAILABLE",
            ErrorCode::ClaudeTimeout => "CLAUDE_TIMEOUT",
            ErrorCode::PhaseStuck => "PHASE_STUCK",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::GitDirty => "GIT_DIRTY",
            ErrorCode::GitBranchExists => "GIT_BRANCH_EXISTS",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConfigMissing => "CONFIG_MISSING",
            ErrorCode::OrcNotInitialized => "ORC_NOT_INITIALIZED",
            ErrorCode::OrcAlreadyInitialized => "ORC_ALREADY_INITIALIZED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Fixed mapping into the HTTP-status category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::TaskNotFound => ErrorCategory::NotFound,
            ErrorCode::TaskInvalidState | ErrorCode::TaskRunning => ErrorCategory::Conflict,
            ErrorCode::ClaudeUnavailable => ErrorCategory::Unavailable,
            ErrorCode::ClaudeTimeout | ErrorCode::PhaseStuck => ErrorCategory::Timeout,
            ErrorCode::MaxRetriesExceeded => ErrorCategory::Internal,
            ErrorCode::GitDirty | ErrorCode::GitBranchExists => ErrorCategory::Conflict,
            ErrorCode::ConfigInvalid | ErrorCode::ConfigMissing => ErrorCategory::BadRequest,
            ErrorCode::OrcNotInitialized => ErrorCategory::BadRequest,
            ErrorCode::OrcAlreadyInitialized => ErrorCategory::Conflict,
            ErrorCode::Unknown => ErrorCategory::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP-status category for surfacing errors over an RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    BadRequest,
    Conflict,
    Timeout,
    Unavailable,
    Internal,
}

impl ErrorCategory {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::NotFound => 404,
            ErrorCategory::BadRequest => 400,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Timeout => 408,
            ErrorCategory::Unavailable => 503,
            ErrorCategory::Internal => 500,
        }
    }
}

/// The error type produced everywhere in the core.
#[derive(Debug, Error)]
#[error("{what}")]
pub struct OrcError {
    pub code: ErrorCode,
    pub what: String,
    pub why: Option<String>,
    pub fix: Option<String>,
    pub docs_url: Option<String>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type OrcResult<T> = Result<T, OrcError>;

impl OrcError {
    pub fn new(code: ErrorCode, what: impl Into<String>) -> Self {
        Self {
            code,
            what: what.into(),
            why: None,
            fix: None,
            docs_url: None,
            cause: None,
        }
    }

    /// Wrap an arbitrary underlying error under the `UNKNOWN` code.
    pub fn wrap(
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        what: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::Unknown,
            what: what.into(),
            why: None,
            fix: None,
            docs_url: None,
            cause: Some(cause.into()),
        }
    }

    pub fn with_why(mut self, why: impl Into<String>) -> Self {
        self.why = Some(why.into());
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn with_docs(mut self, url: impl Into<String>) -> Self {
        self.docs_url = Some(url.into());
        self
    }

    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Identity check: errors match on code, regardless of the entity ids
    /// baked into their messages.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn http_status(&self) -> u16 {
        self.category().http_status()
    }

    // ── Canned constructors ──────────────────────────────────────────

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task {task_id} not found"))
            .with_why("No task with that id exists in this project")
            .with_fix("Run `orc list` to see the tasks in this project")
    }

    pub fn task_invalid_state(task_id: &str, status: &str, wanted: &str) -> Self {
        Self::new(
            ErrorCode::TaskInvalidState,
            format!("Task {task_id} is {status}, expected {wanted}"),
        )
        .with_fix("Pick a task in the expected state or reset this one")
    }

    pub fn task_running(task_id: &str) -> Self {
        Self::new(
            ErrorCode::TaskRunning,
            format!("Task {task_id} is already running"),
        )
        .with_why("Only one executor may drive a task at a time")
        .with_fix("Wait for the current run to finish or cancel it")
    }

    pub fn claude_unavailable(cmd: &str) -> Self {
        Self::new(
            ErrorCode::ClaudeUnavailable,
            format!("Could not start the assistant command `{cmd}`"),
        )
        .with_why("The assistant CLI was not found or failed to spawn")
        .with_fix("Check that the assistant CLI is installed and on PATH")
    }

    pub fn claude_timeout(phase: &str, secs: u64) -> Self {
        Self::new(
            ErrorCode::ClaudeTimeout,
            format!("Phase {phase} exceeded its {secs}s time limit"),
        )
        .with_fix("Raise the phase timeout in .orc/config.toml or split the phase")
    }

    pub fn phase_stuck(phase: &str) -> Self {
        Self::new(
            ErrorCode::PhaseStuck,
            format!("Phase {phase} made no progress"),
        )
        .with_why("The assistant produced no output before the stall window elapsed")
    }

    pub fn max_retries(phase: &str, cap: u32) -> Self {
        Self::new(
            ErrorCode::MaxRetriesExceeded,
            format!("Phase {phase} failed after {cap} iterations"),
        )
        .with_fix("Inspect the transcript for the phase and adjust the task spec")
    }

    pub fn config_invalid(what: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, what).with_fix("Fix .orc/config.toml and re-run")
    }

    pub fn config_missing(path: &std::path::Path) -> Self {
        Self::new(
            ErrorCode::ConfigMissing,
            format!("Config file {} does not exist", path.display()),
        )
        .with_fix("Run `orc init` to create a default configuration")
    }

    pub fn not_initialized(dir: &std::path::Path) -> Self {
        Self::new(
            ErrorCode::OrcNotInitialized,
            format!("{} is not an orc project", dir.display()),
        )
        .with_fix("Run `orc init` in the project directory first")
    }

    pub fn already_initialized(dir: &std::path::Path) -> Self {
        Self::new(
            ErrorCode::OrcAlreadyInitialized,
            format!("{} is already an orc project", dir.display()),
        )
        .with_why("An .orc directory with a config already exists here")
    }
}

impl From<rusqlite::Error> for OrcError {
    fn from(err: rusqlite::Error) -> Self {
        OrcError::wrap(err, "Database operation failed")
    }
}

impl From<std::io::Error> for OrcError {
    fn from(err: std::io::Error) -> Self {
        OrcError::wrap(err, "IO operation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_identity_ignores_entity_ids() {
        let a = OrcError::task_not_found("TASK-001");
        let b = OrcError::task_not_found("TASK-999");
        assert!(a.is(ErrorCode::TaskNotFound));
        assert!(b.is(ErrorCode::TaskNotFound));
        assert!(!a.is(ErrorCode::TaskRunning));
    }

    #[test]
    fn category_mapping_yields_http_status() {
        assert_eq!(OrcError::task_not_found("TASK-001").http_status(), 404);
        assert_eq!(OrcError::task_running("TASK-001").http_status(), 409);
        assert_eq!(OrcError::claude_timeout("spec", 300).http_status(), 408);
        assert_eq!(OrcError::claude_unavailable("claude").http_status(), 503);
        assert_eq!(OrcError::config_invalid("bad toml").http_status(), 400);
        assert_eq!(
            OrcError::wrap(std::io::Error::other("disk"), "save failed").http_status(),
            500
        );
    }

    #[test]
    fn wrap_carries_cause_and_unknown_code() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = OrcError::wrap(io, "Failed to write event batch");
        assert!(err.is(ErrorCode::Unknown));
        assert_eq!(err.what, "Failed to write event batch");
        let source = std::error::Error::source(&err).expect("cause should be the source");
        assert!(source.to_string().contains("denied"));
    }

    #[test]
    fn codes_serialize_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::MaxRetriesExceeded).unwrap();
        assert_eq!(json, "\"MAX_RETRIES_EXCEEDED\"");
        let parsed: ErrorCode = serde_json::from_str("\"ORC_NOT_INITIALIZED\"").unwrap();
        assert_eq!(parsed, ErrorCode::OrcNotInitialized);
        assert_eq!(ErrorCode::GitBranchExists.as_str(), "GIT_BRANCH_EXISTS");
    }

    #[test]
    fn actionable_fields_survive_building() {
        let err = OrcError::new(ErrorCode::GitDirty, "Working tree has uncommitted changes")
            .with_why("A phase run would mix its commits with yours")
            .with_fix("Commit or stash your changes")
            .with_docs("https://orc.dev/errors/git-dirty");
        assert_eq!(
            err.why.as_deref(),
            Some("A phase run would mix its commits with yours")
        );
        assert_eq!(err.fix.as_deref(), Some("Commit or stash your changes"));
        assert_eq!(
            err.docs_url.as_deref(),
            Some("https://orc.dev/errors/git-dirty")
        );
        assert_eq!(err.to_string(), "Working tree has uncommitted changes");
    }
}
