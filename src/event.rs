//! Immutable event records.
//!
//! An [`Event`] is what producers publish: a task topic, a producer-assigned
//! UTC instant, and a tagged payload variant. The wire form is
//! `{"type": ..., "task_id": ..., "time": ..., "data": {...}}` with
//! snake_case tags. [`EventLogRow`] is the durable form; converting to it
//! lifts `phase` and `iteration` out of the payload by variant tag so the
//! event log can be filtered without parsing JSON blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

/// The distinguished topic that receives every event regardless of task.
pub const WILDCARD_TOPIC: &str = "*";

/// Status carried by a `phase` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEventStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

/// Sub-type of a `transcript` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Prompt,
    Response,
    Chunk,
    Tool,
    Error,
}

/// Who resolved a human-gate decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionResolver {
    Api,
    Cli,
}

/// One changed file inside a `files_changed` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub status: String,
    pub additions: u32,
    pub deletions: u32,
}

/// Tagged event payload. The tag doubles as the `event_type` column of the
/// durable log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Phase {
        phase: String,
        status: PhaseEventStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_sha: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Transcript {
        phase: String,
        iteration: u32,
        #[serde(rename = "type")]
        kind: TranscriptKind,
        content: String,
        timestamp: DateTime<Utc>,
    },
    Activity {
        phase: String,
        activity: String,
    },
    Tokens {
        phase: String,
        input: u64,
        output: u64,
        cache_creation: u64,
        cache_read: u64,
        total: u64,
    },
    Heartbeat {
        phase: String,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
        message: String,
        fatal: bool,
    },
    Warning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
        message: String,
    },
    Complete {
        status: TaskStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit_sha: Option<String>,
    },
    SessionUpdate {
        duration_seconds: u64,
        total_tokens: u64,
        cost_usd: f64,
        input: u64,
        output: u64,
        tasks_running: u32,
        is_paused: bool,
    },
    FilesChanged {
        files: Vec<FileChange>,
        total_additions: u32,
        total_deletions: u32,
    },
    TaskCreated {
        id: String,
    },
    TaskUpdated {
        id: String,
    },
    TaskDeleted {
        id: String,
    },
    InitiativeCreated {
        id: String,
    },
    InitiativeUpdated {
        id: String,
    },
    InitiativeDeleted {
        id: String,
    },
    DecisionRequired {
        decision_id: String,
        task_id: String,
        phase: String,
        question: String,
        #[serde(default)]
        context: String,
        requested_at: DateTime<Utc>,
    },
    DecisionResolved {
        decision_id: String,
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        resolved_by: DecisionResolver,
        resolved_at: DateTime<Utc>,
    },
}

impl EventPayload {
    /// The snake_case tag, which is also the `event_type` column value.
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::Phase { .. } => "phase",
            Self::Transcript { .. } => "transcript",
            Self::Activity { .. } => "activity",
            Self::Tokens { .. } => "tokens",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
            Self::Warning { .. } => "warning",
            Self::Complete { .. } => "complete",
            Self::SessionUpdate { .. } => "session_update",
            Self::FilesChanged { .. } => "files_changed",
            Self::TaskCreated { .. } => "task_created",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::InitiativeCreated { .. } => "initiative_created",
            Self::InitiativeUpdated { .. } => "initiative_updated",
            Self::InitiativeDeleted { .. } => "initiative_deleted",
            Self::DecisionRequired { .. } => "decision_required",
            Self::DecisionResolved { .. } => "decision_resolved",
        }
    }

    /// Lift the phase name out of the variants that carry one.
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::Phase { phase, .. }
            | Self::Transcript { phase, .. }
            | Self::Activity { phase, .. }
            | Self::Tokens { phase, .. }
            | Self::Heartbeat { phase, .. }
            | Self::DecisionRequired { phase, .. } => Some(phase),
            Self::Error { phase, .. } | Self::Warning { phase, .. } => phase.as_deref(),
            _ => None,
        }
    }

    /// Lift the iteration out of the variants that carry one.
    pub fn iteration(&self) -> Option<u32> {
        match self {
            Self::Transcript { iteration, .. } | Self::Heartbeat { iteration, .. } => {
                Some(*iteration)
            }
            _ => None,
        }
    }
}

/// An in-flight event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub task_id: String,
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(task_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            task_id: task_id.into(),
            time: Utc::now(),
            payload,
        }
    }

    pub fn at(task_id: impl Into<String>, time: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            task_id: task_id.into(),
            time,
            payload,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.type_str()
    }

    pub fn is_wildcard(&self) -> bool {
        self.task_id == WILDCARD_TOPIC
    }

    pub fn is_phase_completed(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Phase {
                status: PhaseEventStatus::Completed,
                ..
            }
        )
    }

    // ── Common constructors ──────────────────────────────────────────

    pub fn phase_started(task_id: &str, phase: &str) -> Self {
        Self::new(
            task_id,
            EventPayload::Phase {
                phase: phase.to_string(),
                status: PhaseEventStatus::Started,
                commit_sha: None,
                error: None,
            },
        )
    }

    pub fn phase_completed(task_id: &str, phase: &str, commit_sha: Option<String>) -> Self {
        Self::new(
            task_id,
            EventPayload::Phase {
                phase: phase.to_string(),
                status: PhaseEventStatus::Completed,
                commit_sha,
                error: None,
            },
        )
    }

    pub fn phase_failed(task_id: &str, phase: &str, error: impl Into<String>) -> Self {
        Self::new(
            task_id,
            EventPayload::Phase {
                phase: phase.to_string(),
                status: PhaseEventStatus::Failed,
                commit_sha: None,
                error: Some(error.into()),
            },
        )
    }

    pub fn activity(task_id: &str, phase: &str, activity: &str) -> Self {
        Self::new(
            task_id,
            EventPayload::Activity {
                phase: phase.to_string(),
                activity: activity.to_string(),
            },
        )
    }

    pub fn transcript(
        task_id: &str,
        phase: &str,
        iteration: u32,
        kind: TranscriptKind,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self::at(
            task_id,
            now,
            EventPayload::Transcript {
                phase: phase.to_string(),
                iteration,
                kind,
                content: content.into(),
                timestamp: now,
            },
        )
    }

    pub fn heartbeat(task_id: &str, phase: &str, iteration: u32) -> Self {
        let now = Utc::now();
        Self::at(
            task_id,
            now,
            EventPayload::Heartbeat {
                phase: phase.to_string(),
                iteration,
                timestamp: now,
            },
        )
    }

    pub fn warning(task_id: &str, phase: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(
            task_id,
            EventPayload::Warning {
                phase: phase.map(str::to_string),
                message: message.into(),
            },
        )
    }

    /// Session updates always travel on the wildcard topic so every
    /// monitoring subscriber sees them.
    pub fn session_update(payload: EventPayload) -> Self {
        debug_assert!(matches!(payload, EventPayload::SessionUpdate { .. }));
        Self::new(WILDCARD_TOPIC, payload)
    }

    /// Convert to the durable form, serializing the payload body as the
    /// opaque `data` column.
    pub fn to_log_row(&self, source: &str) -> EventLogRow {
        let data = match serde_json::to_value(&self.payload) {
            Ok(serde_json::Value::Object(map)) => map
                .get("data")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "{}".to_string()),
            _ => "{}".to_string(),
        };
        EventLogRow {
            id: None,
            task_id: self.task_id.clone(),
            phase: self.payload.phase().map(str::to_string),
            iteration: self.payload.iteration().map(i64::from),
            event_type: self.event_type().to_string(),
            data,
            source: source.to_string(),
            created_at: self.time,
            duration_ms: None,
        }
    }
}

/// Durable form of an event, matching the `event_log` table layout.
///
/// `(task_id, phase, event_type, created_at)` is the dedup key:
/// re-ingesting the same logical event is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventLogRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub task_id: String,
    pub phase: Option<String>,
    pub iteration: Option<i64>,
    pub event_type: String,
    pub data: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

impl EventLogRow {
    /// The dedup tuple. `phase` is normalized to empty so NULL phases
    /// compare equal.
    pub fn dedup_key(&self) -> (String, String, String, DateTime<Utc>) {
        (
            self.task_id.clone(),
            self.phase.clone().unwrap_or_default(),
            self.event_type.clone(),
            self.created_at,
        )
    }

    /// Rebuild the in-flight event from the stored type tag and data blob.
    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        let data: serde_json::Value = serde_json::from_str(&self.data)?;
        let payload: EventPayload = serde_json::from_value(serde_json::json!({
            "type": self.event_type,
            "data": data,
        }))?;
        Ok(Event::at(self.task_id.clone(), self.created_at, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn wire_format_is_tagged_snake_case() {
        let event = Event::at(
            "TASK-001",
            fixed_time(),
            EventPayload::Phase {
                phase: "spec".into(),
                status: PhaseEventStatus::Started,
                commit_sha: None,
                error: None,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase");
        assert_eq!(json["task_id"], "TASK-001");
        assert_eq!(json["data"]["phase"], "spec");
        assert_eq!(json["data"]["status"], "started");
    }

    #[test]
    fn payload_round_trips() {
        let event = Event::transcript("TASK-001", "implement", 2, TranscriptKind::Tool, "Write src/a.rs");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn phase_and_iteration_lifting() {
        let transcript = Event::transcript("TASK-001", "implement", 3, TranscriptKind::Chunk, "...");
        assert_eq!(transcript.payload.phase(), Some("implement"));
        assert_eq!(transcript.payload.iteration(), Some(3));

        let tokens = Event::new(
            "TASK-001",
            EventPayload::Tokens {
                phase: "spec".into(),
                input: 10,
                output: 20,
                cache_creation: 0,
                cache_read: 5,
                total: 35,
            },
        );
        assert_eq!(tokens.payload.phase(), Some("spec"));
        assert_eq!(tokens.payload.iteration(), None);

        let session = Event::session_update(EventPayload::SessionUpdate {
            duration_seconds: 60,
            total_tokens: 1000,
            cost_usd: 0.42,
            input: 600,
            output: 400,
            tasks_running: 1,
            is_paused: false,
        });
        assert_eq!(session.payload.phase(), None);
        assert!(session.is_wildcard());
    }

    #[test]
    fn log_row_lifts_columns_and_keeps_opaque_data() {
        let event = Event::at(
            "TASK-001",
            fixed_time(),
            EventPayload::Phase {
                phase: "impl".into(),
                status: PhaseEventStatus::Completed,
                commit_sha: Some("abc123".into()),
                error: None,
            },
        );
        let row = event.to_log_row("executor");
        assert_eq!(row.task_id, "TASK-001");
        assert_eq!(row.phase.as_deref(), Some("impl"));
        assert_eq!(row.iteration, None);
        assert_eq!(row.event_type, "phase");
        assert_eq!(row.source, "executor");
        assert_eq!(row.created_at, fixed_time());

        let data: serde_json::Value = serde_json::from_str(&row.data).unwrap();
        assert_eq!(data["commit_sha"], "abc123");
        assert_eq!(data["status"], "completed");
    }

    #[test]
    fn log_row_round_trips_to_event() {
        let event = Event::at(
            "TASK-002",
            fixed_time(),
            EventPayload::Error {
                phase: Some("review".into()),
                message: "assistant exited non-zero".into(),
                fatal: false,
            },
        );
        let row = event.to_log_row("executor");
        let back = row.to_event().unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn dedup_key_normalizes_null_phase() {
        let a = Event::at(
            "TASK-001",
            fixed_time(),
            EventPayload::TaskUpdated { id: "TASK-001".into() },
        )
        .to_log_row("api");
        assert_eq!(a.phase, None);
        let key = a.dedup_key();
        assert_eq!(key.1, "");
        assert_eq!(key.2, "task_updated");
    }

    #[test]
    fn transcript_inner_type_field_serializes_as_type() {
        let event = Event::transcript("TASK-001", "spec", 1, TranscriptKind::Prompt, "hello");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["type"], "prompt");
    }
}
