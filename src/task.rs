//! Task and initiative entities.
//!
//! Tasks are the unit of work. A task advances through an ordered phase
//! plan; per-phase progress lives in [`ExecutionState`]. Initiatives group
//! tasks under a shared vision. All enum fields serialize as snake_case
//! strings, which is also their database representation.

use std::collections::BTreeMap;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key carrying the upstream ticket key for imported tasks.
pub const META_JIRA_KEY: &str = "jira_key";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Blocked,
    Finalizing,
    Completed,
    Failed,
    Resolved,
}

impl TaskStatus {
    /// Terminal tasks accept no further phase events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Resolved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Blocked => "blocked",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Resolved => "resolved",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "blocked" => Ok(Self::Blocked),
            "finalizing" => Ok(Self::Finalizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    #[default]
    Backlog,
    Active,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Active => "active",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "active" => Ok(Self::Active),
            _ => Err(format!("Invalid queue: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Feature,
    Bug,
    Chore,
    Refactor,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
            Self::Refactor => "refactor",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            "chore" => Ok(Self::Chore),
            "refactor" => Ok(Self::Refactor),
            _ => Err(format!("Invalid category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Small,
    #[default]
    Medium,
    Large,
}

impl Weight {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            _ => Err(format!("Invalid weight: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid phase status: {}", s)),
        }
    }
}

/// Per-phase progress entry inside [`ExecutionState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseEntry {
    pub name: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PhaseEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::Pending,
            iteration_count: 0,
            commit_sha: None,
            error_message: None,
        }
    }
}

/// Ordered per-phase status map. Entries keep plan order; names are unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ExecutionState {
    #[serde(default)]
    pub phases: Vec<PhaseEntry>,
}

impl ExecutionState {
    /// Build a pending execution state from a phase plan.
    pub fn from_plan<I, S>(plan: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phases: plan.into_iter().map(PhaseEntry::new).collect(),
        }
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseEntry> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phase_mut(&mut self, name: &str) -> Option<&mut PhaseEntry> {
        self.phases.iter_mut().find(|p| p.name == name)
    }

    /// Get or append the entry for a phase, preserving order.
    pub fn ensure_phase(&mut self, name: &str) -> &mut PhaseEntry {
        if let Some(idx) = self.phases.iter().position(|p| p.name == name) {
            &mut self.phases[idx]
        } else {
            self.phases.push(PhaseEntry::new(name));
            self.phases.last_mut().expect("just pushed")
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.phase(name).is_some()
    }

    /// Phase names in plan order.
    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|p| p.name.as_str())
    }
}

/// The unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub weight: Weight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub execution_state: ExecutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiative_id: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub related_to: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Created,
            queue: Queue::default(),
            priority: Priority::default(),
            category: Category::default(),
            weight: Weight::default(),
            current_phase: None,
            execution_state: ExecutionState::default(),
            initiative_id: None,
            blocked_by: Vec::new(),
            related_to: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The upstream ticket key, when this task was imported.
    pub fn jira_key(&self) -> Option<&str> {
        self.metadata.get(META_JIRA_KEY).map(String::as_str)
    }

    /// Drop references to tasks that do not exist in this project and
    /// normalize `current_phase` against the execution state. Applied on
    /// every load so dangling entries never surface to callers.
    pub fn normalize(&mut self, existing: &HashSet<String>) {
        self.blocked_by.retain(|id| existing.contains(id));
        self.related_to.retain(|id| existing.contains(id));
        if let Some(phase) = &self.current_phase
            && !self.execution_state.contains(phase)
        {
            self.current_phase = None;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitiativeStatus {
    #[default]
    Draft,
    Active,
    Completed,
}

impl InitiativeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid initiative status: {}", s)),
        }
    }
}

/// A recorded decision on an initiative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub decision: String,
    #[serde(default)]
    pub rationale: String,
}

/// Groups tasks under a shared vision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Initiative {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub vision: String,
    pub status: InitiativeStatus,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Initiative {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            vision: String::new(),
            status: InitiativeStatus::default(),
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Created,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Blocked,
            TaskStatus::Finalizing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Resolved,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(TaskStatus::from_str("bogus").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Resolved.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn enums_serialize_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let json = serde_json::to_string(&PhaseStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
    }

    #[test]
    fn execution_state_preserves_plan_order() {
        let state = ExecutionState::from_plan(["spec", "tdd_write", "implement", "review"]);
        let names: Vec<&str> = state.phase_names().collect();
        assert_eq!(names, vec!["spec", "tdd_write", "implement", "review"]);
        assert_eq!(state.phase("tdd_write").unwrap().status, PhaseStatus::Pending);
        assert!(state.phase("deploy").is_none());
    }

    #[test]
    fn ensure_phase_appends_once() {
        let mut state = ExecutionState::from_plan(["spec"]);
        state.ensure_phase("implement").status = PhaseStatus::Running;
        state.ensure_phase("implement").iteration_count = 2;
        assert_eq!(state.phases.len(), 2);
        let entry = state.phase("implement").unwrap();
        assert_eq!(entry.status, PhaseStatus::Running);
        assert_eq!(entry.iteration_count, 2);
    }

    #[test]
    fn normalize_prunes_dangling_references() {
        let mut task = Task::new("TASK-003", "Wire up the importer");
        task.blocked_by = vec!["TASK-001".into(), "TASK-404".into()];
        task.related_to = vec!["TASK-002".into(), "TASK-500".into()];

        let existing: HashSet<String> =
            ["TASK-001", "TASK-002", "TASK-003"].iter().map(|s| s.to_string()).collect();
        task.normalize(&existing);

        assert_eq!(task.blocked_by, vec!["TASK-001".to_string()]);
        assert_eq!(task.related_to, vec!["TASK-002".to_string()]);
    }

    #[test]
    fn normalize_clears_unknown_current_phase() {
        let mut task = Task::new("TASK-001", "Title");
        task.execution_state = ExecutionState::from_plan(["spec", "implement"]);
        task.current_phase = Some("review".into());
        task.normalize(&HashSet::from(["TASK-001".to_string()]));
        assert_eq!(task.current_phase, None);

        task.current_phase = Some("implement".into());
        task.normalize(&HashSet::from(["TASK-001".to_string()]));
        assert_eq!(task.current_phase.as_deref(), Some("implement"));
    }

    #[test]
    fn task_serde_round_trip() {
        let mut task = Task::new("TASK-042", "Add budget rollover");
        task.status = TaskStatus::Running;
        task.queue = Queue::Active;
        task.priority = Priority::High;
        task.category = Category::Bug;
        task.current_phase = Some("implement".into());
        task.execution_state = ExecutionState::from_plan(["spec", "implement"]);
        task.metadata.insert(META_JIRA_KEY.into(), "PROJ-7".into());

        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"queue\":\"active\""));
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
        assert_eq!(parsed.jira_key(), Some("PROJ-7"));
    }

    #[test]
    fn initiative_defaults_to_draft() {
        let init = Initiative::new("INIT-001", "Unify auth");
        assert_eq!(init.status, InitiativeStatus::Draft);
        let json = serde_json::to_string(&init).unwrap();
        let parsed: Initiative = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, init);
    }
}
