//! Idempotent one-way reconciliation from an external ticket tracker.
//!
//! The tracker's REST adapter lives outside the crate, behind
//! [`TicketSource`]. The importer pulls a snapshot of issues (and
//! optionally epics), creates or refreshes local tasks, and resolves
//! issue links in a second pass. The upstream key stored in
//! `task.metadata["jira_key"]` is the dedup anchor: re-running against an
//! unchanged snapshot performs zero writes.
//!
//! Tasks that have progressed past the import boundary (anything but
//! `created`) are never overwritten; they count as skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::OrcResult;
use crate::event::{Event, EventPayload};
use crate::pipeline::Publisher;
use crate::store::ProjectStore;
use crate::task::{
    Category, Initiative, InitiativeStatus, META_JIRA_KEY, Priority, Queue, Task, TaskStatus,
};

/// Link direction as the upstream tracker reports it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    Inward,
    Outward,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteLink {
    pub link_type: String,
    pub direction: LinkDirection,
    pub other_key: String,
}

/// One upstream issue, already shaped by the tracker adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteIssue {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// Upstream priority name: highest, high, medium, low, lowest.
    #[serde(default)]
    pub priority: String,
    /// Upstream type name: bug, story, task, epic, sub-task, improvement.
    #[serde(default)]
    pub issue_type: String,
    /// Upstream status category: new, indeterminate, done, undefined.
    #[serde(default)]
    pub status_category: String,
    #[serde(default)]
    pub links: Vec<RemoteLink>,
    #[serde(default)]
    pub parent_key: Option<String>,
}

/// One upstream epic, lifted into an initiative when enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteEpic {
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status_category: String,
}

#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn fetch_issues(&self) -> OrcResult<Vec<RemoteIssue>>;
    async fn fetch_epics(&self) -> OrcResult<Vec<RemoteEpic>>;
}

/// Decides whether an upstream epic is the same thing as an existing
/// initiative. Title matching is the v1 default; plug a stronger key
/// (e.g. a metadata field) here without touching the reconcile loop.
pub trait InitiativeMatcher: Send + Sync {
    fn matches(&self, epic: &RemoteEpic, initiative: &Initiative) -> bool;
}

/// Case-insensitive trimmed-title equality.
pub struct TitleMatcher;

impl InitiativeMatcher for TitleMatcher {
    fn matches(&self, epic: &RemoteEpic, initiative: &Initiative) -> bool {
        epic.summary.trim().eq_ignore_ascii_case(initiative.title.trim())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub lift_epics: bool,
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            lift_epics: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub initiatives_created: u32,
    pub initiatives_updated: u32,
    pub errors: Vec<String>,
}

// ── Field mapping (fixed tables) ──────────────────────────────────────

pub fn map_priority(upstream: &str) -> Priority {
    match upstream {
        "highest" => Priority::Critical,
        "high" => Priority::High,
        "medium" => Priority::Normal,
        "low" | "lowest" => Priority::Low,
        _ => Priority::Normal,
    }
}

pub fn map_category(issue_type: &str) -> Category {
    match issue_type {
        "bug" => Category::Bug,
        "story" | "task" | "epic" => Category::Feature,
        "sub-task" => Category::Chore,
        "improvement" => Category::Refactor,
        _ => Category::Feature,
    }
}

pub fn map_status(status_category: &str) -> TaskStatus {
    match status_category {
        "done" => TaskStatus::Completed,
        _ => TaskStatus::Created,
    }
}

pub fn map_queue(status_category: &str) -> Queue {
    match status_category {
        "indeterminate" | "done" => Queue::Active,
        _ => Queue::default(),
    }
}

fn map_epic_status(status_category: &str) -> InitiativeStatus {
    match status_category {
        "done" => InitiativeStatus::Completed,
        "indeterminate" => InitiativeStatus::Active,
        _ => InitiativeStatus::Draft,
    }
}

// ── Importer ──────────────────────────────────────────────────────────

pub struct Importer {
    store: Arc<ProjectStore>,
    publisher: Arc<dyn Publisher>,
    matcher: Box<dyn InitiativeMatcher>,
    options: ImportOptions,
}

impl Importer {
    pub fn new(store: Arc<ProjectStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            store,
            publisher,
            matcher: Box::new(TitleMatcher),
            options: ImportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_matcher(mut self, matcher: Box<dyn InitiativeMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Reconcile the upstream snapshot into local tasks and initiatives.
    pub async fn run(&self, source: &dyn TicketSource) -> OrcResult<ImportResult> {
        let dry_run = self.options.dry_run;
        let mut result = ImportResult::default();

        // Epics first so issues can link to their parent initiative.
        let mut epic_initiatives: HashMap<String, String> = HashMap::new();
        if self.options.lift_epics {
            self.import_epics(source, &mut result, &mut epic_initiatives)
                .await?;
        }

        let issues = source.fetch_issues().await?;

        let existing = self.store.load_all_tasks()?;
        let mut by_jira_key: HashMap<String, Task> = existing
            .into_iter()
            .filter_map(|t| {
                let key = t.jira_key().map(|k| k.to_string());
                key.map(|k| (k, t))
            })
            .collect();

        // Pass 1: create or refresh every issue, recording jira_key → id.
        let mut key_to_id: HashMap<String, String> = HashMap::new();
        let mut skipped_keys: HashSet<String> = HashSet::new();
        let mut imported: HashMap<String, Task> = HashMap::new();
        let mut dry_counter = 0u32;

        for issue in &issues {
            match by_jira_key.remove(&issue.key) {
                Some(task) if task.status != TaskStatus::Created => {
                    // Past the import boundary: never overwritten, but it
                    // still anchors links from other issues.
                    debug!(task_id = %task.id, key = %issue.key, "skipping advanced task");
                    result.skipped += 1;
                    key_to_id.insert(issue.key.clone(), task.id.clone());
                    skipped_keys.insert(issue.key.clone());
                }
                Some(task) => {
                    let id = task.id.clone();
                    match self.refresh_task(task, issue, &epic_initiatives) {
                        Ok(task) => {
                            result.updated += 1;
                            key_to_id.insert(issue.key.clone(), id);
                            imported.insert(issue.key.clone(), task);
                        }
                        Err(e) => result.errors.push(format!("{}: {}", issue.key, e)),
                    }
                }
                None => {
                    let id = if dry_run {
                        dry_counter += 1;
                        format!("DRY-{dry_counter:03}")
                    } else {
                        match self.store.next_task_id() {
                            Ok(id) => id,
                            Err(e) => {
                                result.errors.push(format!("{}: {}", issue.key, e));
                                continue;
                            }
                        }
                    };
                    match self.create_task(&id, issue, &epic_initiatives) {
                        Ok(task) => {
                            result.created += 1;
                            key_to_id.insert(issue.key.clone(), id);
                            imported.insert(issue.key.clone(), task);
                        }
                        Err(e) => result.errors.push(format!("{}: {}", issue.key, e)),
                    }
                }
            }
        }

        // Pass 2: resolve links, now that every imported key has an id.
        for issue in &issues {
            if skipped_keys.contains(&issue.key) {
                continue;
            }
            let Some(task) = imported.get_mut(&issue.key) else {
                continue;
            };
            let mut changed = false;
            for link in &issue.links {
                let Some(other_id) = key_to_id.get(&link.other_key) else {
                    // Outside the import set: dropped.
                    debug!(key = %issue.key, other = %link.other_key, "dropping external link");
                    continue;
                };
                if link.link_type == "Blocks" {
                    // Only the inward side stores the dependency; the
                    // outward side is the reverse of someone else's inward.
                    if link.direction == LinkDirection::Inward
                        && !task.blocked_by.contains(other_id)
                    {
                        task.blocked_by.push(other_id.clone());
                        changed = true;
                    }
                } else if !task.related_to.contains(other_id) {
                    task.related_to.push(other_id.clone());
                    changed = true;
                }
            }
            if changed && !dry_run {
                if let Err(e) = self.store.save_task(task) {
                    result.errors.push(format!("{}: {}", issue.key, e));
                }
            }
        }

        Ok(result)
    }

    async fn import_epics(
        &self,
        source: &dyn TicketSource,
        result: &mut ImportResult,
        epic_initiatives: &mut HashMap<String, String>,
    ) -> OrcResult<()> {
        let epics = source.fetch_epics().await?;
        if epics.is_empty() {
            return Ok(());
        }
        let existing = self.store.load_all_initiatives()?;
        let mut dry_counter = 0u32;

        for epic in &epics {
            if let Some(initiative) = existing.iter().find(|i| self.matcher.matches(epic, i)) {
                result.initiatives_updated += 1;
                epic_initiatives.insert(epic.key.clone(), initiative.id.clone());

                let mut refreshed = initiative.clone();
                refreshed.vision = epic.description.clone();
                refreshed.status = map_epic_status(&epic.status_category);
                let changed =
                    refreshed.vision != initiative.vision || refreshed.status != initiative.status;
                if changed && !self.options.dry_run {
                    self.store.save_initiative(&refreshed)?;
                    self.publisher.publish(&Event::new(
                        crate::event::WILDCARD_TOPIC,
                        EventPayload::InitiativeUpdated {
                            id: refreshed.id.clone(),
                        },
                    ));
                }
            } else {
                result.initiatives_created += 1;
                if self.options.dry_run {
                    dry_counter += 1;
                    epic_initiatives.insert(epic.key.clone(), format!("DRY-INIT-{dry_counter:03}"));
                } else {
                    let id = self.store.next_initiative_id()?;
                    let mut initiative = Initiative::new(&id, &epic.summary);
                    initiative.vision = epic.description.clone();
                    initiative.status = map_epic_status(&epic.status_category);
                    self.store.save_initiative(&initiative)?;
                    self.publisher.publish(&Event::new(
                        crate::event::WILDCARD_TOPIC,
                        EventPayload::InitiativeCreated { id: id.clone() },
                    ));
                    epic_initiatives.insert(epic.key.clone(), id);
                }
            }
        }
        Ok(())
    }

    fn create_task(
        &self,
        id: &str,
        issue: &RemoteIssue,
        epic_initiatives: &HashMap<String, String>,
    ) -> OrcResult<Task> {
        let mut task = Task::new(id, &issue.summary);
        task.description = issue.description.clone();
        task.status = map_status(&issue.status_category);
        task.queue = map_queue(&issue.status_category);
        task.priority = map_priority(&issue.priority);
        task.category = map_category(&issue.issue_type);
        task.metadata
            .insert(META_JIRA_KEY.to_string(), issue.key.clone());
        task.initiative_id = issue
            .parent_key
            .as_ref()
            .and_then(|k| epic_initiatives.get(k))
            .cloned();
        task.created_at = Utc::now();
        task.updated_at = task.created_at;

        if !self.options.dry_run {
            self.store.save_task(&task)?;
            self.publisher.publish(&Event::new(
                &task.id,
                EventPayload::TaskCreated {
                    id: task.id.clone(),
                },
            ));
        }
        Ok(task)
    }

    /// Refresh only the upstream-owned fields; local state
    /// (`initiative_id`, links, execution state, status, queue) stays.
    fn refresh_task(
        &self,
        mut task: Task,
        issue: &RemoteIssue,
        epic_initiatives: &HashMap<String, String>,
    ) -> OrcResult<Task> {
        let before = task.clone();
        task.title = issue.summary.clone();
        task.description = issue.description.clone();
        task.priority = map_priority(&issue.priority);
        task.category = map_category(&issue.issue_type);
        task.metadata
            .insert(META_JIRA_KEY.to_string(), issue.key.clone());
        if task.initiative_id.is_none() {
            task.initiative_id = issue
                .parent_key
                .as_ref()
                .and_then(|k| epic_initiatives.get(k))
                .cloned();
        }

        if task != before {
            if !self.options.dry_run {
                self.store.save_task(&task)?;
                self.publisher.publish(&Event::new(
                    &task.id,
                    EventPayload::TaskUpdated {
                        id: task.id.clone(),
                    },
                ));
            }
        } else {
            debug!(task_id = %task.id, "no upstream changes");
        }
        Ok(task)
    }
}

impl std::fmt::Debug for Importer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Importer")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NopPublisher;

    struct StaticSource {
        issues: Vec<RemoteIssue>,
        epics: Vec<RemoteEpic>,
    }

    #[async_trait]
    impl TicketSource for StaticSource {
        async fn fetch_issues(&self) -> OrcResult<Vec<RemoteIssue>> {
            Ok(self.issues.clone())
        }

        async fn fetch_epics(&self) -> OrcResult<Vec<RemoteEpic>> {
            Ok(self.epics.clone())
        }
    }

    fn issue(key: &str, summary: &str) -> RemoteIssue {
        RemoteIssue {
            key: key.into(),
            summary: summary.into(),
            description: String::new(),
            priority: "medium".into(),
            issue_type: "story".into(),
            status_category: "new".into(),
            links: Vec::new(),
            parent_key: None,
        }
    }

    fn importer(store: &Arc<ProjectStore>) -> Importer {
        Importer::new(Arc::clone(store), Arc::new(NopPublisher))
    }

    fn store() -> Arc<ProjectStore> {
        Arc::new(ProjectStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn first_import_creates_second_updates() {
        let store = store();
        let source = StaticSource {
            issues: vec![issue("PROJ-1", "One"), issue("PROJ-2", "Two")],
            epics: vec![],
        };

        let result = importer(&store).run(&source).await.unwrap();
        assert_eq!((result.created, result.updated, result.skipped), (2, 0, 0));
        assert!(result.errors.is_empty());

        // Same snapshot again: everything counts as updated, nothing is
        // actually written.
        let before: HashMap<String, _> = store
            .load_all_tasks()
            .unwrap()
            .into_iter()
            .map(|t| (t.id.clone(), t.updated_at))
            .collect();
        let result = importer(&store).run(&source).await.unwrap();
        assert_eq!((result.created, result.updated, result.skipped), (0, 2, 0));
        for task in store.load_all_tasks().unwrap() {
            assert_eq!(before[&task.id], task.updated_at, "{} was rewritten", task.id);
        }
    }

    #[tokio::test]
    async fn field_mapping_tables() {
        let store = store();
        let mut first = issue("PROJ-1", "Crash on login");
        first.priority = "highest".into();
        first.issue_type = "bug".into();
        first.status_category = "indeterminate".into();
        let mut second = issue("PROJ-2", "Cleanup");
        second.priority = "lowest".into();
        second.issue_type = "sub-task".into();
        second.status_category = "done".into();
        let mut third = issue("PROJ-3", "Polish");
        third.priority = "low".into();
        third.issue_type = "improvement".into();

        let source = StaticSource {
            issues: vec![first, second, third],
            epics: vec![],
        };
        importer(&store).run(&source).await.unwrap();

        let tasks = store.load_all_tasks().unwrap();
        let by_key = |k: &str| {
            tasks
                .iter()
                .find(|t| t.jira_key() == Some(k))
                .unwrap()
                .clone()
        };

        let t1 = by_key("PROJ-1");
        assert_eq!(t1.priority, Priority::Critical);
        assert_eq!(t1.category, Category::Bug);
        assert_eq!(t1.status, TaskStatus::Created);
        assert_eq!(t1.queue, Queue::Active);

        let t2 = by_key("PROJ-2");
        assert_eq!(t2.priority, Priority::Low);
        assert_eq!(t2.category, Category::Chore);
        assert_eq!(t2.status, TaskStatus::Completed);
        assert_eq!(t2.queue, Queue::Active);

        let t3 = by_key("PROJ-3");
        assert_eq!(t3.priority, Priority::Low);
        assert_eq!(t3.category, Category::Refactor);
        assert_eq!(t3.queue, Queue::Backlog);
    }

    #[tokio::test]
    async fn link_resolution_two_pass() {
        let store = store();
        let mut blocked = issue("PROJ-2", "Blocked one");
        blocked.links.push(RemoteLink {
            link_type: "Blocks".into(),
            direction: LinkDirection::Inward,
            other_key: "PROJ-1".into(),
        });
        let mut related = issue("PROJ-3", "Related one");
        related.links.push(RemoteLink {
            link_type: "Relates".into(),
            direction: LinkDirection::Outward,
            other_key: "PROJ-1".into(),
        });

        let source = StaticSource {
            issues: vec![issue("PROJ-1", "Root"), blocked, related],
            epics: vec![],
        };
        importer(&store).run(&source).await.unwrap();

        let tasks = store.load_all_tasks().unwrap();
        let by_key = |k: &str| tasks.iter().find(|t| t.jira_key() == Some(k)).unwrap();
        let root_id = by_key("PROJ-1").id.clone();

        assert_eq!(by_key("PROJ-2").blocked_by, vec![root_id.clone()]);
        assert!(by_key("PROJ-2").related_to.is_empty());
        assert_eq!(by_key("PROJ-3").related_to, vec![root_id]);
        assert!(by_key("PROJ-3").blocked_by.is_empty());
        // The outward side of Blocks is intentionally not stored.
        assert!(by_key("PROJ-1").blocked_by.is_empty());
        assert!(by_key("PROJ-1").related_to.is_empty());
    }

    #[tokio::test]
    async fn outward_blocks_is_not_stored() {
        let store = store();
        let mut blocker = issue("PROJ-1", "Blocker");
        blocker.links.push(RemoteLink {
            link_type: "Blocks".into(),
            direction: LinkDirection::Outward,
            other_key: "PROJ-2".into(),
        });
        let source = StaticSource {
            issues: vec![blocker, issue("PROJ-2", "Blocked")],
            epics: vec![],
        };
        importer(&store).run(&source).await.unwrap();

        for task in store.load_all_tasks().unwrap() {
            assert!(task.blocked_by.is_empty());
        }
    }

    #[tokio::test]
    async fn links_outside_import_set_are_dropped() {
        let store = store();
        let mut lonely = issue("PROJ-1", "Lonely");
        lonely.links.push(RemoteLink {
            link_type: "Relates".into(),
            direction: LinkDirection::Inward,
            other_key: "OTHER-99".into(),
        });
        let source = StaticSource {
            issues: vec![lonely],
            epics: vec![],
        };
        importer(&store).run(&source).await.unwrap();
        assert!(store.load_all_tasks().unwrap()[0].related_to.is_empty());
    }

    #[tokio::test]
    async fn advanced_tasks_are_skipped_not_overwritten() {
        let store = store();
        let mut task = Task::new("TASK-001", "Old");
        task.status = TaskStatus::Running;
        task.metadata
            .insert(META_JIRA_KEY.to_string(), "PROJ-1".to_string());
        store.save_task(&task).unwrap();

        let source = StaticSource {
            issues: vec![issue("PROJ-1", "New")],
            epics: vec![],
        };
        let result = importer(&store).run(&source).await.unwrap();
        assert_eq!((result.created, result.updated, result.skipped), (0, 0, 1));
        assert_eq!(store.load_task("TASK-001").unwrap().title, "Old");
    }

    #[tokio::test]
    async fn refresh_preserves_local_state() {
        let store = store();
        let source = StaticSource {
            issues: vec![issue("PROJ-1", "Original")],
            epics: vec![],
        };
        importer(&store).run(&source).await.unwrap();

        // Locally attach state the upstream knows nothing about.
        let mut task = store.load_all_tasks().unwrap().remove(0);
        let id = task.id.clone();
        task.execution_state = crate::task::ExecutionState::from_plan(["spec"]);
        task.initiative_id = None;
        store.save_task(&task).unwrap();
        store.save_initiative(&Initiative::new("INIT-001", "Local")).unwrap();
        task.initiative_id = Some("INIT-001".into());
        store.save_task(&task).unwrap();

        let mut renamed = issue("PROJ-1", "Renamed upstream");
        renamed.priority = "high".into();
        let source = StaticSource {
            issues: vec![renamed],
            epics: vec![],
        };
        let result = importer(&store).run(&source).await.unwrap();
        assert_eq!(result.updated, 1);

        let task = store.load_task(&id).unwrap();
        assert_eq!(task.title, "Renamed upstream");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.initiative_id.as_deref(), Some("INIT-001"));
        assert!(task.execution_state.contains("spec"));
    }

    #[tokio::test]
    async fn epics_lift_to_initiatives_and_parent_links() {
        let store = store();
        let mut child = issue("PROJ-2", "Child work");
        child.parent_key = Some("PROJ-1".into());
        let source = StaticSource {
            issues: vec![child],
            epics: vec![RemoteEpic {
                key: "PROJ-1".into(),
                summary: "Big Epic".into(),
                description: "The vision".into(),
                status_category: "indeterminate".into(),
            }],
        };

        let result = importer(&store).run(&source).await.unwrap();
        assert_eq!(result.initiatives_created, 1);
        assert_eq!(result.initiatives_updated, 0);

        let initiatives = store.load_all_initiatives().unwrap();
        assert_eq!(initiatives.len(), 1);
        assert_eq!(initiatives[0].title, "Big Epic");
        assert_eq!(initiatives[0].vision, "The vision");
        assert_eq!(initiatives[0].status, InitiativeStatus::Active);

        let task = &store.load_all_tasks().unwrap()[0];
        assert_eq!(task.initiative_id.as_deref(), Some(initiatives[0].id.as_str()));

        // Second run matches by title and refreshes instead of duplicating.
        let result = importer(&store).run(&source).await.unwrap();
        assert_eq!(result.initiatives_created, 0);
        assert_eq!(result.initiatives_updated, 1);
        assert_eq!(store.load_all_initiatives().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_counts_everything_persists_nothing() {
        let store = store();
        let mut blocked = issue("PROJ-2", "Blocked");
        blocked.links.push(RemoteLink {
            link_type: "Blocks".into(),
            direction: LinkDirection::Inward,
            other_key: "PROJ-1".into(),
        });
        let source = StaticSource {
            issues: vec![issue("PROJ-1", "Root"), blocked],
            epics: vec![RemoteEpic {
                key: "EPIC-1".into(),
                summary: "Epic".into(),
                description: String::new(),
                status_category: "new".into(),
            }],
        };

        let dry = importer(&store)
            .with_options(ImportOptions {
                lift_epics: true,
                dry_run: true,
            })
            .run(&source)
            .await
            .unwrap();
        assert_eq!((dry.created, dry.updated, dry.skipped), (2, 0, 0));
        assert_eq!(dry.initiatives_created, 1);
        assert!(store.load_all_tasks().unwrap().is_empty());
        assert!(store.load_all_initiatives().unwrap().is_empty());

        // The real run produces the same counters.
        let real = importer(&store).run(&source).await.unwrap();
        assert_eq!((real.created, real.updated, real.skipped), (2, 0, 0));
        assert_eq!(real.initiatives_created, 1);
    }

    #[test]
    fn title_matching_is_case_insensitive_and_trimmed() {
        let epic = RemoteEpic {
            key: "E-1".into(),
            summary: "  Unify Auth  ".into(),
            description: String::new(),
            status_category: String::new(),
        };
        let initiative = Initiative::new("INIT-001", "unify auth");
        assert!(TitleMatcher.matches(&epic, &initiative));
        let other = Initiative::new("INIT-002", "something else");
        assert!(!TitleMatcher.matches(&epic, &other));
    }
}
