//! Generated tasks and their checklists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::EventId;
use super::template::{AssignmentStrategy, ChecklistItemDef};
use crate::error::{Error, Result};

/// Newtype for generated task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Other(format!("invalid task id {s}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status and priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(Error::Other(format!("unknown task status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Checklist
// ---------------------------------------------------------------------------

/// A checklist entry on a generated task, copied from the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub title: String,
    pub required: bool,
    pub verification: Option<String>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
}

impl From<&ChecklistItemDef> for ChecklistItem {
    fn from(def: &ChecklistItemDef) -> Self {
        Self {
            id: def.id.clone(),
            title: def.title.clone(),
            required: def.required,
            verification: def.verification.clone(),
            completed: false,
            completed_at: None,
            completed_by: None,
        }
    }
}

/// Derived checklist completion.
///
/// `percent = floor(100 * completed / total)`, and `0` for an empty checklist.
/// `required_remaining` counts required items not yet completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
    pub required_remaining: usize,
}

impl ChecklistProgress {
    pub fn of(items: &[ChecklistItem]) -> Self {
        let total = items.len();
        let completed = items.iter().filter(|i| i.completed).count();
        let required_remaining = items.iter().filter(|i| i.required && !i.completed).count();
        let percent = if total == 0 {
            0
        } else {
            (completed * 100 / total) as u8
        };
        Self {
            completed,
            total,
            percent,
            required_remaining,
        }
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// The resolved (or still unresolved) owner of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub strategy: AssignmentStrategy,
    /// `None` until a role resolver supplies someone.
    pub assignee_id: Option<String>,
    pub assignee_name: Option<String>,
}

impl Assignment {
    pub fn unresolved(strategy: AssignmentStrategy) -> Self {
        Self {
            strategy,
            assignee_id: None,
            assignee_name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Generated task
// ---------------------------------------------------------------------------

/// A concrete task created from one template in response to one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTask {
    pub id: TaskId,
    pub business_event_id: EventId,
    pub template_id: String,
    pub template_version: u32,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub assignment: Assignment,
    pub due_date: DateTime<Utc>,
    checklist: Vec<ChecklistItem>,
    checklist_progress: ChecklistProgress,
    pub source_module: String,
    pub subsidiary: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    #[serde(default)]
    pub related_task_ids: Vec<TaskId>,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything a task needs beyond its checklist.
pub struct TaskParts {
    pub business_event_id: EventId,
    pub template_id: String,
    pub template_version: u32,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: TaskPriority,
    pub assignment: Assignment,
    pub due_date: DateTime<Utc>,
    pub source_module: String,
    pub subsidiary: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
}

impl GeneratedTask {
    /// Build a fresh pending task. Checklist items start incomplete.
    pub fn new(parts: TaskParts, checklist: &[ChecklistItemDef], now: DateTime<Utc>) -> Self {
        let checklist: Vec<ChecklistItem> = checklist.iter().map(ChecklistItem::from).collect();
        let checklist_progress = ChecklistProgress::of(&checklist);
        Self {
            id: TaskId::new(),
            business_event_id: parts.business_event_id,
            template_id: parts.template_id,
            template_version: parts.template_version,
            title: parts.title,
            description: parts.description,
            category: parts.category,
            priority: parts.priority,
            status: TaskStatus::Pending,
            assignment: parts.assignment,
            due_date: parts.due_date,
            checklist,
            checklist_progress,
            source_module: parts.source_module,
            subsidiary: parts.subsidiary,
            entity_type: parts.entity_type,
            entity_id: parts.entity_id,
            entity_name: parts.entity_name,
            project_id: parts.project_id,
            project_name: parts.project_name,
            related_task_ids: Vec::new(),
            parent_task_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn checklist(&self) -> &[ChecklistItem] {
        &self.checklist
    }

    pub fn progress(&self) -> ChecklistProgress {
        self.checklist_progress
    }

    /// Mark one checklist item complete or incomplete and recompute progress.
    pub fn set_checklist_item(
        &mut self,
        item_id: &str,
        completed: bool,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let item = self
            .checklist
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| Error::NotFound(format!("checklist item {item_id} on task {}", self.id)))?;

        item.completed = completed;
        if completed {
            item.completed_at = Some(now);
            item.completed_by = actor.map(str::to_string);
        } else {
            item.completed_at = None;
            item.completed_by = None;
        }
        self.checklist_progress = ChecklistProgress::of(&self.checklist);
        self.updated_at = now;
        Ok(())
    }

    /// Move the task to a new status. Completion requires every required item done.
    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        if status == TaskStatus::Completed && self.checklist_progress.required_remaining > 0 {
            return Err(Error::Conflict(format!(
                "task {} has {} required checklist item(s) open",
                self.id, self.checklist_progress.required_remaining
            )));
        }
        self.status = status;
        self.completed_at = (status == TaskStatus::Completed).then_some(now);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task() -> GeneratedTask {
        let now = Utc.with_ymd_and_hms(2026, 1, 30, 9, 0, 0).unwrap();
        GeneratedTask::new(
            TaskParts {
                business_event_id: EventId::new(),
                template_id: "tpl".into(),
                template_version: 1,
                title: "t".into(),
                description: String::new(),
                category: "ops".into(),
                priority: TaskPriority::Medium,
                assignment: Assignment::unresolved(AssignmentStrategy::Creator),
                due_date: now,
                source_module: "inventory".into(),
                subsidiary: None,
                entity_type: "inventory_item".into(),
                entity_id: "sku-1".into(),
                entity_name: "Widget".into(),
                project_id: None,
                project_name: None,
            },
            &[
                ChecklistItemDef::required("a", "A"),
                ChecklistItemDef::required("b", "B"),
                ChecklistItemDef::optional("c", "C"),
            ],
            now,
        )
    }

    #[test]
    fn progress_recomputed_on_every_toggle() {
        let mut t = task();
        let now = t.created_at;
        assert_eq!(t.progress().percent, 0);
        assert_eq!(t.progress().required_remaining, 2);

        t.set_checklist_item("a", true, Some("u1"), now).unwrap();
        assert_eq!(t.progress().completed, 1);
        assert_eq!(t.progress().percent, 33);

        t.set_checklist_item("c", true, None, now).unwrap();
        assert_eq!(t.progress().percent, 66);
        assert_eq!(t.progress().required_remaining, 1);

        t.set_checklist_item("a", false, None, now).unwrap();
        assert_eq!(t.progress().percent, 33);
        assert!(t.checklist()[0].completed_by.is_none());
    }

    #[test]
    fn empty_checklist_progress_is_zero() {
        assert_eq!(ChecklistProgress::of(&[]).percent, 0);
    }

    #[test]
    fn completion_blocked_by_required_items() {
        let mut t = task();
        let now = t.created_at;
        assert!(matches!(t.set_status(TaskStatus::Completed, now), Err(Error::Conflict(_))));
        t.set_checklist_item("a", true, None, now).unwrap();
        t.set_checklist_item("b", true, None, now).unwrap();
        t.set_status(TaskStatus::Completed, now).unwrap();
        assert_eq!(t.completed_at, Some(now));
    }

    #[test]
    fn unknown_checklist_item_is_not_found() {
        let mut t = task();
        let now = t.created_at;
        assert!(matches!(t.set_checklist_item("zzz", true, None, now), Err(Error::NotFound(_))));
    }
}
