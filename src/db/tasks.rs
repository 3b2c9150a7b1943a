//! Generated task persistence. At most one task per (event, template).

use super::timestamp;
use crate::error::{Error, Result};
use crate::model::event::EventId;
use crate::model::task::{GeneratedTask, TaskId, TaskStatus};

/// Result of inserting a task.
#[derive(Debug)]
pub enum InsertResult {
    Inserted(Box<GeneratedTask>),
    /// A task for the same event and template already exists; it is returned untouched.
    Existing(Box<GeneratedTask>),
}

impl InsertResult {
    pub fn into_task(self) -> GeneratedTask {
        match self {
            InsertResult::Inserted(task) | InsertResult::Existing(task) => *task,
        }
    }
}

const SELECT_DOCUMENT: &str = "SELECT document FROM generated_tasks";

impl super::Db {
    /// The task already generated for this event and template, if any.
    pub async fn find_task_for(
        &self,
        event_id: EventId,
        template_id: &str,
    ) -> Result<Option<GeneratedTask>> {
        let document: Option<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE business_event_id = ? AND template_id = ?"
        ))
        .bind(event_id.to_string())
        .bind(template_id)
        .fetch_optional(self.pool())
        .await?;
        document
            .map(|d| serde_json::from_str(&d).map_err(Error::from))
            .transpose()
    }

    /// Insert a task unless one exists for its (event, template) pair.
    pub async fn insert_task(&self, task: &GeneratedTask) -> Result<InsertResult> {
        let rows_affected = sqlx::query(
            "INSERT INTO generated_tasks (id, business_event_id, template_id, status, entity_type, entity_id, project_id, assignee_id, due_date, created_at, document)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(task.id.to_string())
        .bind(task.business_event_id.to_string())
        .bind(&task.template_id)
        .bind(task.status.to_string())
        .bind(&task.entity_type)
        .bind(&task.entity_id)
        .bind(&task.project_id)
        .bind(&task.assignment.assignee_id)
        .bind(timestamp(&task.due_date))
        .bind(timestamp(&task.created_at))
        .bind(serde_json::to_string(task)?)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let existing = self
                .find_task_for(task.business_event_id, &task.template_id)
                .await?
                .ok_or_else(|| Error::Conflict(format!("task {} could not be stored", task.id)))?;
            return Ok(InsertResult::Existing(Box::new(existing)));
        }
        Ok(InsertResult::Inserted(Box::new(task.clone())))
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: TaskId) -> Result<GeneratedTask> {
        let document: Option<String> = sqlx::query_scalar(&format!("{SELECT_DOCUMENT} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        let document = document.ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        Ok(serde_json::from_str(&document)?)
    }

    /// Replace a stored task with its updated form.
    pub async fn update_task(&self, task: &GeneratedTask) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE generated_tasks SET status = ?, assignee_id = ?, due_date = ?, document = ? WHERE id = ?",
        )
        .bind(task.status.to_string())
        .bind(&task.assignment.assignee_id)
        .bind(timestamp(&task.due_date))
        .bind(serde_json::to_string(task)?)
        .bind(task.id.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    /// Tasks generated for one event, in creation order.
    pub async fn tasks_for_event(&self, event_id: EventId) -> Result<Vec<GeneratedTask>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE business_event_id = ? ORDER BY created_at, rowid"
        ))
        .bind(event_id.to_string())
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Tasks about one entity, newest first.
    pub async fn tasks_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<GeneratedTask>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE entity_type = ? AND entity_id = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Tasks linked to one project, newest first.
    pub async fn tasks_for_project(&self, project_id: &str) -> Result<Vec<GeneratedTask>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE project_id = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(project_id)
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }

    /// Open tasks assigned to one user, soonest due first.
    pub async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<GeneratedTask>> {
        let documents: Vec<String> = sqlx::query_scalar(&format!(
            "{SELECT_DOCUMENT} WHERE assignee_id = ? AND status IN (?, ?) ORDER BY due_date, rowid"
        ))
        .bind(user_id)
        .bind(TaskStatus::Pending.to_string())
        .bind(TaskStatus::InProgress.to_string())
        .fetch_all(self.pool())
        .await?;
        decode_all(documents)
    }
}

fn decode_all(documents: Vec<String>) -> Result<Vec<GeneratedTask>> {
    documents
        .iter()
        .map(|d| serde_json::from_str(d).map_err(Error::from))
        .collect()
}
