//! Task generator: instantiates matching templates for a persisted event.
//!
//! Generation is safe to repeat. A task that already exists for an
//! (event, template) pair is returned instead of being created again, and
//! the store's unique index backs the pre-check up.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::TemplateCatalog;
use crate::db::{Db, InsertResult};
use crate::error::{Error, Result};
use crate::model::event::BusinessEvent;
use crate::model::task::{Assignment, GeneratedTask, TaskId, TaskParts};
use crate::model::template::{AssignmentStrategy, TaskTemplate};
use crate::telemetry::metrics;

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// A concrete person a task can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Assignee {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// What a resolver is asked to assign.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentRequest<'a> {
    pub strategy: &'a AssignmentStrategy,
    pub template_id: &'a str,
    pub event: &'a BusinessEvent,
}

/// Resolves roles, departments, managers and project leads to people.
///
/// `Ok(None)` leaves the task unassigned. An error fails that template's
/// instantiation.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn resolve(&self, request: AssignmentRequest<'_>) -> Result<Option<Assignee>>;
}

/// Resolver that never assigns anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnresolvedRoles;

#[async_trait]
impl RoleResolver for UnresolvedRoles {
    async fn resolve(&self, _request: AssignmentRequest<'_>) -> Result<Option<Assignee>> {
        Ok(None)
    }
}

/// In-memory lookup tables, usually loaded from TOML.
///
/// Managers are keyed by source module, project leads by project id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDirectory {
    #[serde(default)]
    pub roles: HashMap<String, Assignee>,
    #[serde(default)]
    pub departments: HashMap<String, Assignee>,
    #[serde(default)]
    pub managers: HashMap<String, Assignee>,
    #[serde(default)]
    pub project_leads: HashMap<String, Assignee>,
    /// Display names for user ids.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl StaticDirectory {
    /// Read a directory from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad directory file {}: {e}", path.display())))
    }

    pub fn with_role(mut self, role: impl Into<String>, assignee: Assignee) -> Self {
        self.roles.insert(role.into(), assignee);
        self
    }

    pub fn with_department(mut self, department: impl Into<String>, assignee: Assignee) -> Self {
        self.departments.insert(department.into(), assignee);
        self
    }

    pub fn with_manager(mut self, module: impl Into<String>, assignee: Assignee) -> Self {
        self.managers.insert(module.into(), assignee);
        self
    }

    pub fn with_project_lead(mut self, project_id: impl Into<String>, assignee: Assignee) -> Self {
        self.project_leads.insert(project_id.into(), assignee);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        self.users.insert(user_id.into(), name.into());
        self
    }
}

#[async_trait]
impl RoleResolver for StaticDirectory {
    async fn resolve(&self, request: AssignmentRequest<'_>) -> Result<Option<Assignee>> {
        let event = request.event;
        let found = match request.strategy {
            AssignmentStrategy::Creator => event
                .triggered_by
                .as_ref()
                .map(|id| Assignee::new(id.clone(), self.users.get(id).cloned())),
            AssignmentStrategy::SpecificUser { user_id } => Some(Assignee::new(
                user_id.clone(),
                self.users.get(user_id).cloned(),
            )),
            AssignmentStrategy::SpecificRole { role } => self.roles.get(role).cloned(),
            AssignmentStrategy::Department { department } => {
                self.departments.get(department).cloned()
            }
            AssignmentStrategy::Manager => self.managers.get(&event.source_module).cloned(),
            AssignmentStrategy::ProjectLead => event
                .project_id
                .as_ref()
                .and_then(|p| self.project_leads.get(p))
                .cloned(),
        };
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

/// Replace `{{token}}` placeholders with event fields. Unknown tokens are an error.
pub fn interpolate(text: &str, event: &BusinessEvent) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(Error::Generation(format!("unclosed placeholder in {text:?}")));
        };
        let token = after[..end].trim();
        let value = match token {
            "entityName" => event.entity_name.clone(),
            "entityType" => event.entity_type.clone(),
            "entityId" => event.entity_id.clone(),
            "eventType" => event.event_type.clone(),
            "severity" => event.severity.to_string(),
            "sourceModule" => event.source_module.clone(),
            "projectName" => event.project_name.clone().unwrap_or_default(),
            other => {
                return Err(Error::Generation(format!("unknown placeholder {{{{{other}}}}}")));
            }
        };
        out.push_str(&value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// A template that could not be instantiated for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFailure {
    pub template_id: String,
    pub error: String,
}

/// Tasks produced for one event plus any per-template failures.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    pub tasks: Vec<GeneratedTask>,
    pub failures: Vec<TemplateFailure>,
}

impl GenerationOutcome {
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All failures joined into one message, for the event's error field.
    pub fn failure_message(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|f| format!("{}: {}", f.template_id, f.error))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

pub struct TaskGenerator {
    db: Arc<Db>,
    catalog: Arc<TemplateCatalog>,
    resolver: Arc<dyn RoleResolver>,
}

impl TaskGenerator {
    pub fn new(db: Arc<Db>, catalog: Arc<TemplateCatalog>, resolver: Arc<dyn RoleResolver>) -> Self {
        Self {
            db,
            catalog,
            resolver,
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Create (or find) one task per matching template.
    ///
    /// Every matching template is attempted; one failing does not stop the others
    /// and tasks already created are kept.
    pub async fn generate(&self, event: &BusinessEvent) -> Result<GenerationOutcome> {
        let mut outcome = GenerationOutcome::default();

        for template in self.catalog.matching_templates(event) {
            match self.generate_one(event, template).await {
                Ok(task) => outcome.tasks.push(task),
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        template_id = %template.id,
                        error = %e,
                        "template instantiation failed"
                    );
                    metrics::template_failures()
                        .add(1, &[KeyValue::new("template_id", template.id.clone())]);
                    outcome.failures.push(TemplateFailure {
                        template_id: template.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.link_siblings(&mut outcome).await;
        debug!(
            event_id = %event.id,
            tasks = outcome.tasks.len(),
            failures = outcome.failures.len(),
            "generation complete"
        );
        Ok(outcome)
    }

    async fn generate_one(
        &self,
        event: &BusinessEvent,
        template: &TaskTemplate,
    ) -> Result<GeneratedTask> {
        if let Some(existing) = self.db.find_task_for(event.id, &template.id).await? {
            debug!(task_id = %existing.id, template_id = %template.id, "task already generated");
            return Ok(existing);
        }

        let task = self.instantiate(event, template).await?;
        match self.db.insert_task(&task).await? {
            InsertResult::Inserted(task) => {
                metrics::tasks_generated()
                    .add(1, &[KeyValue::new("template_id", template.id.clone())]);
                Ok(*task)
            }
            InsertResult::Existing(task) => Ok(*task),
        }
    }

    /// Build an unsaved task from a template for an event.
    pub async fn instantiate(
        &self,
        event: &BusinessEvent,
        template: &TaskTemplate,
    ) -> Result<GeneratedTask> {
        let title = interpolate(&template.default_title, event)?;
        if title.trim().is_empty() {
            return Err(Error::Generation(format!(
                "template {} renders an empty title",
                template.id
            )));
        }
        let description = interpolate(&template.default_description, event)?;
        let assignment = self.assign(event, template).await?;
        let due_date = event.triggered_at + Duration::days(i64::from(template.default_due_days));

        Ok(GeneratedTask::new(
            TaskParts {
                business_event_id: event.id,
                template_id: template.id.clone(),
                template_version: template.version,
                title,
                description,
                category: template.category.clone(),
                priority: template.default_priority,
                assignment,
                due_date,
                source_module: event.source_module.clone(),
                subsidiary: event.subsidiary.clone().or_else(|| template.subsidiary.clone()),
                entity_type: event.entity_type.clone(),
                entity_id: event.entity_id.clone(),
                entity_name: event.entity_name.clone(),
                project_id: event.project_id.clone(),
                project_name: event.project_name.clone(),
            },
            &template.checklist,
            self.db.now(),
        ))
    }

    async fn assign(&self, event: &BusinessEvent, template: &TaskTemplate) -> Result<Assignment> {
        let strategy = &template.assignment;
        if let AssignmentStrategy::Creator = strategy {
            return Ok(Assignment {
                strategy: strategy.clone(),
                assignee_id: event.triggered_by.clone(),
                assignee_name: None,
            });
        }

        let resolved = self
            .resolver
            .resolve(AssignmentRequest {
                strategy,
                template_id: &template.id,
                event,
            })
            .await
            .map_err(|e| Error::Generation(format!("cannot resolve {strategy}: {e}")))?;

        Ok(match resolved {
            Some(assignee) => Assignment {
                strategy: strategy.clone(),
                assignee_id: Some(assignee.id),
                assignee_name: assignee.name,
            },
            None => Assignment::unresolved(strategy.clone()),
        })
    }

    /// Point every task of the same event at its siblings.
    ///
    /// A task whose link cannot be stored counts as a failure of its template;
    /// the task itself is kept.
    async fn link_siblings(&self, outcome: &mut GenerationOutcome) {
        if outcome.tasks.len() < 2 {
            return;
        }
        let ids: Vec<TaskId> = outcome.tasks.iter().map(|t| t.id).collect();
        let now = self.db.now();
        for task in outcome.tasks.iter_mut() {
            let mut related: Vec<TaskId> = ids.iter().copied().filter(|id| *id != task.id).collect();
            related.sort();
            let mut current = task.related_task_ids.clone();
            current.sort();
            if current == related {
                continue;
            }

            let mut linked = task.clone();
            linked.related_task_ids = related;
            linked.updated_at = now;
            match self.db.update_task(&linked).await {
                Ok(()) => *task = linked,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "linking related tasks failed");
                    outcome.failures.push(TemplateFailure {
                        template_id: task.template_id.clone(),
                        error: format!("linking related tasks: {e}"),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Pipeline;
    use crate::model::event::{DraftEvent, EventId, EventStatus};
    use crate::model::pattern::{EventCategory, Severity};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn draft() -> DraftEvent {
        DraftEvent {
            event_type: "deal_stage_changed".into(),
            category: EventCategory::StatusChange,
            severity: Severity::Medium,
            source_module: "pipeline".into(),
            subsidiary: None,
            entity_type: "deal".into(),
            entity_id: "d-7".into(),
            entity_name: "Northwind renewal".into(),
            project_id: Some("p-1".into()),
            project_name: Some("Renewals".into()),
            title: "t".into(),
            description: String::new(),
            previous_state: Some(json!({"stage": "qualified"})),
            current_state: json!({"stage": "negotiation"}),
            changed_fields: vec!["stage".into()],
            triggered_by: Some("u-42".into()),
            dedup_key: None,
        }
    }

    fn event() -> BusinessEvent {
        BusinessEvent::from_draft(
            EventId::new(),
            draft(),
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn interpolates_known_tokens() {
        let text = interpolate("{{ entityName }} ({{eventType}}, {{severity}}) in {{projectName}}", &event())
            .unwrap();
        assert_eq!(text, "Northwind renewal (deal_stage_changed, medium) in Renewals");
    }

    #[test]
    fn unknown_token_is_a_generation_error() {
        assert!(matches!(interpolate("{{owner}}", &event()), Err(Error::Generation(_))));
        assert!(matches!(interpolate("{{entityName", &event()), Err(Error::Generation(_))));
    }

    #[tokio::test]
    async fn directory_resolves_by_strategy() {
        let directory = StaticDirectory::default()
            .with_role("engagement_lead", Assignee::new("u-1", Some("Ada".into())))
            .with_manager("pipeline", Assignee::new("u-9", None))
            .with_user("u-42", "Grace");
        let event = event();
        let ask = |strategy: &AssignmentStrategy| {
            let strategy = strategy.clone();
            let directory = directory.clone();
            let event = event.clone();
            async move {
                directory
                    .resolve(AssignmentRequest {
                        strategy: &strategy,
                        template_id: "t",
                        event: &event,
                    })
                    .await
                    .unwrap()
            }
        };

        let lead = ask(&AssignmentStrategy::SpecificRole { role: "engagement_lead".into() }).await;
        assert_eq!(lead.unwrap().name.as_deref(), Some("Ada"));
        assert_eq!(ask(&AssignmentStrategy::Manager).await.unwrap().id, "u-9");
        assert_eq!(ask(&AssignmentStrategy::Creator).await.unwrap().name.as_deref(), Some("Grace"));
        assert!(ask(&AssignmentStrategy::ProjectLead).await.is_none());
    }

    /// Two builtin-shaped templates for `deal_stage_changed` over a store whose
    /// task rows reject updates.
    async fn frozen_task_store() -> (Arc<Db>, TaskGenerator) {
        let db = Db::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        sqlx::query(
            "CREATE TRIGGER generated_tasks_frozen BEFORE UPDATE ON generated_tasks \
             BEGIN SELECT RAISE(ABORT, 'generated tasks are frozen'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();
        let db = Arc::new(db);

        let followup = TemplateCatalog::builtin()
            .get("deal_stage_followup")
            .cloned()
            .unwrap();
        let mut briefing = followup.clone();
        briefing.id = "deal_stage_briefing".into();
        let catalog = TemplateCatalog::from_templates([followup, briefing]).unwrap();
        let generator = TaskGenerator::new(Arc::clone(&db), Arc::new(catalog), Arc::new(UnresolvedRoles));
        (db, generator)
    }

    #[tokio::test]
    async fn failed_sibling_links_keep_the_created_tasks() {
        let (db, generator) = frozen_task_store().await;
        let event = db.create_event(draft()).await.unwrap().into_event();

        let outcome = generator.generate(&event).await.unwrap();
        assert_eq!(outcome.tasks.len(), 2);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures[0].error.starts_with("linking related tasks"));
        assert_eq!(db.tasks_for_event(event.id).await.unwrap().len(), 2);

        let pipeline = Pipeline::new(Arc::clone(&db), Arc::new(generator));
        let (settled, tasks) = pipeline.run(event).await.unwrap();
        assert_eq!(settled.status, EventStatus::Failed);
        assert_eq!(tasks.len(), 2);
        let mut recorded = settled.generated_task_ids.clone();
        recorded.sort();
        let mut created: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        created.sort();
        assert_eq!(recorded, created);
    }
}
