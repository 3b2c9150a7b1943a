//! Template catalog: task templates indexed by id, selected by event type.

mod builtin;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::event::BusinessEvent;
use crate::model::template::TaskTemplate;
use crate::registry::read_catalog_dir;

/// Immutable set of task templates. Iteration order is by template id.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, TaskTemplate>,
}

impl TemplateCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The templates shipped with taskwire.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for template in builtin::templates() {
            catalog.templates.insert(template.id.clone(), template);
        }
        catalog
    }

    pub fn from_templates(templates: impl IntoIterator<Item = TaskTemplate>) -> Result<Self> {
        let mut catalog = Self::empty();
        for template in templates {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    /// Builtin templates with every template from `dir` merged over them by id.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::builtin();
        for (_, file) in read_catalog_dir(dir)? {
            for template in file.templates {
                catalog.insert(template)?;
            }
        }
        Ok(catalog)
    }

    /// Add or replace a template.
    pub fn insert(&mut self, template: TaskTemplate) -> Result<()> {
        validate(&template)?;
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn get(&self, template_id: &str) -> Option<&TaskTemplate> {
        self.templates.get(template_id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &TaskTemplate> {
        self.templates.values()
    }

    /// Active templates whose trigger events include `event_type`.
    pub fn templates_for_event_type(&self, event_type: &str) -> Vec<&TaskTemplate> {
        self.templates
            .values()
            .filter(|t| t.active && t.trigger_events.contains(event_type))
            .collect()
    }

    /// Active templates for the event's type whose trigger conditions all hold.
    pub fn matching_templates(&self, event: &BusinessEvent) -> Vec<&TaskTemplate> {
        let view = event.condition_view();
        self.templates_for_event_type(&event.event_type)
            .into_iter()
            .filter(|t| t.applies_to(&event.event_type, &view))
            .collect()
    }
}

fn validate(template: &TaskTemplate) -> Result<()> {
    if template.id.trim().is_empty() {
        return Err(Error::Config("template id must not be empty".to_string()));
    }
    if template.trigger_events.is_empty() {
        return Err(Error::Config(format!(
            "template {} has no trigger events",
            template.id
        )));
    }
    let mut seen = HashSet::new();
    for item in &template.checklist {
        if !seen.insert(item.id.as_str()) {
            return Err(Error::Config(format!(
                "template {}: duplicate checklist item {}",
                template.id, item.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_are_valid() {
        let catalog = TemplateCatalog::builtin();
        for template in catalog.templates() {
            validate(template).unwrap();
        }
        assert_eq!(catalog.templates_for_event_type("engagement_created").len(), 1);
        assert!(catalog.templates_for_event_type("nothing").is_empty());
    }

    #[test]
    fn inactive_templates_are_never_selected() {
        let mut template = TemplateCatalog::builtin()
            .get("engagement_kickoff")
            .cloned()
            .unwrap();
        template.active = false;
        let catalog = TemplateCatalog::from_templates([template]).unwrap();
        assert!(catalog.templates_for_event_type("engagement_created").is_empty());
    }

    #[test]
    fn directory_templates_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sla.toml"),
            r#"
            [[templates]]
            id = "sla_breach_postmortem"
            name = "SLA breach postmortem"
            category = "support"
            trigger_events = ["sla_status_changed"]
            default_title = "Postmortem: {{entityName}}"
            default_priority = "high"
            default_due_days = 5
            source_module = "service_desk"
            assignment = { strategy = "specific_role", role = "support_lead" }

            [[templates.trigger_conditions]]
            field = "currentState.sla.status"
            operator = "equals"
            value = "breached"

            [[templates.checklist]]
            id = "timeline"
            title = "Write the incident timeline"
            required = true
            "#,
        )
        .unwrap();

        let catalog = TemplateCatalog::load_from_dir(dir.path()).unwrap();
        let template = catalog.get("sla_breach_postmortem").unwrap();
        assert_eq!(template.version, 1);
        assert!(template.active);
        assert_eq!(template.default_due_days, 5);
        assert_eq!(template.checklist.len(), 1);
        assert!(catalog.get("engagement_kickoff").is_some());
    }
}
