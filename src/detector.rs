//! Event detector: compares entity snapshots against the pattern registry.
//!
//! Detection is pure. It never touches storage; it turns one observed change
//! into zero or more draft events for the pipeline to persist.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::event::DraftEvent;
use crate::model::pattern::{DetectionRule, EventCategory, EventPattern, Severity};
use crate::model::value::{Value, canonical_json, display, resolve, resolve_in, values_equal};
use crate::registry::{ModuleDefinition, PatternRegistry};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One observed change to an entity owned by a module.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    pub source_module: String,
    pub subsidiary: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    /// `None` means the entity did not exist before this change.
    pub previous: Option<Value>,
    pub current: Value,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub actor: Option<String>,
}

impl EntityChange {
    pub fn new(
        source_module: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        current: Value,
    ) -> Self {
        Self {
            source_module: source_module.into(),
            subsidiary: None,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            previous: None,
            current,
            project_id: None,
            project_name: None,
            actor: None,
        }
    }

    pub fn previous(mut self, previous: Value) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn subsidiary(mut self, subsidiary: impl Into<String>) -> Self {
        self.subsidiary = Some(subsidiary.into());
        self
    }

    pub fn project(mut self, project_id: impl Into<String>, project_name: Option<String>) -> Self {
        self.project_id = Some(project_id.into());
        self.project_name = project_name;
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Optional details for a manually triggered event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerContext {
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub subsidiary: Option<String>,
    pub actor: Option<String>,
    /// Overrides the pattern's severity ladder.
    pub severity: Option<Severity>,
    pub previous_state: Option<Value>,
    pub current_state: Option<Value>,
    pub changed_fields: Vec<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// A request to synthesize an event without snapshot diffing.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualEvent {
    pub module: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub context: TriggerContext,
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

/// What a description function sees.
pub struct Narration<'a> {
    pub event_type: &'a str,
    pub entity_type: &'a str,
    pub entity_name: &'a str,
    pub field_path: Option<&'a str>,
    pub previous: Option<&'a Value>,
    pub current: Option<&'a Value>,
    pub severity: Severity,
    pub changed_fields: &'a [String],
}

/// Title and description of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narrative {
    pub title: String,
    pub description: String,
}

pub type DescribeFn = fn(&Narration<'_>) -> Narrative;

fn humanize(s: &str) -> String {
    s.replace('_', " ")
}

fn generic(n: &Narration<'_>) -> Narrative {
    Narrative {
        title: format!("{} updated", n.entity_name),
        description: format!("Fields changed: {}", n.changed_fields.join(", ")),
    }
}

fn transition(n: &Narration<'_>, what: &str) -> Narrative {
    Narrative {
        title: format!("{} {what} changed", n.entity_name),
        description: format!(
            "{} {} {what} changed from {} to {}.",
            humanize(n.entity_type),
            n.entity_name,
            display(n.previous),
            display(n.current)
        ),
    }
}

fn builtin_describers() -> HashMap<String, DescribeFn> {
    let mut table: HashMap<String, DescribeFn> = HashMap::new();
    table.insert("engagement_created".into(), |n| Narrative {
        title: format!("New engagement: {}", n.entity_name),
        description: format!("Engagement {} was created.", n.entity_name),
    });
    table.insert("engagement_status_changed".into(), |n| transition(n, "status"));
    table.insert("deal_stage_changed".into(), |n| transition(n, "stage"));
    table.insert("deal_value_changed".into(), |n| transition(n, "value"));
    table.insert("stock_low".into(), |n| Narrative {
        title: format!("Low stock: {}", n.entity_name),
        description: format!(
            "Stock level for {} moved from {} to {} ({} severity).",
            n.entity_name,
            display(n.previous),
            display(n.current),
            n.severity
        ),
    });
    table.insert("stock_reorder_required".into(), |n| Narrative {
        title: format!("Reorder required: {}", n.entity_name),
        description: format!(
            "{} is at {} units and needs replenishing.",
            n.entity_name,
            display(n.current)
        ),
    });
    table.insert("budget_threshold_crossed".into(), |n| Narrative {
        title: format!("Budget threshold crossed: {}", n.entity_name),
        description: format!(
            "Utilization of {} moved from {}% to {}%.",
            n.entity_name,
            display(n.previous),
            display(n.current)
        ),
    });
    table.insert("sla_status_changed".into(), |n| Narrative {
        title: format!("SLA {}: {}", display(n.current), n.entity_name),
        description: format!(
            "SLA status for {} changed from {} to {}.",
            n.entity_name,
            display(n.previous),
            display(n.current)
        ),
    });
    table.insert("ticket_created".into(), |n| Narrative {
        title: format!("New ticket: {}", n.entity_name),
        description: format!("Ticket {} opened with {} priority.", n.entity_name, display(n.current)),
    });
    table
}

/// Stable fingerprint over the parts of a change.
fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Turns entity changes into draft events.
pub struct EventDetector {
    registry: Arc<PatternRegistry>,
    describers: HashMap<String, DescribeFn>,
}

impl EventDetector {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self {
            registry,
            describers: builtin_describers(),
        }
    }

    /// Register (or replace) the description function for an event type.
    pub fn with_describer(mut self, event_type: impl Into<String>, describe: DescribeFn) -> Self {
        self.describers.insert(event_type.into(), describe);
        self
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Evaluate every pattern of the change's module. Several patterns may fire at once.
    pub fn detect(&self, change: &EntityChange) -> Result<Vec<DraftEvent>> {
        if !change.current.is_object() {
            return Err(Error::Detection(format!(
                "current snapshot of {} {} is not a map",
                change.entity_type, change.entity_id
            )));
        }
        if change.previous.as_ref().is_some_and(|p| !p.is_object()) {
            return Err(Error::Detection(format!(
                "previous snapshot of {} {} is not a map",
                change.entity_type, change.entity_id
            )));
        }

        let Some(module) = self.registry.module(&change.source_module) else {
            debug!(module = %change.source_module, "no patterns registered for module");
            return Ok(Vec::new());
        };

        let drafts: Vec<DraftEvent> = module
            .patterns
            .iter()
            .filter_map(|pattern| self.evaluate(module, pattern, change))
            .collect();

        debug!(
            module = %change.source_module,
            entity_id = %change.entity_id,
            detected = drafts.len(),
            "detection complete"
        );
        Ok(drafts)
    }

    fn evaluate(
        &self,
        module: &ModuleDefinition,
        pattern: &EventPattern,
        change: &EntityChange,
    ) -> Option<DraftEvent> {
        let previous = change.previous.as_ref();
        let (prev_value, curr_value, changed_fields) = match &pattern.detection {
            DetectionRule::Created { field_path } => {
                if previous.is_some() {
                    return None;
                }
                let current = match field_path {
                    Some(path) => resolve(&change.current, path),
                    None => Some(&change.current),
                };
                (None, current, top_level_keys(&change.current))
            }
            DetectionRule::FieldChanged { field_path } => {
                let before = resolve_in(previous, field_path);
                let after = resolve(&change.current, field_path);
                let unchanged = match (before, after) {
                    (Some(b), Some(a)) => values_equal(b, a),
                    (None, None) => true,
                    _ => false,
                };
                if previous.is_none() || unchanged {
                    return None;
                }
                (before, after, vec![field_path.clone()])
            }
        };

        let severity = pattern.severity.grade(prev_value, curr_value);
        let narrative = self.narrate(&Narration {
            event_type: &pattern.event_type,
            entity_type: &change.entity_type,
            entity_name: &change.entity_name,
            field_path: pattern.detection.field_path(),
            previous: prev_value,
            current: curr_value,
            severity,
            changed_fields: &changed_fields,
        });

        let prev_text = previous.map_or_else(|| "undefined".to_string(), canonical_json);
        let curr_text = canonical_json(&change.current);
        let dedup_key = fingerprint(&[
            &change.source_module,
            &change.entity_type,
            &change.entity_id,
            &pattern.event_type,
            &prev_text,
            &curr_text,
        ]);

        Some(DraftEvent {
            event_type: pattern.event_type.clone(),
            category: pattern.category,
            severity,
            source_module: change.source_module.clone(),
            subsidiary: change.subsidiary.clone().or_else(|| module.subsidiary.clone()),
            entity_type: change.entity_type.clone(),
            entity_id: change.entity_id.clone(),
            entity_name: change.entity_name.clone(),
            project_id: change.project_id.clone(),
            project_name: change.project_name.clone(),
            title: narrative.title,
            description: narrative.description,
            previous_state: change.previous.clone(),
            current_state: change.current.clone(),
            changed_fields,
            triggered_by: change.actor.clone(),
            dedup_key: Some(dedup_key),
        })
    }

    /// Build a draft for a manually triggered event. The module must be registered;
    /// the event type need not have a pattern.
    pub fn synthesize(&self, request: ManualEvent) -> Result<DraftEvent> {
        let module = self
            .registry
            .module(&request.module)
            .ok_or_else(|| Error::NotFound(format!("module {}", request.module)))?;
        let ctx = request.context;
        let current = ctx
            .current_state
            .unwrap_or_else(|| Value::Object(Default::default()));
        let previous = ctx.previous_state;

        let pattern = module
            .patterns
            .iter()
            .find(|p| p.event_type == request.event_type);
        let field_path = pattern.and_then(|p| p.detection.field_path());
        let (prev_value, curr_value) = match field_path {
            Some(path) => (resolve_in(previous.as_ref(), path), resolve(&current, path)),
            None => (previous.as_ref(), Some(&current)),
        };

        let (category, severity) = match pattern {
            Some(p) => (
                p.category,
                ctx.severity
                    .unwrap_or_else(|| p.severity.grade(prev_value, curr_value)),
            ),
            None => (EventCategory::Manual, ctx.severity.unwrap_or(Severity::Medium)),
        };

        let narrative = self.narrate(&Narration {
            event_type: &request.event_type,
            entity_type: &request.entity_type,
            entity_name: &request.entity_name,
            field_path,
            previous: prev_value,
            current: curr_value,
            severity,
            changed_fields: &ctx.changed_fields,
        });

        Ok(DraftEvent {
            event_type: request.event_type,
            category,
            severity,
            source_module: request.module,
            subsidiary: ctx.subsidiary.or_else(|| module.subsidiary.clone()),
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            entity_name: request.entity_name,
            project_id: ctx.project_id,
            project_name: ctx.project_name,
            title: ctx.title.unwrap_or(narrative.title),
            description: ctx.description.unwrap_or(narrative.description),
            previous_state: previous,
            current_state: current,
            changed_fields: ctx.changed_fields,
            triggered_by: ctx.actor,
            dedup_key: None,
        })
    }

    fn narrate(&self, narration: &Narration<'_>) -> Narrative {
        match self.describers.get(narration.event_type) {
            Some(describe) => describe(narration),
            None => generic(narration),
        }
    }
}

fn top_level_keys(value: &Value) -> Vec<String> {
    let mut keys: Vec<String> = value
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> EventDetector {
        EventDetector::new(Arc::new(PatternRegistry::builtin()))
    }

    #[test]
    fn created_only_fires_without_previous() {
        let d = detector();
        let created = EntityChange::new("engagements", "engagement", "e1", "Acme", json!({"name": "Acme"}));
        let drafts = d.detect(&created).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].event_type, "engagement_created");

        let updated = created.previous(json!({"name": "Acme"}));
        assert!(d.detect(&updated).unwrap().is_empty());
    }

    #[test]
    fn unchanged_field_does_not_fire() {
        let change = EntityChange::new("pipeline", "deal", "d1", "Big deal", json!({"stage": "qualified", "value": 10}))
            .previous(json!({"value": 10, "stage": "qualified"}));
        assert!(detector().detect(&change).unwrap().is_empty());
    }

    #[test]
    fn map_values_compare_structurally() {
        let change = EntityChange::new(
            "service_desk",
            "ticket",
            "t1",
            "Printer",
            json!({"sla": {"status": "ok", "hours": 4}}),
        )
        .previous(json!({"sla": {"hours": 4, "status": "ok"}}));
        assert!(detector().detect(&change).unwrap().is_empty());
    }

    #[test]
    fn nested_field_change_fires_with_path() {
        let change = EntityChange::new("service_desk", "ticket", "t1", "Printer", json!({"sla": {"status": "breached"}}))
            .previous(json!({"sla": {"status": "at_risk"}}));
        let drafts = detector().detect(&change).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].event_type, "sla_status_changed");
        assert_eq!(drafts[0].severity, Severity::Critical);
        assert_eq!(drafts[0].changed_fields, vec!["sla.status".to_string()]);
        assert_eq!(drafts[0].title, "SLA breached: Printer");
    }

    #[test]
    fn reserialized_number_is_not_a_change() {
        let change = EntityChange::new("finance", "budget", "b1", "Q3", json!({"utilization": 80.0}))
            .previous(json!({"utilization": 80}));
        assert!(detector().detect(&change).unwrap().is_empty());

        let registry = PatternRegistry::from_modules([ModuleDefinition {
            id: "service_desk".into(),
            subsidiary: None,
            collections: vec![],
            patterns: vec![EventPattern::field_changed("sla_changed", EventCategory::Compliance, "sla")],
        }])
        .unwrap();
        let nested = EntityChange::new("service_desk", "ticket", "t1", "Printer", json!({"sla": {"status": "ok", "hours": [4.0, 8]}}))
            .previous(json!({"sla": {"hours": [4, 8.0], "status": "ok"}}));
        assert!(EventDetector::new(Arc::new(registry)).detect(&nested).unwrap().is_empty());
    }

    #[test]
    fn field_removed_counts_as_change() {
        let change = EntityChange::new("finance", "budget", "b1", "Q3", json!({}))
            .previous(json!({"utilization": 50}));
        let drafts = detector().detect(&change).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].severity, Severity::Low);
    }

    #[test]
    fn non_map_snapshot_is_a_detection_error() {
        let change = EntityChange::new("inventory", "inventory_item", "i1", "Bolt", json!([1, 2]));
        assert!(matches!(detector().detect(&change), Err(Error::Detection(_))));
    }

    #[test]
    fn unknown_module_detects_nothing() {
        let change = EntityChange::new("hr", "employee", "p1", "Sam", json!({"name": "Sam"}));
        assert!(detector().detect(&change).unwrap().is_empty());
    }

    #[test]
    fn dedup_key_is_stable_across_key_order() {
        let a: Value = serde_json::from_str(r#"{"name":"Acme","tier":1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"tier":1,"name":"Acme"}"#).unwrap();
        let d = detector();
        let ka = d.detect(&EntityChange::new("engagements", "engagement", "e1", "Acme", a)).unwrap();
        let kb = d.detect(&EntityChange::new("engagements", "engagement", "e1", "Acme", b)).unwrap();
        assert_eq!(ka[0].dedup_key, kb[0].dedup_key);
    }

    #[test]
    fn generic_description_names_changed_fields() {
        let registry = PatternRegistry::from_modules([ModuleDefinition {
            id: "hr".into(),
            subsidiary: None,
            collections: vec![],
            patterns: vec![EventPattern::field_changed("title_changed", EventCategory::StatusChange, "title")],
        }])
        .unwrap();
        let d = EventDetector::new(Arc::new(registry));
        let change = EntityChange::new("hr", "employee", "p1", "Sam", json!({"title": "Lead"}))
            .previous(json!({"title": "Engineer"}));
        let drafts = d.detect(&change).unwrap();
        assert_eq!(drafts[0].title, "Sam updated");
        assert_eq!(drafts[0].description, "Fields changed: title");
    }

    #[test]
    fn synthesize_uses_pattern_category_and_ladder() {
        let draft = detector()
            .synthesize(ManualEvent {
                module: "inventory".into(),
                event_type: "stock_low".into(),
                entity_type: "inventory_item".into(),
                entity_id: "sku-9".into(),
                entity_name: "Hinge".into(),
                context: TriggerContext {
                    current_state: Some(json!({"stockLevel": 0})),
                    ..Default::default()
                },
            })
            .unwrap();
        assert_eq!(draft.category, EventCategory::Threshold);
        assert_eq!(draft.severity, Severity::Critical);
        assert!(draft.dedup_key.is_none());
    }

    #[test]
    fn synthesize_rejects_unknown_module() {
        let result = detector().synthesize(ManualEvent {
            module: "nope".into(),
            event_type: "x".into(),
            entity_type: "y".into(),
            entity_id: "1".into(),
            entity_name: "z".into(),
            context: TriggerContext::default(),
        });
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
