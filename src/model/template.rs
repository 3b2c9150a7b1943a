//! Task templates: versioned checklist definitions triggered by event types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::task::TaskPriority;
use super::value::{Value, as_number, resolve, values_equal};

/// A reusable, versioned definition of a follow-up task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub name: String,
    /// Task category (e.g. "inventory", "sales").
    pub category: String,
    /// Event types that select this template.
    pub trigger_events: BTreeSet<String>,
    /// ANDed conditions over the event. Empty means always applicable.
    #[serde(default)]
    pub trigger_conditions: Vec<TriggerCondition>,
    pub default_title: String,
    #[serde(default)]
    pub default_description: String,
    #[serde(default)]
    pub default_priority: TaskPriority,
    pub default_due_days: u32,
    #[serde(default)]
    pub checklist: Vec<ChecklistItemDef>,
    pub assignment: AssignmentStrategy,
    pub source_module: String,
    #[serde(default)]
    pub subsidiary: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_active() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl TaskTemplate {
    /// Does this template apply to an event? `view` is the event as camelCase JSON.
    pub fn applies_to(&self, event_type: &str, view: &Value) -> bool {
        self.active
            && self.trigger_events.contains(event_type)
            && self.trigger_conditions.iter().all(|c| c.evaluate(view))
    }
}

// ---------------------------------------------------------------------------
// Trigger conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
}

/// A predicate over a dot-path into the event (`"currentState.status"`, `"severity"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl TriggerCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate against the event view. An undefined field only satisfies
    /// `not_equals` and `not_in`.
    pub fn evaluate(&self, view: &Value) -> bool {
        let Some(actual) = resolve(view, &self.field) else {
            return matches!(
                self.operator,
                ConditionOperator::NotEquals | ConditionOperator::NotIn
            );
        };
        match self.operator {
            ConditionOperator::Equals => values_equal(actual, &self.value),
            ConditionOperator::NotEquals => !values_equal(actual, &self.value),
            ConditionOperator::Contains => contains(actual, &self.value),
            ConditionOperator::GreaterThan => compare(actual, &self.value, |a, b| a > b),
            ConditionOperator::LessThan => compare(actual, &self.value, |a, b| a < b),
            ConditionOperator::In => in_list(actual, &self.value),
            ConditionOperator::NotIn => !in_list(actual, &self.value),
        }
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(haystack) => needle.as_str().is_some_and(|n| haystack.contains(n)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

fn compare(actual: &Value, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn in_list(actual: &Value, list: &Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(item, actual)))
}

// ---------------------------------------------------------------------------
// Checklist and assignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItemDef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub required: bool,
    /// What a reviewer checks before accepting the item as done.
    #[serde(default)]
    pub verification: Option<String>,
}

impl ChecklistItemDef {
    pub fn required(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            required: true,
            verification: None,
        }
    }

    pub fn optional(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(id, title)
        }
    }

    pub fn verified_by(mut self, criteria: impl Into<String>) -> Self {
        self.verification = Some(criteria.into());
        self
    }
}

/// Who a generated task goes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Whoever triggered the event.
    Creator,
    ProjectLead,
    SpecificRole { role: String },
    SpecificUser { user_id: String },
    Manager,
    Department { department: String },
}

impl std::fmt::Display for AssignmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentStrategy::Creator => write!(f, "creator"),
            AssignmentStrategy::ProjectLead => write!(f, "project_lead"),
            AssignmentStrategy::SpecificRole { role } => write!(f, "specific_role:{role}"),
            AssignmentStrategy::SpecificUser { user_id } => write!(f, "specific_user:{user_id}"),
            AssignmentStrategy::Manager => write!(f, "manager"),
            AssignmentStrategy::Department { department } => write!(f, "department:{department}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view() -> Value {
        json!({
            "eventType": "sla_status_changed",
            "severity": "critical",
            "currentState": {"status": "breached", "hours": 30, "tags": ["vip", "emea"]},
            "previousState": {"status": "at_risk"}
        })
    }

    #[test]
    fn equals_on_nested_state() {
        let c = TriggerCondition::new("currentState.status", ConditionOperator::Equals, json!("breached"));
        assert!(c.evaluate(&view()));
        let c = TriggerCondition::new("previousState.status", ConditionOperator::Equals, json!("breached"));
        assert!(!c.evaluate(&view()));
    }

    #[test]
    fn missing_field_only_satisfies_negations() {
        let v = view();
        let missing = |op| TriggerCondition::new("currentState.owner", op, json!("x")).evaluate(&v);
        assert!(!missing(ConditionOperator::Equals));
        assert!(missing(ConditionOperator::NotEquals));
        assert!(!missing(ConditionOperator::In));
        assert!(missing(ConditionOperator::NotIn));
        assert!(!missing(ConditionOperator::GreaterThan));
    }

    #[test]
    fn numeric_list_and_contains_operators() {
        let v = view();
        assert!(TriggerCondition::new("currentState.hours", ConditionOperator::GreaterThan, json!(24)).evaluate(&v));
        assert!(!TriggerCondition::new("currentState.hours", ConditionOperator::LessThan, json!(24)).evaluate(&v));
        assert!(TriggerCondition::new("severity", ConditionOperator::In, json!(["high", "critical"])).evaluate(&v));
        assert!(TriggerCondition::new("currentState.tags", ConditionOperator::Contains, json!("vip")).evaluate(&v));
        assert!(TriggerCondition::new("eventType", ConditionOperator::Contains, json!("sla")).evaluate(&v));
    }

    #[test]
    fn assignment_strategy_parses_tagged() {
        let s: AssignmentStrategy =
            serde_json::from_value(json!({"strategy": "specific_role", "role": "engagement_lead"})).unwrap();
        assert_eq!(
            s,
            AssignmentStrategy::SpecificRole {
                role: "engagement_lead".into()
            }
        );
        assert_eq!(s.to_string(), "specific_role:engagement_lead");
    }
}
