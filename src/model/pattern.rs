//! Event patterns: how a module recognizes an event and grades its severity.

use serde::{Deserialize, Serialize};

use super::value::{Value, as_number, values_equal};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How urgent a detected event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Broad classification of a business event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Lifecycle,
    StatusChange,
    Threshold,
    Financial,
    Operational,
    Compliance,
    /// Synthesized through the manual trigger without a registered pattern.
    Manual,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventCategory::Lifecycle => "lifecycle",
            EventCategory::StatusChange => "status_change",
            EventCategory::Threshold => "threshold",
            EventCategory::Financial => "financial",
            EventCategory::Operational => "operational",
            EventCategory::Compliance => "compliance",
            EventCategory::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// When a pattern fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum DetectionRule {
    /// Fires when there is no previous snapshot. The optional path selects
    /// the value fed to the severity ladder; without it the whole snapshot is used.
    Created {
        #[serde(default)]
        field_path: Option<String>,
    },
    /// Fires when the value at `field_path` differs structurally between snapshots.
    FieldChanged { field_path: String },
}

impl DetectionRule {
    pub fn field_path(&self) -> Option<&str> {
        match self {
            DetectionRule::Created { field_path } => field_path.as_deref(),
            DetectionRule::FieldChanged { field_path } => Some(field_path),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity ladder
// ---------------------------------------------------------------------------

/// A predicate over the `(previous, current)` values at a pattern's field path.
///
/// `None` on either side means the value is undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ValuePredicate {
    Always,
    CurrentEquals { value: Value },
    CurrentIn { values: Vec<Value> },
    CurrentBelow { value: f64 },
    CurrentAtMost { value: f64 },
    CurrentAbove { value: f64 },
    CurrentAtLeast { value: f64 },
    /// Previous below the threshold (or undefined), current at or above it.
    CrossedAbove { threshold: f64 },
    /// Previous at or above the threshold (or undefined), current below it.
    CrossedBelow { threshold: f64 },
    Increased,
    Decreased,
    /// Current fell by at least `percent` relative to a positive previous value.
    DecreasedByPercent { percent: f64 },
}

impl ValuePredicate {
    pub fn matches(&self, previous: Option<&Value>, current: Option<&Value>) -> bool {
        let prev_num = previous.and_then(as_number);
        let curr_num = current.and_then(as_number);
        match self {
            ValuePredicate::Always => true,
            ValuePredicate::CurrentEquals { value } => {
                current.is_some_and(|c| values_equal(c, value))
            }
            ValuePredicate::CurrentIn { values } => {
                current.is_some_and(|c| values.iter().any(|v| values_equal(c, v)))
            }
            ValuePredicate::CurrentBelow { value } => curr_num.is_some_and(|c| c < *value),
            ValuePredicate::CurrentAtMost { value } => curr_num.is_some_and(|c| c <= *value),
            ValuePredicate::CurrentAbove { value } => curr_num.is_some_and(|c| c > *value),
            ValuePredicate::CurrentAtLeast { value } => curr_num.is_some_and(|c| c >= *value),
            ValuePredicate::CrossedAbove { threshold } => {
                curr_num.is_some_and(|c| c >= *threshold)
                    && prev_num.is_none_or(|p| p < *threshold)
            }
            ValuePredicate::CrossedBelow { threshold } => {
                curr_num.is_some_and(|c| c < *threshold)
                    && prev_num.is_none_or(|p| p >= *threshold)
            }
            ValuePredicate::Increased => matches!((prev_num, curr_num), (Some(p), Some(c)) if c > p),
            ValuePredicate::Decreased => matches!((prev_num, curr_num), (Some(p), Some(c)) if c < p),
            ValuePredicate::DecreasedByPercent { percent } => match (prev_num, curr_num) {
                (Some(p), Some(c)) if p > 0.0 => (p - c) / p * 100.0 >= *percent,
                _ => false,
            },
        }
    }
}

/// One step of a severity ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityRule {
    pub when: ValuePredicate,
    pub severity: Severity,
}

/// Ordered first-match severity rules with a mandatory fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityLadder {
    #[serde(default)]
    pub rules: Vec<SeverityRule>,
    pub default: Severity,
}

impl SeverityLadder {
    pub fn new(default: Severity) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    pub fn rule(mut self, when: ValuePredicate, severity: Severity) -> Self {
        self.rules.push(SeverityRule { when, severity });
        self
    }

    /// The severity of the first matching rule, or the default.
    pub fn grade(&self, previous: Option<&Value>, current: Option<&Value>) -> Severity {
        self.rules
            .iter()
            .find(|rule| rule.when.matches(previous, current))
            .map_or(self.default, |rule| rule.severity)
    }
}

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// A rule for recognizing one event type from a before/after comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPattern {
    pub event_type: String,
    pub category: EventCategory,
    pub detection: DetectionRule,
    pub severity: SeverityLadder,
}

impl EventPattern {
    pub fn created(event_type: impl Into<String>, category: EventCategory) -> Self {
        Self {
            event_type: event_type.into(),
            category,
            detection: DetectionRule::Created { field_path: None },
            severity: SeverityLadder::new(Severity::Medium),
        }
    }

    pub fn field_changed(
        event_type: impl Into<String>,
        category: EventCategory,
        field_path: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            category,
            detection: DetectionRule::FieldChanged {
                field_path: field_path.into(),
            },
            severity: SeverityLadder::new(Severity::Medium),
        }
    }

    /// Grade created events on a specific field instead of the whole snapshot.
    pub fn graded_on(mut self, field_path: impl Into<String>) -> Self {
        if let DetectionRule::Created { field_path: path } = &mut self.detection {
            *path = Some(field_path.into());
        }
        self
    }

    pub fn severity(mut self, ladder: SeverityLadder) -> Self {
        self.severity = ladder;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stock_ladder() -> SeverityLadder {
        SeverityLadder::new(Severity::Low)
            .rule(ValuePredicate::CurrentAtMost { value: 0.0 }, Severity::Critical)
            .rule(ValuePredicate::CurrentBelow { value: 10.0 }, Severity::High)
    }

    #[test]
    fn first_matching_rule_wins() {
        let ladder = stock_ladder();
        assert_eq!(ladder.grade(Some(&json!(15)), Some(&json!(0))), Severity::Critical);
        assert_eq!(ladder.grade(Some(&json!(15)), Some(&json!(8))), Severity::High);
        assert_eq!(ladder.grade(Some(&json!(15)), Some(&json!(40))), Severity::Low);
    }

    #[test]
    fn undefined_current_falls_through_to_default() {
        assert_eq!(stock_ladder().grade(Some(&json!(15)), None), Severity::Low);
    }

    #[test]
    fn crossed_above_needs_previous_below() {
        let p = ValuePredicate::CrossedAbove { threshold: 90.0 };
        assert!(p.matches(Some(&json!(80)), Some(&json!(92))));
        assert!(!p.matches(Some(&json!(91)), Some(&json!(95))));
        assert!(p.matches(None, Some(&json!(95))));
    }

    #[test]
    fn decreased_by_percent_ignores_non_positive_previous() {
        let p = ValuePredicate::DecreasedByPercent { percent: 25.0 };
        assert!(p.matches(Some(&json!(100)), Some(&json!(70))));
        assert!(!p.matches(Some(&json!(100)), Some(&json!(80))));
        assert!(!p.matches(Some(&json!(0)), Some(&json!(-5))));
    }

    #[test]
    fn ladder_parses_from_toml() {
        let ladder: SeverityLadder = toml::from_str(
            r#"
            default = "low"
            rules = [
                { when = { op = "current_equals", value = "breached" }, severity = "critical" },
                { when = { op = "current_below", value = 5.0 }, severity = "high" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(ladder.rules.len(), 2);
        assert_eq!(ladder.grade(None, Some(&json!("breached"))), Severity::Critical);
    }
}
