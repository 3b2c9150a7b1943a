//! Module definitions shipped with taskwire.

use serde_json::json;

use super::{CollectionBinding, ModuleDefinition};
use crate::model::pattern::{EventCategory, EventPattern, Severity, SeverityLadder, ValuePredicate};

pub(super) fn modules() -> Vec<ModuleDefinition> {
    vec![inventory(), engagements(), pipeline(), finance(), service_desk()]
}

fn inventory() -> ModuleDefinition {
    ModuleDefinition {
        id: "inventory".to_string(),
        subsidiary: Some("operations".to_string()),
        collections: vec![CollectionBinding::new("inventory_items", "inventory_item")],
        patterns: vec![
            EventPattern::created("inventory_item_created", EventCategory::Lifecycle)
                .severity(SeverityLadder::new(Severity::Low)),
            EventPattern::field_changed("stock_low", EventCategory::Threshold, "stockLevel").severity(
                SeverityLadder::new(Severity::Low)
                    .rule(ValuePredicate::CurrentAtMost { value: 0.0 }, Severity::Critical)
                    .rule(ValuePredicate::CurrentBelow { value: 10.0 }, Severity::High)
                    .rule(ValuePredicate::CurrentBelow { value: 25.0 }, Severity::Medium),
            ),
            EventPattern::field_changed(
                "stock_reorder_required",
                EventCategory::Operational,
                "stockLevel",
            )
            .severity(
                SeverityLadder::new(Severity::Low)
                    .rule(ValuePredicate::CurrentAtMost { value: 0.0 }, Severity::Critical)
                    .rule(ValuePredicate::Decreased, Severity::Medium),
            ),
        ],
    }
}

fn engagements() -> ModuleDefinition {
    ModuleDefinition {
        id: "engagements".to_string(),
        subsidiary: Some("consulting".to_string()),
        collections: vec![CollectionBinding::new("engagements", "engagement")],
        patterns: vec![
            EventPattern::created("engagement_created", EventCategory::Lifecycle)
                .severity(SeverityLadder::new(Severity::Medium)),
            EventPattern::field_changed(
                "engagement_status_changed",
                EventCategory::StatusChange,
                "status",
            )
            .severity(
                SeverityLadder::new(Severity::Medium)
                    .rule(
                        ValuePredicate::CurrentIn {
                            values: vec![json!("at_risk"), json!("cancelled")],
                        },
                        Severity::High,
                    )
                    .rule(
                        ValuePredicate::CurrentEquals {
                            value: json!("completed"),
                        },
                        Severity::Low,
                    ),
            ),
        ],
    }
}

fn pipeline() -> ModuleDefinition {
    ModuleDefinition {
        id: "pipeline".to_string(),
        subsidiary: Some("sales".to_string()),
        collections: vec![CollectionBinding::new("deals", "deal")],
        patterns: vec![
            EventPattern::created("deal_created", EventCategory::Lifecycle)
                .severity(SeverityLadder::new(Severity::Low)),
            EventPattern::field_changed("deal_stage_changed", EventCategory::StatusChange, "stage")
                .severity(
                    SeverityLadder::new(Severity::Low)
                        .rule(
                            ValuePredicate::CurrentEquals {
                                value: json!("closed_lost"),
                            },
                            Severity::High,
                        )
                        .rule(
                            ValuePredicate::CurrentIn {
                                values: vec![json!("negotiation"), json!("closed_won")],
                            },
                            Severity::Medium,
                        ),
                ),
            EventPattern::field_changed("deal_value_changed", EventCategory::Financial, "value")
                .severity(
                    SeverityLadder::new(Severity::Low)
                        .rule(ValuePredicate::DecreasedByPercent { percent: 25.0 }, Severity::High)
                        .rule(ValuePredicate::Decreased, Severity::Medium),
                ),
        ],
    }
}

fn finance() -> ModuleDefinition {
    ModuleDefinition {
        id: "finance".to_string(),
        subsidiary: Some("finance".to_string()),
        collections: vec![CollectionBinding::new("budgets", "budget")],
        patterns: vec![
            EventPattern::created("budget_created", EventCategory::Lifecycle)
                .severity(SeverityLadder::new(Severity::Low)),
            EventPattern::field_changed(
                "budget_threshold_crossed",
                EventCategory::Financial,
                "utilization",
            )
            .severity(
                SeverityLadder::new(Severity::Low)
                    .rule(ValuePredicate::CurrentAtLeast { value: 100.0 }, Severity::Critical)
                    .rule(ValuePredicate::CrossedAbove { threshold: 90.0 }, Severity::High)
                    .rule(ValuePredicate::CrossedAbove { threshold: 75.0 }, Severity::Medium),
            ),
        ],
    }
}

fn service_desk() -> ModuleDefinition {
    ModuleDefinition {
        id: "service_desk".to_string(),
        subsidiary: Some("support".to_string()),
        collections: vec![CollectionBinding::new("tickets", "ticket")],
        patterns: vec![
            EventPattern::created("ticket_created", EventCategory::Lifecycle)
                .graded_on("priority")
                .severity(
                    SeverityLadder::new(Severity::Medium)
                        .rule(
                            ValuePredicate::CurrentEquals {
                                value: json!("urgent"),
                            },
                            Severity::Critical,
                        )
                        .rule(
                            ValuePredicate::CurrentEquals {
                                value: json!("high"),
                            },
                            Severity::High,
                        )
                        .rule(
                            ValuePredicate::CurrentEquals { value: json!("low") },
                            Severity::Low,
                        ),
                ),
            EventPattern::field_changed("sla_status_changed", EventCategory::Compliance, "sla.status")
                .severity(
                    SeverityLadder::new(Severity::Low)
                        .rule(
                            ValuePredicate::CurrentEquals {
                                value: json!("breached"),
                            },
                            Severity::Critical,
                        )
                        .rule(
                            ValuePredicate::CurrentEquals {
                                value: json!("at_risk"),
                            },
                            Severity::High,
                        ),
                ),
        ],
    }
}
