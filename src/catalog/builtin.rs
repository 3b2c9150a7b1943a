//! Task templates shipped with taskwire.

use std::collections::BTreeSet;

use serde_json::json;

use crate::model::task::TaskPriority;
use crate::model::template::{
    AssignmentStrategy, ChecklistItemDef, ConditionOperator, TaskTemplate, TriggerCondition,
};

pub(super) fn templates() -> Vec<TaskTemplate> {
    vec![
        stock_low_review(),
        reorder_stock(),
        engagement_kickoff(),
        engagement_risk_review(),
        deal_stage_followup(),
        deal_loss_review(),
        budget_overrun_review(),
        ticket_triage(),
        sla_breach_escalation(),
    ]
}

fn base(
    id: &str,
    name: &str,
    category: &str,
    trigger: &str,
    source_module: &str,
    assignment: AssignmentStrategy,
) -> TaskTemplate {
    TaskTemplate {
        id: id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        trigger_events: BTreeSet::from([trigger.to_string()]),
        trigger_conditions: Vec::new(),
        default_title: String::new(),
        default_description: String::new(),
        default_priority: TaskPriority::Medium,
        default_due_days: 7,
        checklist: Vec::new(),
        assignment,
        source_module: source_module.to_string(),
        subsidiary: None,
        active: true,
        version: 1,
    }
}

fn role(role: &str) -> AssignmentStrategy {
    AssignmentStrategy::SpecificRole {
        role: role.to_string(),
    }
}

fn department(department: &str) -> AssignmentStrategy {
    AssignmentStrategy::Department {
        department: department.to_string(),
    }
}

fn stock_low_review() -> TaskTemplate {
    TaskTemplate {
        trigger_conditions: vec![TriggerCondition::new(
            "severity",
            ConditionOperator::In,
            json!(["high", "critical"]),
        )],
        default_title: "Review low stock: {{entityName}}".to_string(),
        default_description:
            "Stock for {{entityName}} dropped to a {{severity}} level. Confirm counts and demand."
                .to_string(),
        default_priority: TaskPriority::High,
        default_due_days: 3,
        checklist: vec![
            ChecklistItemDef::required("verify_count", "Verify physical stock count")
                .verified_by("Cycle count recorded in the item history"),
            ChecklistItemDef::required("check_demand", "Check open orders against remaining stock"),
            ChecklistItemDef::optional("notify_sales", "Notify sales of possible shortages"),
        ],
        subsidiary: Some("operations".to_string()),
        ..base(
            "stock_low_review",
            "Low stock review",
            "inventory",
            "stock_low",
            "inventory",
            role("inventory_manager"),
        )
    }
}

fn reorder_stock() -> TaskTemplate {
    TaskTemplate {
        // Low grades an increase; only a drop or an empty shelf needs a reorder.
        trigger_conditions: vec![TriggerCondition::new(
            "severity",
            ConditionOperator::NotIn,
            json!(["low"]),
        )],
        default_title: "Reorder {{entityName}}".to_string(),
        default_description: "Stock for {{entityName}} needs replenishing.".to_string(),
        default_priority: TaskPriority::High,
        default_due_days: 3,
        checklist: vec![
            ChecklistItemDef::required("select_supplier", "Select supplier and confirm lead time"),
            ChecklistItemDef::required("raise_po", "Raise purchase order")
                .verified_by("PO number attached to the task"),
            ChecklistItemDef::required("approve_po", "Get purchase order approved"),
            ChecklistItemDef::optional("schedule_receiving", "Schedule receiving slot"),
        ],
        subsidiary: Some("operations".to_string()),
        ..base(
            "reorder_stock",
            "Reorder stock",
            "procurement",
            "stock_reorder_required",
            "inventory",
            department("procurement"),
        )
    }
}

fn engagement_kickoff() -> TaskTemplate {
    TaskTemplate {
        default_title: "Kick off engagement: {{entityName}}".to_string(),
        default_description:
            "New engagement {{entityName}} was opened. Run the standard kickoff checklist."
                .to_string(),
        default_priority: TaskPriority::High,
        default_due_days: 7,
        checklist: vec![
            ChecklistItemDef::required("engagement_letter", "Send engagement letter")
                .verified_by("Signed letter stored with the engagement"),
            ChecklistItemDef::required("conflict_check", "Complete conflict-of-interest check"),
            ChecklistItemDef::required("kickoff_meeting", "Schedule kickoff meeting"),
            ChecklistItemDef::required("assign_team", "Assign engagement team"),
            ChecklistItemDef::required("scope_document", "Agree scope document with client"),
            ChecklistItemDef::optional("client_portal", "Set up client portal access"),
            ChecklistItemDef::optional("billing_setup", "Set up billing codes"),
        ],
        subsidiary: Some("consulting".to_string()),
        ..base(
            "engagement_kickoff",
            "Engagement kickoff",
            "engagement",
            "engagement_created",
            "engagements",
            role("engagement_lead"),
        )
    }
}

fn engagement_risk_review() -> TaskTemplate {
    TaskTemplate {
        trigger_conditions: vec![TriggerCondition::new(
            "currentState.status",
            ConditionOperator::Equals,
            json!("at_risk"),
        )],
        default_title: "Risk review: {{entityName}}".to_string(),
        default_description: "Engagement {{entityName}} was flagged at risk.".to_string(),
        default_priority: TaskPriority::Urgent,
        default_due_days: 2,
        checklist: vec![
            ChecklistItemDef::required("root_cause", "Identify cause of risk"),
            ChecklistItemDef::required("client_call", "Hold call with client sponsor"),
            ChecklistItemDef::required("recovery_plan", "Document recovery plan"),
        ],
        ..base(
            "engagement_risk_review",
            "Engagement risk review",
            "engagement",
            "engagement_status_changed",
            "engagements",
            AssignmentStrategy::Manager,
        )
    }
}

fn deal_stage_followup() -> TaskTemplate {
    TaskTemplate {
        trigger_conditions: vec![TriggerCondition::new(
            "currentState.stage",
            ConditionOperator::NotIn,
            json!(["closed_lost"]),
        )],
        default_title: "Follow up on {{entityName}}".to_string(),
        default_description: "Deal {{entityName}} moved stage. Confirm next steps with the buyer."
            .to_string(),
        default_due_days: 2,
        checklist: vec![
            ChecklistItemDef::required("update_forecast", "Update forecast"),
            ChecklistItemDef::required("next_steps", "Agree next steps with buyer"),
        ],
        ..base(
            "deal_stage_followup",
            "Deal stage follow-up",
            "sales",
            "deal_stage_changed",
            "pipeline",
            AssignmentStrategy::Creator,
        )
    }
}

fn deal_loss_review() -> TaskTemplate {
    TaskTemplate {
        trigger_conditions: vec![TriggerCondition::new(
            "currentState.stage",
            ConditionOperator::Equals,
            json!("closed_lost"),
        )],
        default_title: "Loss review: {{entityName}}".to_string(),
        default_due_days: 5,
        checklist: vec![
            ChecklistItemDef::required("loss_reason", "Record loss reason"),
            ChecklistItemDef::optional("competitor", "Record winning competitor"),
        ],
        ..base(
            "deal_loss_review",
            "Deal loss review",
            "sales",
            "deal_stage_changed",
            "pipeline",
            AssignmentStrategy::Manager,
        )
    }
}

fn budget_overrun_review() -> TaskTemplate {
    TaskTemplate {
        trigger_conditions: vec![TriggerCondition::new(
            "severity",
            ConditionOperator::In,
            json!(["high", "critical"]),
        )],
        default_title: "Budget review: {{entityName}}".to_string(),
        default_description: "Budget {{entityName}} crossed a {{severity}} utilization threshold."
            .to_string(),
        default_priority: TaskPriority::High,
        default_due_days: 1,
        checklist: vec![
            ChecklistItemDef::required("variance", "Explain variance against plan"),
            ChecklistItemDef::required("forecast", "Re-forecast remaining spend"),
            ChecklistItemDef::optional("freeze", "Decide on spending freeze"),
        ],
        ..base(
            "budget_overrun_review",
            "Budget overrun review",
            "finance",
            "budget_threshold_crossed",
            "finance",
            AssignmentStrategy::ProjectLead,
        )
    }
}

fn ticket_triage() -> TaskTemplate {
    TaskTemplate {
        trigger_conditions: vec![TriggerCondition::new(
            "severity",
            ConditionOperator::In,
            json!(["high", "critical"]),
        )],
        default_title: "Triage {{entityName}}".to_string(),
        default_priority: TaskPriority::High,
        default_due_days: 1,
        checklist: vec![
            ChecklistItemDef::required("reproduce", "Reproduce the issue"),
            ChecklistItemDef::required("respond", "Send first response to requester"),
        ],
        ..base(
            "ticket_triage",
            "Ticket triage",
            "support",
            "ticket_created",
            "service_desk",
            department("support"),
        )
    }
}

fn sla_breach_escalation() -> TaskTemplate {
    TaskTemplate {
        trigger_conditions: vec![TriggerCondition::new(
            "currentState.sla.status",
            ConditionOperator::Equals,
            json!("breached"),
        )],
        default_title: "SLA breached: {{entityName}}".to_string(),
        default_description: "SLA for {{entityName}} was breached. Escalate and inform the customer."
            .to_string(),
        default_priority: TaskPriority::Urgent,
        default_due_days: 1,
        checklist: vec![
            ChecklistItemDef::required("escalate", "Escalate to on-call lead"),
            ChecklistItemDef::required("customer_update", "Send customer status update"),
            ChecklistItemDef::optional("credit", "Assess service credit"),
        ],
        ..base(
            "sla_breach_escalation",
            "SLA breach escalation",
            "support",
            "sla_status_changed",
            "service_desk",
            role("support_lead"),
        )
    }
}
