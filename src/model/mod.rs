//! Core data model.
//!
//! A business event is a detected transition on an entity owned by some
//! module. Patterns say how to recognize one; templates say which tasks to
//! create for it; generated tasks are the result.

pub mod event;
pub mod pattern;
pub mod task;
pub mod template;
pub mod value;

pub use event::{BusinessEvent, DraftEvent, EventId, EventStatus};
pub use pattern::{
    DetectionRule, EventCategory, EventPattern, Severity, SeverityLadder, SeverityRule,
    ValuePredicate,
};
pub use task::{
    Assignment, ChecklistItem, ChecklistProgress, GeneratedTask, TaskId, TaskParts, TaskPriority,
    TaskStatus,
};
pub use template::{
    AssignmentStrategy, ChecklistItemDef, ConditionOperator, TaskTemplate, TriggerCondition,
};
pub use value::Value;
