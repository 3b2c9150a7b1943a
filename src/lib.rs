//! # taskwire
//!
//! Cross-module business-event detection and checklist task generation.
//!
//! Module change feeds are diffed against per-module event patterns; each
//! detected event is stored, matched against task templates, and turned into
//! checklist tasks. Storage is SQLite via sqlx, observability is tracing plus
//! OpenTelemetry.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod detector;
pub mod engine;
pub mod error;
pub mod generator;
pub mod model;
pub mod registry;
pub mod telemetry;
