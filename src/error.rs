//! Error types for taskwire.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::model::event::EventStatus,
        to: crate::model::event::EventStatus,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    /// A snapshot could not be evaluated against a pattern.
    #[error("detection error: {0}")]
    Detection(String),

    /// A template could not be instantiated for an event.
    #[error("generation error: {0}")]
    Generation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
