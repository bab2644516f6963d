//! Error taxonomy for a seed run.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LoadError {
    /// Required foreign keys form a cycle. Raised before any write.
    #[error("Cyclic required foreign keys among: {}", entities.join(", "))]
    CyclicDependency { entities: Vec<String> },

    /// A row references a parent row that does not exist.
    #[error("Referential integrity violated in {entity} at row {row} ({constraint}): {detail}")]
    ReferentialIntegrity {
        entity: String,
        row: String,
        constraint: String,
        detail: String,
    },

    /// A duplicate key was hit under fail-on-conflict, or a unique
    /// constraint other than the primary key was violated.
    #[error("Conflict in {entity} on {constraint}: duplicate key {key}")]
    Conflict {
        entity: String,
        key: String,
        constraint: String,
    },

    #[error("Duplicate primary key {key} within the {entity} batch")]
    DuplicateKeyInBatch { entity: String, key: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid seed data for {entity}: {detail}")]
    InvalidSeed { entity: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    pub(crate) fn invalid_seed(entity: &str, detail: impl Into<String>) -> Self {
        Self::InvalidSeed {
            entity: entity.to_string(),
            detail: detail.into(),
        }
    }
}
