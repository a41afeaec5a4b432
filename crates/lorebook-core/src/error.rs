//! Error types for the Lorebook knowledge-graph engine

use thiserror::Error;

use crate::domain::graph::entity::{Entity, EntityType};

/// Result type alias using Lorebook's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Which per-project quota was exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityKind {
    Nodes,
    Edges,
}

impl CapacityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Edges => "edges",
        }
    }
}

impl std::fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lorebook error types
///
/// Every public operation returns one of these instead of panicking across
/// the component boundary. `code()` yields the stable machine-readable code
/// surfaced to callers; the Display message is the human-readable half.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    #[error("Entity '{0}' not found")]
    EntityNotFound(String),

    #[error("Relation '{0}' not found")]
    RelationNotFound(String),

    #[error("Recognition task '{0}' not found")]
    TaskNotFound(String),

    #[error("Suggestion '{0}' not found in session")]
    SuggestionNotFound(String),

    #[error("An entity of type '{entity_type}' named '{name}' already exists in this project")]
    DuplicateEntity { entity_type: EntityType, name: String },

    #[error(
        "Version conflict: expected version {expected}, current version is {latest_version}"
    )]
    VersionConflict {
        expected: i64,
        latest_version: i64,
        /// Full snapshot of the latest row so callers can reconcile
        /// without a second read.
        latest: Box<Entity>,
    },

    #[error("Invalid relation: {field}: {reason}")]
    InvalidRelation { field: &'static str, reason: String },

    #[error("Project capacity exceeded: {kind} limit of {limit} reached")]
    CapacityExceeded { kind: CapacityKind, limit: u64 },

    #[error("Attribute limit exceeded: at most {limit} attribute keys per entity")]
    AttributeLimitExceeded { limit: usize },

    #[error("Subgraph depth {requested} exceeds the configured maximum of {max_k}")]
    SubgraphDepthExceeded { requested: u32, max_k: u32 },

    #[error("Graph query exceeded its budget after {expansions} expansions. {suggestion}")]
    QueryTimeout { expansions: u64, suggestion: String },

    #[error("Scope violation: entity '{entity_id}' does not belong to project '{project_id}'")]
    ScopeViolation {
        entity_id: String,
        project_id: String,
    },

    #[error("Relevance query failed: {0}")]
    RelevantQueryFailed(String),

    #[error("Entity recognition is unavailable: {0}")]
    RecognitionUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Stable machine-readable code for this error
    ///
    /// These codes are the caller-facing contract; messages may change,
    /// codes may not.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_)
            | Self::AttributeLimitExceeded { .. }
            | Self::ConfigError(_) => "INVALID_ARGUMENT",
            Self::ProjectNotFound(_)
            | Self::EntityNotFound(_)
            | Self::RelationNotFound(_)
            | Self::TaskNotFound(_)
            | Self::SuggestionNotFound(_) => "NOT_FOUND",
            Self::DuplicateEntity { .. } => "KG_ENTITY_DUPLICATE",
            Self::VersionConflict { .. } => "KG_ENTITY_CONFLICT",
            Self::InvalidRelation { .. } => "KG_RELATION_INVALID",
            Self::CapacityExceeded { .. } => "KG_CAPACITY_EXCEEDED",
            Self::SubgraphDepthExceeded { .. } => "KG_SUBGRAPH_K_EXCEEDED",
            Self::QueryTimeout { .. } => "KG_QUERY_TIMEOUT",
            Self::ScopeViolation { .. } => "KG_SCOPE_VIOLATION",
            Self::RelevantQueryFailed(_) => "KG_RELEVANT_QUERY_FAILED",
            Self::RecognitionUnavailable(_) => "KG_RECOGNITION_UNAVAILABLE",
            Self::Database(_) => "DB_ERROR",
        }
    }

    /// Suggestion for how to recover from this error, where one exists
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::VersionConflict { .. } => {
                Some("Re-fetch the entity and retry with the current version".to_string())
            }
            Self::CapacityExceeded { kind, limit } => Some(format!(
                "Raise the {kind} quota above {limit} or remove unused graph data"
            )),
            Self::QueryTimeout { .. } => {
                Some("Narrow the query or raise the timeout budget".to_string())
            }
            _ => None,
        }
    }

    /// True when the error is a recoverable duplicate-entity race
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateEntity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::InvalidInput("x".into()).code(), "INVALID_ARGUMENT");
        assert_eq!(Error::ProjectNotFound("p".into()).code(), "NOT_FOUND");
        assert_eq!(
            Error::CapacityExceeded {
                kind: CapacityKind::Nodes,
                limit: 10,
            }
            .code(),
            "KG_CAPACITY_EXCEEDED"
        );
        assert_eq!(
            Error::QueryTimeout {
                expansions: 42,
                suggestion: "narrow it".into(),
            }
            .code(),
            "KG_QUERY_TIMEOUT"
        );
        assert_eq!(
            Error::ScopeViolation {
                entity_id: "e".into(),
                project_id: "p".into(),
            }
            .code(),
            "KG_SCOPE_VIOLATION"
        );
    }

    #[test]
    fn capacity_error_carries_kind_and_limit() {
        let err = Error::CapacityExceeded {
            kind: CapacityKind::Edges,
            limit: 200_000,
        };
        let message = err.to_string();
        assert!(message.contains("edges"));
        assert!(message.contains("200000"));
        assert!(err.suggestion().is_some());
    }
}
