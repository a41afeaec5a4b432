//! Lorebook Core Library
//!
//! This crate provides the knowledge-graph engine for Lorebook, including:
//! - Entity/relation repository with quotas and optimistic concurrency
//! - Graph query engine (k-hop subgraph, bounded shortest path, cycle
//!   detection, keyword relevance)
//! - Recognition scheduler (bounded concurrency, cooperative cancellation)
//! - Suggestion session state (accept/dismiss with per-session dedup)
//! - Storage (SQLite with versioned migrations)

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, GraphLimits, RecognitionConfig};
    pub use crate::domain::graph::{
        Entity, EntityDraft, EntityPatch, EntityType, GraphQueryService, GraphRepository, Project,
        Relation, RelationDraft, RelationPatch,
    };
    pub use crate::domain::recognition::{
        RecognitionScheduler, Recognizer, StoredSuggestion, SuggestionSink,
    };
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::graph::SqliteGraphRepository;
    pub use crate::storage::{Database, DatabaseConfig};
}
