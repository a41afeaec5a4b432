//! Repository trait for graph persistence
//!
//! Abstracts the durable store so the query engine and the recognition
//! scheduler can be exercised against any backend (SQLite in production,
//! the same SQLite in-memory for tests).

use async_trait::async_trait;

use crate::error::Result;

use super::entity::{
    Entity, EntityDraft, EntityPatch, EntityType, Project, Relation, RelationDraft, RelationPatch,
};

/// Repository trait for knowledge-graph persistence
///
/// Every operation takes the tenant `project_id` first and fails with
/// `NOT_FOUND` when it does not resolve. Implementations own all
/// validation, quota, uniqueness, and versioning enforcement so callers
/// can rely on the contracts regardless of backend.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    // ========== Project Operations ==========

    /// Create a project and seed its relation-type catalog
    async fn create_project(&self, name: &str) -> Result<Project>;

    /// Check that a project id resolves to an existing project
    async fn project_exists(&self, project_id: &str) -> Result<bool>;

    // ========== Entity Operations ==========

    /// Create an entity after validation, quota, and uniqueness checks
    async fn create_entity(&self, project_id: &str, draft: EntityDraft) -> Result<Entity>;

    /// Get an entity by id within a project
    async fn get_entity(&self, project_id: &str, entity_id: &str) -> Result<Entity>;

    /// List all entities of a project
    async fn list_entities(&self, project_id: &str) -> Result<Vec<Entity>>;

    /// Lookup an entity by `(type, normalized name)` within a project
    async fn find_entity_by_name(
        &self,
        project_id: &str,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Entity>>;

    /// Version-checked partial update; stale `expected_version` fails with
    /// a conflict carrying the latest row
    async fn update_entity(
        &self,
        project_id: &str,
        entity_id: &str,
        expected_version: i64,
        patch: EntityPatch,
    ) -> Result<Entity>;

    /// Delete an entity and, atomically, every relation touching it;
    /// returns the number of cascaded relation deletions
    async fn delete_entity(&self, project_id: &str, entity_id: &str) -> Result<u64>;

    // ========== Relation Operations ==========

    /// Create a relation after endpoint and validation checks
    async fn create_relation(&self, project_id: &str, draft: RelationDraft) -> Result<Relation>;

    /// List all relations of a project
    async fn list_relations(&self, project_id: &str) -> Result<Vec<Relation>>;

    /// Partial update of a relation; endpoints are re-validated
    async fn update_relation(
        &self,
        project_id: &str,
        relation_id: &str,
        patch: RelationPatch,
    ) -> Result<Relation>;

    /// Delete a relation by id
    async fn delete_relation(&self, project_id: &str, relation_id: &str) -> Result<()>;

    /// List the project's relation-type catalog (built-ins + discovered)
    async fn list_relation_types(&self, project_id: &str) -> Result<Vec<String>>;
}
