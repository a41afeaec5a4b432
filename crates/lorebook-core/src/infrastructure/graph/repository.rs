//! SQLite implementation of the GraphRepository
//!
//! Owns all write-side enforcement: field validation, per-project quotas,
//! `(type, normalized name)` uniqueness, optimistic-concurrency versioning,
//! endpoint validation for relations, and the transactional cascade on
//! entity deletion.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GraphLimits;
use crate::domain::graph::entity::{
    BUILTIN_RELATION_TYPES, Entity, EntityDraft, EntityPatch, EntityType, MAX_DESCRIPTION_LEN,
    MAX_NAME_LEN, MAX_RELATION_TYPE_LEN, Project, Relation, RelationDraft, RelationPatch,
    normalize_name,
};
use crate::domain::graph::repository::GraphRepository;
use crate::error::{CapacityKind, Error, Result};

/// SQLite implementation of the graph repository
#[derive(Clone)]
pub struct SqliteGraphRepository {
    pool: SqlitePool,
    limits: GraphLimits,
}

impl SqliteGraphRepository {
    /// Create a new SQLite graph repository; limits are validated once here
    pub fn new(pool: SqlitePool, limits: GraphLimits) -> Result<Self> {
        limits.validate()?;
        Ok(Self { pool, limits })
    }

    /// The limits this repository enforces
    pub fn limits(&self) -> &GraphLimits {
        &self.limits
    }

    async fn ensure_project(&self, project_id: &str) -> Result<()> {
        if project_id.trim().is_empty() {
            return Err(Error::InvalidInput("project id must not be empty".into()));
        }
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            return Err(Error::ProjectNotFound(project_id.to_string()));
        }
        Ok(())
    }

    fn validate_entity_fields(
        &self,
        name: &str,
        description: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::InvalidInput(format!(
                "entity name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::InvalidInput(format!(
                "entity description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if attributes.len() > self.limits.max_attribute_keys {
            return Err(Error::AttributeLimitExceeded {
                limit: self.limits.max_attribute_keys,
            });
        }
        Ok(())
    }

    fn validate_relation_fields(&self, relation_type: &str, description: &str) -> Result<()> {
        if relation_type.trim().is_empty() {
            return Err(Error::InvalidInput("relation type must not be empty".into()));
        }
        if relation_type.chars().count() > MAX_RELATION_TYPE_LEN {
            return Err(Error::InvalidInput(format!(
                "relation type exceeds {MAX_RELATION_TYPE_LEN} characters"
            )));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(Error::InvalidInput(format!(
                "relation description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        Ok(())
    }

    async fn check_node_quota(&self, project_id: &str) -> Result<()> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM entities WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        if count as u64 >= self.limits.max_nodes_per_project {
            return Err(Error::CapacityExceeded {
                kind: CapacityKind::Nodes,
                limit: self.limits.max_nodes_per_project,
            });
        }
        Ok(())
    }

    async fn check_edge_quota(&self, project_id: &str) -> Result<()> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM relations WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        if count as u64 >= self.limits.max_edges_per_project {
            return Err(Error::CapacityExceeded {
                kind: CapacityKind::Edges,
                limit: self.limits.max_edges_per_project,
            });
        }
        Ok(())
    }

    /// Check `(type, normalized name)` uniqueness within a project,
    /// optionally excluding the entity being updated
    async fn check_duplicate(
        &self,
        project_id: &str,
        entity_type: EntityType,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Result<()> {
        let normalized = normalize_name(name);
        let existing: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM entities
            WHERE project_id = ? AND entity_type = ? AND name_normalized = ?
            "#,
        )
        .bind(project_id)
        .bind(entity_type.as_str())
        .bind(&normalized)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some((id,)) if Some(id.as_str()) != exclude_id => Err(Error::DuplicateEntity {
                entity_type,
                name: name.trim().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Validate that both endpoints exist and belong to the given project
    async fn validate_endpoints(
        &self,
        project_id: &str,
        source_entity_id: &str,
        target_entity_id: &str,
    ) -> Result<()> {
        if source_entity_id == target_entity_id {
            let err = Error::InvalidRelation {
                field: "target_entity_id",
                reason: "source and target must be different entities".into(),
            };
            warn!(
                project_id = %project_id,
                source = %source_entity_id,
                "Invalid relation: self-loop rejected"
            );
            return Err(err);
        }

        for (field, entity_id) in [
            ("source_entity_id", source_entity_id),
            ("target_entity_id", target_entity_id),
        ] {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT project_id FROM entities WHERE id = ?")
                    .bind(entity_id)
                    .fetch_optional(&self.pool)
                    .await?;
            let valid = matches!(row, Some((ref p,)) if p == project_id);
            if !valid {
                warn!(
                    project_id = %project_id,
                    field = field,
                    entity_id = %entity_id,
                    "Invalid relation: endpoint missing or in another project"
                );
                return Err(Error::InvalidRelation {
                    field,
                    reason: format!("entity '{entity_id}' does not exist in this project"),
                });
            }
        }
        Ok(())
    }

    /// Register a relation type into the per-project catalog (bookkeeping
    /// only; never a functional gate)
    async fn register_relation_type(&self, project_id: &str, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO relation_types (project_id, name, builtin) VALUES (?, ?, 0)",
        )
        .bind(project_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_entity_row(&self, project_id: &str, entity_id: &str) -> Result<EntityRow> {
        let row: Option<EntityRow> =
            sqlx::query_as("SELECT * FROM entities WHERE id = ? AND project_id = ?")
                .bind(entity_id)
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or_else(|| Error::EntityNotFound(entity_id.to_string()))
    }
}

#[async_trait]
impl GraphRepository for SqliteGraphRepository {
    // ========== Project Operations ==========

    async fn create_project(&self, name: &str) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("project name must not be empty".into()));
        }

        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO projects (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(project.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        for builtin in BUILTIN_RELATION_TYPES {
            sqlx::query(
                "INSERT OR IGNORE INTO relation_types (project_id, name, builtin) VALUES (?, ?, 1)",
            )
            .bind(&project.id)
            .bind(builtin)
            .execute(&self.pool)
            .await?;
        }

        info!(project_id = %project.id, project_name = %project.name, "Project created");
        Ok(project)
    }

    async fn project_exists(&self, project_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // ========== Entity Operations ==========

    async fn create_entity(&self, project_id: &str, draft: EntityDraft) -> Result<Entity> {
        self.ensure_project(project_id).await?;
        self.validate_entity_fields(&draft.name, &draft.description, &draft.attributes)?;
        self.check_node_quota(project_id).await?;
        self.check_duplicate(project_id, draft.entity_type, &draft.name, None)
            .await?;

        let mut entity = draft.into_entity(project_id);
        entity.name = entity.name.trim().to_string();

        let attributes_json = serde_json::to_string(&entity.attributes)
            .map_err(|e| Error::InvalidInput(format!("unserializable attributes: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO entities (
                id, project_id, entity_type, name, name_normalized,
                description, attributes, version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.project_id)
        .bind(entity.entity_type.as_str())
        .bind(&entity.name)
        .bind(entity.name_normalized())
        .bind(&entity.description)
        .bind(&attributes_json)
        .bind(entity.version)
        .bind(entity.created_at.to_rfc3339())
        .bind(entity.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            project_id = %project_id,
            entity_id = %entity.id,
            entity_name = %entity.name,
            "Entity created"
        );
        Ok(entity)
    }

    async fn get_entity(&self, project_id: &str, entity_id: &str) -> Result<Entity> {
        self.ensure_project(project_id).await?;
        self.fetch_entity_row(project_id, entity_id)
            .await?
            .into_entity()
    }

    async fn list_entities(&self, project_id: &str) -> Result<Vec<Entity>> {
        self.ensure_project(project_id).await?;
        let rows: Vec<EntityRow> =
            sqlx::query_as("SELECT * FROM entities WHERE project_id = ? ORDER BY name")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|r| r.into_entity()).collect()
    }

    async fn find_entity_by_name(
        &self,
        project_id: &str,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Entity>> {
        self.ensure_project(project_id).await?;
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT * FROM entities
            WHERE project_id = ? AND entity_type = ? AND name_normalized = ?
            "#,
        )
        .bind(project_id)
        .bind(entity_type.as_str())
        .bind(normalize_name(name))
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_entity()).transpose()
    }

    async fn update_entity(
        &self,
        project_id: &str,
        entity_id: &str,
        expected_version: i64,
        patch: EntityPatch,
    ) -> Result<Entity> {
        self.ensure_project(project_id).await?;
        let current = self.fetch_entity_row(project_id, entity_id).await?.into_entity()?;

        if current.version != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                latest_version: current.version,
                latest: Box::new(current),
            });
        }

        let mut updated = current.clone();
        if let Some(entity_type) = patch.entity_type {
            updated.entity_type = entity_type;
        }
        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(attributes) = patch.attributes {
            updated.attributes = attributes;
        }

        self.validate_entity_fields(&updated.name, &updated.description, &updated.attributes)?;
        // Uniqueness re-check excludes the row being updated.
        self.check_duplicate(
            project_id,
            updated.entity_type,
            &updated.name,
            Some(entity_id),
        )
        .await?;

        updated.version = current.version + 1;
        updated.updated_at = Utc::now();

        let attributes_json = serde_json::to_string(&updated.attributes)
            .map_err(|e| Error::InvalidInput(format!("unserializable attributes: {e}")))?;

        sqlx::query(
            r#"
            UPDATE entities SET
                entity_type = ?, name = ?, name_normalized = ?,
                description = ?, attributes = ?, version = ?, updated_at = ?
            WHERE id = ? AND project_id = ? AND version = ?
            "#,
        )
        .bind(updated.entity_type.as_str())
        .bind(&updated.name)
        .bind(updated.name_normalized())
        .bind(&updated.description)
        .bind(&attributes_json)
        .bind(updated.version)
        .bind(updated.updated_at.to_rfc3339())
        .bind(entity_id)
        .bind(project_id)
        .bind(current.version)
        .execute(&self.pool)
        .await?;

        debug!(
            project_id = %project_id,
            entity_id = %entity_id,
            version = updated.version,
            "Entity updated"
        );
        Ok(updated)
    }

    async fn delete_entity(&self, project_id: &str, entity_id: &str) -> Result<u64> {
        self.ensure_project(project_id).await?;
        // Existence check up front so a missing entity is NOT_FOUND, not a no-op.
        self.fetch_entity_row(project_id, entity_id).await?;

        let mut tx = self.pool.begin().await?;

        let cascade = sqlx::query(
            r#"
            DELETE FROM relations
            WHERE project_id = ? AND (source_entity_id = ? OR target_entity_id = ?)
            "#,
        )
        .bind(project_id)
        .bind(entity_id)
        .bind(entity_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM entities WHERE id = ? AND project_id = ?")
            .bind(entity_id)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted_relations = cascade.rows_affected();
        info!(
            project_id = %project_id,
            entity_id = %entity_id,
            deleted_relations = deleted_relations,
            "Entity deleted with relation cascade"
        );
        Ok(deleted_relations)
    }

    // ========== Relation Operations ==========

    async fn create_relation(&self, project_id: &str, draft: RelationDraft) -> Result<Relation> {
        self.ensure_project(project_id).await?;
        self.validate_relation_fields(&draft.relation_type, &draft.description)?;
        self.check_edge_quota(project_id).await?;
        self.validate_endpoints(project_id, &draft.source_entity_id, &draft.target_entity_id)
            .await?;

        let relation = Relation {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            source_entity_id: draft.source_entity_id,
            target_entity_id: draft.target_entity_id,
            relation_type: draft.relation_type,
            description: draft.description,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO relations (
                id, project_id, source_entity_id, target_entity_id,
                relation_type, description, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&relation.id)
        .bind(&relation.project_id)
        .bind(&relation.source_entity_id)
        .bind(&relation.target_entity_id)
        .bind(&relation.relation_type)
        .bind(&relation.description)
        .bind(relation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.register_relation_type(project_id, &relation.relation_type)
            .await?;

        debug!(
            project_id = %project_id,
            relation_id = %relation.id,
            relation_type = %relation.relation_type,
            "Relation created"
        );
        Ok(relation)
    }

    async fn list_relations(&self, project_id: &str) -> Result<Vec<Relation>> {
        self.ensure_project(project_id).await?;
        let rows: Vec<RelationRow> =
            sqlx::query_as("SELECT * FROM relations WHERE project_id = ? ORDER BY created_at")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|r| r.into_relation()).collect()
    }

    async fn update_relation(
        &self,
        project_id: &str,
        relation_id: &str,
        patch: RelationPatch,
    ) -> Result<Relation> {
        self.ensure_project(project_id).await?;

        let row: Option<RelationRow> =
            sqlx::query_as("SELECT * FROM relations WHERE id = ? AND project_id = ?")
                .bind(relation_id)
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;
        let mut relation = row
            .ok_or_else(|| Error::RelationNotFound(relation_id.to_string()))?
            .into_relation()?;

        if let Some(source) = patch.source_entity_id {
            relation.source_entity_id = source;
        }
        if let Some(target) = patch.target_entity_id {
            relation.target_entity_id = target;
        }
        if let Some(relation_type) = patch.relation_type {
            relation.relation_type = relation_type;
        }
        if let Some(description) = patch.description {
            relation.description = description;
        }

        self.validate_relation_fields(&relation.relation_type, &relation.description)?;
        self.validate_endpoints(
            project_id,
            &relation.source_entity_id,
            &relation.target_entity_id,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE relations SET
                source_entity_id = ?, target_entity_id = ?,
                relation_type = ?, description = ?
            WHERE id = ? AND project_id = ?
            "#,
        )
        .bind(&relation.source_entity_id)
        .bind(&relation.target_entity_id)
        .bind(&relation.relation_type)
        .bind(&relation.description)
        .bind(relation_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        self.register_relation_type(project_id, &relation.relation_type)
            .await?;

        debug!(project_id = %project_id, relation_id = %relation_id, "Relation updated");
        Ok(relation)
    }

    async fn delete_relation(&self, project_id: &str, relation_id: &str) -> Result<()> {
        self.ensure_project(project_id).await?;
        let result = sqlx::query("DELETE FROM relations WHERE id = ? AND project_id = ?")
            .bind(relation_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::RelationNotFound(relation_id.to_string()));
        }
        debug!(project_id = %project_id, relation_id = %relation_id, "Relation deleted");
        Ok(())
    }

    async fn list_relation_types(&self, project_id: &str) -> Result<Vec<String>> {
        self.ensure_project(project_id).await?;
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM relation_types WHERE project_id = ? ORDER BY builtin DESC, name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

// ========== Database Row Types ==========

#[derive(Debug, FromRow)]
struct EntityRow {
    id: String,
    project_id: String,
    entity_type: String,
    name: String,
    #[allow(dead_code)]
    name_normalized: String,
    description: String,
    attributes: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        let entity_type = EntityType::parse(&self.entity_type)
            .ok_or_else(|| Error::InvalidInput(format!("invalid entity type: {}", self.entity_type)))?;

        let attributes: BTreeMap<String, String> =
            serde_json::from_str(&self.attributes).unwrap_or_default();

        Ok(Entity {
            id: self.id,
            project_id: self.project_id,
            entity_type,
            name: self.name,
            description: self.description,
            attributes,
            version: self.version,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationRow {
    id: String,
    project_id: String,
    source_entity_id: String,
    target_entity_id: String,
    relation_type: String,
    description: String,
    created_at: String,
}

impl RelationRow {
    fn into_relation(self) -> Result<Relation> {
        Ok(Relation {
            id: self.id,
            project_id: self.project_id,
            source_entity_id: self.source_entity_id,
            target_entity_id: self.target_entity_id,
            relation_type: self.relation_type,
            description: self.description,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
