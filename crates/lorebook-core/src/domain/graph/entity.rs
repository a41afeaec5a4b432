//! Graph model types for the knowledge-graph engine
//!
//! Entities are the nodes of a project's story graph (characters, places,
//! events...); relations are directed, typed edges between them. Both are
//! scoped to a project, which is the tenant boundary for every operation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of an entity name
pub const MAX_NAME_LEN: usize = 256;
/// Maximum length of an entity or relation description
pub const MAX_DESCRIPTION_LEN: usize = 4096;
/// Maximum length of a relation type string
pub const MAX_RELATION_TYPE_LEN: usize = 64;

/// Relation types seeded into every project's catalog
pub const BUILTIN_RELATION_TYPES: &[&str] = &[
    "knows",
    "allied_with",
    "enemy_of",
    "member_of",
    "located_in",
    "owns",
    "participated_in",
    "parent_of",
];

/// Normalize a name for deduplication: trim plus case-fold
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Dedupe key shared by entity uniqueness and suggestion deduplication
pub fn dedupe_key(entity_type: EntityType, name: &str) -> String {
    format!("{}:{}", entity_type.as_str(), normalize_name(name))
}

/// A project: the tenant scope for entities, relations, and sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A node in a project's knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub project_id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub description: String,
    /// Free-form string attributes (e.g. "age" -> "34")
    pub attributes: BTreeMap<String, String>,
    /// Optimistic-concurrency token; starts at 1, +1 per successful update
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Normalized form of this entity's name
    pub fn name_normalized(&self) -> String {
        normalize_name(&self.name)
    }

    /// Dedupe key for uniqueness and suggestion filtering
    pub fn dedupe_key(&self) -> String {
        dedupe_key(self.entity_type, &self.name)
    }
}

/// Input for creating a new entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDraft {
    pub entity_type: EntityType,
    pub name: String,
    pub description: String,
    pub attributes: BTreeMap<String, String>,
}

impl EntityDraft {
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            entity_type,
            name: name.into(),
            description: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Materialize the draft into a full entity row
    pub fn into_entity(self, project_id: &str) -> Entity {
        let now = Utc::now();
        Entity {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            entity_type: self.entity_type,
            name: self.name,
            description: self.description,
            attributes: self.attributes,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for an entity; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityPatch {
    pub entity_type: Option<EntityType>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub attributes: Option<BTreeMap<String, String>>,
}

impl EntityPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn describe(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }
}

/// A directed, typed edge between two entities of the same project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub project_id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    /// Free string, registered into the per-project type catalog
    pub relation_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// True if this relation touches the given entity as source or target
    pub fn touches(&self, entity_id: &str) -> bool {
        self.source_entity_id == entity_id || self.target_entity_id == entity_id
    }
}

/// Input for creating a new relation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDraft {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation_type: String,
    pub description: String,
}

impl RelationDraft {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            source_entity_id: source.into(),
            target_entity_id: target.into(),
            relation_type: relation_type.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Partial update for a relation; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationPatch {
    pub source_entity_id: Option<String>,
    pub target_entity_id: Option<String>,
    pub relation_type: Option<String>,
    pub description: Option<String>,
}

/// Kinds of entities a story graph can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Location,
    Event,
    Item,
    Faction,
}

impl EntityType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Event => "event",
            Self::Item => "item",
            Self::Faction => "faction",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "character" => Some(Self::Character),
            "location" | "place" => Some(Self::Location),
            "event" => Some(Self::Event),
            "item" => Some(Self::Item),
            "faction" | "organization" => Some(Self::Faction),
            _ => None,
        }
    }

    /// Get all entity types
    pub fn all() -> &'static [EntityType] {
        &[
            Self::Character,
            Self::Location,
            Self::Event,
            Self::Item,
            Self::Faction,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_trims_and_case_folds() {
        assert_eq!(normalize_name("  Aria Stone  "), "aria stone");
        assert_eq!(normalize_name("VELDHEIM"), "veldheim");
    }

    #[test]
    fn dedupe_key_combines_type_and_normalized_name() {
        assert_eq!(
            dedupe_key(EntityType::Character, " Aria "),
            "character:aria"
        );
        assert_ne!(
            dedupe_key(EntityType::Character, "Aria"),
            dedupe_key(EntityType::Location, "Aria")
        );
    }

    #[test]
    fn draft_materializes_at_version_one() {
        let entity = EntityDraft::new(EntityType::Character, "Aria")
            .with_description("Wandering cartographer")
            .with_attribute("age", "34")
            .into_entity("project-1");

        assert!(!entity.id.is_empty());
        assert_eq!(entity.version, 1);
        assert_eq!(entity.project_id, "project-1");
        assert_eq!(entity.attributes.get("age").map(String::as_str), Some("34"));
    }

    #[test]
    fn entity_type_parsing() {
        assert_eq!(EntityType::parse("character"), Some(EntityType::Character));
        assert_eq!(EntityType::parse("FACTION"), Some(EntityType::Faction));
        assert_eq!(EntityType::parse("place"), Some(EntityType::Location));
        assert_eq!(EntityType::parse("dragon"), None);

        // Every type round-trips through its canonical string form.
        for entity_type in EntityType::all() {
            assert_eq!(EntityType::parse(entity_type.as_str()), Some(*entity_type));
        }
    }

    #[test]
    fn relation_touches_either_endpoint() {
        let relation = Relation {
            id: "r1".into(),
            project_id: "p".into(),
            source_entity_id: "a".into(),
            target_entity_id: "b".into(),
            relation_type: "knows".into(),
            description: String::new(),
            created_at: Utc::now(),
        };
        assert!(relation.touches("a"));
        assert!(relation.touches("b"));
        assert!(!relation.touches("c"));
    }
}
