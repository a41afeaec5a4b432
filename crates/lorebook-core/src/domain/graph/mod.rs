//! Knowledge graph: model types, repository contract, and query engine

pub mod entity;
pub mod query;
pub mod repository;

pub use entity::{
    dedupe_key, normalize_name, Entity, EntityDraft, EntityPatch, EntityType, Project, Relation,
    RelationDraft, RelationPatch,
};
pub use query::{
    ContextRules, CycleReport, EntityRules, GraphQueryService, PathResult, RelevantEntity,
    SubgraphResult,
};
pub use repository::GraphRepository;
