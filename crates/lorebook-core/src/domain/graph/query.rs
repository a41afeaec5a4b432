//! Graph query engine
//!
//! Pure, in-memory algorithms over snapshots read from the repository.
//! Every operation resolves the project, fetches the entity/relation
//! snapshots once, and computes without holding a live transactional view.
//! Bounded searches carry both a wall-clock and an expansion budget so a
//! pathological graph degrades into a diagnostic error, never a hang or a
//! silently wrong answer.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GraphLimits;
use crate::error::{Error, Result};

use super::entity::{Entity, EntityType, Relation};
use super::repository::GraphRepository;

/// Default number of entities returned by a relevance query
const DEFAULT_RELEVANT_LIMIT: usize = 5;
/// Hard cap on the relevance query limit
const MAX_RELEVANT_LIMIT: usize = 50;
/// Score for a verbatim (case-folded) name mention in the excerpt
const VERBATIM_MENTION_SCORE: i64 = 100;
/// Score per keyword token shared with the entity's description/attributes
const KEYWORD_SCORE: i64 = 8;
/// Minimum token length considered a keyword
const MIN_TOKEN_LEN: usize = 2;
/// Only the first N distinct excerpt tokens are scored
const KEYWORD_TOKEN_CAP: usize = 24;
/// Relation summaries collected per entity for rules injection
const MAX_RELATION_SUMMARIES: usize = 8;
/// Source tag attached to rules-injection results
const RULES_SOURCE: &str = "knowledge-graph";

/// Result of a k-hop subgraph extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphResult {
    pub center_entity_id: String,
    pub k: u32,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub entity_count: usize,
    pub relation_count: usize,
    pub elapsed_ms: u64,
}

/// Result of a shortest-path search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    /// Ordered entity ids from source to target; empty when unreachable
    pub path: Vec<String>,
    /// Nodes dequeued during the search
    pub expansions: u64,
    /// Always false on success; budget breaches surface as errors instead
    pub degraded: bool,
    pub elapsed_ms: u64,
}

/// Result of cycle detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Each cycle is an ordered id sequence closed on its first node,
    /// e.g. `[a, b, c, a]`
    pub cycles: Vec<Vec<String>>,
    pub elapsed_ms: u64,
}

/// A scored entity from a relevance query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevantEntity {
    pub entity: Entity,
    pub score: i64,
    /// Byte index of the earliest verbatim name mention in the excerpt
    pub mention_index: Option<usize>,
}

/// One entity's contribution to rules injection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRules {
    pub entity_id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    /// Attributes with empty keys or values dropped
    pub attributes: BTreeMap<String, String>,
    /// Up to eight `"<source> -(<type>)-> <target>"` summaries
    pub relation_summaries: Vec<String>,
}

/// Source-tagged rules-injection payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRules {
    pub source: String,
    pub rules: Vec<EntityRules>,
    /// True when the underlying relevance query failed and the result
    /// degraded to empty instead of propagating
    pub degraded: bool,
}

/// Graph query engine over repository snapshots
pub struct GraphQueryService<R: GraphRepository> {
    repository: Arc<R>,
    limits: GraphLimits,
}

impl<R: GraphRepository> GraphQueryService<R> {
    /// Create a new query service; `limits` must already be validated
    pub fn new(repository: Arc<R>, limits: GraphLimits) -> Self {
        Self { repository, limits }
    }

    /// Extract the induced subgraph within BFS distance `k` of a center
    /// entity, treating relations as undirected for reachability
    pub async fn subgraph(
        &self,
        project_id: &str,
        center_entity_id: &str,
        k: u32,
    ) -> Result<SubgraphResult> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be a positive integer".into()));
        }
        if k > self.limits.subgraph_max_k {
            return Err(Error::SubgraphDepthExceeded {
                requested: k,
                max_k: self.limits.subgraph_max_k,
            });
        }

        let started = Instant::now();
        // Also validates the project and that the center exists in it.
        self.repository.get_entity(project_id, center_entity_id).await?;

        let entities = self.repository.list_entities(project_id).await?;
        let relations = self.repository.list_relations(project_id).await?;

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for relation in &relations {
            adjacency
                .entry(relation.source_entity_id.as_str())
                .or_default()
                .push(relation.target_entity_id.as_str());
            adjacency
                .entry(relation.target_entity_id.as_str())
                .or_default()
                .push(relation.source_entity_id.as_str());
        }

        let mut reached: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        reached.insert(center_entity_id.to_string());
        queue.push_back((center_entity_id.to_string(), 0));

        while let Some((node, depth)) = queue.pop_front() {
            if depth == k {
                continue;
            }
            if let Some(neighbors) = adjacency.get(node.as_str()) {
                for &next in neighbors {
                    if reached.insert(next.to_string()) {
                        queue.push_back((next.to_string(), depth + 1));
                    }
                }
            }
        }

        let entities: Vec<Entity> = entities
            .into_iter()
            .filter(|e| reached.contains(e.id.as_str()))
            .collect();
        let relations: Vec<Relation> = relations
            .into_iter()
            .filter(|r| {
                reached.contains(r.source_entity_id.as_str())
                    && reached.contains(r.target_entity_id.as_str())
            })
            .collect();

        Ok(SubgraphResult {
            center_entity_id: center_entity_id.to_string(),
            k,
            entity_count: entities.len(),
            relation_count: relations.len(),
            entities,
            relations,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// BFS shortest path over the directed relation graph, bounded by a
    /// wall-clock timeout and an absolute expansion cap
    pub async fn shortest_path(
        &self,
        project_id: &str,
        source_entity_id: &str,
        target_entity_id: &str,
        timeout_ms: Option<u64>,
    ) -> Result<PathResult> {
        let started = Instant::now();
        let timeout_ms = timeout_ms.unwrap_or(self.limits.query_timeout_ms);

        let entities = self.repository.list_entities(project_id).await?;
        let known: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();

        for (field, entity_id) in [
            ("source_entity_id", source_entity_id),
            ("target_entity_id", target_entity_id),
        ] {
            if !known.contains(entity_id) {
                return Err(Error::InvalidRelation {
                    field,
                    reason: format!("entity '{entity_id}' does not exist in this project"),
                });
            }
        }

        let relations = self.repository.list_relations(project_id).await?;
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for relation in &relations {
            adjacency
                .entry(relation.source_entity_id.as_str())
                .or_default()
                .push(relation.target_entity_id.as_str());
        }

        let mut predecessor: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(source_entity_id);
        queue.push_back(source_entity_id);

        let mut expansions: u64 = 0;
        let mut found = source_entity_id == target_entity_id;

        while let Some(node) = queue.pop_front() {
            if started.elapsed().as_millis() as u64 >= timeout_ms
                || expansions >= self.limits.path_expansion_limit
            {
                return Err(Error::QueryTimeout {
                    expansions,
                    suggestion:
                        "Narrow the search or raise query_timeout_ms / path_expansion_limit"
                            .to_string(),
                });
            }
            expansions += 1;

            if node == target_entity_id {
                found = true;
                break;
            }
            if let Some(neighbors) = adjacency.get(node) {
                for &next in neighbors {
                    if visited.insert(next) {
                        predecessor.insert(next, node);
                        queue.push_back(next);
                    }
                }
            }
        }

        let path = if found {
            let mut path = vec![target_entity_id.to_string()];
            let mut cursor = target_entity_id;
            while let Some(&prev) = predecessor.get(cursor) {
                path.push(prev.to_string());
                cursor = prev;
            }
            path.reverse();
            path
        } else {
            // Unreachable is an empty path, not an error.
            Vec::new()
        };

        debug!(
            project_id = %project_id,
            expansions = expansions,
            path_len = path.len(),
            "Shortest-path search finished"
        );

        Ok(PathResult {
            path,
            expansions,
            degraded: false,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Find all distinct cycles in the directed relation graph
    ///
    /// Iterative DFS with an explicit stack; a back-edge to a node still on
    /// the current path yields a cycle. Cycles are deduplicated by their
    /// ordered-node signature so the same loop discovered from different
    /// roots is reported once.
    pub async fn detect_cycles(&self, project_id: &str) -> Result<CycleReport> {
        let started = Instant::now();
        let entities = self.repository.list_entities(project_id).await?;
        let relations = self.repository.list_relations(project_id).await?;

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for relation in &relations {
            adjacency
                .entry(relation.source_entity_id.as_str())
                .or_default()
                .push(relation.target_entity_id.as_str());
        }
        for neighbors in adjacency.values_mut() {
            neighbors.sort_unstable();
        }

        let mut roots: Vec<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        roots.sort_unstable();

        let mut finished: HashSet<&str> = HashSet::new();
        let mut signatures: HashSet<Vec<String>> = HashSet::new();
        let mut cycles: Vec<Vec<String>> = Vec::new();

        for root in roots {
            if finished.contains(root) {
                continue;
            }

            // Frame = (node, index of the next neighbor to explore).
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            let mut path: Vec<&str> = vec![root];
            let mut on_path: HashSet<&str> = HashSet::new();
            on_path.insert(root);

            while let Some(frame) = stack.last_mut() {
                let (node, next_index) = (frame.0, frame.1);
                let neighbors = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);

                if next_index < neighbors.len() {
                    frame.1 += 1;
                    let next = neighbors[next_index];

                    if on_path.contains(next) {
                        // Back-edge: the cycle is the path slice from `next`.
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|n| n.to_string()).collect();
                        cycle.push(next.to_string());
                        if signatures.insert(cycle_signature(&cycle)) {
                            cycles.push(cycle);
                        }
                    } else if !finished.contains(next) {
                        stack.push((next, 0));
                        path.push(next);
                        on_path.insert(next);
                    }
                } else {
                    finished.insert(node);
                    on_path.remove(node);
                    path.pop();
                    stack.pop();
                }
            }
        }

        Ok(CycleReport {
            cycles,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Score project entities against a text excerpt
    ///
    /// Candidates come from the allow-list when given (cross-project
    /// entries are a hard scope violation) or from the whole project. An
    /// empty excerpt returns the first `max_entities` candidates unscored.
    pub async fn query_relevant(
        &self,
        project_id: &str,
        excerpt: &str,
        max_entities: Option<usize>,
        entity_ids: Option<&[String]>,
    ) -> Result<Vec<RelevantEntity>> {
        let limit = max_entities
            .unwrap_or(DEFAULT_RELEVANT_LIMIT)
            .min(MAX_RELEVANT_LIMIT);

        let entities = match self.repository.list_entities(project_id).await {
            Ok(entities) => entities,
            Err(err @ (Error::ProjectNotFound(_) | Error::InvalidInput(_))) => return Err(err),
            Err(err) => {
                warn!(project_id = %project_id, error = %err, "Relevance snapshot read failed");
                return Err(Error::RelevantQueryFailed(err.to_string()));
            }
        };
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();

        let candidates: Vec<&Entity> = match entity_ids {
            Some(ids) => {
                let mut seen: HashSet<&str> = HashSet::new();
                let mut picked = Vec::new();
                for id in ids {
                    if !seen.insert(id.as_str()) {
                        continue;
                    }
                    match by_id.get(id.as_str()) {
                        Some(entity) => picked.push(*entity),
                        None => {
                            warn!(
                                project_id = %project_id,
                                entity_id = %id,
                                "Scope violation in relevance allow-list"
                            );
                            return Err(Error::ScopeViolation {
                                entity_id: id.clone(),
                                project_id: project_id.to_string(),
                            });
                        }
                    }
                }
                picked
            }
            None => entities.iter().collect(),
        };

        if excerpt.trim().is_empty() {
            return Ok(candidates
                .into_iter()
                .take(limit)
                .map(|entity| RelevantEntity {
                    entity: entity.clone(),
                    score: 0,
                    mention_index: None,
                })
                .collect());
        }

        let excerpt_folded = excerpt.to_lowercase();
        let keywords: Vec<String> = tokenize(&excerpt_folded)
            .into_iter()
            .take(KEYWORD_TOKEN_CAP)
            .collect();

        let mut scored: Vec<RelevantEntity> = candidates
            .into_iter()
            .filter_map(|entity| {
                let mut score = 0;
                let mention_index = excerpt_folded.find(&entity.name_normalized());
                if mention_index.is_some() {
                    score += VERBATIM_MENTION_SCORE;
                }

                let mut haystack = entity.description.to_lowercase();
                for (key, value) in &entity.attributes {
                    haystack.push(' ');
                    haystack.push_str(&key.to_lowercase());
                    haystack.push(' ');
                    haystack.push_str(&value.to_lowercase());
                }
                let entity_tokens: HashSet<String> = tokenize(&haystack).into_iter().collect();
                for keyword in &keywords {
                    if entity_tokens.contains(keyword) {
                        score += KEYWORD_SCORE;
                    }
                }

                if score == 0 {
                    return None;
                }
                Some(RelevantEntity {
                    entity: entity.clone(),
                    score,
                    mention_index,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| {
                    let a_index = a.mention_index.unwrap_or(usize::MAX);
                    let b_index = b.mention_index.unwrap_or(usize::MAX);
                    a_index.cmp(&b_index)
                })
                .then_with(|| b.entity.updated_at.cmp(&a.entity.updated_at))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Resolve entities for an id set in request order, deduplicated
    ///
    /// Any id that does not resolve within the project fails the whole
    /// call with a scope violation; no partial results.
    pub async fn query_by_ids(&self, project_id: &str, ids: &[String]) -> Result<Vec<Entity>> {
        let entities = self.repository.list_entities(project_id).await?;
        let by_id: HashMap<&str, &Entity> = entities.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut resolved = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match by_id.get(id.as_str()) {
                Some(entity) => resolved.push((*entity).clone()),
                None => {
                    warn!(
                        project_id = %project_id,
                        entity_id = %id,
                        "Scope violation in by-ids lookup"
                    );
                    return Err(Error::ScopeViolation {
                        entity_id: id.clone(),
                        project_id: project_id.to_string(),
                    });
                }
            }
        }
        Ok(resolved)
    }

    /// Rules-injection composition over the relevance query
    ///
    /// Degrades to an empty, source-tagged result on any failure except a
    /// scope violation, which always propagates.
    pub async fn context_rules(
        &self,
        project_id: &str,
        excerpt: &str,
        max_entities: Option<usize>,
        entity_ids: Option<&[String]>,
    ) -> Result<ContextRules> {
        let relevant = match self
            .query_relevant(project_id, excerpt, max_entities, entity_ids)
            .await
        {
            Ok(relevant) => relevant,
            Err(err @ Error::ScopeViolation { .. }) => return Err(err),
            Err(err) => {
                warn!(project_id = %project_id, error = %err, "Rules injection degraded");
                return Ok(ContextRules {
                    source: RULES_SOURCE.to_string(),
                    rules: Vec::new(),
                    degraded: true,
                });
            }
        };

        let (entities, relations) = match (
            self.repository.list_entities(project_id).await,
            self.repository.list_relations(project_id).await,
        ) {
            (Ok(entities), Ok(relations)) => (entities, relations),
            (Err(err), _) | (_, Err(err)) => {
                warn!(project_id = %project_id, error = %err, "Rules injection degraded");
                return Ok(ContextRules {
                    source: RULES_SOURCE.to_string(),
                    rules: Vec::new(),
                    degraded: true,
                });
            }
        };
        let names: HashMap<&str, &str> = entities
            .iter()
            .map(|e| (e.id.as_str(), e.name.as_str()))
            .collect();

        let rules = relevant
            .into_iter()
            .map(|relevant| {
                let entity = relevant.entity;
                let attributes: BTreeMap<String, String> = entity
                    .attributes
                    .iter()
                    .filter_map(|(key, value)| {
                        let key = key.trim();
                        let value = value.trim();
                        if key.is_empty() || value.is_empty() {
                            None
                        } else {
                            Some((key.to_string(), value.to_string()))
                        }
                    })
                    .collect();

                let relation_summaries: Vec<String> = relations
                    .iter()
                    .filter(|r| r.touches(&entity.id))
                    .take(MAX_RELATION_SUMMARIES)
                    .map(|r| {
                        let source = names.get(r.source_entity_id.as_str()).copied().unwrap_or("?");
                        let target = names.get(r.target_entity_id.as_str()).copied().unwrap_or("?");
                        format!("{source} -({})-> {target}", r.relation_type)
                    })
                    .collect();

                EntityRules {
                    entity_id: entity.id,
                    name: entity.name,
                    entity_type: entity.entity_type,
                    description: entity.description.trim().to_string(),
                    attributes,
                    relation_summaries,
                }
            })
            .collect();

        Ok(ContextRules {
            source: RULES_SOURCE.to_string(),
            rules,
            degraded: false,
        })
    }
}

/// Canonical signature of a closed cycle: the node sequence rotated so the
/// smallest id comes first (closing repeat dropped)
fn cycle_signature(cycle: &[String]) -> Vec<String> {
    let nodes = &cycle[..cycle.len() - 1];
    let pivot = nodes
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    nodes[pivot..]
        .iter()
        .chain(nodes[..pivot].iter())
        .cloned()
        .collect()
}

/// Split folded text into distinct keyword tokens, preserving order
///
/// A token is a run of alphanumeric characters at least two characters
/// long.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.chars().count() < MIN_TOKEN_LEN {
            continue;
        }
        if seen.insert(token.to_string()) {
            tokens.push(token.to_string());
        }
    }
    tokens
}
