//! Per-session suggestion bookkeeping
//!
//! A session accumulates pending suggestions until each is accepted
//! (entity created or merged) or dismissed (dedupe key remembered so the
//! same candidate never re-surfaces in that session). Sessions live for
//! the process lifetime; there is no eviction.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::graph::entity::{dedupe_key, EntityType};

/// A pending entity suggestion held in session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSuggestion {
    pub suggestion_id: String,
    pub task_id: String,
    pub session_id: String,
    pub project_id: String,
    pub document_id: String,
    pub name: String,
    pub entity_type: EntityType,
    /// `type:normalized(name)`, shared with entity uniqueness
    pub dedupe_key: String,
    pub created_at: DateTime<Utc>,
}

impl StoredSuggestion {
    pub fn new(
        task_id: &str,
        session_id: &str,
        project_id: &str,
        document_id: &str,
        name: &str,
        entity_type: EntityType,
    ) -> Self {
        Self {
            suggestion_id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            project_id: project_id.to_string(),
            document_id: document_id.to_string(),
            name: name.to_string(),
            entity_type,
            dedupe_key: dedupe_key(entity_type, name),
            created_at: Utc::now(),
        }
    }
}

/// Mutable per-session state owned by the scheduler
#[derive(Debug, Default)]
pub struct SessionState {
    /// Pending suggestions by `suggestion_id`
    pub suggestions: HashMap<String, StoredSuggestion>,
    /// Dedupe keys the user dismissed in this session
    pub dismissed_keys: HashSet<String>,
}

impl SessionState {
    /// True if an equivalent suggestion is already pending
    pub fn has_pending_key(&self, key: &str) -> bool {
        self.suggestions.values().any(|s| s.dedupe_key == key)
    }

    pub fn is_dismissed(&self, key: &str) -> bool {
        self.dismissed_keys.contains(key)
    }

    pub fn insert(&mut self, suggestion: StoredSuggestion) {
        self.suggestions
            .insert(suggestion.suggestion_id.clone(), suggestion);
    }

    /// Remove a pending suggestion, returning it if present
    pub fn remove(&mut self, suggestion_id: &str) -> Option<StoredSuggestion> {
        self.suggestions.remove(suggestion_id)
    }

    /// Dismiss: remove from pending and remember the dedupe key
    pub fn dismiss(&mut self, suggestion_id: &str) -> Option<StoredSuggestion> {
        let suggestion = self.suggestions.remove(suggestion_id)?;
        self.dismissed_keys.insert(suggestion.dedupe_key.clone());
        Some(suggestion)
    }
}
