//! Recognizer abstraction
//!
//! The recognizer turns free text into entity candidates. It is a
//! pluggable collaborator: production wires a model-backed implementation,
//! tests and demos use the deterministic mock below. The scheduler treats
//! recognizer unavailability as a degraded feature, not a failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::graph::entity::EntityType;
use crate::error::{Error, Result};

/// One recognition request, carrying the task's full context
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub project_id: String,
    pub document_id: String,
    pub session_id: String,
    pub content_text: String,
    pub trace_id: String,
}

/// A candidate entity extracted from text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub name: String,
    pub entity_type: EntityType,
}

impl EntityCandidate {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
        }
    }
}

/// Result of a successful recognition pass
#[derive(Debug, Clone, Default)]
pub struct RecognitionOutcome {
    pub candidates: Vec<EntityCandidate>,
}

/// Pluggable text-to-candidates recognizer
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, request: RecognitionRequest) -> Result<RecognitionOutcome>;
}

/// Deterministic recognizer for tests and demos
///
/// Returns a fixed candidate list on every call, optionally after an
/// artificial delay (to hold tasks in flight) or as a configured failure.
pub struct MockRecognizer {
    candidates: Vec<EntityCandidate>,
    delay: Option<Duration>,
    failure: Option<MockFailure>,
    calls: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
enum MockFailure {
    Unavailable,
    Internal,
}

impl MockRecognizer {
    pub fn new(candidates: Vec<EntityCandidate>) -> Self {
        Self {
            candidates,
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `recognize` call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with `KG_RECOGNITION_UNAVAILABLE`
    pub fn unavailable() -> Self {
        Self {
            candidates: Vec::new(),
            delay: None,
            failure: Some(MockFailure::Unavailable),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every call with a generic recognizer error
    pub fn failing() -> Self {
        Self {
            candidates: Vec::new(),
            delay: None,
            failure: Some(MockFailure::Internal),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `recognize` calls observed so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(&self, _request: RecognitionRequest) -> Result<RecognitionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(MockFailure::Unavailable) => Err(Error::RecognitionUnavailable(
                "mock recognizer configured unavailable".to_string(),
            )),
            Some(MockFailure::Internal) => Err(Error::InvalidInput(
                "mock recognizer configured to fail".to_string(),
            )),
            None => Ok(RecognitionOutcome {
                candidates: self.candidates.clone(),
            }),
        }
    }
}
