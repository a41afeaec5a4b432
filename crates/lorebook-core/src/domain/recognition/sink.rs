//! Suggestion delivery sink
//!
//! The scheduler pushes suggestion events to a caller-supplied sink. The
//! destination may be gone by the time a task completes, so `send` is
//! fallible; the scheduler logs delivery failures and never lets them fail
//! the task.

use std::sync::Mutex;

use crate::error::{Error, Result};

use super::session::StoredSuggestion;

/// One suggestion pushed to a session's sink
#[derive(Debug, Clone)]
pub struct SuggestionEvent {
    pub suggestion: StoredSuggestion,
}

/// Push channel for suggestion events
pub trait SuggestionSink: Send + Sync {
    fn send(&self, event: SuggestionEvent) -> Result<()>;
}

/// In-memory sink collecting delivered events, for tests and demos
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<SuggestionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far
    pub fn delivered(&self) -> Vec<SuggestionEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl SuggestionSink for MemorySink {
    fn send(&self, event: SuggestionEvent) -> Result<()> {
        self.events.lock().expect("sink lock").push(event);
        Ok(())
    }
}

/// Sink that rejects every event, for exercising delivery-failure paths
pub struct ClosedSink;

impl SuggestionSink for ClosedSink {
    fn send(&self, _event: SuggestionEvent) -> Result<()> {
        Err(Error::InvalidInput("suggestion sink is closed".to_string()))
    }
}
