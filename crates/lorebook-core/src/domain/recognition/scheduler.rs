//! Bounded-concurrency recognition scheduler
//!
//! Tasks start in FIFO submission order, at most `max_concurrency` running
//! at once. The pump is the only mechanism enforcing the bound: it starts
//! work while capacity remains and is re-invoked on every completion, so
//! completions racing with new enqueues stay safe behind the state lock.
//! Cancellation is cooperative: a queued task is removed before it ever
//! runs; a running task keeps its recognizer call in flight but the result
//! is discarded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RecognitionConfig;
use crate::domain::graph::entity::{Entity, EntityDraft};
use crate::domain::graph::repository::GraphRepository;
use crate::error::{Error, Result};

use super::recognizer::{RecognitionRequest, Recognizer};
use super::session::{SessionState, StoredSuggestion};
use super::sink::{SuggestionEvent, SuggestionSink};

/// Result of an `enqueue` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The task began running synchronously within the enqueue call
    Started { task_id: String },
    /// The task is waiting; position is 1-based, 0 means the text was
    /// blank and the task was short-circuited without any work
    Queued { task_id: String, position: usize },
}

impl EnqueueOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Started { task_id } | Self::Queued { task_id, .. } => task_id,
        }
    }
}

/// Result of a `cancel` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the queue; guaranteed never to run
    Dequeued,
    /// Still running; its token was canceled and its result will be
    /// discarded
    Signaled,
}

/// Point-in-time scheduler snapshot
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub running: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub peak_running: usize,
    pub completed: u64,
    pub completion_order: Vec<String>,
    pub canceled_task_ids: Vec<String>,
}

/// A recognition task from enqueue until its async work settles
struct Task {
    task_id: String,
    project_id: String,
    document_id: String,
    session_id: String,
    content_text: String,
    trace_id: String,
    token: CancellationToken,
    sink: Arc<dyn SuggestionSink>,
}

impl Task {
    fn running_record(&self) -> RunningTask {
        RunningTask {
            project_id: self.project_id.clone(),
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        }
    }
}

/// Ownership record for an in-flight task; cancel and stats resolve
/// tenancy against it
struct RunningTask {
    project_id: String,
    session_id: String,
    token: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Task>,
    running: HashMap<String, RunningTask>,
    sessions: HashMap<String, SessionState>,
    completed: u64,
    peak_running: usize,
    completion_order: Vec<String>,
    canceled_task_ids: Vec<String>,
}

struct SchedulerInner {
    repository: Arc<dyn GraphRepository>,
    recognizer: Arc<dyn Recognizer>,
    max_concurrency: usize,
    state: Mutex<SchedulerState>,
}

/// The recognition scheduler; cheap to clone, shares one state arena
#[derive(Clone)]
pub struct RecognitionScheduler {
    inner: Arc<SchedulerInner>,
}

impl RecognitionScheduler {
    pub fn new(
        repository: Arc<dyn GraphRepository>,
        recognizer: Arc<dyn Recognizer>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                repository,
                recognizer,
                max_concurrency: config.max_concurrency.max(1),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Submit text for recognition
    ///
    /// Blank text is accepted but short-circuited with position 0 and no
    /// work. Otherwise the task joins the FIFO queue and starts as soon as
    /// capacity allows, possibly within this call.
    pub async fn enqueue(
        &self,
        project_id: &str,
        document_id: &str,
        session_id: &str,
        content_text: &str,
        trace_id: &str,
        sink: Arc<dyn SuggestionSink>,
    ) -> Result<EnqueueOutcome> {
        for (field, value) in [
            ("project_id", project_id),
            ("document_id", document_id),
            ("session_id", session_id),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidInput(format!("{field} must not be empty")));
            }
        }

        let task_id = Uuid::new_v4().to_string();
        if content_text.trim().is_empty() {
            debug!(task_id = %task_id, trace_id = %trace_id, "Blank text, recognition short-circuited");
            return Ok(EnqueueOutcome::Queued { task_id, position: 0 });
        }

        let task = Task {
            task_id: task_id.clone(),
            project_id: project_id.to_string(),
            document_id: document_id.to_string(),
            session_id: session_id.to_string(),
            content_text: content_text.to_string(),
            trace_id: trace_id.to_string(),
            token: CancellationToken::new(),
            sink,
        };

        let mut state = self.inner.state.lock().await;
        state.queue.push_back(task);
        let started = SchedulerInner::pump_locked(&self.inner, &mut state);
        let outcome = if started.iter().any(|t| t.task_id == task_id) {
            EnqueueOutcome::Started { task_id }
        } else {
            let position = state
                .queue
                .iter()
                .position(|t| t.task_id == task_id)
                .map(|i| i + 1)
                .unwrap_or(0);
            EnqueueOutcome::Queued { task_id, position }
        };
        drop(state);

        for task in started {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(SchedulerInner::process(inner, task));
        }
        Ok(outcome)
    }

    /// Cancel a task by id
    pub async fn cancel(
        &self,
        project_id: &str,
        session_id: &str,
        task_id: &str,
    ) -> Result<CancelOutcome> {
        let mut state = self.inner.state.lock().await;

        if let Some(index) = state.queue.iter().position(|t| {
            t.task_id == task_id && t.project_id == project_id && t.session_id == session_id
        }) {
            state.queue.remove(index);
            state.canceled_task_ids.push(task_id.to_string());
            info!(task_id = %task_id, "Canceled queued recognition task");
            return Ok(CancelOutcome::Dequeued);
        }

        if let Some(running) = state.running.get(task_id) {
            // A running task is cancelable only by its owning project and
            // session; a foreign caller learns nothing beyond NOT_FOUND.
            if running.project_id != project_id || running.session_id != session_id {
                warn!(
                    task_id = %task_id,
                    project_id = %project_id,
                    session_id = %session_id,
                    "Cross-tenant cancel attempt rejected"
                );
                return Err(Error::TaskNotFound(task_id.to_string()));
            }
            running.token.cancel();
            info!(task_id = %task_id, "Signaled running recognition task");
            return Ok(CancelOutcome::Signaled);
        }

        Err(Error::TaskNotFound(task_id.to_string()))
    }

    /// Accept a pending suggestion: create the entity, or merge with an
    /// existing one if a duplicate slipped in concurrently
    pub async fn accept_suggestion(
        &self,
        project_id: &str,
        session_id: &str,
        suggestion_id: &str,
    ) -> Result<Entity> {
        let suggestion = {
            let state = self.inner.state.lock().await;
            state
                .sessions
                .get(session_id)
                .and_then(|s| s.suggestions.get(suggestion_id))
                .filter(|s| s.project_id == project_id)
                .cloned()
                .ok_or_else(|| Error::SuggestionNotFound(suggestion_id.to_string()))?
        };

        let draft = EntityDraft::new(suggestion.entity_type, suggestion.name.clone());
        let entity = match self.inner.repository.create_entity(project_id, draft).await {
            Ok(entity) => entity,
            Err(err) if err.is_duplicate() => {
                // Lost a race with another create; merge with the winner.
                self.inner
                    .repository
                    .find_entity_by_name(project_id, suggestion.entity_type, &suggestion.name)
                    .await?
                    .ok_or(err)?
            }
            Err(err) => return Err(err),
        };

        let mut state = self.inner.state.lock().await;
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.remove(suggestion_id);
        }
        Ok(entity)
    }

    /// Dismiss a pending suggestion and suppress its dedupe key for the
    /// rest of the session
    pub async fn dismiss_suggestion(
        &self,
        project_id: &str,
        session_id: &str,
        suggestion_id: &str,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SuggestionNotFound(suggestion_id.to_string()))?;
        match session.suggestions.get(suggestion_id) {
            Some(s) if s.project_id == project_id => {
                session.dismiss(suggestion_id);
                Ok(())
            }
            _ => Err(Error::SuggestionNotFound(suggestion_id.to_string())),
        }
    }

    /// Pending suggestions of a session, unordered
    pub async fn pending_suggestions(&self, session_id: &str) -> Vec<StoredSuggestion> {
        let state = self.inner.state.lock().await;
        state
            .sessions
            .get(session_id)
            .map(|s| s.suggestions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Point-in-time snapshot for a project/session scope
    ///
    /// `running` and `queued` count only that scope's tasks; the bound
    /// and the rolling metrics are process-wide.
    pub async fn stats(&self, project_id: &str, session_id: &str) -> SchedulerStats {
        let state = self.inner.state.lock().await;
        SchedulerStats {
            running: state
                .running
                .values()
                .filter(|r| r.project_id == project_id && r.session_id == session_id)
                .count(),
            queued: state
                .queue
                .iter()
                .filter(|t| t.project_id == project_id && t.session_id == session_id)
                .count(),
            max_concurrency: self.inner.max_concurrency,
            peak_running: state.peak_running,
            completed: state.completed,
            completion_order: state.completion_order.clone(),
            canceled_task_ids: state.canceled_task_ids.clone(),
        }
    }
}

impl SchedulerInner {
    /// Move queued tasks into the running set while capacity remains.
    /// Returns the tasks to spawn; the caller spawns them after unlocking.
    fn pump_locked(inner: &Arc<Self>, state: &mut SchedulerState) -> Vec<Task> {
        let mut started = Vec::new();
        while state.running.len() < inner.max_concurrency {
            let Some(task) = state.queue.pop_front() else {
                break;
            };
            state
                .running
                .insert(task.task_id.clone(), task.running_record());
            state.peak_running = state.peak_running.max(state.running.len());
            started.push(task);
        }
        started
    }

    /// Worker loop for one running slot. Runs its task, records the
    /// completion, then takes over the next queued task if the slot is
    /// still within the bound, so the queue drains without re-spawning.
    async fn process(inner: Arc<Self>, mut task: Task) {
        loop {
            Self::run_task(&inner, &task).await;

            let mut state = inner.state.lock().await;
            state.running.remove(&task.task_id);
            if task.token.is_cancelled() {
                state.canceled_task_ids.push(task.task_id.clone());
            } else {
                state.completed += 1;
                state.completion_order.push(task.task_id.clone());
            }

            if state.running.len() >= inner.max_concurrency {
                break;
            }
            let Some(next) = state.queue.pop_front() else {
                break;
            };
            state
                .running
                .insert(next.task_id.clone(), next.running_record());
            state.peak_running = state.peak_running.max(state.running.len());
            drop(state);
            task = next;
        }
    }

    async fn run_task(inner: &Arc<Self>, task: &Task) {
        let request = RecognitionRequest {
            project_id: task.project_id.clone(),
            document_id: task.document_id.clone(),
            session_id: task.session_id.clone(),
            content_text: task.content_text.clone(),
            trace_id: task.trace_id.clone(),
        };

        let result = inner.recognizer.recognize(request).await;

        // The cancel flag is checked once, after the single suspension
        // point; a canceled task's result is discarded wholesale.
        if task.token.is_cancelled() {
            return;
        }
        match result {
            Ok(outcome) => {
                Self::emit_suggestions(inner, task, outcome.candidates).await;
            }
            Err(Error::RecognitionUnavailable(reason)) => {
                warn!(
                    task_id = %task.task_id,
                    trace_id = %task.trace_id,
                    reason = %reason,
                    "Recognizer unavailable, no suggestions"
                );
            }
            Err(err) => {
                warn!(
                    task_id = %task.task_id,
                    trace_id = %task.trace_id,
                    error = %err,
                    "Recognition pass failed"
                );
            }
        }
    }

    /// Filter candidates against the graph and the session, store the
    /// survivors, and push them to the task's sink
    async fn emit_suggestions(
        inner: &Arc<Self>,
        task: &Task,
        candidates: Vec<super::recognizer::EntityCandidate>,
    ) {
        let existing: HashSet<String> = match inner.repository.list_entities(&task.project_id).await
        {
            Ok(entities) => entities.iter().map(Entity::dedupe_key).collect(),
            Err(err) => {
                warn!(
                    task_id = %task.task_id,
                    error = %err,
                    "Could not load entities for suggestion filtering"
                );
                return;
            }
        };

        let mut state = inner.state.lock().await;
        if task.token.is_cancelled() {
            return;
        }
        let session = state.sessions.entry(task.session_id.clone()).or_default();

        for candidate in candidates {
            let suggestion = StoredSuggestion::new(
                &task.task_id,
                &task.session_id,
                &task.project_id,
                &task.document_id,
                &candidate.name,
                candidate.entity_type,
            );
            let key = &suggestion.dedupe_key;
            if existing.contains(key) || session.is_dismissed(key) || session.has_pending_key(key) {
                continue;
            }

            let event = SuggestionEvent {
                suggestion: suggestion.clone(),
            };
            session.insert(suggestion);
            if let Err(err) = task.sink.send(event) {
                // Best-effort delivery; the suggestion stays pending.
                warn!(
                    task_id = %task.task_id,
                    session_id = %task.session_id,
                    error = %err,
                    "Suggestion sink rejected event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::GraphLimits;
    use crate::domain::graph::entity::EntityType;
    use crate::domain::recognition::recognizer::{EntityCandidate, MockRecognizer};
    use crate::domain::recognition::sink::{ClosedSink, MemorySink};
    use crate::infrastructure::graph::repository::SqliteGraphRepository;
    use crate::storage::Database;

    async fn setup(
        recognizer: MockRecognizer,
        max_concurrency: usize,
    ) -> (Arc<SqliteGraphRepository>, RecognitionScheduler, String) {
        let db = Database::in_memory().await.expect("in-memory db");
        let repo = Arc::new(
            SqliteGraphRepository::new(db.pool().clone(), GraphLimits::default()).unwrap(),
        );
        let scheduler = RecognitionScheduler::new(
            Arc::clone(&repo) as Arc<dyn GraphRepository>,
            Arc::new(recognizer),
            RecognitionConfig { max_concurrency },
        );
        let project = repo.create_project("Recognition Saga").await.unwrap();
        (repo, scheduler, project.id)
    }

    fn aria() -> EntityCandidate {
        EntityCandidate::new("Aria", EntityType::Character)
    }

    async fn settle(scheduler: &RecognitionScheduler, project_id: &str, session_id: &str) {
        for _ in 0..200 {
            let stats = scheduler.stats(project_id, session_id).await;
            if stats.running == 0 && stats.queued == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduler did not settle");
    }

    #[tokio::test]
    async fn blank_text_short_circuits_without_work() {
        let (_repo, scheduler, project) = setup(MockRecognizer::new(vec![aria()]), 4).await;
        let sink = Arc::new(MemorySink::new());

        let outcome = scheduler
            .enqueue(&project, "doc", "session", "   \n\t", "trace", sink.clone())
            .await
            .unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Queued { position: 0, .. }));

        let stats = scheduler.stats(&project, "session").await;
        assert_eq!(stats.running, 0);
        assert_eq!(stats.completed, 0);
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_identifiers() {
        let (_repo, scheduler, project) = setup(MockRecognizer::new(vec![]), 4).await;
        let sink = Arc::new(MemorySink::new());

        let err = scheduler
            .enqueue("", "doc", "session", "text", "trace", sink.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let err = scheduler
            .enqueue(&project, "doc", "  ", "text", "trace", sink)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn running_never_exceeds_the_bound() {
        let recognizer = MockRecognizer::new(vec![]).with_delay(Duration::from_millis(30));
        let (_repo, scheduler, project) = setup(recognizer, 4).await;
        let sink = Arc::new(MemorySink::new());

        for i in 0..10 {
            scheduler
                .enqueue(&project, "doc", "session", &format!("text {i}"), "trace", sink.clone())
                .await
                .unwrap();
        }

        for _ in 0..40 {
            let stats = scheduler.stats(&project, "session").await;
            assert!(stats.running <= 4, "bound violated: {} running", stats.running);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        settle(&scheduler, &project, "session").await;

        let stats = scheduler.stats(&project, "session").await;
        assert!(stats.peak_running <= 4);
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.completion_order.len(), 10);
    }

    #[tokio::test]
    async fn queued_cancellation_prevents_the_run() {
        let recognizer = MockRecognizer::new(vec![]).with_delay(Duration::from_millis(40));
        let (_repo, scheduler, project) = setup(recognizer, 1).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "first", "trace", sink.clone())
            .await
            .unwrap();
        let queued = scheduler
            .enqueue(&project, "doc", "session", "second", "trace", sink)
            .await
            .unwrap();
        let queued_id = queued.task_id().to_string();
        assert!(matches!(queued, EnqueueOutcome::Queued { position: 1, .. }));

        let outcome = scheduler.cancel(&project, "session", &queued_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Dequeued);

        settle(&scheduler, &project, "session").await;
        let stats = scheduler.stats(&project, "session").await;
        assert!(!stats.completion_order.contains(&queued_id));
        assert!(stats.canceled_task_ids.contains(&queued_id));
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn running_cancellation_discards_the_result() {
        let recognizer = MockRecognizer::new(vec![aria()]).with_delay(Duration::from_millis(50));
        let (_repo, scheduler, project) = setup(recognizer, 4).await;
        let sink = Arc::new(MemorySink::new());

        let outcome = scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink.clone())
            .await
            .unwrap();
        let task_id = outcome.task_id().to_string();
        assert!(matches!(outcome, EnqueueOutcome::Started { .. }));

        let cancel = scheduler.cancel(&project, "session", &task_id).await.unwrap();
        assert_eq!(cancel, CancelOutcome::Signaled);

        settle(&scheduler, &project, "session").await;
        let stats = scheduler.stats(&project, "session").await;
        assert!(sink.delivered().is_empty());
        assert!(stats.completion_order.is_empty());
        assert!(stats.canceled_task_ids.contains(&task_id));
        assert!(scheduler.pending_suggestions("session").await.is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let (_repo, scheduler, project) = setup(MockRecognizer::new(vec![]), 4).await;
        let err = scheduler.cancel(&project, "session", "ghost").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn existing_entities_are_not_resuggested() {
        let (repo, scheduler, project) = setup(MockRecognizer::new(vec![aria()]), 4).await;
        repo.create_entity(&project, EntityDraft::new(EntityType::Character, " ARIA "))
            .await
            .unwrap();
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink.clone())
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;

        assert!(sink.delivered().is_empty());
        assert!(scheduler.pending_suggestions("session").await.is_empty());
    }

    #[tokio::test]
    async fn dismissed_keys_never_resurface_in_the_session() {
        let (_repo, scheduler, project) = setup(MockRecognizer::new(vec![aria()]), 4).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink.clone())
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;

        let pending = scheduler.pending_suggestions("session").await;
        assert_eq!(pending.len(), 1);
        scheduler
            .dismiss_suggestion(&project, "session", &pending[0].suggestion_id)
            .await
            .unwrap();

        scheduler
            .enqueue(&project, "doc", "session", "Aria again", "trace", sink.clone())
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;

        assert!(scheduler.pending_suggestions("session").await.is_empty());
        // Only the first pass delivered an event.
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn pending_equivalents_are_not_duplicated() {
        let (_repo, scheduler, project) = setup(MockRecognizer::new(vec![aria()]), 4).await;
        let sink = Arc::new(MemorySink::new());

        for _ in 0..2 {
            scheduler
                .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink.clone())
                .await
                .unwrap();
            settle(&scheduler, &project, "session").await;
        }

        assert_eq!(scheduler.pending_suggestions("session").await.len(), 1);
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn accept_creates_the_entity_and_clears_the_suggestion() {
        let (repo, scheduler, project) = setup(MockRecognizer::new(vec![aria()]), 4).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink)
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;

        let pending = scheduler.pending_suggestions("session").await;
        let entity = scheduler
            .accept_suggestion(&project, "session", &pending[0].suggestion_id)
            .await
            .unwrap();
        assert_eq!(entity.name, "Aria");
        assert!(scheduler.pending_suggestions("session").await.is_empty());
        assert!(repo
            .find_entity_by_name(&project, EntityType::Character, "Aria")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn accept_merges_on_a_duplicate_race() {
        let (repo, scheduler, project) = setup(MockRecognizer::new(vec![aria()]), 4).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink)
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;
        let pending = scheduler.pending_suggestions("session").await;

        // The entity appears through another path before the accept.
        let existing = repo
            .create_entity(&project, EntityDraft::new(EntityType::Character, "Aria"))
            .await
            .unwrap();

        let entity = scheduler
            .accept_suggestion(&project, "session", &pending[0].suggestion_id)
            .await
            .unwrap();
        assert_eq!(entity.id, existing.id);
        assert!(scheduler.pending_suggestions("session").await.is_empty());
    }

    #[tokio::test]
    async fn accept_unknown_suggestion_is_not_found() {
        let (_repo, scheduler, project) = setup(MockRecognizer::new(vec![]), 4).await;
        let err = scheduler
            .accept_suggestion(&project, "session", "ghost")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn recognizer_unavailability_degrades_silently() {
        let (_repo, scheduler, project) = setup(MockRecognizer::unavailable(), 4).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink.clone())
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;

        let stats = scheduler.stats(&project, "session").await;
        assert_eq!(stats.completed, 1);
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_keeps_the_suggestion_pending() {
        let (_repo, scheduler, project) = setup(MockRecognizer::new(vec![aria()]), 4).await;

        scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", Arc::new(ClosedSink))
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;

        let stats = scheduler.stats(&project, "session").await;
        assert_eq!(stats.completed, 1);
        assert_eq!(scheduler.pending_suggestions("session").await.len(), 1);
    }

    #[tokio::test]
    async fn concurrency_floor_is_one() {
        let recognizer = MockRecognizer::new(vec![]).with_delay(Duration::from_millis(10));
        let (_repo, scheduler, project) = setup(recognizer, 0).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "text", "trace", sink)
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;
        let stats = scheduler.stats(&project, "session").await;
        assert_eq!(stats.max_concurrency, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn cancel_requires_the_owning_project_and_session() {
        let recognizer = MockRecognizer::new(vec![aria()]).with_delay(Duration::from_millis(40));
        let (_repo, scheduler, project) = setup(recognizer, 1).await;
        let sink = Arc::new(MemorySink::new());

        let running = scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink.clone())
            .await
            .unwrap();
        let queued = scheduler
            .enqueue(&project, "doc", "session", "Aria once more", "trace", sink.clone())
            .await
            .unwrap();
        assert!(matches!(running, EnqueueOutcome::Started { .. }));
        assert!(matches!(queued, EnqueueOutcome::Queued { position: 1, .. }));

        // Neither a foreign project nor a foreign session may cancel,
        // whether the task is running or still queued.
        for task_id in [running.task_id(), queued.task_id()] {
            let err = scheduler
                .cancel("other-project", "other-session", task_id)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "NOT_FOUND");

            let err = scheduler
                .cancel(&project, "other-session", task_id)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "NOT_FOUND");
        }

        settle(&scheduler, &project, "session").await;

        // The foreign cancels had no effect: both tasks ran to completion.
        let stats = scheduler.stats(&project, "session").await;
        assert_eq!(stats.completed, 2);
        assert!(stats.canceled_task_ids.is_empty());
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn recognizer_failure_completes_without_suggestions() {
        let (_repo, scheduler, project) = setup(MockRecognizer::failing(), 4).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session", "Aria rode north", "trace", sink.clone())
            .await
            .unwrap();
        settle(&scheduler, &project, "session").await;

        let stats = scheduler.stats(&project, "session").await;
        assert_eq!(stats.completed, 1);
        assert!(sink.delivered().is_empty());
        assert!(scheduler.pending_suggestions("session").await.is_empty());
    }

    #[tokio::test]
    async fn stats_counts_are_scoped_to_project_and_session() {
        let recognizer = MockRecognizer::new(vec![]).with_delay(Duration::from_millis(40));
        let (_repo, scheduler, project) = setup(recognizer, 4).await;
        let sink = Arc::new(MemorySink::new());

        scheduler
            .enqueue(&project, "doc", "session-a", "chapter one", "trace", sink.clone())
            .await
            .unwrap();
        scheduler
            .enqueue(&project, "doc", "session-b", "chapter two", "trace", sink.clone())
            .await
            .unwrap();

        assert_eq!(scheduler.stats(&project, "session-a").await.running, 1);
        assert_eq!(scheduler.stats(&project, "session-b").await.running, 1);
        assert_eq!(scheduler.stats("other-project", "session-a").await.running, 0);

        settle(&scheduler, &project, "session-a").await;
        settle(&scheduler, &project, "session-b").await;
    }
}
