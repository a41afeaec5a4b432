//! Entity recognition: scheduler, recognizer contract, and session state

pub mod recognizer;
pub mod scheduler;
pub mod session;
pub mod sink;

pub use recognizer::{EntityCandidate, MockRecognizer, RecognitionOutcome, RecognitionRequest, Recognizer};
pub use scheduler::{CancelOutcome, EnqueueOutcome, RecognitionScheduler, SchedulerStats};
pub use session::{SessionState, StoredSuggestion};
pub use sink::{ClosedSink, MemorySink, SuggestionEvent, SuggestionSink};
