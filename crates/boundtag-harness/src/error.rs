use boundtag_core::HeapError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("heap: {0}")]
    Heap(#[from] HeapError),
    #[error("{case}: payload pattern lost at byte {offset}")]
    PatternMismatch { case: String, offset: usize },
    #[error("{case}: {detail}")]
    Expectation { case: String, detail: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("stress worker {0} panicked")]
    WorkerPanicked(usize),
}
