use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Background context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("Task {task_id} ({task_type}) timed out after {timeout_ms}ms")]
    TaskTimeout {
        task_id: String,
        task_type: String,
        timeout_ms: u64,
    },
    #[error("Task failed: {0}")]
    TaskFailed(String),
    #[error("Dispatcher disposed")]
    Disposed,
    #[error("Frame unavailable at {timestamp:.3}s: {reason}")]
    FrameUnavailable { timestamp: f64, reason: String },
    #[error("No frames extracted: {0}")]
    NoFramesExtracted(String),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}
