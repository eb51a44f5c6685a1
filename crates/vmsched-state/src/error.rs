//! Error types for the vmsched state store.

use thiserror::Error;
use vmsched_core::TaskState;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("instance {uuid}: expected task state {expected}, found {}", display_task_state(.actual))]
    UnexpectedTaskState {
        uuid: String,
        expected: TaskState,
        actual: Option<TaskState>,
    },
}

fn display_task_state(state: &Option<TaskState>) -> String {
    state.map_or_else(|| "none".to_string(), |s| s.to_string())
}
