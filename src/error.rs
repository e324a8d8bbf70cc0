use crate::domain::{BoardId, ColumnId, TaskId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TavleError>;

#[derive(Debug, Error)]
pub enum TavleError {
    #[error("Board not found: {0}")]
    BoardNotFound(BoardId),

    #[error("Column not found: {0}")]
    ColumnNotFound(ColumnId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
