use crate::{
    domain::{Board, BoardId, Column, ColumnId, OrderChange, Task, TaskId},
    error::Result,
};
use async_trait::async_trait;

pub mod file_storage;
pub mod memory_storage;

/// Storage trait for persisting boards, columns, and tasks.
///
/// `list_*` methods return children sorted by ascending sibling order. The
/// two `persist_*_order` batches and the cascading deletes are atomic: either
/// every row in the batch is applied or none is.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initializes the storage backend
    async fn initialize(&self) -> Result<()>;

    /// Saves a board (insert or update)
    async fn save_board(&self, board: &Board) -> Result<()>;

    /// Loads a board by ID
    async fn load_board(&self, id: BoardId) -> Result<Board>;

    /// Lists all boards
    async fn list_boards(&self) -> Result<Vec<Board>>;

    /// Deletes a board together with its columns and their tasks
    async fn delete_board(&self, id: BoardId) -> Result<()>;

    /// Saves a column (insert or update)
    async fn save_column(&self, column: &Column) -> Result<()>;

    /// Loads a column by ID
    async fn load_column(&self, id: ColumnId) -> Result<Column>;

    /// Lists a board's columns in sibling order
    async fn list_columns(&self, board: BoardId) -> Result<Vec<Column>>;

    /// Deletes a column together with its tasks
    async fn delete_column(&self, id: ColumnId) -> Result<()>;

    /// Saves a task (insert or update)
    async fn save_task(&self, task: &Task) -> Result<()>;

    /// Loads a task by ID
    async fn load_task(&self, id: TaskId) -> Result<Task>;

    /// Lists a column's tasks in sibling order
    async fn list_tasks(&self, column: ColumnId) -> Result<Vec<Task>>;

    /// Deletes a task
    async fn delete_task(&self, id: TaskId) -> Result<()>;

    /// Applies a batch of column order reassignments atomically.
    ///
    /// `reparent` carries the one column that moved to another board, if any.
    /// A batch referencing a column that no longer exists fails with
    /// [`crate::error::TavleError::Conflict`] and applies nothing.
    async fn persist_column_order(
        &self,
        changes: &[OrderChange<ColumnId>],
        reparent: Option<(ColumnId, BoardId)>,
    ) -> Result<()>;

    /// Applies a batch of task order reassignments atomically.
    ///
    /// `reparent` carries the one task that moved to another column, if any.
    /// A batch referencing a task that no longer exists fails with
    /// [`crate::error::TavleError::Conflict`] and applies nothing.
    async fn persist_task_order(
        &self,
        changes: &[OrderChange<TaskId>],
        reparent: Option<(TaskId, ColumnId)>,
    ) -> Result<()>;
}
