//! Operation layer tying storage, the ordering engine, and the event bus
//! together.
//!
//! Every mutation follows the same sequence: validate the referenced rows,
//! take the affected parents' locks, read a sibling snapshot, plan the order
//! arithmetic, persist the plan atomically, then publish exactly one change
//! event. Operations on disjoint parents run concurrently; operations on the
//! same parent serialize on that parent's lock, which also covers appends.

use crate::{
    domain::{
        append_position, plan_move, plan_removal, Board, BoardId, ChildRef, Column, ColumnId,
        Task, TaskId,
    },
    error::{Result, TavleError},
    events::{ChangeEvent, ChangeKind, EventBus, Subscription},
    storage::Storage,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Lazily allocated mutual-exclusion scopes, one per parent child-list.
#[derive(Default)]
struct ParentLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ParentLocks {
    fn scope(&self, parent: Uuid) -> Arc<AsyncMutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(map.entry(parent).or_default())
    }

    async fn lock(&self, parent: Uuid) -> OwnedMutexGuard<()> {
        self.scope(parent).lock_owned().await
    }

    /// Locks two parents without deadlocking: always in ascending id order.
    async fn lock_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }
}

/// A board with its columns and their tasks, each level in sibling order.
///
/// The shape the board view renders from.
#[derive(Debug, Clone, Serialize)]
pub struct BoardSnapshot {
    pub board: Board,
    pub columns: Vec<ColumnSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnSnapshot {
    pub column: Column,
    pub tasks: Vec<Task>,
}

/// The mutation and read surface of the crate.
pub struct BoardService {
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    locks: ParentLocks,
}

impl BoardService {
    pub fn new(storage: Arc<dyn Storage>, bus: Arc<EventBus>) -> Self {
        Self {
            storage,
            bus,
            locks: ParentLocks::default(),
        }
    }

    /// Opens a live session on the change stream.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    // ------------------------------------------------------------------
    // Boards
    // ------------------------------------------------------------------

    pub async fn create_board(&self, name: String) -> Result<Board> {
        let board = Board::new(name);
        self.storage.save_board(&board).await?;
        tracing::debug!(board = %board.id, "created board");
        self.publish(ChangeKind::BoardCreated, None, &board).await;
        Ok(board)
    }

    pub async fn rename_board(&self, id: BoardId, name: String) -> Result<Board> {
        let mut board = self.storage.load_board(id).await?;
        board.set_name(name);
        self.storage.save_board(&board).await?;
        self.publish(ChangeKind::BoardRenamed, None, &board).await;
        Ok(board)
    }

    /// Deletes a board and everything it owns, as one unit.
    pub async fn delete_board(&self, id: BoardId) -> Result<()> {
        let _guard = self.locks.lock(id.as_uuid()).await;
        let board = self.storage.load_board(id).await?;

        // Hold every owned column's lock as well, so no task can slip into a
        // column that the cascade is about to take away.
        let mut column_ids: Vec<Uuid> = self
            .storage
            .list_columns(id)
            .await?
            .iter()
            .map(|c| c.id.as_uuid())
            .collect();
        column_ids.sort_unstable();
        let mut column_guards = Vec::with_capacity(column_ids.len());
        for column_id in column_ids {
            column_guards.push(self.locks.lock(column_id).await);
        }

        self.storage.delete_board(id).await?;
        tracing::debug!(board = %id, "deleted board");
        self.publish(ChangeKind::BoardDeleted, None, &board).await;
        Ok(())
    }

    pub async fn board(&self, id: BoardId) -> Result<Board> {
        self.storage.load_board(id).await
    }

    pub async fn boards(&self) -> Result<Vec<Board>> {
        self.storage.list_boards().await
    }

    /// The full render model for one board.
    pub async fn board_snapshot(&self, id: BoardId) -> Result<BoardSnapshot> {
        let board = self.storage.load_board(id).await?;
        let mut columns = Vec::new();
        for column in self.storage.list_columns(id).await? {
            let tasks = self.storage.list_tasks(column.id).await?;
            columns.push(ColumnSnapshot { column, tasks });
        }
        Ok(BoardSnapshot { board, columns })
    }

    // ------------------------------------------------------------------
    // Columns
    // ------------------------------------------------------------------

    pub async fn add_column(&self, board_id: BoardId, name: String) -> Result<Column> {
        let _guard = self.locks.lock(board_id.as_uuid()).await;
        self.storage.load_board(board_id).await?;

        let siblings = self.column_refs(board_id).await?;
        let column = Column::new(name, append_position(&siblings), board_id);
        self.storage.save_column(&column).await?;
        tracing::debug!(column = %column.id, board = %board_id, order = column.order, "added column");
        self.publish(ChangeKind::ColumnAdded, Some(board_id.as_uuid()), &column)
            .await;
        Ok(column)
    }

    pub async fn rename_column(&self, id: ColumnId, name: String) -> Result<Column> {
        let mut column = self.storage.load_column(id).await?;
        column.set_name(name);
        self.storage.save_column(&column).await?;
        self.publish(
            ChangeKind::ColumnRenamed,
            Some(column.board_id.as_uuid()),
            &column,
        )
        .await;
        Ok(column)
    }

    /// Moves a column to `target_index` on `dest_board` (which may be its
    /// current board). The index is clamped to the valid range; a move to the
    /// current position persists and publishes nothing.
    pub async fn move_column(
        &self,
        id: ColumnId,
        dest_board: BoardId,
        target_index: usize,
    ) -> Result<Column> {
        match self.try_move_column(id, dest_board, target_index).await {
            Err(TavleError::Conflict(_)) => self.try_move_column(id, dest_board, target_index).await,
            other => other,
        }
    }

    async fn try_move_column(
        &self,
        id: ColumnId,
        dest_board: BoardId,
        target_index: usize,
    ) -> Result<Column> {
        let column = self.storage.load_column(id).await?;
        let source_board = column.board_id;
        self.storage.load_board(dest_board).await?;

        let _guards = self
            .locks
            .lock_pair(source_board.as_uuid(), dest_board.as_uuid())
            .await;

        // The column may have been moved while we waited for the locks; the
        // sibling snapshot below would then belong to the wrong parent.
        let column = self.storage.load_column(id).await?;
        if column.board_id != source_board {
            return Err(TavleError::Conflict(format!(
                "column {id} changed parent during planning"
            )));
        }

        let source = self.column_refs(source_board).await?;
        let dest = if source_board == dest_board {
            source.clone()
        } else {
            self.column_refs(dest_board).await?
        };

        let changes = plan_move(id, &source, &dest, target_index);
        let crossed = source_board != dest_board;
        if changes.is_empty() && !crossed {
            return Ok(column);
        }

        let reparent = crossed.then_some((id, dest_board));
        self.storage.persist_column_order(&changes, reparent).await?;

        let column = self.storage.load_column(id).await?;
        tracing::debug!(column = %id, board = %dest_board, order = column.order, "moved column");
        self.publish(ChangeKind::ColumnMoved, Some(dest_board.as_uuid()), &column)
            .await;
        Ok(column)
    }

    /// Deletes a column and its tasks, closing the order gap it leaves
    /// behind among its sibling columns.
    pub async fn delete_column(&self, id: ColumnId) -> Result<()> {
        let column = self.storage.load_column(id).await?;
        let board_id = column.board_id;
        let _guard = self.locks.lock(board_id.as_uuid()).await;
        // Board lock first, then the column's own task-list lock: a task
        // cannot be appended to the column mid-cascade.
        let _task_guard = self.locks.lock(id.as_uuid()).await;

        let column = self.storage.load_column(id).await?;
        let siblings = self.column_refs(board_id).await?;
        let changes = plan_removal(id, &siblings);

        self.storage.delete_column(id).await?;
        self.storage.persist_column_order(&changes, None).await?;
        tracing::debug!(column = %id, board = %board_id, "deleted column");
        self.publish(ChangeKind::ColumnRemoved, Some(board_id.as_uuid()), &column)
            .await;
        Ok(())
    }

    pub async fn columns(&self, board: BoardId) -> Result<Vec<Column>> {
        self.storage.load_board(board).await?;
        self.storage.list_columns(board).await
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn add_task(
        &self,
        column_id: ColumnId,
        title: String,
        description: Option<String>,
    ) -> Result<Task> {
        let _guard = self.locks.lock(column_id.as_uuid()).await;
        self.storage.load_column(column_id).await?;

        let siblings = self.task_refs(column_id).await?;
        let mut task = Task::new(title, append_position(&siblings), column_id);
        if let Some(description) = description {
            task.set_description(description);
        }
        self.storage.save_task(&task).await?;
        tracing::debug!(task = %task.id, column = %column_id, order = task.order, "added task");
        self.publish(ChangeKind::TaskAdded, Some(column_id.as_uuid()), &task)
            .await;
        Ok(task)
    }

    pub async fn update_task(
        &self,
        id: TaskId,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Task> {
        let mut task = self.storage.load_task(id).await?;
        if let Some(title) = title {
            task.set_title(title);
        }
        if let Some(description) = description {
            task.set_description(description);
        }
        self.storage.save_task(&task).await?;
        self.publish(ChangeKind::TaskUpdated, Some(task.column_id.as_uuid()), &task)
            .await;
        Ok(task)
    }

    /// Moves a task to `target_index` in `dest_column` (which may be its
    /// current column). The index is clamped to the valid range; a move to
    /// the current position persists and publishes nothing.
    pub async fn move_task(
        &self,
        id: TaskId,
        dest_column: ColumnId,
        target_index: usize,
    ) -> Result<Task> {
        match self.try_move_task(id, dest_column, target_index).await {
            Err(TavleError::Conflict(_)) => self.try_move_task(id, dest_column, target_index).await,
            other => other,
        }
    }

    async fn try_move_task(
        &self,
        id: TaskId,
        dest_column: ColumnId,
        target_index: usize,
    ) -> Result<Task> {
        let task = self.storage.load_task(id).await?;
        let source_column = task.column_id;
        self.storage.load_column(dest_column).await?;

        let _guards = self
            .locks
            .lock_pair(source_column.as_uuid(), dest_column.as_uuid())
            .await;

        let task = self.storage.load_task(id).await?;
        if task.column_id != source_column {
            return Err(TavleError::Conflict(format!(
                "task {id} changed parent during planning"
            )));
        }

        let source = self.task_refs(source_column).await?;
        let dest = if source_column == dest_column {
            source.clone()
        } else {
            self.task_refs(dest_column).await?
        };

        let changes = plan_move(id, &source, &dest, target_index);
        let crossed = source_column != dest_column;
        if changes.is_empty() && !crossed {
            return Ok(task);
        }

        let reparent = crossed.then_some((id, dest_column));
        self.storage.persist_task_order(&changes, reparent).await?;

        let task = self.storage.load_task(id).await?;
        tracing::debug!(task = %id, column = %dest_column, order = task.order, "moved task");
        self.publish(ChangeKind::TaskMoved, Some(dest_column.as_uuid()), &task)
            .await;
        Ok(task)
    }

    /// Deletes a task and closes the order gap among its former siblings.
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        let task = self.storage.load_task(id).await?;
        let column_id = task.column_id;
        let _guard = self.locks.lock(column_id.as_uuid()).await;

        let task = self.storage.load_task(id).await?;
        let siblings = self.task_refs(column_id).await?;
        let changes = plan_removal(id, &siblings);

        self.storage.delete_task(id).await?;
        self.storage.persist_task_order(&changes, None).await?;
        tracing::debug!(task = %id, column = %column_id, "deleted task");
        self.publish(ChangeKind::TaskRemoved, Some(column_id.as_uuid()), &task)
            .await;
        Ok(())
    }

    pub async fn tasks(&self, column: ColumnId) -> Result<Vec<Task>> {
        self.storage.load_column(column).await?;
        self.storage.list_tasks(column).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn column_refs(&self, board: BoardId) -> Result<Vec<ChildRef<ColumnId>>> {
        Ok(self
            .storage
            .list_columns(board)
            .await?
            .iter()
            .map(|c| ChildRef::new(c.id, c.order))
            .collect())
    }

    async fn task_refs(&self, column: ColumnId) -> Result<Vec<ChildRef<TaskId>>> {
        Ok(self
            .storage
            .list_tasks(column)
            .await?
            .iter()
            .map(|t| ChildRef::new(t.id, t.order))
            .collect())
    }

    /// Publishes one change event. Encoding or delivery trouble never fails
    /// the mutation that triggered it; the persisted state is authoritative.
    async fn publish<P: Serialize>(&self, kind: ChangeKind, parent: Option<Uuid>, payload: &P) {
        match serde_json::to_value(payload) {
            Ok(value) => {
                self.bus
                    .publish(ChangeEvent::new(kind, parent, value))
                    .await;
            }
            Err(error) => {
                tracing::warn!(%error, ?kind, "failed to encode event payload");
            }
        }
    }
}
