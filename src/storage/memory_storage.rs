use crate::{
    domain::{Board, BoardId, Column, ColumnId, OrderChange, Task, TaskId},
    error::{Result, TavleError},
    storage::Storage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    boards: HashMap<BoardId, Board>,
    columns: HashMap<ColumnId, Column>,
    tasks: HashMap<TaskId, Task>,
}

/// In-memory storage implementation.
///
/// All rows live behind one async mutex, which makes every trait method —
/// including cascades and order batches — atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save_board(&self, board: &Board) -> Result<()> {
        let mut state = self.state.lock().await;
        state.boards.insert(board.id, board.clone());
        Ok(())
    }

    async fn load_board(&self, id: BoardId) -> Result<Board> {
        let state = self.state.lock().await;
        state
            .boards
            .get(&id)
            .cloned()
            .ok_or(TavleError::BoardNotFound(id))
    }

    async fn list_boards(&self) -> Result<Vec<Board>> {
        let state = self.state.lock().await;
        let mut boards: Vec<Board> = state.boards.values().cloned().collect();
        boards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(boards)
    }

    async fn delete_board(&self, id: BoardId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.boards.remove(&id).is_none() {
            return Err(TavleError::BoardNotFound(id));
        }

        let owned: Vec<ColumnId> = state
            .columns
            .values()
            .filter(|c| c.board_id == id)
            .map(|c| c.id)
            .collect();
        for column_id in &owned {
            state.columns.remove(column_id);
        }
        state.tasks.retain(|_, t| !owned.contains(&t.column_id));
        Ok(())
    }

    async fn save_column(&self, column: &Column) -> Result<()> {
        let mut state = self.state.lock().await;
        state.columns.insert(column.id, column.clone());
        Ok(())
    }

    async fn load_column(&self, id: ColumnId) -> Result<Column> {
        let state = self.state.lock().await;
        state
            .columns
            .get(&id)
            .cloned()
            .ok_or(TavleError::ColumnNotFound(id))
    }

    async fn list_columns(&self, board: BoardId) -> Result<Vec<Column>> {
        let state = self.state.lock().await;
        let mut columns: Vec<Column> = state
            .columns
            .values()
            .filter(|c| c.board_id == board)
            .cloned()
            .collect();
        columns.sort_by_key(|c| c.order);
        Ok(columns)
    }

    async fn delete_column(&self, id: ColumnId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.columns.remove(&id).is_none() {
            return Err(TavleError::ColumnNotFound(id));
        }
        state.tasks.retain(|_, t| t.column_id != id);
        Ok(())
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> Result<Task> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(&id)
            .cloned()
            .ok_or(TavleError::TaskNotFound(id))
    }

    async fn list_tasks(&self, column: ColumnId) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.column_id == column)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.order);
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.tasks.remove(&id).is_none() {
            return Err(TavleError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn persist_column_order(
        &self,
        changes: &[OrderChange<ColumnId>],
        reparent: Option<(ColumnId, BoardId)>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        // Validate the whole batch before touching anything
        for change in changes {
            if !state.columns.contains_key(&change.id) {
                return Err(TavleError::Conflict(format!(
                    "column {} vanished before order change applied",
                    change.id
                )));
            }
        }
        if let Some((id, _)) = reparent {
            if !state.columns.contains_key(&id) {
                return Err(TavleError::Conflict(format!(
                    "column {id} vanished before reparent applied"
                )));
            }
        }

        for change in changes {
            if let Some(column) = state.columns.get_mut(&change.id) {
                column.order = change.order;
            }
        }
        if let Some((id, board)) = reparent {
            if let Some(column) = state.columns.get_mut(&id) {
                column.board_id = board;
            }
        }
        Ok(())
    }

    async fn persist_task_order(
        &self,
        changes: &[OrderChange<TaskId>],
        reparent: Option<(TaskId, ColumnId)>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        for change in changes {
            if !state.tasks.contains_key(&change.id) {
                return Err(TavleError::Conflict(format!(
                    "task {} vanished before order change applied",
                    change.id
                )));
            }
        }
        if let Some((id, _)) = reparent {
            if !state.tasks.contains_key(&id) {
                return Err(TavleError::Conflict(format!(
                    "task {id} vanished before reparent applied"
                )));
            }
        }

        for change in changes {
            if let Some(task) = state.tasks.get_mut(&change.id) {
                task.order = change.order;
            }
        }
        if let Some((id, column)) = reparent {
            if let Some(task) = state.tasks.get_mut(&id) {
                task.column_id = column;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderChange;

    async fn seeded() -> (MemoryStorage, Board, Column, Column) {
        let storage = MemoryStorage::new();
        storage.initialize().await.unwrap();

        let board = Board::new("Board".to_string());
        storage.save_board(&board).await.unwrap();

        let todo = Column::new("To Do".to_string(), 0, board.id);
        let done = Column::new("Done".to_string(), 1, board.id);
        storage.save_column(&todo).await.unwrap();
        storage.save_column(&done).await.unwrap();

        (storage, board, todo, done)
    }

    #[tokio::test]
    async fn test_board_save_and_load() {
        let storage = MemoryStorage::new();
        let board = Board::new("Test Board".to_string());

        storage.save_board(&board).await.unwrap();
        let loaded = storage.load_board(board.id).await.unwrap();
        assert_eq!(loaded.name, "Test Board");
    }

    #[tokio::test]
    async fn test_load_missing_board() {
        let storage = MemoryStorage::new();
        let result = storage.load_board(BoardId::new()).await;
        assert!(matches!(result, Err(TavleError::BoardNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_columns_sorted_by_order() {
        let (storage, board, todo, done) = seeded().await;

        let columns = storage.list_columns(board.id).await.unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].id, todo.id);
        assert_eq!(columns[1].id, done.id);
    }

    #[tokio::test]
    async fn test_list_columns_scoped_to_board() {
        let (storage, _board, _todo, _done) = seeded().await;

        let other = Board::new("Other".to_string());
        storage.save_board(&other).await.unwrap();
        assert!(storage.list_columns(other.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_tasks_sorted_by_order() {
        let (storage, _board, todo, _done) = seeded().await;

        let b = Task::new("B".to_string(), 1, todo.id);
        let a = Task::new("A".to_string(), 0, todo.id);
        storage.save_task(&b).await.unwrap();
        storage.save_task(&a).await.unwrap();

        let tasks = storage.list_tasks(todo.id).await.unwrap();
        assert_eq!(tasks[0].id, a.id);
        assert_eq!(tasks[1].id, b.id);
    }

    #[tokio::test]
    async fn test_delete_board_cascades() {
        let (storage, board, todo, done) = seeded().await;
        let task = Task::new("T".to_string(), 0, todo.id);
        storage.save_task(&task).await.unwrap();

        storage.delete_board(board.id).await.unwrap();

        assert!(storage.load_board(board.id).await.is_err());
        assert!(storage.load_column(todo.id).await.is_err());
        assert!(storage.load_column(done.id).await.is_err());
        assert!(storage.load_task(task.id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_column_cascades_tasks_only() {
        let (storage, board, todo, done) = seeded().await;
        let doomed = Task::new("Doomed".to_string(), 0, todo.id);
        let safe = Task::new("Safe".to_string(), 0, done.id);
        storage.save_task(&doomed).await.unwrap();
        storage.save_task(&safe).await.unwrap();

        storage.delete_column(todo.id).await.unwrap();

        assert!(storage.load_task(doomed.id).await.is_err());
        assert!(storage.load_task(safe.id).await.is_ok());
        assert!(storage.load_board(board.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_persist_task_order_applies_batch() {
        let (storage, _board, todo, done) = seeded().await;
        let a = Task::new("A".to_string(), 0, todo.id);
        let b = Task::new("B".to_string(), 1, todo.id);
        storage.save_task(&a).await.unwrap();
        storage.save_task(&b).await.unwrap();

        storage
            .persist_task_order(
                &[
                    OrderChange { id: b.id, order: 0 },
                    OrderChange { id: a.id, order: 1 },
                ],
                Some((a.id, done.id)),
            )
            .await
            .unwrap();

        let moved = storage.load_task(a.id).await.unwrap();
        assert_eq!(moved.order, 1);
        assert_eq!(moved.column_id, done.id);
        assert_eq!(storage.load_task(b.id).await.unwrap().order, 0);
    }

    #[tokio::test]
    async fn test_persist_task_order_conflict_applies_nothing() {
        let (storage, _board, todo, _done) = seeded().await;
        let a = Task::new("A".to_string(), 0, todo.id);
        storage.save_task(&a).await.unwrap();

        let result = storage
            .persist_task_order(
                &[
                    OrderChange { id: a.id, order: 5 },
                    OrderChange {
                        id: TaskId::new(),
                        order: 0,
                    },
                ],
                None,
            )
            .await;

        assert!(matches!(result, Err(TavleError::Conflict(_))));
        // The valid half of the batch must not have been applied
        assert_eq!(storage.load_task(a.id).await.unwrap().order, 0);
    }

    #[tokio::test]
    async fn test_persist_column_order_conflict_on_missing() {
        let (storage, _board, _todo, _done) = seeded().await;

        let result = storage
            .persist_column_order(
                &[OrderChange {
                    id: ColumnId::new(),
                    order: 0,
                }],
                None,
            )
            .await;
        assert!(matches!(result, Err(TavleError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_missing_task() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.delete_task(TaskId::new()).await,
            Err(TavleError::TaskNotFound(_))
        ));
    }
}
