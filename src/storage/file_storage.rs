use crate::{
    domain::{Board, BoardId, Column, ColumnId, OrderChange, Task, TaskId},
    error::{Result, TavleError},
    storage::Storage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Everything the store knows, as one serializable unit.
///
/// Order reassignments and cascades touch many rows at once; committing the
/// whole snapshot in a single rename is what keeps those batches atomic.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    boards: Vec<Board>,
    columns: Vec<Column>,
    tasks: Vec<Task>,
}

impl Snapshot {
    fn board(&self, id: BoardId) -> Option<&Board> {
        self.boards.iter().find(|b| b.id == id)
    }

    fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// File-based storage implementation.
///
/// Keeps the full board tree as a JSON snapshot under `<root>/.tavle/` and
/// commits every mutation by writing a temp file and renaming it into place.
/// An internal mutex serializes writers so read-modify-write cycles cannot
/// interleave.
pub struct FileStorage {
    root_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    const TAVLE_DIR: &'static str = ".tavle";
    const STATE_FILE: &'static str = "state.json";

    /// Creates a new FileStorage instance for the given project root
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            root_path: project_root.as_ref().join(Self::TAVLE_DIR),
            write_lock: Mutex::new(()),
        }
    }

    fn state_file(&self) -> PathBuf {
        self.root_path.join(Self::STATE_FILE)
    }

    async fn load_snapshot(&self) -> Result<Snapshot> {
        let path = self.state_file();
        if !path.exists() {
            return Ok(Snapshot::default());
        }
        let contents = fs::read_to_string(&path).await?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        Ok(snapshot)
    }

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        if !self.root_path.exists() {
            fs::create_dir_all(&self.root_path).await?;
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.root_path.join(format!("{}.tmp", Self::STATE_FILE));
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, self.state_file()).await?;
        Ok(())
    }

    /// Runs one read-modify-write cycle under the writer lock.
    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Snapshot) -> Result<()>,
    {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.load_snapshot().await?;
        apply(&mut snapshot)?;
        self.store_snapshot(&snapshot).await
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root_path).await?;
        if !self.state_file().exists() {
            self.store_snapshot(&Snapshot::default()).await?;
        }
        Ok(())
    }

    async fn save_board(&self, board: &Board) -> Result<()> {
        self.mutate(|snapshot| {
            snapshot.boards.retain(|b| b.id != board.id);
            snapshot.boards.push(board.clone());
            Ok(())
        })
        .await
    }

    async fn load_board(&self, id: BoardId) -> Result<Board> {
        let snapshot = self.load_snapshot().await?;
        snapshot
            .board(id)
            .cloned()
            .ok_or(TavleError::BoardNotFound(id))
    }

    async fn list_boards(&self) -> Result<Vec<Board>> {
        let snapshot = self.load_snapshot().await?;
        let mut boards = snapshot.boards;
        boards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(boards)
    }

    async fn delete_board(&self, id: BoardId) -> Result<()> {
        self.mutate(|snapshot| {
            if snapshot.board(id).is_none() {
                return Err(TavleError::BoardNotFound(id));
            }
            snapshot.boards.retain(|b| b.id != id);
            let owned: Vec<ColumnId> = snapshot
                .columns
                .iter()
                .filter(|c| c.board_id == id)
                .map(|c| c.id)
                .collect();
            snapshot.columns.retain(|c| c.board_id != id);
            snapshot.tasks.retain(|t| !owned.contains(&t.column_id));
            Ok(())
        })
        .await
    }

    async fn save_column(&self, column: &Column) -> Result<()> {
        self.mutate(|snapshot| {
            snapshot.columns.retain(|c| c.id != column.id);
            snapshot.columns.push(column.clone());
            Ok(())
        })
        .await
    }

    async fn load_column(&self, id: ColumnId) -> Result<Column> {
        let snapshot = self.load_snapshot().await?;
        snapshot
            .column(id)
            .cloned()
            .ok_or(TavleError::ColumnNotFound(id))
    }

    async fn list_columns(&self, board: BoardId) -> Result<Vec<Column>> {
        let snapshot = self.load_snapshot().await?;
        let mut columns: Vec<Column> = snapshot
            .columns
            .into_iter()
            .filter(|c| c.board_id == board)
            .collect();
        columns.sort_by_key(|c| c.order);
        Ok(columns)
    }

    async fn delete_column(&self, id: ColumnId) -> Result<()> {
        self.mutate(|snapshot| {
            if snapshot.column(id).is_none() {
                return Err(TavleError::ColumnNotFound(id));
            }
            snapshot.columns.retain(|c| c.id != id);
            snapshot.tasks.retain(|t| t.column_id != id);
            Ok(())
        })
        .await
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        self.mutate(|snapshot| {
            snapshot.tasks.retain(|t| t.id != task.id);
            snapshot.tasks.push(task.clone());
            Ok(())
        })
        .await
    }

    async fn load_task(&self, id: TaskId) -> Result<Task> {
        let snapshot = self.load_snapshot().await?;
        snapshot
            .task(id)
            .cloned()
            .ok_or(TavleError::TaskNotFound(id))
    }

    async fn list_tasks(&self, column: ColumnId) -> Result<Vec<Task>> {
        let snapshot = self.load_snapshot().await?;
        let mut tasks: Vec<Task> = snapshot
            .tasks
            .into_iter()
            .filter(|t| t.column_id == column)
            .collect();
        tasks.sort_by_key(|t| t.order);
        Ok(tasks)
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.mutate(|snapshot| {
            if snapshot.task(id).is_none() {
                return Err(TavleError::TaskNotFound(id));
            }
            snapshot.tasks.retain(|t| t.id != id);
            Ok(())
        })
        .await
    }

    async fn persist_column_order(
        &self,
        changes: &[OrderChange<ColumnId>],
        reparent: Option<(ColumnId, BoardId)>,
    ) -> Result<()> {
        self.mutate(|snapshot| {
            for change in changes {
                if snapshot.column(change.id).is_none() {
                    return Err(TavleError::Conflict(format!(
                        "column {} vanished before order change applied",
                        change.id
                    )));
                }
            }
            if let Some((id, _)) = reparent {
                if snapshot.column(id).is_none() {
                    return Err(TavleError::Conflict(format!(
                        "column {id} vanished before reparent applied"
                    )));
                }
            }

            for change in changes {
                if let Some(column) = snapshot.columns.iter_mut().find(|c| c.id == change.id) {
                    column.order = change.order;
                }
            }
            if let Some((id, board)) = reparent {
                if let Some(column) = snapshot.columns.iter_mut().find(|c| c.id == id) {
                    column.board_id = board;
                }
            }
            Ok(())
        })
        .await
    }

    async fn persist_task_order(
        &self,
        changes: &[OrderChange<TaskId>],
        reparent: Option<(TaskId, ColumnId)>,
    ) -> Result<()> {
        self.mutate(|snapshot| {
            for change in changes {
                if snapshot.task(change.id).is_none() {
                    return Err(TavleError::Conflict(format!(
                        "task {} vanished before order change applied",
                        change.id
                    )));
                }
            }
            if let Some((id, _)) = reparent {
                if snapshot.task(id).is_none() {
                    return Err(TavleError::Conflict(format!(
                        "task {id} vanished before reparent applied"
                    )));
                }
            }

            for change in changes {
                if let Some(task) = snapshot.tasks.iter_mut().find(|t| t.id == change.id) {
                    task.order = change.order;
                }
            }
            if let Some((id, column)) = reparent {
                if let Some(task) = snapshot.tasks.iter_mut().find(|t| t.id == id) {
                    task.column_id = column;
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_storage_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        storage.initialize().await.unwrap();

        assert!(storage.root_path.exists());
        assert!(storage.state_file().exists());
    }

    #[tokio::test]
    async fn test_board_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.initialize().await.unwrap();

        let board = Board::new("Test Board".to_string());
        storage.save_board(&board).await.unwrap();

        let loaded = storage.load_board(board.id).await.unwrap();
        assert_eq!(loaded.id, board.id);
        assert_eq!(loaded.name, board.name);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let board = Board::new("Persistent".to_string());
        let column = Column::new("To Do".to_string(), 0, board.id);

        {
            let storage = FileStorage::new(temp_dir.path());
            storage.initialize().await.unwrap();
            storage.save_board(&board).await.unwrap();
            storage.save_column(&column).await.unwrap();
        }

        let reopened = FileStorage::new(temp_dir.path());
        let loaded = reopened.load_column(column.id).await.unwrap();
        assert_eq!(loaded.name, "To Do");
        assert_eq!(loaded.board_id, board.id);
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.initialize().await.unwrap();

        let mut board = Board::new("Before".to_string());
        storage.save_board(&board).await.unwrap();
        board.set_name("After".to_string());
        storage.save_board(&board).await.unwrap();

        assert_eq!(storage.list_boards().await.unwrap().len(), 1);
        assert_eq!(storage.load_board(board.id).await.unwrap().name, "After");
    }

    #[tokio::test]
    async fn test_delete_board_cascades() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.initialize().await.unwrap();

        let board = Board::new("Board".to_string());
        let column = Column::new("Col".to_string(), 0, board.id);
        let task = Task::new("Task".to_string(), 0, column.id);
        storage.save_board(&board).await.unwrap();
        storage.save_column(&column).await.unwrap();
        storage.save_task(&task).await.unwrap();

        storage.delete_board(board.id).await.unwrap();

        assert!(storage.load_board(board.id).await.is_err());
        assert!(storage.load_column(column.id).await.is_err());
        assert!(storage.load_task(task.id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_tasks_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.initialize().await.unwrap();

        let column_id = ColumnId::new();
        let second = Task::new("Second".to_string(), 1, column_id);
        let first = Task::new("First".to_string(), 0, column_id);
        storage.save_task(&second).await.unwrap();
        storage.save_task(&first).await.unwrap();

        let tasks = storage.list_tasks(column_id).await.unwrap();
        assert_eq!(tasks[0].id, first.id);
        assert_eq!(tasks[1].id, second.id);
    }

    #[tokio::test]
    async fn test_persist_task_order_with_reparent() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.initialize().await.unwrap();

        let from = ColumnId::new();
        let to = ColumnId::new();
        let task = Task::new("Mover".to_string(), 0, from);
        storage.save_task(&task).await.unwrap();

        storage
            .persist_task_order(
                &[OrderChange {
                    id: task.id,
                    order: 2,
                }],
                Some((task.id, to)),
            )
            .await
            .unwrap();

        let loaded = storage.load_task(task.id).await.unwrap();
        assert_eq!(loaded.order, 2);
        assert_eq!(loaded.column_id, to);
    }

    #[tokio::test]
    async fn test_persist_order_conflict_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        storage.initialize().await.unwrap();

        let task = Task::new("Kept".to_string(), 0, ColumnId::new());
        storage.save_task(&task).await.unwrap();

        let result = storage
            .persist_task_order(
                &[
                    OrderChange {
                        id: task.id,
                        order: 9,
                    },
                    OrderChange {
                        id: TaskId::new(),
                        order: 0,
                    },
                ],
                None,
            )
            .await;

        assert!(matches!(result, Err(TavleError::Conflict(_))));
        assert_eq!(storage.load_task(task.id).await.unwrap().order, 0);
    }

    #[tokio::test]
    async fn test_uninitialized_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        assert!(storage.list_boards().await.unwrap().is_empty());
        assert!(storage.load_board(BoardId::new()).await.is_err());
    }
}
