pub mod board;
pub mod ordering;
pub mod task;

pub use board::{Board, BoardId, Column, ColumnId};
pub use ordering::{append_position, plan_move, plan_removal, ChildRef, OrderChange};
pub use task::{Task, TaskId};
