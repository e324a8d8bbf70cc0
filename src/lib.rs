//! # Tavle Core
//!
//! Core ordering and live-notification logic for Tavle kanban boards.
//!
//! This crate provides the fundamental types and operations for managing
//! boards, columns, and tasks — keeping every parent's sibling order
//! gap-free under inserts, moves, and deletes, and fanning mutation events
//! out to any number of live subscribers — without any dependency on
//! specific UI implementations or transport layers.

pub mod domain;
pub mod error;
pub mod events;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use domain::{
    board::{Board, BoardId, Column, ColumnId},
    ordering::{append_position, plan_move, plan_removal, ChildRef, OrderChange},
    task::{Task, TaskId},
};
pub use error::{Result, TavleError};
pub use events::{BusConfig, ChangeEvent, ChangeKind, EventBus, OverflowPolicy, Subscription};
pub use service::{BoardService, BoardSnapshot, ColumnSnapshot};
pub use storage::Storage;
