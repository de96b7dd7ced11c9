//! Shared domain types for boardsync: board entities and the role-based
//! permission gate. Nothing in this crate performs I/O.

pub mod board;
pub mod permissions;

pub use board::{
    BoardError, BoardSnapshot, Column, ColumnRemoval, ColumnType, DEFAULT_COLUMN_WIDTH, Item,
    Project,
};
pub use permissions::{Action, Permissions, Role, UnknownAction, authorize};
