//! # xp-core — The "Model" of XP
//!
//! Defines what a captured trace event looks like once it leaves the wire,
//! how structured column filters are expressed and evaluated, and how raw
//! event fields are projected onto named display columns.
//!
//! Nothing in this crate performs I/O. Every function here is a pure
//! transformation over [`EventRow`]s and [`FilterClause`]s.

pub mod event;
pub mod filter;
pub mod view;

pub use event::{EventRow, ProfilerEvent};
pub use filter::{FilterClause, FilterOperator, FilterType, FilterableRow};
pub use view::{ViewColumn, ViewConfig, ViewRow};
