//! # xp-buffer — The "Engine" of XP
//!
//! Bounded in-memory storage for captured events. A fixed slot ring driven
//! by a [`cursor::Cursor`], optional secondary equality indexes, and a
//! read-side [`filtered::FilteredBuffer`] that evaluates column filters and
//! the quick filter without touching the stored rows.

pub mod cursor;
pub mod filtered;
pub mod ring;

pub use filtered::{FilteredBuffer, RowConverter};
pub use ring::{AddResult, IndexedRow, RingBuffer};
