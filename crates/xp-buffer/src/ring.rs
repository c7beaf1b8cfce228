//! # RingBuffer — Bounded Event Store
//!
//! Fixed-capacity FIFO of rows. Inserting into a full ring evicts exactly
//! one row, the oldest, and reports it. While paused, inserts are dropped
//! without touching the stored rows.
//!
//! Configured index fields get a `value -> {row id}` map so equality
//! lookups do not need a scan of the whole ring.

use std::collections::{HashMap, HashSet};

use xp_core::filter::eval::value_to_string;
use xp_core::{EventRow, FilterableRow};

use crate::cursor::Cursor;

/// A row with a stable identity and indexable fields.
pub trait IndexedRow {
    fn row_id(&self) -> &str;

    /// String key of `field` for the secondary index, `None` when absent.
    fn index_value(&self, field: &str) -> Option<String>;
}

impl IndexedRow for EventRow {
    fn row_id(&self) -> &str {
        &self.id
    }

    fn index_value(&self, field: &str) -> Option<String> {
        self.field(field)
            .filter(|v| !v.is_null())
            .map(|v| value_to_string(&v))
    }
}

/// Outcome of an accepted insert.
#[derive(Debug, Clone, PartialEq)]
pub struct AddResult<T> {
    pub added: T,
    /// The evicted oldest row, when the ring was full.
    pub removed: Option<T>,
}

type FieldIndex = HashMap<String, HashSet<String>>;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Grows up to `capacity` on first fill, then slots are reused.
    slots: Vec<Option<T>>,
    cursor: Cursor,
    paused: bool,
    indexes: HashMap<String, FieldIndex>,
}

impl<T: IndexedRow + Clone> RingBuffer<T> {
    /// # Panics
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        Self::with_indexes(capacity, std::iter::empty::<String>())
    }

    pub fn with_indexes<I, S>(capacity: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: Vec::with_capacity(capacity.min(1024)),
            cursor: Cursor::new(capacity),
            paused: false,
            indexes: fields
                .into_iter()
                .map(|f| (f.into(), FieldIndex::new()))
                .collect(),
        }
    }

    /// Append a row, evicting the oldest one if the ring is full.
    ///
    /// Returns `None` while paused.
    pub fn add(&mut self, row: T) -> Option<AddResult<T>> {
        if self.paused {
            return None;
        }

        let removed = if self.cursor.is_full() {
            self.evict_oldest()
        } else {
            None
        };

        let slot = self.cursor.advance_head()?;
        self.index_insert(&row);
        if slot == self.slots.len() {
            self.slots.push(Some(row.clone()));
        } else {
            self.slots[slot] = Some(row.clone());
        }

        Some(AddResult {
            added: row,
            removed,
        })
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.cursor.reset();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    /// Remove the oldest `n` rows (all of them if `n >= len`), oldest first.
    pub fn clear_range(&mut self, n: usize) -> Vec<T> {
        let n = n.min(self.cursor.len());
        (0..n).filter_map(|_| self.evict_oldest()).collect()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Rows in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.cursor.len()).filter_map(move |i| self.slots[self.cursor.position(i)].as_ref())
    }

    pub fn get_all_rows(&self) -> Vec<&T> {
        self.iter().collect()
    }

    /// The `index`-th oldest row.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.cursor.len() {
            return None;
        }
        self.slots[self.cursor.position(index)].as_ref()
    }

    /// Rows whose indexed `field` equals `value`, oldest first.
    /// Empty when `field` is not indexed.
    pub fn find_by_index(&self, field: &str, value: &str) -> Vec<&T> {
        let Some(ids) = self.indexes.get(field).and_then(|index| index.get(value)) else {
            return Vec::new();
        };
        self.iter().filter(|row| ids.contains(row.row_id())).collect()
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cursor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.cursor.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.cursor.capacity()
    }

    fn evict_oldest(&mut self) -> Option<T> {
        let slot = self.cursor.advance_tail()?;
        let row = self.slots[slot].take()?;
        self.index_remove(&row);
        Some(row)
    }

    fn index_insert(&mut self, row: &T) {
        for (field, index) in self.indexes.iter_mut() {
            if let Some(value) = row.index_value(field) {
                index
                    .entry(value)
                    .or_default()
                    .insert(row.row_id().to_string());
            }
        }
    }

    fn index_remove(&mut self, row: &T) {
        for (field, index) in self.indexes.iter_mut() {
            let Some(value) = row.index_value(field) else {
                continue;
            };
            if let Some(ids) = index.get_mut(&value) {
                ids.remove(row.row_id());
                if ids.is_empty() {
                    index.remove(&value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: u64) -> EventRow {
        let mut row = EventRow::new(format!("row-{n}"), n, "sql_batch_completed");
        row.database_name = Some(if n % 2 == 0 { "Sales" } else { "HR" }.to_string());
        row
    }

    fn numbers(buffer: &RingBuffer<EventRow>) -> Vec<u64> {
        buffer.iter().map(|r| r.event_number).collect()
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let mut buffer = RingBuffer::new(5);
        for n in 1..=10 {
            buffer.add(row(n));
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(numbers(&buffer), vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_eviction_reports_exactly_the_oldest() {
        let mut buffer = RingBuffer::new(2);
        assert_eq!(buffer.add(row(1)).unwrap().removed, None);
        assert_eq!(buffer.add(row(2)).unwrap().removed, None);

        let result = buffer.add(row(3)).unwrap();
        assert_eq!(result.added.event_number, 3);
        assert_eq!(result.removed.map(|r| r.event_number), Some(1));
    }

    #[test]
    fn test_pause_drops_inserts() {
        let mut buffer = RingBuffer::new(3);
        buffer.add(row(1));
        buffer.set_paused(true);
        for n in 2..10 {
            assert!(buffer.add(row(n)).is_none());
        }
        assert_eq!(buffer.len(), 1);

        buffer.set_paused(false);
        assert!(buffer.add(row(10)).is_some());
        assert_eq!(numbers(&buffer), vec![1, 10]);
    }

    #[test]
    fn test_clear_range() {
        let mut buffer = RingBuffer::with_indexes(4, ["databaseName"]);
        for n in 1..=6 {
            buffer.add(row(n));
        }
        let removed: Vec<u64> = buffer.clear_range(2).iter().map(|r| r.event_number).collect();
        assert_eq!(removed, vec![3, 4]);
        assert_eq!(numbers(&buffer), vec![5, 6]);

        let hr: Vec<u64> = buffer
            .find_by_index("databaseName", "HR")
            .iter()
            .map(|r| r.event_number)
            .collect();
        assert_eq!(hr, vec![5]);
        let sales: Vec<u64> = buffer
            .find_by_index("databaseName", "Sales")
            .iter()
            .map(|r| r.event_number)
            .collect();
        assert_eq!(sales, vec![6]);
        assert_eq!(buffer.indexes["databaseName"]["HR"].len(), 1);
        assert!(buffer.indexes["databaseName"]["HR"].contains("row-5"));

        buffer.add(row(7));
        assert_eq!(numbers(&buffer), vec![5, 6, 7]);

        assert_eq!(buffer.clear_range(100).len(), 3);
        assert!(buffer.is_empty());
        assert!(buffer.indexes["databaseName"].is_empty());
        assert!(buffer.find_by_index("databaseName", "HR").is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut buffer = RingBuffer::with_indexes(3, ["databaseName"]);
        for n in 1..=5 {
            buffer.add(row(n));
        }
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.find_by_index("databaseName", "HR").is_empty());

        buffer.add(row(8));
        assert_eq!(numbers(&buffer), vec![8]);
        assert_eq!(buffer.get(0).map(|r| r.event_number), Some(8));
        assert!(buffer.get(1).is_none());
    }

    #[test]
    fn test_index_tracks_eviction() {
        let mut buffer = RingBuffer::with_indexes(3, ["databaseName"]);
        for n in 1..=4 {
            buffer.add(row(n));
        }
        // rows 2, 3, 4 remain
        let sales: Vec<u64> = buffer
            .find_by_index("databaseName", "Sales")
            .iter()
            .map(|r| r.event_number)
            .collect();
        assert_eq!(sales, vec![2, 4]);
        let hr: Vec<u64> = buffer
            .find_by_index("databaseName", "HR")
            .iter()
            .map(|r| r.event_number)
            .collect();
        assert_eq!(hr, vec![3]);
        assert!(buffer.find_by_index("textData", "x").is_empty());
    }
}
