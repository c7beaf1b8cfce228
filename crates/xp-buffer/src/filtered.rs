//! # FilteredBuffer — Read-Side View
//!
//! Wraps a [`RingBuffer`] with AND-combined column filters and a free-text
//! quick filter. Filtering never mutates the stored rows and nothing is
//! cached: every query re-evaluates against the current ring contents,
//! which are bounded by the ring capacity.

use std::collections::BTreeSet;

use xp_core::filter::eval::value_to_string;
use xp_core::filter::{clauses_match, quick_filter_matches};
use xp_core::{FilterClause, FilterableRow, ViewRow};

use crate::ring::{IndexedRow, RingBuffer};

/// Maps a stored row onto the shape filters are written against.
pub type RowConverter<T> = Box<dyn Fn(&T) -> ViewRow + Send + Sync>;

pub struct FilteredBuffer<T> {
    buffer: RingBuffer<T>,
    clauses: Vec<FilterClause>,
    column_filter_enabled: bool,
    quick_filter: String,
    converter: Option<RowConverter<T>>,
}

impl<T: IndexedRow + FilterableRow + Clone> FilteredBuffer<T> {
    pub fn new(buffer: RingBuffer<T>) -> Self {
        Self {
            buffer,
            clauses: Vec::new(),
            column_filter_enabled: false,
            quick_filter: String::new(),
            converter: None,
        }
    }

    pub fn buffer(&self) -> &RingBuffer<T> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut RingBuffer<T> {
        &mut self.buffer
    }

    /// Replace the active clause set. An empty set disables column filtering.
    pub fn set_column_filters(&mut self, clauses: Vec<FilterClause>) {
        self.column_filter_enabled = !clauses.is_empty();
        self.clauses = clauses;
    }

    pub fn clear_column_filters(&mut self) {
        self.set_column_filters(Vec::new());
    }

    pub fn column_filters(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn set_quick_filter(&mut self, term: impl Into<String>) {
        self.quick_filter = term.into();
    }

    pub fn clear_quick_filter(&mut self) {
        self.quick_filter.clear();
    }

    /// The quick filter term, `None` when blank.
    pub fn quick_filter(&self) -> Option<&str> {
        let term = self.quick_filter.trim();
        (!term.is_empty()).then_some(term)
    }

    pub fn clear_all_filters(&mut self) {
        self.clear_column_filters();
        self.clear_quick_filter();
    }

    pub fn set_row_converter(&mut self, converter: impl Fn(&T) -> ViewRow + Send + Sync + 'static) {
        self.converter = Some(Box::new(converter));
    }

    pub fn clear_row_converter(&mut self) {
        self.converter = None;
    }

    pub fn is_filter_active(&self) -> bool {
        self.column_filter_enabled || self.quick_filter().is_some()
    }

    /// All rows when no filter is active, otherwise the matching subset.
    /// Insertion order is preserved either way.
    pub fn filtered_rows(&self) -> Vec<&T> {
        if !self.is_filter_active() {
            return self.buffer.get_all_rows();
        }
        self.buffer.iter().filter(|row| self.evaluate(row)).collect()
    }

    pub fn filtered_count(&self) -> usize {
        if !self.is_filter_active() {
            return self.buffer.len();
        }
        self.buffer.iter().filter(|row| self.evaluate(row)).count()
    }

    pub fn total_count(&self) -> usize {
        self.buffer.len()
    }

    /// One page of the filtered result. Empty for an out-of-range start.
    pub fn filtered_range(&self, start: usize, count: usize) -> Vec<&T> {
        if !self.is_filter_active() {
            return self.buffer.iter().skip(start).take(count).collect();
        }
        self.buffer
            .iter()
            .filter(|row| self.evaluate(row))
            .skip(start)
            .take(count)
            .collect()
    }

    /// Test a single row against the active filters.
    pub fn matches(&self, row: &T) -> bool {
        !self.is_filter_active() || self.evaluate(row)
    }

    /// Sorted unique non-empty values of `field` over every stored row,
    /// regardless of the active filters.
    pub fn distinct_values_for_field(&self, field: &str) -> Vec<String> {
        let mut values = BTreeSet::new();
        for row in self.buffer.iter() {
            let value = match &self.converter {
                Some(convert) => convert(row).field(field),
                None => row.field(field),
            };
            if let Some(value) = value.filter(|v| !v.is_null()) {
                let value = value_to_string(&value);
                if !value.is_empty() {
                    values.insert(value);
                }
            }
        }
        values.into_iter().collect()
    }

    fn evaluate(&self, row: &T) -> bool {
        match &self.converter {
            Some(convert) => self.passes(&convert(row)),
            None => self.passes(row),
        }
    }

    fn passes(&self, row: &dyn FilterableRow) -> bool {
        if self.column_filter_enabled && !clauses_match(row, &self.clauses) {
            return false;
        }
        match self.quick_filter() {
            Some(term) => quick_filter_matches(row, term),
            None => true,
        }
    }
}
