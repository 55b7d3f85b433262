//! Ordered two-key aggregation table.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use super::record::{MetricRecord, SeriesKey};

/// Ordered `(SeriesKey, timestamp)` store of metric records.
///
/// Rows and columns are kept in ascending order because downstream consumers
/// read each row as a time series. At most one record exists per cell; a second
/// insert into an occupied cell merges instead of replacing.
#[derive(Debug, Clone, Default)]
pub struct AggregationTable {
    rows: BTreeMap<SeriesKey, BTreeMap<i64, MetricRecord>>,
    cells: usize,
}

impl AggregationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record at `(key, timestamp)`.
    ///
    /// Returns `true` if the record was merged into an existing cell.
    pub fn put(&mut self, key: SeriesKey, timestamp: i64, record: MetricRecord) -> bool {
        match self.rows.entry(key).or_default().entry(timestamp) {
            Entry::Occupied(mut cell) => {
                cell.get_mut().merge(record);
                true
            }
            Entry::Vacant(cell) => {
                cell.insert(record);
                self.cells += 1;
                false
            }
        }
    }

    /// Store a record under its own key and timestamp.
    pub fn insert(&mut self, record: MetricRecord) -> bool {
        let key = record.key();
        let timestamp = record.timestamp;
        self.put(key, timestamp, record)
    }

    /// Look up one cell.
    pub fn get(&self, key: &SeriesKey, timestamp: i64) -> Option<&MetricRecord> {
        self.rows.get(key)?.get(&timestamp)
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells == 0
    }

    /// Iterate records row-major (ascending key) then column-major (ascending timestamp).
    pub fn records(&self) -> impl Iterator<Item = &MetricRecord> {
        self.rows.values().flat_map(BTreeMap::values)
    }

    /// Flattened copy of every record in table order.
    pub fn all_records(&self) -> Vec<MetricRecord> {
        self.records().cloned().collect()
    }

    /// Consume the table, yielding every record in table order.
    pub fn into_records(self) -> Vec<MetricRecord> {
        self.rows.into_values().flat_map(BTreeMap::into_values).collect()
    }
}
