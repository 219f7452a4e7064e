// Copyright 2024 CrestDB Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use dashmap::DashSet;

use crate::datum::Datum;
use crate::datum::FieldType;

/// One histogram bucket.
///
/// `count` is cumulative over the ordered bucket sequence; the storage layer
/// persists per-bucket deltas and the loader re-accumulates them.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub count: i64,
    pub repeat: i64,
    pub lower: Datum,
    pub upper: Datum,
}

/// A bucketed distribution of one column or index.
#[derive(Clone, Debug)]
pub struct Histogram {
    /// Column ID for column histograms, index ID for index histograms.
    pub id: i64,
    /// Number of distinct values.
    pub ndv: i64,
    pub null_count: i64,
    /// Version of the stats_histograms row this was loaded from.
    pub last_update_version: u64,
    pub tp: FieldType,
    pub buckets: Vec<Bucket>,
    /// Total uncompressed column size in bytes.
    pub tot_col_size: i64,
    pub correlation: f64,
    // f64 projections of bucket bounds, filled by pre_calculate_scalar.
    scalars: Vec<(f64, f64)>,
}

impl Histogram {
    pub fn new(
        id: i64,
        ndv: i64,
        null_count: i64,
        version: u64,
        tp: FieldType,
        bucket_cap: usize,
        tot_col_size: i64,
    ) -> Histogram {
        Histogram {
            id,
            ndv,
            null_count,
            last_update_version: version,
            tp,
            buckets: Vec::with_capacity(bucket_cap),
            tot_col_size,
            correlation: 0.0,
            scalars: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Append a bucket whose `count` is already cumulative.
    pub fn append_bucket(&mut self, lower: Datum, upper: Datum, count: i64, repeat: i64) {
        self.buckets.push(Bucket {
            count,
            repeat,
            lower,
            upper,
        });
    }

    pub fn get_lower(&self, idx: usize) -> &Datum {
        &self.buckets[idx].lower
    }

    pub fn get_upper(&self, idx: usize) -> &Datum {
        &self.buckets[idx].upper
    }

    /// Row count excluding nulls.
    pub fn not_null_count(&self) -> f64 {
        match self.buckets.last() {
            Some(b) => b.count as f64,
            None => 0.0,
        }
    }

    pub fn total_row_count(&self) -> f64 {
        self.not_null_count() + self.null_count as f64
    }

    /// Pre-compute the f64 projections of all bucket bounds so that range
    /// estimation never touches datums on the hot path.
    pub fn pre_calculate_scalar(&mut self) {
        self.scalars = self
            .buckets
            .iter()
            .map(|b| (b.lower.to_scalar(), b.upper.to_scalar()))
            .collect();
    }

    pub fn bound_scalars(&self, idx: usize) -> (f64, f64) {
        self.scalars[idx]
    }
}

/// A column that the optimizer touched while only summary stats were loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TableColumnID {
    pub table_id: i64,
    pub column_id: i64,
}

/// Process-wide set of columns awaiting full histogram materialization.
///
/// The optimizer inserts entries; the on-demand loader drains them. Injected
/// into the handle so tests can substitute a fresh instance.
#[derive(Default)]
pub struct NeededColumnSet {
    cols: DashSet<TableColumnID>,
}

impl NeededColumnSet {
    pub fn new() -> NeededColumnSet {
        NeededColumnSet::default()
    }

    pub fn insert(&self, col: TableColumnID) {
        self.cols.insert(col);
    }

    pub fn all_cols(&self) -> Vec<TableColumnID> {
        self.cols.iter().map(|c| *c).collect()
    }

    pub fn delete(&self, col: TableColumnID) {
        self.cols.remove(&col);
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }
}
