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

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::ColumnInfo;
use crate::catalog::IndexInfo;
use crate::catalog::TableInfo;
use crate::cm_sketch::CMSketch;
use crate::histogram::Histogram;

/// Default row count assumed for a table whose stats are synthesized.
pub const PSEUDO_ROW_COUNT: i64 = 10_000;

/// Statistics of one column.
///
/// Version, null count, NDV, total column size and correlation live on the
/// embedded histogram, whether or not buckets are materialized.
#[derive(Clone, Debug)]
pub struct Column {
    pub physical_id: i64,
    pub histogram: Histogram,
    pub cm_sketch: Option<Arc<CMSketch>>,
    pub info: Arc<ColumnInfo>,
    pub count: i64,
    /// True when this column is the clustered primary key; such columns are
    /// always loaded eagerly.
    pub is_handle: bool,
}

impl Column {
    /// Number of materialized buckets; zero for summary-only entries.
    pub fn len(&self) -> usize {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn last_update_version(&self) -> u64 {
        self.histogram.last_update_version
    }
}

/// Statistics of one index.
#[derive(Clone, Debug)]
pub struct Index {
    pub histogram: Histogram,
    pub cm_sketch: Option<Arc<CMSketch>>,
    pub info: Arc<IndexInfo>,
}

impl Index {
    pub fn last_update_version(&self) -> u64 {
        self.histogram.last_update_version
    }
}

/// Statistics of one physical table (a base table or a single partition).
///
/// Owned by the snapshot that references it; immutable after publication.
/// Writers clone before mutating.
#[derive(Clone, Debug)]
pub struct Table {
    /// Base-table ID or partition ID.
    pub physical_id: i64,
    /// False only for placeholder entries that carry no physical identity.
    pub have_physical_id: bool,
    pub columns: HashMap<i64, Arc<Column>>,
    pub indices: HashMap<i64, Arc<Index>>,
    /// Version of the stats_meta row this entry was refreshed from.
    pub version: u64,
    pub count: i64,
    pub modify_count: i64,
    /// Qualified "schema.table" name, filled by the refresher.
    pub name: String,
    /// True iff the stats are synthesized defaults.
    pub pseudo: bool,
}

impl Table {
    pub fn new(physical_id: i64, column_cap: usize, index_cap: usize) -> Table {
        Table {
            physical_id,
            have_physical_id: true,
            columns: HashMap::with_capacity(column_cap),
            indices: HashMap::with_capacity(index_cap),
            version: 0,
            count: 0,
            modify_count: 0,
            name: String::new(),
            pseudo: false,
        }
    }

    /// Shallow copy: the nested column and index entries are immutable after
    /// publish, so sharing them is safe.
    pub fn copy(&self) -> Table {
        Table {
            physical_id: self.physical_id,
            have_physical_id: self.have_physical_id,
            columns: self.columns.clone(),
            indices: self.indices.clone(),
            version: self.version,
            count: self.count,
            modify_count: self.modify_count,
            name: self.name.clone(),
            pseudo: self.pseudo,
        }
    }

    /// Synthesized default statistics for a table not yet seen in storage.
    pub fn pseudo_table(table_info: &TableInfo) -> Table {
        let mut table = Table::new(table_info.id, table_info.columns.len(), 0);
        table.pseudo = true;
        table.count = PSEUDO_ROW_COUNT;
        for col_info in &table_info.columns {
            let col = Column {
                physical_id: table_info.id,
                histogram: Histogram::new(col_info.id, 0, 0, 0, col_info.field_type.clone(), 0, 0),
                cm_sketch: None,
                info: col_info.clone(),
                count: PSEUDO_ROW_COUNT,
                is_handle: table_info.pk_is_handle && col_info.in_primary_key,
            };
            table.columns.insert(col_info.id, Arc::new(col));
        }
        table
    }
}
