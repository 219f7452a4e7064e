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

//! Per-table statistics kept in memory for cardinality estimation.
//!
//! The [`Handle`] owns a copy-on-write snapshot of every table's statistics
//! (row counts, histograms, count-min sketches) and refreshes it from the
//! stats catalog tables. Optimizer readers load the snapshot without taking
//! any lock; a single refresher publishes new snapshots behind a small
//! publish mutex.

mod catalog;
mod cm_sketch;
mod datum;
mod handle;
mod histogram;
mod sqlexec;
mod table;

pub use catalog::Catalog;
pub use catalog::ColumnInfo;
pub use catalog::IndexInfo;
pub use catalog::PartitionDefinition;
pub use catalog::PartitionInfo;
pub use catalog::SchemaInfo;
pub use catalog::TableInfo;
pub use cm_sketch::CMSketch;
pub use cm_sketch::decode_cm_sketch;
pub use cm_sketch::encode_cm_sketch;
pub use datum::Datum;
pub use datum::FieldType;
pub use handle::Handle;
pub use handle::compose_ts;
pub use handle::duration_to_ts;
pub use histogram::Bucket;
pub use histogram::Histogram;
pub use histogram::NeededColumnSet;
pub use histogram::TableColumnID;
pub use sqlexec::RestrictedSqlExecutor;
pub use sqlexec::ResultField;
pub use sqlexec::Row;
pub use sqlexec::SessionContext;
pub use sqlexec::SessionVars;
pub use table::Column;
pub use table::Index;
pub use table::PSEUDO_ROW_COUNT;
pub use table::Table;
