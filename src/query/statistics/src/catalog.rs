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

use std::sync::Arc;

use crate::datum::FieldType;

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub id: i64,
    pub name: String,
    pub field_type: FieldType,
    /// Set when the column participates in the primary key.
    pub in_primary_key: bool,
}

#[derive(Clone, Debug)]
pub struct IndexInfo {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct PartitionDefinition {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct PartitionInfo {
    pub definitions: Vec<PartitionDefinition>,
}

/// Table metadata as resolved by the schema catalog.
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub id: i64,
    pub name: String,
    pub columns: Vec<Arc<ColumnInfo>>,
    pub indices: Vec<Arc<IndexInfo>>,
    /// True when the single integer primary-key column doubles as the row
    /// handle (clustered key).
    pub pk_is_handle: bool,
    pub partition: Option<PartitionInfo>,
}

#[derive(Clone, Debug)]
pub struct SchemaInfo {
    pub name: String,
    pub tables: Vec<Arc<TableInfo>>,
}

/// Read-only view of the schema catalog.
///
/// `schema_meta_version` advances on every DDL change; the handle uses it to
/// invalidate its partition-to-table index.
pub trait Catalog: Send + Sync {
    fn all_schemas(&self) -> Vec<Arc<SchemaInfo>>;

    fn table_by_name(&self, schema: &str, table: &str) -> Option<Arc<TableInfo>>;

    fn table_by_id(&self, table_id: i64) -> Option<Arc<TableInfo>>;

    fn schema_meta_version(&self) -> i64;
}
