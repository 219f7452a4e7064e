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

use crestdb_common_exception::ErrorCode;
use crestdb_common_exception::Result;

use crate::datum::Datum;
use crate::datum::FieldType;

/// Descriptor of one result column.
#[derive(Clone, Debug)]
pub struct ResultField {
    pub name: String,
    pub field_type: FieldType,
}

/// One decoded result row.
#[derive(Clone, Debug, Default)]
pub struct Row {
    values: Vec<Datum>,
}

impl Row {
    pub fn new(values: Vec<Datum>) -> Row {
        Row { values }
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64> {
        self.get(idx)?.as_i64()
    }

    pub fn get_u64(&self, idx: usize) -> Result<u64> {
        self.get(idx)?.as_u64()
    }

    pub fn get_f64(&self, idx: usize) -> Result<f64> {
        self.get(idx)?.as_f64()
    }

    pub fn get_bytes(&self, idx: usize) -> Result<&[u8]> {
        self.get(idx)?.as_bytes()
    }

    pub fn is_null(&self, idx: usize) -> bool {
        matches!(self.values.get(idx), Some(Datum::Null) | None)
    }

    /// The raw datum of the column, as described by its result field.
    pub fn get_datum(&self, idx: usize) -> Result<Datum> {
        Ok(self.get(idx)?.clone())
    }

    fn get(&self, idx: usize) -> Result<&Datum> {
        self.values
            .get(idx)
            .ok_or_else(|| ErrorCode::BadArguments(format!("row has no column {idx}")))
    }
}

/// Catalog query capability handed to the statistics handle.
///
/// Both operations return the result rows together with the field
/// descriptors of the projection.
pub trait RestrictedSqlExecutor: Send + Sync {
    /// Execute a read at the current version.
    fn execute_restricted_sql(&self, sql: &str) -> Result<(Vec<Row>, Vec<ResultField>)>;

    /// Execute a read pinned to a historical snapshot. The snapshot TS is
    /// chosen by the executor, one per call.
    fn execute_restricted_sql_with_snapshot(&self, sql: &str)
        -> Result<(Vec<Row>, Vec<ResultField>)>;
}

/// Session variables the handle resets on [`clear`](crate::Handle::clear).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionVars {
    pub init_chunk_size: usize,
    pub max_chunk_size: usize,
    pub enable_chunk_rpc: bool,
    pub projection_concurrency: usize,
}

/// The session the handle owns for its transactional writer path.
///
/// Exclusive use is enforced by the handle mutex; implementations need not
/// serialize internally.
pub trait SessionContext: Send + Sync {
    /// Execute a statement in the session (BEGIN/COMMIT/ROLLBACK/DML).
    fn execute(&self, sql: &str) -> Result<()>;

    /// Start timestamp of the transaction currently open in the session.
    fn txn_start_ts(&self) -> Result<u64>;

    fn set_session_vars(&self, vars: SessionVars);
}
