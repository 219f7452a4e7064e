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

//! In-memory stand-ins for the stats catalog tables, the SQL executors and
//! the schema catalog. The store recognizes exactly the statement shapes the
//! handle emits.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crestdb_common_exception::ErrorCode;
use crestdb_common_exception::Result;
use crestdb_query_statistics::Catalog;
use crestdb_query_statistics::ColumnInfo;
use crestdb_query_statistics::Datum;
use crestdb_query_statistics::FieldType;
use crestdb_query_statistics::Handle;
use crestdb_query_statistics::IndexInfo;
use crestdb_query_statistics::NeededColumnSet;
use crestdb_query_statistics::PartitionDefinition;
use crestdb_query_statistics::PartitionInfo;
use crestdb_query_statistics::RestrictedSqlExecutor;
use crestdb_query_statistics::ResultField;
use crestdb_query_statistics::Row;
use crestdb_query_statistics::SchemaInfo;
use crestdb_query_statistics::SessionContext;
use crestdb_query_statistics::SessionVars;
use crestdb_query_statistics::TableInfo;
use parking_lot::Mutex;

#[derive(Clone, Default)]
struct MetaRow {
    version: u64,
    modify_count: i64,
    count: i64,
}

#[derive(Clone, Default)]
struct HistRow {
    distinct: i64,
    version: u64,
    null_count: i64,
    tot_col_size: i64,
    stats_ver: i64,
    flag: i64,
    correlation: f64,
    cm_sketch: Vec<u8>,
    last_analyze_pos: Vec<u8>,
}

#[derive(Clone, Default)]
struct BucketRow {
    count: i64,
    repeats: i64,
    lower: Vec<u8>,
    upper: Vec<u8>,
}

#[derive(Clone, Default)]
struct StoreState {
    // table_id -> meta
    meta: BTreeMap<i64, MetaRow>,
    // (table_id, is_index, hist_id) -> histogram meta
    histograms: BTreeMap<(i64, i64, i64), HistRow>,
    // (table_id, is_index, hist_id, bucket_id) -> bucket
    buckets: BTreeMap<(i64, i64, i64, i64), BucketRow>,
}

struct Txn {
    start_ts: u64,
    saved: StoreState,
}

/// The three stats catalog tables plus a transactional session over them.
pub struct MockStore {
    state: Mutex<StoreState>,
    txn: Mutex<Option<Txn>>,
    next_ts: AtomicU64,
    last_ts: AtomicU64,
    fail_tables: Mutex<HashSet<i64>>,
    fail_statements_containing: Mutex<Option<String>>,
    session_vars: Mutex<Option<SessionVars>>,
}

impl MockStore {
    pub fn new() -> Arc<MockStore> {
        Arc::new(MockStore {
            state: Mutex::new(StoreState::default()),
            txn: Mutex::new(None),
            next_ts: AtomicU64::new(1_000),
            last_ts: AtomicU64::new(0),
            fail_tables: Mutex::new(HashSet::new()),
            fail_statements_containing: Mutex::new(None),
            session_vars: Mutex::new(None),
        })
    }

    pub fn seed_meta(&self, table_id: i64, version: u64, modify_count: i64, count: i64) {
        self.state.lock().meta.insert(
            table_id,
            MetaRow {
                version,
                modify_count,
                count,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn seed_histogram(
        &self,
        table_id: i64,
        is_index: i64,
        hist_id: i64,
        distinct: i64,
        version: u64,
        null_count: i64,
        tot_col_size: i64,
        correlation: f64,
        cm_sketch: &[u8],
    ) {
        self.state.lock().histograms.insert(
            (table_id, is_index, hist_id),
            HistRow {
                distinct,
                version,
                null_count,
                tot_col_size,
                stats_ver: 0,
                flag: 0,
                correlation,
                cm_sketch: cm_sketch.to_vec(),
                last_analyze_pos: Vec::new(),
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn seed_bucket(
        &self,
        table_id: i64,
        is_index: i64,
        hist_id: i64,
        bucket_id: i64,
        count: i64,
        repeats: i64,
        lower: &[u8],
        upper: &[u8],
    ) {
        self.state.lock().buckets.insert(
            (table_id, is_index, hist_id, bucket_id),
            BucketRow {
                count,
                repeats,
                lower: lower.to_vec(),
                upper: upper.to_vec(),
            },
        );
    }

    /// Stored per-bucket counts in bucket_id order.
    pub fn bucket_counts(&self, table_id: i64, is_index: i64, hist_id: i64) -> Vec<i64> {
        self.state
            .lock()
            .buckets
            .range((table_id, is_index, hist_id, i64::MIN)..=(table_id, is_index, hist_id, i64::MAX))
            .map(|(_, b)| b.count)
            .collect()
    }

    pub fn meta_version(&self, table_id: i64) -> Option<u64> {
        self.state.lock().meta.get(&table_id).map(|m| m.version)
    }

    /// Make every histogram read of the table fail until cleared.
    pub fn fail_table(&self, table_id: i64) {
        self.fail_tables.lock().insert(table_id);
    }

    pub fn clear_failures(&self) {
        self.fail_tables.lock().clear();
        *self.fail_statements_containing.lock() = None;
    }

    /// Make any session statement containing the fragment fail.
    pub fn fail_statements_containing(&self, fragment: &str) {
        *self.fail_statements_containing.lock() = Some(fragment.to_string());
    }

    /// Start TS handed out by the most recent `begin`.
    pub fn last_txn_ts(&self) -> u64 {
        self.last_ts.load(Ordering::SeqCst)
    }

    pub fn session_vars(&self) -> Option<SessionVars> {
        *self.session_vars.lock()
    }

    fn query(&self, sql: &str) -> Result<(Vec<Row>, Vec<ResultField>)> {
        let state = self.state.lock();
        if sql.starts_with("select version, table_id, modify_count, count from system.stats_meta")
        {
            let since = num_after(sql, "version > ") as u64;
            let mut rows: Vec<(u64, i64, i64, i64)> = state
                .meta
                .iter()
                .filter(|(_, m)| m.version > since)
                .map(|(id, m)| (m.version, *id, m.modify_count, m.count))
                .collect();
            rows.sort();
            let rows = rows
                .into_iter()
                .map(|(v, id, mc, c)| {
                    Row::new(vec![
                        Datum::UInt64(v),
                        Datum::Int64(id),
                        Datum::Int64(mc),
                        Datum::Int64(c),
                    ])
                })
                .collect();
            return Ok((
                rows,
                fields(&[
                    ("version", FieldType::UInt),
                    ("table_id", FieldType::Int),
                    ("modify_count", FieldType::Int),
                    ("count", FieldType::Int),
                ]),
            ));
        }
        if sql.starts_with("select table_id, is_index, hist_id,") {
            let table_id = num_after(sql, "table_id = ");
            if self.fail_tables.lock().contains(&table_id) {
                return Err(ErrorCode::StorageReadError(format!(
                    "injected read failure for table {table_id}"
                )));
            }
            let rows = state
                .histograms
                .range((table_id, i64::MIN, i64::MIN)..=(table_id, i64::MAX, i64::MAX))
                .map(|((_, is_index, hist_id), h)| {
                    Row::new(vec![
                        Datum::Int64(table_id),
                        Datum::Int64(*is_index),
                        Datum::Int64(*hist_id),
                        Datum::Int64(h.distinct),
                        Datum::UInt64(h.version),
                        Datum::Int64(h.null_count),
                        Datum::Int64(h.tot_col_size),
                        Datum::Int64(h.stats_ver),
                        Datum::Int64(h.flag),
                        Datum::Float64(h.correlation),
                        Datum::Bytes(h.last_analyze_pos.clone()),
                    ])
                })
                .collect();
            return Ok((
                rows,
                fields(&[
                    ("table_id", FieldType::Int),
                    ("is_index", FieldType::Int),
                    ("hist_id", FieldType::Int),
                    ("distinct_count", FieldType::Int),
                    ("version", FieldType::UInt),
                    ("null_count", FieldType::Int),
                    ("tot_col_size", FieldType::Int),
                    ("stats_ver", FieldType::Int),
                    ("flag", FieldType::Int),
                    ("correlation", FieldType::Float),
                    ("last_analyze_pos", FieldType::Blob),
                ]),
            ));
        }
        if sql.starts_with("select cm_sketch from system.stats_histograms") {
            let key = (
                num_after(sql, "table_id = "),
                num_after(sql, "is_index = "),
                num_after(sql, "hist_id = "),
            );
            let rows = state
                .histograms
                .get(&key)
                .map(|h| vec![Row::new(vec![Datum::Bytes(h.cm_sketch.clone())])])
                .unwrap_or_default();
            return Ok((rows, fields(&[("cm_sketch", FieldType::Blob)])));
        }
        if sql.starts_with("select count, repeats, lower_bound, upper_bound") {
            let (t, i, h) = (
                num_after(sql, "table_id = "),
                num_after(sql, "is_index = "),
                num_after(sql, "hist_id = "),
            );
            let rows = state
                .buckets
                .range((t, i, h, i64::MIN)..=(t, i, h, i64::MAX))
                .map(|(_, b)| {
                    Row::new(vec![
                        Datum::Int64(b.count),
                        Datum::Int64(b.repeats),
                        Datum::Bytes(b.lower.clone()),
                        Datum::Bytes(b.upper.clone()),
                    ])
                })
                .collect();
            return Ok((
                rows,
                fields(&[
                    ("count", FieldType::Int),
                    ("repeats", FieldType::Int),
                    ("lower_bound", FieldType::Blob),
                    ("upper_bound", FieldType::Blob),
                ]),
            ));
        }
        if sql.starts_with("select sum(count) from system.stats_buckets") {
            let (t, i, h) = (
                num_after(sql, "table_id = "),
                num_after(sql, "is_index = "),
                num_after(sql, "hist_id = "),
            );
            let mut sum = 0i64;
            let mut any = false;
            for (_, b) in state
                .buckets
                .range((t, i, h, i64::MIN)..=(t, i, h, i64::MAX))
            {
                sum += b.count;
                any = true;
            }
            let datum = if any { Datum::Int64(sum) } else { Datum::Null };
            return Ok((
                vec![Row::new(vec![datum])],
                fields(&[("sum(count)", FieldType::Int)]),
            ));
        }
        Err(ErrorCode::BadArguments(format!("unrecognized query: {sql}")))
    }

    fn apply(&self, sql: &str) -> Result<()> {
        if let Some(fragment) = self.fail_statements_containing.lock().as_deref() {
            if sql.contains(fragment) {
                return Err(ErrorCode::TransactionError(format!(
                    "injected write failure on: {sql}"
                )));
            }
        }
        if sql == "begin" {
            let start_ts = self.next_ts.fetch_add(1, Ordering::SeqCst);
            self.last_ts.store(start_ts, Ordering::SeqCst);
            let saved = self.state.lock().clone();
            *self.txn.lock() = Some(Txn { start_ts, saved });
            return Ok(());
        }
        if sql == "commit" {
            *self.txn.lock() = None;
            return Ok(());
        }
        if sql == "rollback" {
            if let Some(txn) = self.txn.lock().take() {
                *self.state.lock() = txn.saved;
            }
            return Ok(());
        }
        if sql.starts_with("replace into system.stats_meta (version, table_id, count)")
            && !sql.contains("modify_count")
        {
            let vals = values_of(sql);
            self.state.lock().meta.insert(
                vals[1].as_i64(),
                MetaRow {
                    version: vals[0].as_i64() as u64,
                    modify_count: 0,
                    count: vals[2].as_i64(),
                },
            );
            return Ok(());
        }
        if sql.starts_with("replace into system.stats_meta (version, table_id, count, modify_count)")
        {
            let vals = values_of(sql);
            self.state.lock().meta.insert(
                vals[1].as_i64(),
                MetaRow {
                    version: vals[0].as_i64() as u64,
                    modify_count: vals[3].as_i64(),
                    count: vals[2].as_i64(),
                },
            );
            return Ok(());
        }
        if sql.starts_with("update system.stats_meta set version = ") {
            let version = num_after(sql, "version = ") as u64;
            let table_id = num_after(sql, "table_id = ");
            if let Some(meta) = self.state.lock().meta.get_mut(&table_id) {
                meta.version = version;
            }
            return Ok(());
        }
        if sql.starts_with("replace into system.stats_histograms") {
            let vals = values_of(sql);
            self.state.lock().histograms.insert(
                (vals[0].as_i64(), vals[1].as_i64(), vals[2].as_i64()),
                HistRow {
                    distinct: vals[3].as_i64(),
                    version: vals[4].as_i64() as u64,
                    null_count: vals[5].as_i64(),
                    cm_sketch: vals[6].as_bytes(),
                    tot_col_size: vals[7].as_i64(),
                    stats_ver: vals[8].as_i64(),
                    flag: vals[9].as_i64(),
                    correlation: vals[10].as_f64(),
                    last_analyze_pos: Vec::new(),
                },
            );
            return Ok(());
        }
        if sql.starts_with("delete from system.stats_buckets") {
            let (t, i, h) = (
                num_after(sql, "table_id = "),
                num_after(sql, "is_index = "),
                num_after(sql, "hist_id = "),
            );
            self.state
                .lock()
                .buckets
                .retain(|(bt, bi, bh, _), _| !(*bt == t && *bi == i && *bh == h));
            return Ok(());
        }
        if sql.starts_with("insert into system.stats_buckets") {
            let vals = values_of(sql);
            self.state.lock().buckets.insert(
                (
                    vals[0].as_i64(),
                    vals[1].as_i64(),
                    vals[2].as_i64(),
                    vals[3].as_i64(),
                ),
                BucketRow {
                    count: vals[4].as_i64(),
                    repeats: vals[5].as_i64(),
                    lower: vals[6].as_bytes(),
                    upper: vals[7].as_bytes(),
                },
            );
            return Ok(());
        }
        Err(ErrorCode::BadArguments(format!(
            "unrecognized statement: {sql}"
        )))
    }
}

impl RestrictedSqlExecutor for MockStore {
    fn execute_restricted_sql(&self, sql: &str) -> Result<(Vec<Row>, Vec<ResultField>)> {
        self.query(sql)
    }

    fn execute_restricted_sql_with_snapshot(
        &self,
        sql: &str,
    ) -> Result<(Vec<Row>, Vec<ResultField>)> {
        self.query(sql)
    }
}

impl SessionContext for MockStore {
    fn execute(&self, sql: &str) -> Result<()> {
        self.apply(sql)
    }

    fn txn_start_ts(&self) -> Result<u64> {
        self.txn
            .lock()
            .as_ref()
            .map(|t| t.start_ts)
            .ok_or_else(|| ErrorCode::LogicalError("no transaction open in session"))
    }

    fn set_session_vars(&self, vars: SessionVars) {
        *self.session_vars.lock() = Some(vars);
    }
}

enum Val {
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Val {
    fn as_i64(&self) -> i64 {
        match self {
            Val::Int(v) => *v,
            Val::Float(v) => *v as i64,
            Val::Bytes(_) => panic!("bytes value where number expected"),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Val::Int(v) => *v as f64,
            Val::Float(v) => *v,
            Val::Bytes(_) => panic!("bytes value where number expected"),
        }
    }

    fn as_bytes(&self) -> Vec<u8> {
        match self {
            Val::Bytes(b) => b.clone(),
            _ => panic!("number value where bytes expected"),
        }
    }
}

fn num_after(sql: &str, key: &str) -> i64 {
    let pos = sql
        .find(key)
        .unwrap_or_else(|| panic!("`{key}` not found in `{sql}`"));
    let rest = sql[pos + key.len()..].trim_start();
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().unwrap()
}

fn values_of(sql: &str) -> Vec<Val> {
    let pos = sql.find("values").expect("statement has no values clause");
    let rest = sql[pos + "values".len()..].trim();
    let inner = rest
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .expect("malformed values clause");
    inner
        .split(',')
        .map(|tok| {
            let tok = tok.trim();
            if let Some(h) = tok.strip_prefix("X'").and_then(|s| s.strip_suffix('\'')) {
                Val::Bytes(hex::decode(h).unwrap())
            } else if tok.contains('.') {
                Val::Float(tok.parse().unwrap())
            } else {
                Val::Int(tok.parse().unwrap())
            }
        })
        .collect()
}

fn fields(descriptors: &[(&str, FieldType)]) -> Vec<ResultField> {
    descriptors
        .iter()
        .map(|(name, tp)| ResultField {
            name: name.to_string(),
            field_type: tp.clone(),
        })
        .collect()
}

/// Schema catalog over a settable list of schemas.
pub struct MockCatalog {
    schemas: Mutex<Vec<Arc<SchemaInfo>>>,
    meta_version: AtomicI64,
}

impl MockCatalog {
    pub fn new() -> MockCatalog {
        MockCatalog {
            schemas: Mutex::new(Vec::new()),
            meta_version: AtomicI64::new(1),
        }
    }

    pub fn set(&self, schemas: Vec<SchemaInfo>, meta_version: i64) {
        *self.schemas.lock() = schemas.into_iter().map(Arc::new).collect();
        self.meta_version.store(meta_version, Ordering::SeqCst);
    }
}

impl Catalog for MockCatalog {
    fn all_schemas(&self) -> Vec<Arc<SchemaInfo>> {
        self.schemas.lock().clone()
    }

    fn table_by_name(&self, schema: &str, table: &str) -> Option<Arc<TableInfo>> {
        self.schemas
            .lock()
            .iter()
            .find(|s| s.name == schema)?
            .tables
            .iter()
            .find(|t| t.name == table)
            .cloned()
    }

    fn table_by_id(&self, table_id: i64) -> Option<Arc<TableInfo>> {
        self.schemas
            .lock()
            .iter()
            .flat_map(|s| s.tables.iter())
            .find(|t| t.id == table_id)
            .cloned()
    }

    fn schema_meta_version(&self) -> i64 {
        self.meta_version.load(Ordering::SeqCst)
    }
}

pub fn int_column(id: i64, name: &str, in_primary_key: bool) -> Arc<ColumnInfo> {
    Arc::new(ColumnInfo {
        id,
        name: name.to_string(),
        field_type: FieldType::Int,
        in_primary_key,
    })
}

pub fn index(id: i64, name: &str) -> Arc<IndexInfo> {
    Arc::new(IndexInfo {
        id,
        name: name.to_string(),
    })
}

#[allow(clippy::too_many_arguments)]
pub fn table(
    id: i64,
    name: &str,
    columns: Vec<Arc<ColumnInfo>>,
    indices: Vec<Arc<IndexInfo>>,
    pk_is_handle: bool,
    partition_ids: &[i64],
) -> Arc<TableInfo> {
    let partition = if partition_ids.is_empty() {
        None
    } else {
        Some(PartitionInfo {
            definitions: partition_ids
                .iter()
                .map(|id| PartitionDefinition {
                    id: *id,
                    name: format!("p{id}"),
                })
                .collect(),
        })
    };
    Arc::new(TableInfo {
        id,
        name: name.to_string(),
        columns,
        indices,
        pk_is_handle,
        partition,
    })
}

pub fn schema(name: &str, tables: Vec<Arc<TableInfo>>) -> SchemaInfo {
    SchemaInfo {
        name: name.to_string(),
        tables,
    }
}

/// A handle wired to fresh mocks.
pub struct Fixture {
    pub store: Arc<MockStore>,
    pub catalog: MockCatalog,
    pub needed: Arc<NeededColumnSet>,
    pub handle: Handle,
}

impl Fixture {
    pub fn with_lease(lease: Duration) -> Fixture {
        let store = MockStore::new();
        let needed = Arc::new(NeededColumnSet::new());
        let session: Arc<dyn SessionContext> = store.clone();
        let restricted: Arc<dyn RestrictedSqlExecutor> = store.clone();
        let handle = Handle::new(session, restricted, needed.clone(), lease);
        Fixture {
            store,
            catalog: MockCatalog::new(),
            needed,
            handle,
        }
    }

    pub fn new() -> Fixture {
        Fixture::with_lease(Duration::ZERO)
    }
}
