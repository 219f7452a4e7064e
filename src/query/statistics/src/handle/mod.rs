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

mod cache;
mod storage;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crestdb_common_exception::Result;
use log::debug;
use parking_lot::Mutex;
use parking_lot::RwLock;

use crate::catalog::Catalog;
use crate::catalog::TableInfo;
use crate::handle::cache::StatsCache;
use crate::histogram::NeededColumnSet;
use crate::sqlexec::RestrictedSqlExecutor;
use crate::sqlexec::SessionContext;
use crate::sqlexec::SessionVars;
use crate::table::Column;
use crate::table::Table;

/// Compose a storage version from a physical millisecond clock and a logical
/// counter.
pub fn compose_ts(physical_ms: i64, logical: i64) -> u64 {
    ((physical_ms as u64) << 18) | logical as u64
}

/// Map a lease duration to a version offset.
pub fn duration_to_ts(d: Duration) -> u64 {
    compose_ts((d.as_nanos() / 1_000_000) as i64, 0)
}

// Session state and the partition resolver cache, guarded together: both are
// only touched with the session mutex held.
struct HandleInner {
    session: Arc<dyn SessionContext>,
    // partition ID -> owning table ID
    pid2tid: HashMap<i64, i64>,
    // schema-meta version pid2tid was built at
    schema_version: i64,
}

/// The statistics cache handle.
///
/// Readers load the current snapshot without locking; the refresher, the
/// on-demand loader and the pseudo-promotion path publish new snapshots via
/// copy-on-write behind the publish mutex.
pub struct Handle {
    mu: Mutex<HandleInner>,

    // Snapshot pointer slot. Reads clone the Arc under a momentary read
    // guard; replacement happens only under `publish_lock`.
    cache: RwLock<Arc<StatsCache>>,
    publish_lock: Mutex<()>,

    restricted: Arc<dyn RestrictedSqlExecutor>,

    // Stats lease in nanoseconds.
    lease: AtomicU64,

    needed_columns: Arc<NeededColumnSet>,
}

impl Handle {
    pub fn new(
        session: Arc<dyn SessionContext>,
        restricted: Arc<dyn RestrictedSqlExecutor>,
        needed_columns: Arc<NeededColumnSet>,
        lease: Duration,
    ) -> Handle {
        Handle {
            mu: Mutex::new(HandleInner {
                session,
                pid2tid: HashMap::new(),
                schema_version: -1,
            }),
            cache: RwLock::new(Arc::new(StatsCache::new())),
            publish_lock: Mutex::new(()),
            restricted,
            lease: AtomicU64::new(lease.as_nanos() as u64),
            needed_columns,
        }
    }

    pub fn lease(&self) -> Duration {
        Duration::from_nanos(self.lease.load(Ordering::Relaxed))
    }

    pub fn set_lease(&self, lease: Duration) {
        self.lease.store(lease.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn needed_columns(&self) -> &NeededColumnSet {
        &self.needed_columns
    }

    /// Reset the cache to an empty snapshot and shrink the session. Test
    /// hook only.
    pub fn clear(&self) {
        let inner = self.mu.lock();
        *self.cache.write() = Arc::new(StatsCache::new());
        inner.session.set_session_vars(SessionVars {
            init_chunk_size: 1,
            max_chunk_size: 1,
            enable_chunk_rpc: false,
            projection_concurrency: 0,
        });
    }

    /// Delta-scan stats_meta and fold every newer row into a fresh snapshot.
    ///
    /// Not safe against concurrent invocations of itself; the refresh loop
    /// owning the handle must serialize calls.
    pub fn update(&self, catalog: &dyn Catalog) -> Result<()> {
        let old_cache = self.stats_cache();
        let mut last_version = old_cache.version;
        // Commit time and version are assigned independently, so a row with
        // a smaller version can commit after one with a larger version has
        // been read. Re-scan a window of three leases below the high-water
        // mark so no such row is missed.
        let offset = duration_to_ts(3 * self.lease());
        let since = if old_cache.version >= offset {
            last_version - offset
        } else {
            0
        };
        let sql = format!(
            "select version, table_id, modify_count, count from system.stats_meta \
             where version > {since} order by version"
        );
        let (rows, _) = self.restricted.execute_restricted_sql(&sql)?;

        let mut tables = Vec::with_capacity(rows.len());
        let mut deleted_table_ids = Vec::new();
        for row in rows {
            let version = row.get_u64(0)?;
            let physical_id = row.get_i64(1)?;
            let modify_count = row.get_i64(2)?;
            let count = row.get_i64(3)?;
            last_version = version;
            let table_info = match self.get_table_by_physical_id(catalog, physical_id) {
                Some(info) => info,
                None => {
                    debug!("unknown physical ID {physical_id} in stats meta table, maybe it has been dropped");
                    deleted_table_ids.push(physical_id);
                    continue;
                }
            };
            let table = match self.table_stats_from_storage(&table_info, physical_id, false, None)
            {
                Ok(table) => table,
                // A concurrent DDL may be mid-flight on this table; skip the
                // row, the next cycle re-reads it.
                Err(e) => {
                    debug!(
                        "error occurred when read table stats, table: {}, err: {}",
                        table_info.name, e
                    );
                    continue;
                }
            };
            // A table with a meta row but no histogram rows yet (created but
            // never analyzed, or stats dropped) keeps a meta-only entry so
            // the optimizer sees its row counts.
            let mut table = match table {
                Some(table) => table,
                None => Table::new(
                    physical_id,
                    table_info.columns.len(),
                    table_info.indices.len(),
                ),
            };
            table.version = version;
            table.count = count;
            table.modify_count = modify_count;
            table.name = get_full_table_name(catalog, &table_info);
            tables.push(Arc::new(table));
        }
        self.update_stats_cache(old_cache.update(tables, &deleted_table_ids, last_version));
        Ok(())
    }

    /// Retrieve the statistics of a base table from the cache.
    pub fn get_table_stats(&self, table_info: &TableInfo) -> Arc<Table> {
        self.get_partition_stats(table_info, table_info.id)
    }

    /// Retrieve the statistics of one physical table from the cache.
    ///
    /// On a miss, pseudo stats are synthesized, published into the snapshot
    /// at the current version so later callers see the same entry, and
    /// returned. Returned tables must be treated as immutable.
    pub fn get_partition_stats(&self, table_info: &TableInfo, physical_id: i64) -> Arc<Table> {
        let cache = self.stats_cache();
        match cache.tables.get(&physical_id) {
            Some(table) => table.clone(),
            None => {
                let mut table = Table::pseudo_table(table_info);
                table.physical_id = physical_id;
                let table = Arc::new(table);
                self.update_stats_cache(cache.update(
                    vec![table.clone()],
                    &[],
                    cache.version,
                ));
                table
            }
        }
    }

    /// Materialize full histograms for every column the optimizer requested.
    pub fn load_needed_histograms(&self) -> Result<()> {
        let cols = self.needed_columns.all_cols();
        for col in cols {
            let cache = self.stats_cache();
            let mut table = match cache.tables.get(&col.table_id) {
                Some(table) => table.copy(),
                None => {
                    self.needed_columns.delete(col);
                    continue;
                }
            };
            let old_col = match table.columns.get(&col.column_id) {
                Some(c) if c.len() == 0 => c.clone(),
                // Already loaded (or gone): the request is stale.
                _ => {
                    self.needed_columns.delete(col);
                    continue;
                }
            };
            let hg = self.histogram_from_storage(
                col.table_id,
                old_col.histogram.id,
                old_col.info.field_type.clone(),
                old_col.histogram.ndv,
                0,
                old_col.last_update_version(),
                old_col.histogram.null_count,
                old_col.histogram.tot_col_size,
                old_col.histogram.correlation,
                None,
            )?;
            let cms = self.cm_sketch_from_storage(col.table_id, 0, col.column_id, None)?;
            let count = hg.total_row_count() as i64;
            table.columns.insert(
                old_col.histogram.id,
                Arc::new(Column {
                    physical_id: col.table_id,
                    histogram: hg,
                    cm_sketch: cms.map(Arc::new),
                    info: old_col.info.clone(),
                    count,
                    is_handle: old_col.is_handle,
                }),
            );
            self.update_stats_cache(cache.update(vec![Arc::new(table)], &[], cache.version));
            self.needed_columns.delete(col);
        }
        Ok(())
    }

    /// The snapshot's high-water mark.
    pub fn last_update_version(&self) -> u64 {
        self.stats_cache().version
    }

    pub fn set_last_update_version(&self, version: u64) {
        let cache = self.stats_cache();
        self.update_stats_cache(cache.update(Vec::new(), &[], version));
    }

    // Resolve a physical ID to table metadata, rebuilding the partition
    // index when the schema-meta version has advanced.
    fn get_table_by_physical_id(
        &self,
        catalog: &dyn Catalog,
        physical_id: i64,
    ) -> Option<Arc<TableInfo>> {
        let mut inner = self.mu.lock();
        if catalog.schema_meta_version() != inner.schema_version {
            inner.schema_version = catalog.schema_meta_version();
            inner.pid2tid = build_partition_id_to_table_id(catalog);
        }
        match inner.pid2tid.get(&physical_id) {
            Some(table_id) => catalog.table_by_id(*table_id),
            None => catalog.table_by_id(physical_id),
        }
    }

    pub(crate) fn stats_cache(&self) -> Arc<StatsCache> {
        self.cache.read().clone()
    }

    // Publish discipline: under the publish lock, reload the current
    // snapshot and replace it only when version monotonicity holds. Racing
    // writers collapse to a monotone sequence; readers never block.
    pub(crate) fn update_stats_cache(&self, new_cache: StatsCache) {
        let _guard = self.publish_lock.lock();
        let old_version = self.cache.read().version;
        if old_version <= new_cache.version {
            *self.cache.write() = Arc::new(new_cache);
        }
    }
}

fn build_partition_id_to_table_id(catalog: &dyn Catalog) -> HashMap<i64, i64> {
    let mut mapper = HashMap::new();
    for schema in catalog.all_schemas() {
        for table in &schema.tables {
            let Some(partition) = &table.partition else {
                continue;
            };
            for def in &partition.definitions {
                mapper.insert(def.id, table.id);
            }
        }
    }
    mapper
}

fn get_full_table_name(catalog: &dyn Catalog, table_info: &TableInfo) -> String {
    for schema in catalog.all_schemas() {
        if let Some(table) = catalog.table_by_name(&schema.name, &table_info.name) {
            if table.id == table_info.id {
                return format!("{}.{}", schema.name, table_info.name);
            }
        }
    }
    table_info.id.to_string()
}
