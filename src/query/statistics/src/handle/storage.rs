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
use std::time::Duration;

use crestdb_common_exception::Result;
use log::debug;
use log::warn;

use crate::catalog::TableInfo;
use crate::cm_sketch::CMSketch;
use crate::cm_sketch::decode_cm_sketch;
use crate::cm_sketch::encode_cm_sketch;
use crate::datum::FieldType;
use crate::handle::Handle;
use crate::histogram::Histogram;
use crate::sqlexec::RestrictedSqlExecutor;
use crate::sqlexec::ResultField;
use crate::sqlexec::Row;
use crate::sqlexec::SessionContext;
use crate::table::Column;
use crate::table::Index;
use crate::table::Table;

impl Handle {
    /// Load the full statistics of one physical table from the stats
    /// catalog.
    ///
    /// Returns `None` when the histogram catalog has no rows for the table,
    /// which means the table (or its stats) has been dropped. When no
    /// snapshot executor is given and a cached entry exists, the entry is
    /// cloned first so the published snapshot is never mutated.
    pub(crate) fn table_stats_from_storage(
        &self,
        table_info: &TableInfo,
        physical_id: i64,
        load_all: bool,
        history: Option<&dyn RestrictedSqlExecutor>,
    ) -> Result<Option<Table>> {
        let cached = self.stats_cache().tables.get(&physical_id).cloned();
        let mut table = match cached {
            Some(cached) if history.is_none() => cached.copy(),
            _ => Table::new(
                physical_id,
                table_info.columns.len(),
                table_info.indices.len(),
            ),
        };
        table.pseudo = false;
        let sql = format!(
            "select table_id, is_index, hist_id, distinct_count, version, null_count, \
             tot_col_size, stats_ver, flag, correlation, last_analyze_pos \
             from system.stats_histograms where table_id = {physical_id}"
        );
        let (rows, _) = self.exec_rows(&sql, history)?;
        // Check deleted table.
        if rows.is_empty() {
            return Ok(None);
        }
        for row in &rows {
            if row.get_i64(1)? > 0 {
                self.index_stats_from_storage(row, &mut table, table_info, history)?;
            } else {
                self.column_stats_from_storage(row, &mut table, table_info, load_all, history)?;
            }
        }
        Ok(Some(table))
    }

    fn column_stats_from_storage(
        &self,
        row: &Row,
        table: &mut Table,
        table_info: &TableInfo,
        load_all: bool,
        history: Option<&dyn RestrictedSqlExecutor>,
    ) -> Result<()> {
        let hist_id = row.get_i64(2)?;
        let distinct = row.get_i64(3)?;
        let hist_ver = row.get_u64(4)?;
        let null_count = row.get_i64(5)?;
        let tot_col_size = row.get_i64(6)?;
        let correlation = row.get_f64(9)?;
        let existing = table.columns.get(&hist_id).cloned();
        let mut column = existing.clone();
        for col_info in &table_info.columns {
            if hist_id != col_info.id {
                continue;
            }
            let is_handle = table_info.pk_is_handle && col_info.in_primary_key;
            // Buckets stay unloaded while all of these hold:
            // 1. the lease is on, and
            // 2. the column is not the handle, and
            // 3. no buckets are materialized yet, and
            // 4. the caller did not force a full load.
            let not_need_load = self.lease() > Duration::ZERO
                && !is_handle
                && existing
                    .as_ref()
                    .map_or(true, |c| c.len() == 0 && c.last_update_version() < hist_ver)
                && !load_all;
            if not_need_load {
                let count = self.column_count_from_storage(table.physical_id, hist_id)?;
                let mut histogram = Histogram::new(
                    hist_id,
                    distinct,
                    null_count,
                    hist_ver,
                    col_info.field_type.clone(),
                    0,
                    tot_col_size,
                );
                histogram.correlation = correlation;
                column = Some(Arc::new(Column {
                    physical_id: table.physical_id,
                    histogram,
                    cm_sketch: None,
                    info: col_info.clone(),
                    count: count + null_count,
                    is_handle,
                }));
                break;
            }
            if existing
                .as_ref()
                .map_or(true, |c| c.last_update_version() < hist_ver)
                || load_all
            {
                let hg = self.histogram_from_storage(
                    table.physical_id,
                    hist_id,
                    col_info.field_type.clone(),
                    distinct,
                    0,
                    hist_ver,
                    null_count,
                    tot_col_size,
                    correlation,
                    history,
                )?;
                let cms = self.cm_sketch_from_storage(table.physical_id, 0, col_info.id, history)?;
                let count = hg.total_row_count() as i64;
                column = Some(Arc::new(Column {
                    physical_id: table.physical_id,
                    histogram: hg,
                    cm_sketch: cms.map(Arc::new),
                    info: col_info.clone(),
                    count,
                    is_handle,
                }));
                break;
            }
            // Only the size meta moved; refresh it on a clone of the entry.
            if let Some(existing) = &existing {
                if existing.histogram.tot_col_size != tot_col_size {
                    let mut new_col = (**existing).clone();
                    new_col.histogram.tot_col_size = tot_col_size;
                    column = Some(Arc::new(new_col));
                }
            }
            break;
        }
        match column {
            Some(column) => {
                table.columns.insert(column.histogram.id, column);
            }
            // The column is gone from the table metadata, likely a DDL
            // mid-flight; the next refresh cycle re-reads this row.
            None => debug!(
                "cannot find column {hist_id} of table {} in table info, maybe it has been deleted",
                table_info.name
            ),
        }
        Ok(())
    }

    fn index_stats_from_storage(
        &self,
        row: &Row,
        table: &mut Table,
        table_info: &TableInfo,
        history: Option<&dyn RestrictedSqlExecutor>,
    ) -> Result<()> {
        let hist_id = row.get_i64(2)?;
        let distinct = row.get_i64(3)?;
        let hist_ver = row.get_u64(4)?;
        let null_count = row.get_i64(5)?;
        let existing = table.indices.get(&hist_id).cloned();
        let mut index = existing.clone();
        for idx_info in &table_info.indices {
            if hist_id != idx_info.id {
                continue;
            }
            if existing
                .as_ref()
                .map_or(true, |i| i.last_update_version() < hist_ver)
            {
                let hg = self.histogram_from_storage(
                    table.physical_id,
                    hist_id,
                    FieldType::Blob,
                    distinct,
                    1,
                    hist_ver,
                    null_count,
                    0,
                    0.0,
                    history,
                )?;
                let cms = self.cm_sketch_from_storage(table.physical_id, 1, idx_info.id, history)?;
                index = Some(Arc::new(Index {
                    histogram: hg,
                    cm_sketch: cms.map(Arc::new),
                    info: idx_info.clone(),
                }));
            }
            break;
        }
        match index {
            Some(index) => {
                table.indices.insert(hist_id, index);
            }
            None => debug!(
                "cannot find index {hist_id} of table {} in table info, maybe it has been deleted",
                table_info.name
            ),
        }
        Ok(())
    }

    /// Load the bucket sequence of one histogram.
    ///
    /// Stored bucket counts are per-bucket deltas; they are re-accumulated
    /// into cumulative counts here, in `bucket_id` order.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn histogram_from_storage(
        &self,
        table_id: i64,
        col_id: i64,
        tp: FieldType,
        distinct: i64,
        is_index: i64,
        ver: u64,
        null_count: i64,
        tot_col_size: i64,
        corr: f64,
        history: Option<&dyn RestrictedSqlExecutor>,
    ) -> Result<Histogram> {
        let sql = format!(
            "select count, repeats, lower_bound, upper_bound from system.stats_buckets \
             where table_id = {table_id} and is_index = {is_index} and hist_id = {col_id} \
             order by bucket_id"
        );
        let (rows, _fields) = self.exec_rows(&sql, history)?;
        let mut hg = Histogram::new(col_id, distinct, null_count, ver, tp.clone(), rows.len(), tot_col_size);
        hg.correlation = corr;
        let mut total_count = 0i64;
        for row in &rows {
            let count = row.get_i64(0)?;
            let repeats = row.get_i64(1)?;
            let (lower, upper) = if is_index == 1 {
                (row.get_datum(2)?, row.get_datum(3)?)
            } else {
                // Column bounds persist as blobs; convert back through UTC
                // to the column's field type.
                let lower = row.get_datum(2)?.convert_to(&tp)?;
                let upper = row.get_datum(3)?.convert_to(&tp)?;
                (lower, upper)
            };
            total_count += count;
            hg.append_bucket(lower, upper, total_count, repeats);
        }
        hg.pre_calculate_scalar();
        Ok(hg)
    }

    pub(crate) fn cm_sketch_from_storage(
        &self,
        table_id: i64,
        is_index: i64,
        hist_id: i64,
        history: Option<&dyn RestrictedSqlExecutor>,
    ) -> Result<Option<CMSketch>> {
        let sql = format!(
            "select cm_sketch from system.stats_histograms \
             where table_id = {table_id} and is_index = {is_index} and hist_id = {hist_id}"
        );
        let (rows, _) = self.exec_rows(&sql, history)?;
        if rows.is_empty() || rows[0].is_null(0) {
            return Ok(None);
        }
        decode_cm_sketch(rows[0].get_bytes(0)?)
    }

    // Summary row count of an unloaded column: the stored bucket counts
    // summed on the storage side. SQL NULL (no buckets) sums to zero.
    fn column_count_from_storage(&self, table_id: i64, col_id: i64) -> Result<i64> {
        let sql = format!(
            "select sum(count) from system.stats_buckets \
             where table_id = {table_id} and is_index = 0 and hist_id = {col_id}"
        );
        let (rows, _) = self.restricted.execute_restricted_sql(&sql)?;
        if rows.is_empty() || rows[0].is_null(0) {
            return Ok(0);
        }
        rows[0].get_i64(0)
    }

    /// Persist one histogram, its buckets and the owning meta row in a
    /// single transaction.
    ///
    /// A negative `count` preserves the stored count and modify_count and
    /// only bumps the meta version.
    pub fn save_stats_to_storage(
        &self,
        table_id: i64,
        count: i64,
        is_index: i64,
        hg: &Histogram,
        cms: Option<&CMSketch>,
    ) -> Result<()> {
        let inner = self.mu.lock();
        let session = inner.session.clone();
        session.execute("begin")?;
        let result = write_stats_sqls(session.as_ref(), table_id, count, is_index, hg, cms);
        finish_transaction(session.as_ref(), result)
    }

    /// Persist one stats_meta row in its own transaction.
    pub fn save_meta_to_storage(&self, table_id: i64, count: i64, modify_count: i64) -> Result<()> {
        let inner = self.mu.lock();
        let session = inner.session.clone();
        session.execute("begin")?;
        let result = session.txn_start_ts().and_then(|version| {
            session.execute(&format!(
                "replace into system.stats_meta (version, table_id, count, modify_count) \
                 values ({version}, {table_id}, {count}, {modify_count})"
            ))
        });
        finish_transaction(session.as_ref(), result)
    }

    fn exec_rows(
        &self,
        sql: &str,
        history: Option<&dyn RestrictedSqlExecutor>,
    ) -> Result<(Vec<Row>, Vec<ResultField>)> {
        match history {
            Some(history) => history.execute_restricted_sql_with_snapshot(sql),
            None => self.restricted.execute_restricted_sql(sql),
        }
    }
}

fn write_stats_sqls(
    session: &dyn SessionContext,
    table_id: i64,
    count: i64,
    is_index: i64,
    hg: &Histogram,
    cms: Option<&CMSketch>,
) -> Result<()> {
    let version = session.txn_start_ts()?;
    let mut sqls = Vec::with_capacity(4 + hg.len());
    if count >= 0 {
        sqls.push(format!(
            "replace into system.stats_meta (version, table_id, count) \
             values ({version}, {table_id}, {count})"
        ));
    } else {
        sqls.push(format!(
            "update system.stats_meta set version = {version} where table_id = {table_id}"
        ));
    }
    let data = encode_cm_sketch(cms)?;
    sqls.push(format!(
        "replace into system.stats_histograms (table_id, is_index, hist_id, distinct_count, \
         version, null_count, cm_sketch, tot_col_size, stats_ver, flag, correlation) \
         values ({table_id}, {is_index}, {}, {}, {version}, {}, X'{}', {}, 0, 0, {})",
        hg.id,
        hg.ndv,
        hg.null_count,
        hex::encode_upper(&data),
        hg.tot_col_size,
        hg.correlation
    ));
    sqls.push(format!(
        "delete from system.stats_buckets \
         where table_id = {table_id} and is_index = {is_index} and hist_id = {}",
        hg.id
    ));
    for i in 0..hg.len() {
        // The catalog stores per-bucket deltas, not the cumulative counts.
        let mut bucket_count = hg.buckets[i].count;
        if i > 0 {
            bucket_count -= hg.buckets[i - 1].count;
        }
        let lower = hg.get_lower(i).convert_to(&FieldType::Blob)?;
        let upper = hg.get_upper(i).convert_to(&FieldType::Blob)?;
        sqls.push(format!(
            "insert into system.stats_buckets (table_id, is_index, hist_id, bucket_id, count, \
             repeats, lower_bound, upper_bound) \
             values ({table_id}, {is_index}, {}, {i}, {bucket_count}, {}, X'{}', X'{}')",
            hg.id,
            hg.buckets[i].repeat,
            hex::encode_upper(lower.as_bytes()?),
            hex::encode_upper(upper.as_bytes()?)
        ));
    }
    exec_sqls(session, &sqls)
}

// Commit on success, roll back on any error; the original error wins over a
// rollback failure.
fn finish_transaction(session: &dyn SessionContext, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => session.execute("commit"),
        Err(e) => {
            if let Err(rollback_err) = session.execute("rollback") {
                warn!("rollback after failed stats write also failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

fn exec_sqls(session: &dyn SessionContext, sqls: &[String]) -> Result<()> {
    for sql in sqls {
        session.execute(sql)?;
    }
    Ok(())
}
