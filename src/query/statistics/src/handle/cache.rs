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

use crate::table::Table;

/// One published snapshot of the statistics map.
///
/// Immutable after publication: updates clone the map, apply writes and
/// deletions, and publish the result as a new snapshot.
#[derive(Debug, Default)]
pub(crate) struct StatsCache {
    pub tables: HashMap<i64, Arc<Table>>,
    /// High-water mark: the largest stats_meta version already absorbed.
    pub version: u64,
}

impl StatsCache {
    pub fn new() -> StatsCache {
        StatsCache::default()
    }

    fn copy(&self) -> StatsCache {
        StatsCache {
            tables: self.tables.clone(),
            version: self.version,
        }
    }

    /// Copy-on-write update producing the candidate snapshot.
    pub fn update(
        &self,
        tables: Vec<Arc<Table>>,
        deleted_ids: &[i64],
        new_version: u64,
    ) -> StatsCache {
        let mut new_cache = self.copy();
        new_cache.version = new_version;
        for table in tables {
            new_cache.tables.insert(table.physical_id, table);
        }
        for id in deleted_ids {
            new_cache.tables.remove(id);
        }
        new_cache
    }
}
