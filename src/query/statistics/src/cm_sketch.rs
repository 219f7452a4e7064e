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

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use crestdb_common_exception::Result;
use serde::Deserialize;
use serde::Serialize;

/// Count-min sketch: a depth x width grid of counters addressed by a pair of
/// hashes, answering point-frequency queries with one-sided error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CMSketch {
    depth: usize,
    width: usize,
    count: u64,
    table: Vec<Vec<u32>>,
}

impl CMSketch {
    pub fn new(depth: usize, width: usize) -> CMSketch {
        CMSketch {
            depth,
            width,
            count: 0,
            table: vec![vec![0; width]; depth],
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn insert(&mut self, bytes: &[u8]) {
        self.insert_n(bytes, 1);
    }

    pub fn insert_n(&mut self, bytes: &[u8], n: u32) {
        self.count += n as u64;
        let (h1, h2) = hash_pair(bytes);
        for i in 0..self.depth {
            let j = position(h1, h2, i, self.width);
            self.table[i][j] = self.table[i][j].saturating_add(n);
        }
    }

    /// Estimated frequency of the value; never underestimates.
    pub fn query(&self, bytes: &[u8]) -> u64 {
        let (h1, h2) = hash_pair(bytes);
        let mut min = u32::MAX;
        for i in 0..self.depth {
            let j = position(h1, h2, i, self.width);
            min = min.min(self.table[i][j]);
        }
        min as u64
    }
}

// Two independent hashes derived from one pass; row i uses h1 + i * h2.
fn hash_pair(bytes: &[u8]) -> (u64, u64) {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    let h1 = hasher.finish();
    1u8.hash(&mut hasher);
    (h1, hasher.finish() | 1)
}

fn position(h1: u64, h2: u64, row: usize, width: usize) -> usize {
    (h1.wrapping_add((row as u64).wrapping_mul(h2)) % width as u64) as usize
}

/// Encode the sketch to its storage blob. Absence encodes as an empty blob.
pub fn encode_cm_sketch(cms: Option<&CMSketch>) -> Result<Vec<u8>> {
    match cms {
        None => Ok(Vec::new()),
        Some(cms) => Ok(bincode::serialize(cms)?),
    }
}

/// Decode a storage blob. An empty blob is a valid absence, not an error.
pub fn decode_cm_sketch(data: &[u8]) -> Result<Option<CMSketch>> {
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(bincode::deserialize(data)?))
}
