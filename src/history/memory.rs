// Copyright 2025 coScene
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

// In-process history store

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::store::HistoryStore;
use crate::config::MemoryConfig;
use crate::error::StoreError;
use crate::protocol::Sample;

/// Keeps the newest `max_samples_per_id` samples of every id
pub struct MemoryStore {
    max_samples_per_id: usize,
    series: RwLock<HashMap<String, BTreeMap<i64, Sample>>>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            max_samples_per_id: config.max_samples_per_id.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of stored samples
    pub async fn len(&self) -> usize {
        self.series.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, sample: &Sample) -> Result<(), StoreError> {
        let mut series = self.series.write().await;
        let samples = series.entry(sample.id.clone()).or_default();
        samples.insert(sample.timestamp, sample.clone());

        while samples.len() > self.max_samples_per_id {
            if let Some((evicted, _)) = samples.pop_first() {
                debug!("Evicted sample '{}' at {}", sample.id, evicted);
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        _source_prefix: &str,
        id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Sample>, StoreError> {
        if start_ms >= end_ms {
            return Ok(Vec::new());
        }
        let series = self.series.read().await;
        Ok(series
            .get(id)
            .map(|samples| samples.range(start_ms..end_ms).map(|(_, s)| s.clone()).collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}
