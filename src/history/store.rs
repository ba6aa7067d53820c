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

// History store trait

use async_trait::async_trait;

use crate::error::StoreError;
use crate::protocol::Sample;

/// Retries applied by `insert_with_retry` unless a store overrides `max_retries`
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Time-series store holding past samples
///
/// Inserts are idempotent on `(id, timestamp)`: writing the same sample twice
/// leaves a single record. Queries cover the half-open range
/// `[start_ms, end_ms)` and return samples sorted by timestamp.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Prepare the store (create directories, buckets). Also used to
    /// re-establish a lost connection.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Persist one sample
    async fn insert(&self, sample: &Sample) -> Result<(), StoreError>;

    /// Samples of `id` within `[start_ms, end_ms)`.
    ///
    /// # Arguments
    /// * `source_prefix` - Source name the id belongs to
    /// * `id` - `<source>.<topic>` id
    /// * `start_ms` - Inclusive lower bound, epoch milliseconds
    /// * `end_ms` - Exclusive upper bound, epoch milliseconds
    async fn query(
        &self,
        source_prefix: &str,
        id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Sample>, StoreError>;

    fn max_retries(&self) -> u32 {
        DEFAULT_MAX_RETRIES
    }

    /// Insert with exponential backoff, re-initializing the store before
    /// every retry
    async fn insert_with_retry(&self, sample: &Sample) -> Result<(), StoreError> {
        use tokio::time::{sleep, Duration};
        use tracing::{info, warn};

        let max_retries = self.max_retries();
        let mut attempt = 0;
        let mut delay = Duration::from_millis(100);

        loop {
            match self.insert(sample).await {
                Ok(_) => {
                    if attempt > 0 {
                        info!(
                            "Inserted sample '{}' at {} after {} retries",
                            sample.id, sample.timestamp, attempt
                        );
                    }
                    return Ok(());
                }
                Err(e) if attempt < max_retries => {
                    warn!(
                        "Insert of sample '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        sample.id,
                        attempt + 1,
                        max_retries,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    delay *= 2;
                    delay = delay.min(Duration::from_secs(30));
                    attempt += 1;

                    if let Err(e) = self.initialize().await {
                        warn!("Reconnecting {} store failed: {}", self.backend_type(), e);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Insert of sample '{}' failed after {} attempts: {}",
                        sample.id,
                        max_retries,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn health_check(&self) -> Result<bool, StoreError>;

    fn backend_type(&self) -> &str;
}

/// Storage entry name for a topic, e.g. `/imu/data` -> `imu_data`
pub fn topic_to_entry_name(topic: &str) -> String {
    let trimmed = topic.trim_start_matches('/');
    let name: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "root".to_string()
    } else {
        name
    }
}

/// Split a sample id into its source and topic entry names
pub fn entry_path(source_prefix: &str, id: &str) -> (String, String) {
    let topic = id
        .strip_prefix(source_prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(id);
    (topic_to_entry_name(source_prefix), topic_to_entry_name(topic))
}
