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

// ReductStore history store
//
// Each `<source>.<topic>` id maps to one entry; record timestamps are the
// sample timestamp in microseconds.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::store::{entry_path, HistoryStore};
use crate::config::ReductStoreConfig;
use crate::error::StoreError;
use crate::protocol::Sample;

const TIME_HEADER_PREFIX: &str = "x-reduct-time-";
const LAST_HEADER: &str = "x-reduct-last";

#[derive(Deserialize)]
struct QueryResponse {
    id: u64,
}

pub struct ReductStore {
    client: Client,
    base_url: String,
    bucket_name: String,
    max_retries: u32,
}

impl ReductStore {
    pub fn new(config: ReductStoreConfig) -> Result<Self, StoreError> {
        let mut client_builder = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout_seconds));

        if let Some(token) = &config.api_token {
            let mut headers = HeaderMap::new();
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| StoreError::Backend("Invalid API token".to_string()))?;
            headers.insert(AUTHORIZATION, auth_value);
            client_builder = client_builder.default_headers(headers);
        }

        Ok(Self {
            client: client_builder.build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            bucket_name: config.bucket_name,
            max_retries: config.max_retries,
        })
    }

    fn entry_url(&self, source_prefix: &str, id: &str) -> String {
        let (source, entry) = entry_path(source_prefix, id);
        format!(
            "{}/api/v1/b/{}/{}-{}",
            self.base_url, self.bucket_name, source, entry
        )
    }

    async fn ensure_bucket(&self) -> Result<(), StoreError> {
        let url = format!("{}/api/v1/b/{}", self.base_url, self.bucket_name);

        match self.client.head(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Bucket '{}' already exists", self.bucket_name);
                Ok(())
            }
            _ => {
                info!("Creating bucket '{}'", self.bucket_name);
                let response = self.client.post(&url).send().await?;

                if response.status().is_success() || response.status() == StatusCode::CONFLICT {
                    info!("Bucket '{}' ready", self.bucket_name);
                    Ok(())
                } else {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_default();
                    Err(StoreError::Backend(format!(
                        "Failed to create bucket: {} - {}",
                        status, error_text
                    )))
                }
            }
        }
    }
}

/// Split a batch response body into samples using its per-record time headers.
///
/// Records are laid out in ascending timestamp order; each
/// `x-reduct-time-<us>` header starts with the record's content length.
pub(crate) fn decode_batch(headers: &HeaderMap, body: &[u8]) -> Result<Vec<Sample>, StoreError> {
    let mut records: Vec<(u64, usize)> = headers
        .iter()
        .filter_map(|(name, value)| {
            let timestamp = name.as_str().strip_prefix(TIME_HEADER_PREFIX)?.parse().ok()?;
            let length = value.to_str().ok()?.split(',').next()?.trim().parse().ok()?;
            Some((timestamp, length))
        })
        .collect();
    records.sort_by_key(|(timestamp, _)| *timestamp);

    let mut samples = Vec::with_capacity(records.len());
    let mut offset = 0;
    for (timestamp, length) in records {
        let end = offset + length;
        let Some(content) = body.get(offset..end) else {
            return Err(StoreError::Backend(format!(
                "truncated batch: record at {} needs {} bytes past offset {}",
                timestamp, length, offset
            )));
        };
        samples.push(serde_json::from_slice(content)?);
        offset = end;
    }
    Ok(samples)
}

#[async_trait]
impl HistoryStore for ReductStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        self.ensure_bucket().await
    }

    async fn insert(&self, sample: &Sample) -> Result<(), StoreError> {
        let url = format!(
            "{}?ts={}",
            self.entry_url(sample.source_prefix(), &sample.id),
            sample.timestamp * 1000
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-reduct-label-id", sample.id.as_str())
            .body(serde_json::to_vec(sample)?)
            .send()
            .await?;

        // A record already stored at this timestamp is the same sample
        if response.status() == StatusCode::CONFLICT {
            debug!("Sample '{}' at {} already stored", sample.id, sample.timestamp);
            return Ok(());
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "ReductStore write failed with status {}: {}",
                status, error_text
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        source_prefix: &str,
        id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Sample>, StoreError> {
        if start_ms >= end_ms {
            return Ok(Vec::new());
        }
        let entry_url = self.entry_url(source_prefix, id);
        let query_url = format!(
            "{}/q?start={}&stop={}",
            entry_url,
            start_ms.max(0) * 1000,
            end_ms.max(0) * 1000
        );

        let response = self.client.get(&query_url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => return Ok(Vec::new()),
            _ => {}
        }
        let query: QueryResponse = response.error_for_status()?.json().await?;

        let mut samples = Vec::new();
        loop {
            let response = self
                .client
                .get(format!("{}/batch?q={}", entry_url, query.id))
                .send()
                .await?;
            if response.status() == StatusCode::NO_CONTENT {
                break;
            }
            let response = response.error_for_status()?;
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            samples.extend(decode_batch(&headers, &body)?);
            let last = headers
                .get(LAST_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == "true")
                .unwrap_or(true);
            if last {
                break;
            }
        }

        samples.retain(|s: &Sample| s.id == id);
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        let url = format!("{}/api/v1/info", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                warn!("Health check failed with status: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "reductstore"
    }
}
