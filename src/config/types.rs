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

// Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::source_key;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket route; the notify endpoint lives at `<path>/notify`
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn notify_path(&self) -> String {
        format!("{}/notify", self.path.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionConfig {
    #[serde(default = "default_collection_name")]
    pub name: String,

    #[serde(default = "default_collection_key")]
    pub key: String,

    #[serde(default = "default_dictionary_timeout")]
    pub dictionary_timeout_seconds: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
            key: default_collection_key(),
            dictionary_timeout_seconds: default_dictionary_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl CollectionConfig {
    pub fn dictionary_timeout(&self) -> Duration {
        Duration::from_secs(self.dictionary_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// A rosbridge source opened at startup
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,

    /// Dictionary key; derived from the endpoint when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub rosbridgeurl: String,

    pub rosbridgeport: u16,
}

impl SourceConfig {
    pub fn dictionary_key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| source_key(&self.rosbridgeurl, self.rosbridgeport))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backend type: "memory", "filesystem", "reductstore"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub memory: Option<MemoryConfig>,

    #[serde(default)]
    pub filesystem: Option<FilesystemConfig>,

    #[serde(default)]
    pub reductstore: Option<ReductStoreConfig>,

    #[serde(default)]
    pub workers: WorkerConfig,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_backend(),
            memory: Some(MemoryConfig::default()),
            filesystem: None,
            reductstore: None,
            workers: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_samples")]
    pub max_samples_per_id: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_samples_per_id: default_max_samples(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/data/history".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReductStoreConfig {
    pub url: String,
    pub bucket_name: String,
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl Default for ReductStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8383".to_string(),
            bucket_name: "realtime_history".to_string(),
            api_token: None,
            timeout_seconds: default_timeout(),
            max_retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_insert_workers")]
    pub insert_workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            insert_workers: default_insert_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,  // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String,  // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Filter directive for `level`; unknown levels fall back to `info`
    pub fn level_directive(&self) -> String {
        match self.level.to_lowercase().as_str() {
            level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_string(),
            _ => "info".to_string(),
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8085 }
fn default_path() -> String { "/realtime".to_string() }
fn default_collection_name() -> String { "Ros Systems".to_string() }
fn default_collection_key() -> String { "rsCollection".to_string() }
fn default_dictionary_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 10 }
fn default_true() -> bool { true }
fn default_backend() -> String { "memory".to_string() }
fn default_max_samples() -> usize { 100_000 }
fn default_timeout() -> u64 { 30 }
fn default_retries() -> u32 { 3 }
fn default_insert_workers() -> usize { 2 }
fn default_queue_capacity() -> usize { 10_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
