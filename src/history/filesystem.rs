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

// Filesystem history store
//
// Layout: <base>/<source>/<entry>/<timestamp_ms>.json, one sample per file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::store::{entry_path, HistoryStore};
use crate::config::FilesystemConfig;
use crate::error::StoreError;
use crate::protocol::Sample;

pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    pub fn new(config: FilesystemConfig) -> Self {
        let base_path = PathBuf::from(&config.base_path);
        info!("Initializing filesystem history store at: {}", base_path.display());
        Self { base_path }
    }

    fn entry_dir(&self, source_prefix: &str, id: &str) -> PathBuf {
        let (source, entry) = entry_path(source_prefix, id);
        self.base_path.join(source).join(entry)
    }

    fn sample_path(&self, sample: &Sample) -> PathBuf {
        self.entry_dir(sample.source_prefix(), &sample.id)
            .join(format!("{}.json", sample.timestamp))
    }
}

#[async_trait]
impl HistoryStore for FilesystemStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        if !self.base_path.exists() {
            info!("Creating base directory: {}", self.base_path.display());
        }
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn insert(&self, sample: &Sample) -> Result<(), StoreError> {
        let path = self.sample_path(sample);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let data = serde_json::to_vec(sample)?;
        // Written aside and renamed so readers never see a partial file
        let staging = path.with_extension(format!("json.{}", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&staging).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&staging, &path).await?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    async fn query(
        &self,
        source_prefix: &str,
        id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Sample>, StoreError> {
        let dir = self.entry_dir(source_prefix, id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut samples = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(timestamp) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i64>().ok())
            else {
                continue;
            };
            if timestamp < start_ms || timestamp >= end_ms {
                continue;
            }

            let data = fs::read(&path).await?;
            match serde_json::from_slice::<Sample>(&data) {
                // Entries are shared by ids that sanitize to the same name
                Ok(sample) if sample.id == id => samples.push(sample),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable sample {}: {}", path.display(), e),
            }
        }

        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => {
                let probe = self.base_path.join(".health_check_test");
                match fs::File::create(&probe).await {
                    Ok(mut f) => {
                        if let Err(e) = f.write_all(b"test").await {
                            warn!("Health check failed - cannot write: {}", e);
                            return Ok(false);
                        }
                        let _ = fs::remove_file(&probe).await;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot create file: {}", e);
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - base path is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access base path {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}
