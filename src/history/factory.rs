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

// History store factory

use anyhow::{anyhow, bail, Result};
use std::sync::Arc;

use super::filesystem::FilesystemStore;
use super::memory::MemoryStore;
use super::reductstore::ReductStore;
use super::store::HistoryStore;
use crate::config::HistoryConfig;

pub struct HistoryFactory;

impl HistoryFactory {
    /// Create the configured history store
    pub fn create(config: &HistoryConfig) -> Result<Arc<dyn HistoryStore>> {
        match config.backend.as_str() {
            "memory" => {
                let memory = config.memory.clone().unwrap_or_default();
                Ok(Arc::new(MemoryStore::new(memory)))
            }

            "filesystem" => {
                let filesystem = config
                    .filesystem
                    .clone()
                    .ok_or_else(|| anyhow!("Filesystem config missing"))?;
                Ok(Arc::new(FilesystemStore::new(filesystem)))
            }

            "reductstore" => {
                let reductstore = config
                    .reductstore
                    .clone()
                    .ok_or_else(|| anyhow!("ReductStore config missing"))?;
                Ok(Arc::new(ReductStore::new(reductstore)?))
            }

            unknown => bail!(
                "Unknown history backend: '{}'. Supported: memory, filesystem, reductstore",
                unknown
            ),
        }
    }
}
