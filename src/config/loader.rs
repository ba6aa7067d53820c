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

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<BridgeConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse and validate YAML configuration text
    pub fn parse(content: &str) -> Result<BridgeConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: BridgeConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${ROSBRIDGE_HOST:-localhost} -> localhost (if ROSBRIDGE_HOST not set)
    pub fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Validate configuration
    pub fn validate(config: &BridgeConfig) -> Result<()> {
        if config.server.port == 0 {
            bail!("server.port must be > 0");
        }

        if !config.server.path.starts_with('/') {
            bail!("server.path must start with '/'");
        }

        if config.collection.dictionary_timeout_seconds == 0 {
            bail!("collection.dictionary_timeout_seconds must be > 0");
        }

        if config.collection.connect_timeout_seconds == 0 {
            bail!("collection.connect_timeout_seconds must be > 0");
        }

        let mut endpoints = HashSet::new();
        for source in &config.sources {
            if source.name.is_empty() {
                bail!("sources[].name cannot be empty");
            }
            if source.name.contains('.') {
                bail!("source name '{}' must not contain '.'", source.name);
            }
            if source.rosbridgeport == 0 {
                bail!("source '{}' rosbridgeport must be > 0", source.name);
            }
            if !endpoints.insert((source.rosbridgeurl.as_str(), source.rosbridgeport)) {
                bail!(
                    "duplicate source endpoint {}:{}",
                    source.rosbridgeurl,
                    source.rosbridgeport
                );
            }
        }

        let history = &config.history;
        if history.enabled {
            match history.backend.as_str() {
                "memory" => {}
                "filesystem" => {
                    if history.filesystem.is_none() {
                        bail!("filesystem backend selected but filesystem config missing");
                    }
                }
                "reductstore" => {
                    if history.reductstore.is_none() {
                        bail!("reductstore backend selected but reductstore config missing");
                    }
                }
                unknown => bail!(
                    "Unknown backend: '{}'. Supported: memory, filesystem, reductstore",
                    unknown
                ),
            }

            if history.workers.insert_workers == 0 {
                bail!("history.workers.insert_workers must be > 0");
            }

            if history.workers.queue_capacity == 0 {
                bail!("history.workers.queue_capacity must be > 0");
            }
        }

        Ok(())
    }
}
