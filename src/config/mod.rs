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

// Configuration module

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{bail, Context, Result};
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BridgeConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<BridgeConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Let environment variables override config values
pub fn apply_env_overrides(config: &mut BridgeConfig) -> Result<()> {
    if let Ok(port) = std::env::var("BRIDGE_PORT") {
        config.server.port = match port.parse() {
            Ok(port) if port > 0 => port,
            _ => bail!("BRIDGE_PORT must be a port number, got '{}'", port),
        };
    }

    if let Ok(reduct_url) = std::env::var("REDUCTSTORE_URL") {
        if let Some(reduct_config) = config.history.reductstore.as_mut() {
            reduct_config.url = reduct_url;
        }
    }

    if let Ok(api_token) = std::env::var("REDUCT_API_TOKEN") {
        if let Some(reduct_config) = config.history.reductstore.as_mut() {
            reduct_config.api_token = Some(api_token);
        }
    }

    Ok(())
}
