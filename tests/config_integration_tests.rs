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

// Configuration system integration tests

use rosmct_bridge::config::{apply_env_overrides, load_config, BridgeConfig, ConfigLoader};
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("bridge.yaml");
    fs::write(&path, content).expect("Failed to write temp config");
    path
}

#[test]
fn test_load_shipped_default_config() {
    let config = load_config("config/default.yaml").unwrap();

    assert_eq!(config.server.port, 8085);
    assert_eq!(config.server.path, "/realtime");
    assert_eq!(config.collection.name, "Ros Systems");
    assert_eq!(config.collection.key, "rsCollection");
    assert_eq!(config.history.backend, "memory");
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = ConfigLoader::parse("sources: []\n").unwrap();

    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.notify_path(), "/realtime/notify");
    assert_eq!(config.collection.dictionary_timeout_seconds, 30);
    assert_eq!(config.collection.connect_timeout_seconds, 10);
    assert!(config.history.enabled);
    assert_eq!(config.history.workers.insert_workers, 2);
    assert_eq!(config.history.workers.queue_capacity, 10_000);
}

#[test]
fn test_config_with_env_vars() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
server:
  port: 9000

sources:
  - name: ${BRIDGE_IT_SOURCE:-robot1}
    rosbridgeurl: ${BRIDGE_IT_HOST}
    rosbridgeport: 9090

history:
  backend: reductstore
  reductstore:
    url: ${BRIDGE_IT_URL:-http://default:8383}
    bucket_name: telemetry
    timeout_seconds: 10

logging:
  level: debug
  format: json
"#,
    );

    std::env::set_var("BRIDGE_IT_HOST", "10.1.2.3");
    std::env::remove_var("BRIDGE_IT_SOURCE");
    std::env::remove_var("BRIDGE_IT_URL");

    let config = load_config(&path).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.sources.len(), 1);
    assert_eq!(config.sources[0].name, "robot1");
    assert_eq!(config.sources[0].key, None);
    assert_eq!(config.sources[0].dictionary_key(), "ros.system.10.1.2.3:9090");
    assert_eq!(config.sources[0].rosbridgeurl, "10.1.2.3");

    let reduct = config.history.reductstore.as_ref().expect("Expected ReductStore config");
    assert_eq!(reduct.url, "http://default:8383");
    assert_eq!(reduct.bucket_name, "telemetry");
    assert_eq!(reduct.max_retries, 3);
    assert_eq!(config.logging.format, "json");

    std::env::remove_var("BRIDGE_IT_HOST");
}

#[test]
fn test_reductstore_without_section_is_rejected() {
    let result = ConfigLoader::parse("history:\n  backend: reductstore\n");
    assert!(result.unwrap_err().to_string().contains("reductstore config missing"));
}

#[test]
fn test_duplicate_sources_are_rejected() {
    let result = ConfigLoader::parse(
        r#"
sources:
  - { name: a, rosbridgeurl: host, rosbridgeport: 9090 }
  - { name: b, rosbridgeurl: host, rosbridgeport: 9090 }
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_invalid_yaml() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "server: [unclosed");
    assert!(load_config(&path).is_err());
}

#[test]
fn test_env_overrides() {
    let mut config = BridgeConfig::default();
    config.history.backend = "reductstore".to_string();
    config.history.reductstore = Some(Default::default());

    std::env::set_var("BRIDGE_PORT", "9555");
    std::env::set_var("REDUCT_API_TOKEN", "secret");
    apply_env_overrides(&mut config).unwrap();
    std::env::remove_var("BRIDGE_PORT");
    std::env::remove_var("REDUCT_API_TOKEN");

    assert_eq!(config.server.port, 9555);
    assert_eq!(
        config.history.reductstore.unwrap().api_token.as_deref(),
        Some("secret")
    );
}
