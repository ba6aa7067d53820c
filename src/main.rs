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

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rosmct_bridge::config::{apply_env_overrides, load_config_with_env, ConfigLoader, SourceConfig};
use rosmct_bridge::dictionary::DictionaryInfo;
use rosmct_bridge::history::{HistoryFactory, HistoryStore, HistoryWriter};
use rosmct_bridge::{BridgeConfig, RealtimeServer, RosbridgeConnector, SourceCollection};

/// Realtime bridge from rosbridge sources to dashboard clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// rosbridge host to open at startup
    #[arg(short, long)]
    url: Option<String>,

    /// rosbridge port of --url
    #[arg(long, default_value_t = 9090)]
    rosbridge_port: u16,

    /// Source name of --url
    #[arg(short, long, default_value = "ros")]
    name: String,
}

// RUST_LOG, when set, takes precedence over `logging.level`
fn init_tracing(config: &BridgeConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level_directive()));

    if config.logging.format == "json" {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_env_filter(filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config_with_env(path)?,
        None => {
            let mut config = BridgeConfig::default();
            apply_env_overrides(&mut config)?;
            config
        }
    };

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = args.url {
        config.sources.push(SourceConfig {
            name: args.name,
            key: None,
            rosbridgeurl: url,
            rosbridgeport: args.rosbridge_port,
        });
    }
    ConfigLoader::validate(&config)?;

    init_tracing(&config)?;

    info!("Starting realtime bridge");
    if let Some(path) = &args.config {
        info!("Loaded configuration from: {:?}", path);
    }

    let connector = Arc::new(RosbridgeConnector::new(config.collection.connect_timeout()));
    let collection_info = DictionaryInfo::new(&config.collection.name, &config.collection.key);
    let mut collection = SourceCollection::new(collection_info, connector);

    let mut writer = None;
    let mut history: Option<Arc<dyn HistoryStore>> = None;
    if config.history.enabled {
        let store = HistoryFactory::create(&config.history)?;
        if let Err(e) = store.initialize().await {
            warn!("History store not ready yet, inserts will retry: {}", e);
        }
        match store.health_check().await {
            Ok(true) => info!("History backend initialized: {}", store.backend_type()),
            Ok(false) => warn!("History backend {} reports unhealthy", store.backend_type()),
            Err(e) => warn!("History backend {} health check failed: {}", store.backend_type(), e),
        }

        let history_writer = HistoryWriter::new(store.clone(), config.history.workers.queue_capacity);
        history_writer.start(config.history.workers.insert_workers);
        collection = collection.with_history(history_writer.clone());
        writer = Some(history_writer);
        history = Some(store);
    } else {
        info!("History disabled");
    }
    let collection = Arc::new(collection);

    for source in &config.sources {
        let collection = collection.clone();
        let source = source.clone();
        tokio::spawn(async move {
            let info = DictionaryInfo::new(&source.name, source.dictionary_key());
            if let Err(e) = collection
                .add_system(&source.rosbridgeurl, source.rosbridgeport, info)
                .await
            {
                warn!(
                    "Initial source {}:{} failed: {}",
                    source.rosbridgeurl, source.rosbridgeport, e
                );
            }
        });
    }

    let server = RealtimeServer::new(
        config.server.clone(),
        collection.clone(),
        history,
        config.collection.dictionary_timeout(),
    );

    // Run the server (blocks until Ctrl+C)
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C, shutting down");
    };
    if let Err(e) = server.run(shutdown).await {
        tracing::error!("Server error: {}", e);
    }

    // Cleanup
    collection.shutdown().await;
    if let Some(writer) = writer {
        writer.shutdown().await;
    }
    info!("Realtime bridge shut down successfully");

    Ok(())
}
