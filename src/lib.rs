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

// Realtime telemetry bridge between rosbridge sources and dashboard clients
//
// - Discovers topics and message schemas of each rosbridge source
// - Flattens them into a hierarchical telemetry dictionary
// - Streams subscribed samples to WebSocket clients
// - Records every sample into a history store and answers range queries

pub mod collection;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod history;
pub mod listener;
pub mod protocol;
pub mod router;
pub mod server;
pub mod source;
pub mod transport;

// Re-export main types
pub use collection::SourceCollection;
pub use config::{load_config, load_config_with_env, BridgeConfig};
pub use dictionary::{
    build_dictionary, build_entry, CollectionDictionary, Dictionary, DictionaryInfo,
    SourceDictionary, TopicEntry, ValueDescriptor,
};
pub use error::{BridgeError, ProtocolError, StoreError};
pub use history::{HistoryFactory, HistoryStore, HistoryWriter};
pub use listener::{CompositeListenerHandle, Listener, ListenerHandle, ListenerRegistry};
pub use protocol::{Command, Event, Sample};
pub use router::SubscriptionRouter;
pub use server::RealtimeServer;
pub use source::{SourceConnection, SourceState};
pub use transport::{BridgeTransport, Connector, RosbridgeClient, RosbridgeConnector};
