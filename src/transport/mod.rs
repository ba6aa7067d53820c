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

// Upstream pub/sub bridge transport
//
// A source is reached through a bridge exposing four calls: list topics,
// get a topic's type, get a type's schema, and subscribe to a topic. The
// bridge itself is an external collaborator; `rosbridge` implements the
// client side of the rosbridge v2 protocol.

pub mod rosbridge;

pub use rosbridge::{RosbridgeClient, RosbridgeConnector};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::dictionary::TypeDef;
use crate::error::BridgeError;

/// Raw messages of one topic, in arrival order. Ends when the transport closes.
pub type MessageStream = mpsc::UnboundedReceiver<Value>;

/// Connection to exactly one upstream source
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    /// Names of all topics the source publishes
    async fn list_topics(&self) -> Result<Vec<String>, BridgeError>;

    /// Message type of a topic
    async fn topic_type(&self, topic: &str) -> Result<String, BridgeError>;

    /// Type definitions of a message type; the root type comes first
    async fn type_schema(&self, message_type: &str) -> Result<Vec<TypeDef>, BridgeError>;

    /// Open an inbound subscription to a topic
    async fn subscribe(&self, topic: &str, message_type: &str) -> Result<MessageStream, BridgeError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);

    /// Resolves once the connection is closed, by either side
    async fn closed(&self);
}

/// Opens transports to sources
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str, port: u16) -> Result<Arc<dyn BridgeTransport>, BridgeError>;
}

/// WebSocket URL of a rosbridge server
pub fn bridge_url(address: &str, port: u16) -> String {
    format!("ws://{}:{}", address, port)
}
