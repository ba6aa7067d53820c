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

// Scripted in-process bridge transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use rosmct_bridge::dictionary::TypeDef;
use rosmct_bridge::transport::{bridge_url, BridgeTransport, Connector, MessageStream};
use rosmct_bridge::BridgeError;

pub fn typedef(name: &str, fields: &[(&str, &str)]) -> TypeDef {
    TypeDef {
        type_name: name.to_string(),
        fieldnames: fields.iter().map(|(n, _)| n.to_string()).collect(),
        fieldtypes: fields.iter().map(|(_, t)| t.to_string()).collect(),
        fieldarraylen: vec![-1; fields.len()],
    }
}

/// `/imu` carrying `{x: float32, y: float32}`
pub fn imu_typedefs() -> Vec<TypeDef> {
    vec![typedef("test_msgs/Imu", &[("x", "float32"), ("y", "float32")])]
}

struct MockTopic {
    message_type: String,
    typedefs: Vec<TypeDef>,
}

/// A bridge whose topics and schemas are fixed up front
pub struct MockTransport {
    topics: Vec<(String, MockTopic)>,
    failing: HashSet<String>,
    streams: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
    closed: watch::Sender<bool>,
    subscribe_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            topics: Vec::new(),
            failing: HashSet::new(),
            streams: Mutex::new(HashMap::new()),
            closed,
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_topic(mut self, topic: &str, message_type: &str, typedefs: Vec<TypeDef>) -> Self {
        self.topics.push((
            topic.to_string(),
            MockTopic {
                message_type: message_type.to_string(),
                typedefs,
            },
        ));
        self
    }

    /// Listed, but its type lookup fails
    pub fn with_failing_topic(mut self, topic: &str) -> Self {
        self.failing.insert(topic.to_string());
        self.with_topic(topic, "broken/Type", Vec::new())
    }

    /// Deliver a raw message to every stream of `topic`; returns how many received it
    pub fn publish(&self, topic: &str, message: Value) -> usize {
        let mut streams = self.streams.lock().unwrap();
        let Some(senders) = streams.get_mut(topic) else {
            return 0;
        };
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        senders.len()
    }

    /// Simulate the remote side going away
    pub fn drop_connection(&self) {
        self.streams.lock().unwrap().clear();
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Wait until `topic` has at least one open stream
    pub async fn wait_subscribed(&self, topic: &str) {
        for _ in 0..200 {
            let subscribed = self
                .streams
                .lock()
                .unwrap()
                .get(topic)
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if subscribed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("topic '{}' was never subscribed", topic);
    }

    fn topic(&self, topic: &str) -> Option<&MockTopic> {
        self.topics.iter().find(|(name, _)| name == topic).map(|(_, t)| t)
    }
}

#[async_trait]
impl BridgeTransport for MockTransport {
    async fn list_topics(&self) -> Result<Vec<String>, BridgeError> {
        Ok(self.topics.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn topic_type(&self, topic: &str) -> Result<String, BridgeError> {
        if self.failing.contains(topic) {
            return Err(BridgeError::ServiceCall {
                service: "/rosapi/topic_type".to_string(),
                reason: format!("no type for {}", topic),
            });
        }
        self.topic(topic)
            .map(|t| t.message_type.clone())
            .ok_or_else(|| BridgeError::ServiceCall {
                service: "/rosapi/topic_type".to_string(),
                reason: format!("unknown topic {}", topic),
            })
    }

    async fn type_schema(&self, message_type: &str) -> Result<Vec<TypeDef>, BridgeError> {
        Ok(self
            .topics
            .iter()
            .find(|(_, t)| t.message_type == message_type)
            .map(|(_, t)| t.typedefs.clone())
            .unwrap_or_default())
    }

    async fn subscribe(&self, topic: &str, _message_type: &str) -> Result<MessageStream, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::TransportClosed);
        }
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn close(&self) {
        self.drop_connection();
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }
}

/// Hands out pre-registered transports by `(address, port)`
#[derive(Default)]
pub struct MockConnector {
    transports: Mutex<HashMap<(String, u16), Arc<MockTransport>>>,
    hanging: Mutex<HashSet<(String, u16)>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, address: &str, port: u16, transport: MockTransport) -> Arc<MockTransport> {
        let transport = Arc::new(transport);
        self.transports
            .lock()
            .unwrap()
            .insert((address.to_string(), port), transport.clone());
        transport
    }

    /// Connecting to `(address, port)` never completes
    pub fn hang(&self, address: &str, port: u16) {
        self.hanging.lock().unwrap().insert((address.to_string(), port));
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &str, port: u16) -> Result<Arc<dyn BridgeTransport>, BridgeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let key = (address.to_string(), port);
        let hangs = self.hanging.lock().unwrap().contains(&key);
        if hangs {
            std::future::pending::<()>().await;
        }

        let transport = self.transports.lock().unwrap().get(&key).cloned();
        match transport {
            Some(transport) => Ok(transport),
            None => Err(BridgeError::Connection {
                url: bridge_url(address, port),
                reason: "connection refused".to_string(),
            }),
        }
    }
}
