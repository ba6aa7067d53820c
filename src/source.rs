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

// Connection to a single upstream telemetry source
//
// Lifecycle:
//   Disconnected -> Connecting -> Connected -> Ready(dictionary) -> Closed
// A failed connect, or the transport closing on its own, lands in
// Disconnected. Nothing reconnects automatically; a new connection object is
// created instead.

use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dictionary::{
    build_dictionary, build_entry, DictionaryInfo, SourceDictionary, TopicEntry, TopicInfo,
    TOPICS_MEMBERS,
};
use crate::error::BridgeError;
use crate::listener::{Listener, ListenerHandle, ListenerRegistry};
use crate::protocol::Sample;
use crate::transport::{BridgeTransport, Connector};

/// Lifecycle state of a source connection
#[derive(Debug, Clone)]
pub enum SourceState {
    Disconnected,
    Connecting,
    Connected,
    Ready(Arc<SourceDictionary>),
    Closed,
}

impl SourceState {
    /// Whether the dictionary question has an answer in this state
    fn is_settled(&self) -> bool {
        !matches!(self, SourceState::Connecting | SourceState::Connected)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Fully-qualified id of a topic's samples
pub fn sample_id(source: &str, topic: &str) -> String {
    format!("{}.{}", source, topic)
}

/// Flatten a raw topic message into `{value key: scalar}` using the topic's
/// descriptors. Values missing from the message are left out.
pub fn flatten_message(id: &str, topic: &TopicEntry, message: &Value, timestamp: i64) -> Sample {
    let mut values = Map::new();
    for descriptor in topic.field_values() {
        let found = descriptor
            .key
            .split('.')
            .try_fold(message, |node, segment| node.get(segment));
        if let Some(found) = found {
            values.insert(descriptor.key.clone(), found.clone());
        }
    }
    Sample::new(id, timestamp, values)
}

pub struct SourceConnection {
    address: String,
    port: u16,
    info: DictionaryInfo,
    state: watch::Sender<SourceState>,
    listeners: Arc<ListenerRegistry>,
    transport: Mutex<Option<Arc<dyn BridgeTransport>>>,
    topic_types: Mutex<HashMap<String, String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SourceConnection {
    pub fn new(address: impl Into<String>, port: u16, info: DictionaryInfo) -> Arc<Self> {
        let (state, _) = watch::channel(SourceState::Disconnected);
        Arc::new(Self {
            address: address.into(),
            port,
            info,
            state,
            listeners: ListenerRegistry::new(),
            transport: Mutex::new(None),
            topic_types: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &DictionaryInfo {
        &self.info
    }

    pub fn matches(&self, address: &str, port: u16) -> bool {
        self.address == address && self.port == port
    }

    pub fn state(&self) -> SourceState {
        self.state.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.borrow(), SourceState::Closed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // Closed is terminal
    fn transition(&self, next: SourceState) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SourceState::Closed) {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    fn current_transport(&self) -> Result<Arc<dyn BridgeTransport>, BridgeError> {
        lock(&self.transport)
            .clone()
            .ok_or_else(|| BridgeError::Disconnected(self.info.name.clone()))
    }

    /// Connect, build the dictionary and open topic subscriptions.
    ///
    /// The state moves to `Connecting` before this returns, so the source
    /// counts as pending for dictionary waiters right away.
    pub fn start(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
    ) -> impl Future<Output = Result<Arc<SourceDictionary>, BridgeError>> + Send + 'static {
        self.transition(SourceState::Connecting);
        let this = self.clone();
        async move {
            this.connect(connector.as_ref()).await?;
            let dictionary = this.generate_dictionary().await?;
            this.update_subscribers().await?;
            Ok(dictionary)
        }
    }

    /// Open the transport. A failure leaves the source `Disconnected`.
    pub async fn connect(self: &Arc<Self>, connector: &dyn Connector) -> Result<(), BridgeError> {
        if !self.transition(SourceState::Connecting) {
            return Err(BridgeError::Disconnected(self.info.name.clone()));
        }

        let transport = match connector.connect(&self.address, self.port).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(
                    "Source '{}' failed to connect to {}:{}: {}",
                    self.info.name, self.address, self.port, e
                );
                self.transition(SourceState::Disconnected);
                return Err(e);
            }
        };

        *lock(&self.transport) = Some(transport.clone());
        if !self.transition(SourceState::Connected) {
            // Disconnected while the transport was opening
            lock(&self.transport).take();
            transport.close().await;
            return Err(BridgeError::Disconnected(self.info.name.clone()));
        }
        info!(
            "Source '{}' connected to {}:{}",
            self.info.name, self.address, self.port
        );

        let source = Arc::downgrade(self);
        let watcher = tokio::spawn(async move {
            transport.closed().await;
            if let Some(source) = source.upgrade() {
                if source.transition(SourceState::Disconnected) {
                    info!("Transport of source '{}' closed", source.info.name);
                }
            }
        });
        lock(&self.tasks).push(watcher);

        Ok(())
    }

    /// Enumerate topics and build this connection's dictionary.
    ///
    /// Topic lookups run concurrently; the result is only available once
    /// every lookup has answered. A topic whose lookup fails, or which has no
    /// scalar fields, is left out.
    pub async fn generate_dictionary(&self) -> Result<Arc<SourceDictionary>, BridgeError> {
        let transport = self.current_transport()?;
        let topics = transport.list_topics().await?;
        debug!("Source '{}' reports {} topics", self.info.name, topics.len());

        let lookups = topics.into_iter().map(|topic| {
            let transport = transport.clone();
            async move {
                let described = describe_topic(transport.as_ref(), &topic).await;
                (topic, described)
            }
        });

        let mut entries = Vec::new();
        let mut types = HashMap::new();
        for (topic, described) in join_all(lookups).await {
            match described {
                Ok(info) => {
                    let entry = build_entry(&info);
                    if entry.has_values() {
                        types.insert(info.name, info.message_type);
                        entries.push(entry);
                    } else {
                        debug!("Dropping topic '{}' without scalar fields", topic);
                    }
                }
                Err(e) => warn!("Schema lookup for topic '{}' failed: {}", topic, e),
            }
        }

        let dictionary = Arc::new(build_dictionary(&self.info, TOPICS_MEMBERS, entries));
        *lock(&self.topic_types) = types;

        let ready = dictionary.clone();
        let accepted = self.state.send_if_modified(move |state| {
            if matches!(state, SourceState::Connected) {
                *state = SourceState::Ready(ready);
                true
            } else {
                false
            }
        });
        if !accepted {
            return Err(BridgeError::Disconnected(self.info.name.clone()));
        }

        info!(
            "Dictionary for source '{}' ready with {} topics",
            self.info.name,
            dictionary.members.len()
        );
        Ok(dictionary)
    }

    /// Open one inbound subscription per dictionary topic.
    ///
    /// Each topic is drained by its own task, which keeps per-topic order.
    pub async fn update_subscribers(&self) -> Result<usize, BridgeError> {
        let dictionary = match self.state() {
            SourceState::Ready(dictionary) => dictionary,
            _ => return Err(BridgeError::Disconnected(self.info.name.clone())),
        };
        let transport = self.current_transport()?;
        let types = lock(&self.topic_types).clone();

        let mut tasks = Vec::with_capacity(dictionary.members.len());
        for topic in &dictionary.members {
            let message_type = types.get(&topic.name).cloned().unwrap_or_default();
            let mut stream = match transport.subscribe(&topic.name, &message_type).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Subscribing to '{}' failed: {}", topic.name, e);
                    continue;
                }
            };

            let listeners = self.listeners.clone();
            let entry = topic.clone();
            let id = sample_id(&self.info.name, &topic.name);
            tasks.push(tokio::spawn(async move {
                while let Some(message) = stream.recv().await {
                    let timestamp = chrono::Utc::now().timestamp_millis();
                    listeners.notify(flatten_message(&id, &entry, &message, timestamp));
                }
            }));
        }

        let count = tasks.len();
        lock(&self.tasks).extend(tasks);
        if self.is_closed() {
            self.abort_tasks();
            return Err(BridgeError::Disconnected(self.info.name.clone()));
        }

        debug!("Source '{}' subscribed to {} topics", self.info.name, count);
        Ok(count)
    }

    /// Deliver a sample to every listener, in registration order
    pub fn notify(&self, sample: Sample) {
        self.listeners.notify(sample);
    }

    pub fn listen(&self, listener: Listener) -> ListenerHandle {
        self.listeners.listen(listener)
    }

    /// The dictionary of this connection once ready; `None` if the source
    /// failed, lost its transport or was closed
    pub async fn dictionary(&self) -> Option<Arc<SourceDictionary>> {
        let mut state = self.state.subscribe();
        let settled = state.wait_for(SourceState::is_settled).await.ok()?;
        match &*settled {
            SourceState::Ready(dictionary) => Some(dictionary.clone()),
            _ => None,
        }
    }

    fn abort_tasks(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    /// Tear down the transport, topic subscriptions and listeners. Idempotent.
    pub async fn disconnect(&self) {
        if matches!(self.state.send_replace(SourceState::Closed), SourceState::Closed) {
            return;
        }

        self.abort_tasks();
        self.listeners.clear();
        let transport = lock(&self.transport).take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        info!(
            "Source '{}' at {}:{} disconnected",
            self.info.name, self.address, self.port
        );
    }
}

async fn describe_topic(transport: &dyn BridgeTransport, topic: &str) -> Result<TopicInfo, BridgeError> {
    let message_type = transport.topic_type(topic).await?;
    let typedefs = transport.type_schema(&message_type).await?;
    Ok(TopicInfo {
        name: topic.to_string(),
        message_type,
        typedefs,
    })
}
