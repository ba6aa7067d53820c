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

// rosbridge v2 client over WebSocket

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{bridge_url, BridgeTransport, Connector, MessageStream};
use crate::dictionary::TypeDef;
use crate::error::BridgeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type PendingCalls = DashMap<String, oneshot::Sender<Result<Value, BridgeError>>>;
type TopicSubscribers = DashMap<String, Vec<mpsc::UnboundedSender<Value>>>;

// How long close() waits for the server to acknowledge the close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Inbound {
    ServiceResponse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        service: String,
        #[serde(default)]
        values: Value,
        #[serde(default = "default_result")]
        result: bool,
    },
    Publish {
        topic: String,
        msg: Value,
    },
    Status {
        #[serde(default)]
        level: String,
        #[serde(default)]
        msg: String,
    },
    #[serde(other)]
    Other,
}

fn default_result() -> bool {
    true
}

#[derive(Deserialize)]
struct TopicsResponse {
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Deserialize)]
struct TopicTypeResponse {
    #[serde(rename = "type")]
    message_type: String,
}

#[derive(Deserialize)]
struct MessageDetailsResponse {
    #[serde(default)]
    typedefs: Vec<TypeDef>,
}

/// State shared between the client and its reader task
struct Shared {
    url: String,
    pending: PendingCalls,
    topics: TopicSubscribers,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::ServiceResponse {
                id,
                service,
                values,
                result,
            } => {
                let Some(id) = id else {
                    debug!("Service response from '{}' without id", service);
                    return;
                };
                if let Some((_, reply)) = self.pending.remove(&id) {
                    let outcome = if result {
                        Ok(values)
                    } else {
                        Err(BridgeError::ServiceCall {
                            service,
                            reason: values.to_string(),
                        })
                    };
                    let _ = reply.send(outcome);
                }
            }
            Inbound::Publish { topic, msg } => {
                if let Some(mut subscribers) = self.topics.get_mut(&topic) {
                    subscribers.retain(|tx| tx.send(msg.clone()).is_ok());
                }
            }
            Inbound::Status { level, msg } => {
                warn!("rosbridge {} reported {}: {}", self.url, level, msg);
            }
            Inbound::Other => {}
        }
    }

    /// Mark the connection closed, then fail pending calls and end topic streams
    fn shut_down(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, reply)) = self.pending.remove(&id) {
                let _ = reply.send(Err(BridgeError::TransportClosed));
            }
        }
        self.topics.clear();
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Client side of one rosbridge connection
pub struct RosbridgeClient {
    shared: Arc<Shared>,
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl RosbridgeClient {
    /// Open a connection; fails if the socket errors before it is open
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let (stream, _) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| BridgeError::Connection {
                url: url.to_string(),
                reason: format!("timed out after {:?}", timeout),
            })?
            .map_err(|e| BridgeError::Connection {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        info!("Connected to rosbridge websocket server at {}", url);

        let (writer, reader) = stream.split();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            url: url.to_string(),
            pending: DashMap::new(),
            topics: DashMap::new(),
            closed,
        });

        let reader = tokio::spawn(Self::read_loop(shared.clone(), reader));

        Ok(Self {
            shared,
            writer: Mutex::new(writer),
            reader: StdMutex::new(Some(reader)),
        })
    }

    async fn read_loop(shared: Arc<Shared>, mut reader: SplitStream<WsStream>) {
        while let Some(frame) = reader.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Error on rosbridge websocket {}: {}", shared.url, e);
                    break;
                }
            };

            match serde_json::from_str::<Inbound>(text.as_str()) {
                Ok(inbound) => shared.dispatch(inbound),
                Err(e) => debug!("Ignoring malformed rosbridge frame: {}", e),
            }
        }

        info!("Connection to rosbridge websocket server at {} closed.", shared.url);
        shared.shut_down();
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    async fn send(&self, frame: Value) -> Result<(), BridgeError> {
        self.writer
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| {
                debug!("Send to {} failed: {}", self.shared.url, e);
                BridgeError::TransportClosed
            })
    }

    async fn call_service(&self, service: &str, args: Value) -> Result<Value, BridgeError> {
        let id = format!("call_service:{}:{}", service, Uuid::new_v4());
        let (reply, response) = oneshot::channel();
        self.shared.pending.insert(id.clone(), reply);

        // shut_down flips the flag before draining, so a call registered
        // after the drain is caught here
        if self.shared.is_closed() {
            self.shared.pending.remove(&id);
            return Err(BridgeError::TransportClosed);
        }

        let request = json!({
            "op": "call_service",
            "id": id,
            "service": service,
            "args": args,
        });
        if let Err(e) = self.send(request).await {
            self.shared.pending.remove(&id);
            return Err(e);
        }

        response.await.map_err(|_| BridgeError::TransportClosed)?
    }
}

#[async_trait]
impl BridgeTransport for RosbridgeClient {
    async fn list_topics(&self) -> Result<Vec<String>, BridgeError> {
        let values = self.call_service("/rosapi/topics", json!({})).await?;
        let response: TopicsResponse = serde_json::from_value(values)?;
        Ok(response.topics)
    }

    async fn topic_type(&self, topic: &str) -> Result<String, BridgeError> {
        let values = self
            .call_service("/rosapi/topic_type", json!({ "topic": topic }))
            .await?;
        let response: TopicTypeResponse = serde_json::from_value(values)?;
        Ok(response.message_type)
    }

    async fn type_schema(&self, message_type: &str) -> Result<Vec<TypeDef>, BridgeError> {
        let values = self
            .call_service("/rosapi/message_details", json!({ "type": message_type }))
            .await?;
        let response: MessageDetailsResponse = serde_json::from_value(values)?;
        Ok(response.typedefs)
    }

    async fn subscribe(&self, topic: &str, message_type: &str) -> Result<MessageStream, BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let first = {
            let mut subscribers = self.shared.topics.entry(topic.to_string()).or_default();
            subscribers.push(tx);
            subscribers.len() == 1
        };

        if self.shared.is_closed() {
            self.shared.topics.remove(topic);
            return Err(BridgeError::TransportClosed);
        }

        if first {
            let request = json!({
                "op": "subscribe",
                "id": format!("subscribe:{}:{}", topic, Uuid::new_v4()),
                "topic": topic,
                "type": message_type,
            });
            if let Err(e) = self.send(request).await {
                self.shared.topics.remove(topic);
                return Err(e);
            }
            debug!("Subscribed to '{}' ({}) on {}", topic, message_type, self.shared.url);
        }

        Ok(rx)
    }

    async fn close(&self) {
        if self.shared.is_closed() {
            return;
        }

        if let Err(e) = self.writer.lock().await.close().await {
            debug!("Closing {} failed: {}", self.shared.url, e);
        }

        let mut closed = self.shared.closed.subscribe();
        if tokio::time::timeout(CLOSE_GRACE, closed.wait_for(|c| *c))
            .await
            .is_err()
        {
            if let Some(reader) = self
                .reader
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                reader.abort();
            }
            self.shared.shut_down();
        }
    }

    async fn closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }
}

impl Drop for RosbridgeClient {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
        self.shared.shut_down();
    }
}

/// Connects to rosbridge servers at `ws://<address>:<port>`
#[derive(Debug, Clone)]
pub struct RosbridgeConnector {
    connect_timeout: Duration,
}

impl RosbridgeConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for RosbridgeConnector {
    async fn connect(&self, address: &str, port: u16) -> Result<Arc<dyn BridgeTransport>, BridgeError> {
        let client = RosbridgeClient::connect(&bridge_url(address, port), self.connect_timeout).await?;
        Ok(Arc::new(client))
    }
}
