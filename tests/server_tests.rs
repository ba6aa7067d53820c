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

// End-to-end tests of the WebSocket endpoints

mod common;

use common::{imu_typedefs, MockConnector, MockTransport};
use futures_util::{SinkExt, Stream, StreamExt};
use rosmct_bridge::config::ServerConfig;
use rosmct_bridge::dictionary::DictionaryInfo;
use rosmct_bridge::history::{HistoryStore, MemoryStore};
use rosmct_bridge::protocol::Sample;
use rosmct_bridge::{RealtimeServer, SourceCollection};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    address: SocketAddr,
    collection: Arc<SourceCollection>,
    store: Arc<MemoryStore>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn start_server(connector: Arc<MockConnector>) -> Harness {
    let collection = Arc::new(SourceCollection::new(
        DictionaryInfo::new("Ros Systems", "rsCollection"),
        connector,
    ));
    let store = Arc::new(MemoryStore::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = RealtimeServer::new(
        ServerConfig::default(),
        collection.clone(),
        Some(store.clone()),
        TIMEOUT,
    );

    let (shutdown, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.serve(listener, async move {
        let _ = stopped.await;
    }));

    Harness {
        address,
        collection,
        store,
        shutdown: Some(shutdown),
    }
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("no frame in time")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_realtime_endpoint() {
    let connector = MockConnector::new();
    connector.register("localhost", 9090, MockTransport::new().with_topic("/imu", "test_msgs/Imu", imu_typedefs()));
    let harness = start_server(connector.clone()).await;
    harness
        .collection
        .add_system("localhost", 9090, DictionaryInfo::new("sys1", "ros.system"))
        .await
        .unwrap();

    let mut stored = Map::new();
    stored.insert("x".to_string(), json!(0.5));
    harness.store.insert(&Sample::new("sys1./imu", 4_000, stored)).await.unwrap();

    let (mut ws, _) = connect_async(format!("ws://{}/realtime", harness.address)).await.unwrap();
    ws.send(Message::Text("subscribe sys1./imu".into())).await.unwrap();
    ws.send(Message::Text("dictionary".into())).await.unwrap();

    let dictionary = next_json(&mut ws).await;
    assert_eq!(dictionary["type"], "dictionary");
    assert_eq!(dictionary["value"]["Systems"][0]["name"], "sys1");
    assert_eq!(dictionary["value"]["Systems"][0]["topics"][0]["name"], "/imu");

    let mut value = Map::new();
    value.insert("x".to_string(), json!(1.0));
    value.insert("y".to_string(), json!(2.0));
    let source = harness.collection.systems().await.remove(0);
    source.notify(Sample::new("sys1./imu", 1000, value));

    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "point", "value": {"id": "sys1./imu", "timestamp": 1000, "value": {"x": 1.0, "y": 2.0}}})
    );

    ws.send(Message::Text("request sys1./imu 3 5".into())).await.unwrap();
    let history = next_json(&mut ws).await;
    assert_eq!(history["type"], "history");
    assert_eq!(history["value"][0]["timestamp"], 4_000);

    ws.close(None).await.unwrap();
    for _ in 0..100 {
        if source.listener_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(source.listener_count(), 0);
}

#[tokio::test]
async fn test_notify_endpoint() {
    let connector = MockConnector::new();
    let transport = connector.register("localhost", 9091, MockTransport::new().with_topic("/imu", "test_msgs/Imu", imu_typedefs()));
    let harness = start_server(connector.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/realtime/notify", harness.address)).await.unwrap();
    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(
        json!({"status": "OPEN", "name": "sys2", "rosbridgeurl": "localhost", "rosbridgeport": "9091"})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    for _ in 0..100 {
        if harness.collection.len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.collection.len().await, 1);
    let dictionary = harness.collection.get_dictionary_within(TIMEOUT).await.unwrap();
    assert_eq!(dictionary.members[0].name, "sys2");

    ws.send(Message::Text(
        json!({"status": "CLOSE", "rosbridgeurl": "localhost", "rosbridgeport": 9091})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    for _ in 0..100 {
        if harness.collection.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.collection.is_empty().await);
    assert!(transport.is_closed());
}
