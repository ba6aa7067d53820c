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

// WebSocket endpoints for dashboard clients
//
//   GET <path>         command protocol, one SubscriptionRouter per socket
//   GET <path>/notify  source OPEN/CLOSE notifications

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::collection::SourceCollection;
use crate::config::ServerConfig;
use crate::dictionary::DictionaryInfo;
use crate::history::HistoryStore;
use crate::protocol::{source_key, SourceStatus, StatusNotification};
use crate::router::SubscriptionRouter;

#[derive(Clone)]
struct AppState {
    collection: Arc<SourceCollection>,
    history: Option<Arc<dyn HistoryStore>>,
    dictionary_timeout: Duration,
}

pub struct RealtimeServer {
    config: ServerConfig,
    state: AppState,
}

impl RealtimeServer {
    pub fn new(
        config: ServerConfig,
        collection: Arc<SourceCollection>,
        history: Option<Arc<dyn HistoryStore>>,
        dictionary_timeout: Duration,
    ) -> Self {
        Self {
            config,
            state: AppState {
                collection,
                history,
                dictionary_timeout,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, get(handle_realtime))
            .route(&self.config.notify_path(), get(handle_notify))
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {}", address))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local: SocketAddr = listener.local_addr()?;
        info!(
            "Realtime server listening on ws://{}{} (notify: {})",
            local,
            self.config.path,
            self.config.notify_path()
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("Realtime server failed")?;

        info!("Realtime server stopped");
        Ok(())
    }
}

async fn handle_realtime(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| realtime_connection(socket, state))
}

async fn realtime_connection(mut socket: WebSocket, state: AppState) {
    let mut router = SubscriptionRouter::new(
        state.collection,
        state.history,
        state.dictionary_timeout,
    )
    .await;
    debug!("Realtime client connected ({} sources)", router.source_count());

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                router.handle_frame(text.as_str());
            }

            event = router.next_event() => {
                let Some(event) = event else { break };
                match event.to_json() {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to encode event: {}", e),
                }
            }
        }
    }

    debug!(
        "Realtime client disconnected ({} subscriptions)",
        router.subscription_count()
    );
}

async fn handle_notify(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| notify_connection(socket, state))
}

async fn notify_connection(mut socket: WebSocket, state: AppState) {
    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let notification: StatusNotification = match serde_json::from_str(text.as_str()) {
            Ok(notification) => notification,
            Err(e) => {
                debug!("Ignoring notify frame: {}", e);
                continue;
            }
        };

        let collection = state.collection.clone();
        tokio::spawn(apply_notification(collection, notification));
    }
}

/// Add or remove the source named by a status notification
pub async fn apply_notification(collection: Arc<SourceCollection>, notification: StatusNotification) {
    let StatusNotification {
        status,
        name,
        rosbridgeurl,
        rosbridgeport,
    } = notification;

    match status {
        SourceStatus::Open => {
            let Some(name) = name else {
                debug!("Ignoring OPEN for {}:{} without a name", rosbridgeurl, rosbridgeport);
                return;
            };
            let info = DictionaryInfo::new(name, source_key(&rosbridgeurl, rosbridgeport));
            if let Err(e) = collection.add_system(&rosbridgeurl, rosbridgeport, info).await {
                warn!("Opening {}:{} failed: {}", rosbridgeurl, rosbridgeport, e);
            }
        }
        SourceStatus::Close => {
            collection.remove_system(&rosbridgeurl, rosbridgeport).await;
        }
    }
}
