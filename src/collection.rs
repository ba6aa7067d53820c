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

// A dynamic set of sources exposed as one telemetry namespace

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::dictionary::{build_dictionary, CollectionDictionary, DictionaryInfo, SYSTEMS_MEMBERS};
use crate::error::BridgeError;
use crate::history::HistoryWriter;
use crate::listener::{CompositeListenerHandle, Listener, ListenerHandle};
use crate::protocol::Sample;
use crate::source::SourceConnection;
use crate::transport::Connector;

struct Member {
    connection: Arc<SourceConnection>,
    // Feeds the history writer; dropped together with the member
    _recording: Option<ListenerHandle>,
}

/// Sources keyed by `(address, port)`
pub struct SourceCollection {
    info: DictionaryInfo,
    connector: Arc<dyn Connector>,
    history: Option<Arc<HistoryWriter>>,
    systems: RwLock<Vec<Member>>,
}

impl SourceCollection {
    pub fn new(info: DictionaryInfo, connector: Arc<dyn Connector>) -> Self {
        Self {
            info,
            connector,
            history: None,
            systems: RwLock::new(Vec::new()),
        }
    }

    /// Persist every sample of every member through `writer`, including
    /// members added before this call
    pub fn with_history(mut self, writer: Arc<HistoryWriter>) -> Self {
        for member in self.systems.get_mut().iter_mut() {
            member._recording = Some(record_into(&member.connection, &writer));
        }
        self.history = Some(writer);
        self
    }

    pub fn info(&self) -> &DictionaryInfo {
        &self.info
    }

    /// Add a source unless one already exists for `(address, port)`.
    ///
    /// A source name prefixes every sample id, so it must be non-empty, free
    /// of `.` and not taken by a source at another endpoint.
    ///
    /// Resolves once the new source's dictionary is ready. Existing
    /// `listen` registrations do not cover the new source; callers re-run
    /// `listen` to pick it up.
    pub async fn add_system(&self, address: &str, port: u16, info: DictionaryInfo) -> Result<(), BridgeError> {
        let start = {
            let mut systems = self.systems.write().await;
            if systems.iter().any(|m| m.connection.matches(address, port)) {
                debug!("Source at {}:{} already present", address, port);
                return Ok(());
            }
            check_name(&systems, &info.name)?;

            let connection = SourceConnection::new(address, port, info);
            let recording = self
                .history
                .as_ref()
                .map(|writer| record_into(&connection, writer));
            let start = connection.start(self.connector.clone());
            info!(
                "Added source '{}' at {}:{}",
                connection.name(),
                address,
                port
            );
            systems.push(Member {
                connection,
                _recording: recording,
            });
            start
        };

        start.await.map(|_| ())
    }

    /// Disconnect and drop every source at `(address, port)`; returns how many were removed
    pub async fn remove_system(&self, address: &str, port: u16) -> usize {
        let removed: Vec<Member> = {
            let mut systems = self.systems.write().await;
            let (removed, kept) = std::mem::take(&mut *systems)
                .into_iter()
                .partition(|m| m.connection.matches(address, port));
            *systems = kept;
            removed
        };

        for member in &removed {
            member.connection.disconnect().await;
            info!("Removed source '{}' at {}:{}", member.connection.name(), address, port);
        }
        removed.len()
    }

    /// Composite dictionary of all current members.
    ///
    /// Waits for members still connecting; members that failed or were
    /// closed are left out. An empty collection yields an empty dictionary.
    pub async fn get_dictionary(&self) -> CollectionDictionary {
        let members = self.systems().await;
        let dictionaries = join_all(members.iter().map(|m| m.dictionary())).await;

        let ready: Vec<_> = dictionaries
            .into_iter()
            .flatten()
            .map(|d| d.as_ref().clone())
            .collect();
        build_dictionary(&self.info, SYSTEMS_MEMBERS, ready)
    }

    /// [`get_dictionary`](Self::get_dictionary) bounded by `timeout`
    pub async fn get_dictionary_within(&self, timeout: Duration) -> Result<CollectionDictionary, BridgeError> {
        tokio::time::timeout(timeout, self.get_dictionary())
            .await
            .map_err(|_| {
                warn!("Collection dictionary not ready after {:?}", timeout);
                BridgeError::DictionaryTimeout(timeout)
            })
    }

    /// Register `listener` on every current member
    pub async fn listen(&self, listener: Listener) -> CompositeListenerHandle {
        let systems = self.systems.read().await;
        let handles = systems
            .iter()
            .map(|m| m.connection.listen(listener.clone()))
            .collect();
        CompositeListenerHandle::new(handles)
    }

    /// Snapshot of the current members
    pub async fn systems(&self) -> Vec<Arc<SourceConnection>> {
        self.systems
            .read()
            .await
            .iter()
            .map(|m| m.connection.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.systems.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.systems.read().await.is_empty()
    }

    /// Disconnect and drop every member
    pub async fn shutdown(&self) {
        let members = std::mem::take(&mut *self.systems.write().await);
        for member in &members {
            member.connection.disconnect().await;
        }
        info!("Collection '{}' shut down ({} sources)", self.info.name, members.len());
    }
}

fn record_into(connection: &SourceConnection, writer: &Arc<HistoryWriter>) -> ListenerHandle {
    let writer = writer.clone();
    connection.listen(Arc::new(move |sample: Arc<Sample>| writer.record(sample)))
}

fn check_name(systems: &[Member], name: &str) -> Result<(), BridgeError> {
    let reason = if name.is_empty() {
        "name is empty".to_string()
    } else if name.contains('.') {
        "name contains '.'".to_string()
    } else if let Some(taken) = systems.iter().find(|m| m.connection.name() == name) {
        format!(
            "name already used by {}:{}",
            taken.connection.address(),
            taken.connection.port()
        )
    } else {
        return Ok(());
    };

    warn!("Rejecting source '{}': {}", name, reason);
    Err(BridgeError::InvalidSource {
        name: name.to_string(),
        reason,
    })
}
