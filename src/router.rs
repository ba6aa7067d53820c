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

// Per-connection command handling and sample filtering
//
// Samples are filtered against the subscription set twice: before they are
// queued for the connection, and again when dequeued, so an id unsubscribed
// while its sample was queued is never delivered. The queue is bounded; a
// sample arriving while it is full is dropped.

use dashmap::DashSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::collection::SourceCollection;
use crate::dictionary::DictionaryInfo;
use crate::history::HistoryStore;
use crate::listener::CompositeListenerHandle;
use crate::protocol::{source_key, source_prefix, CloseRequest, Command, Event, OpenRequest, Sample};

/// Samples a connection may have queued before they are dropped
pub const CLIENT_QUEUE_CAPACITY: usize = 1024;

enum Reply {
    Event(Event),
    /// The collection gained a member; listen again to cover it
    Relisten,
}

/// Subscription state of one downstream connection
pub struct SubscriptionRouter {
    collection: Arc<SourceCollection>,
    history: Option<Arc<dyn HistoryStore>>,
    dictionary_timeout: Duration,

    subscriptions: Arc<DashSet<String>>,
    pending: VecDeque<Event>,

    samples_tx: mpsc::Sender<Arc<Sample>>,
    samples: mpsc::Receiver<Arc<Sample>>,
    dropped: Arc<AtomicU64>,
    replies_tx: mpsc::UnboundedSender<Reply>,
    replies: mpsc::UnboundedReceiver<Reply>,

    listening: Option<CompositeListenerHandle>,
    relisten_pending: bool,
}

impl SubscriptionRouter {
    /// Register on every current member of `collection`
    pub async fn new(
        collection: Arc<SourceCollection>,
        history: Option<Arc<dyn HistoryStore>>,
        dictionary_timeout: Duration,
    ) -> Self {
        let (samples_tx, samples) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let (replies_tx, replies) = mpsc::unbounded_channel();
        let mut router = Self {
            collection,
            history,
            dictionary_timeout,
            subscriptions: Arc::new(DashSet::new()),
            pending: VecDeque::new(),
            samples_tx,
            samples,
            dropped: Arc::new(AtomicU64::new(0)),
            replies_tx,
            replies,
            listening: None,
            relisten_pending: true,
        };
        router.relisten().await;
        router
    }

    /// Number of subscribed ids
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.subscriptions.contains(id)
    }

    /// Samples waiting in this connection's queue
    pub fn queued(&self) -> usize {
        self.samples.len()
    }

    /// Samples dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of sources currently feeding this connection
    pub fn source_count(&self) -> usize {
        self.listening.as_ref().map(|h| h.len()).unwrap_or(0)
    }

    // Drop the old registration before making the new one, so a sample is
    // never queued twice
    async fn relisten(&mut self) {
        self.listening = None;
        let tx = self.samples_tx.clone();
        let subscriptions = self.subscriptions.clone();
        let dropped = self.dropped.clone();
        let handle = self
            .collection
            .listen(Arc::new(move |sample: Arc<Sample>| {
                if !wanted(&subscriptions, &sample.id) {
                    return;
                }
                if let Err(TrySendError::Full(sample)) = tx.try_send(sample) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Client queue full, dropping '{}' at {}", sample.id, sample.timestamp);
                }
            }))
            .await;
        self.listening = Some(handle);
        self.relisten_pending = false;
    }

    /// Apply one inbound text frame. Malformed frames are ignored.
    pub fn handle_frame(&mut self, frame: &str) {
        match Command::parse(frame) {
            Ok(command) => self.handle_command(command),
            Err(e) => debug!("Ignoring command frame '{}': {}", frame, e),
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe(id) => {
                self.subscriptions.insert(id);
            }
            Command::Unsubscribe(id) => {
                self.subscriptions.remove(&id);
            }
            Command::Dictionary => self.request_dictionary(),
            Command::Request {
                id,
                start_ms,
                end_ms,
            } => self.request_history(id, start_ms, end_ms),
            Command::Open(request) => self.open_source(request),
            Command::Close(request) => self.close_source(request),
        }
    }

    fn request_dictionary(&self) {
        let collection = self.collection.clone();
        let replies = self.replies_tx.clone();
        let timeout = self.dictionary_timeout;
        tokio::spawn(async move {
            match collection.get_dictionary_within(timeout).await {
                Ok(dictionary) => {
                    let _ = replies.send(Reply::Event(Event::Dictionary(dictionary)));
                }
                Err(e) => warn!("Dropping dictionary request: {}", e),
            }
        });
    }

    fn request_history(&self, id: String, start_ms: i64, end_ms: i64) {
        let Some(store) = self.history.clone() else {
            debug!("History disabled, dropping request for '{}'", id);
            return;
        };
        let replies = self.replies_tx.clone();
        tokio::spawn(async move {
            match store.query(source_prefix(&id), &id, start_ms, end_ms).await {
                Ok(samples) => {
                    let _ = replies.send(Reply::Event(Event::History(samples)));
                }
                Err(e) => warn!("History query for '{}' failed: {}", id, e),
            }
        });
    }

    fn open_source(&self, request: OpenRequest) {
        let collection = self.collection.clone();
        let replies = self.replies_tx.clone();
        let timeout = self.dictionary_timeout;
        tokio::spawn(async move {
            let key = request
                .key
                .unwrap_or_else(|| source_key(&request.rosbridgeurl, request.rosbridgeport));
            let info = DictionaryInfo::new(request.name, key);
            let added = collection.add_system(&request.rosbridgeurl, request.rosbridgeport, info);
            match tokio::time::timeout(timeout, added).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Opening {}:{} failed: {}",
                    request.rosbridgeurl, request.rosbridgeport, e
                ),
                Err(_) => warn!(
                    "Source {}:{} not ready after {:?}",
                    request.rosbridgeurl, request.rosbridgeport, timeout
                ),
            }
            let _ = replies.send(Reply::Relisten);
        });
    }

    fn close_source(&self, request: CloseRequest) {
        let collection = self.collection.clone();
        tokio::spawn(async move {
            collection
                .remove_system(&request.rosbridgeurl, request.rosbridgeport)
                .await;
        });
    }

    // Events for one dequeued sample: the whole point if its id is
    // subscribed, plus one narrowed point per subscribed value of it
    fn deliver(&mut self, sample: &Sample) {
        if self.subscriptions.contains(&sample.id) {
            self.pending.push_back(Event::Point(sample.clone()));
        }
        for subscription in self.subscriptions.iter() {
            if is_value_of(subscription.key(), &sample.id) {
                if let Some(narrowed) = sample.project(subscription.key()) {
                    self.pending.push_back(Event::Point(narrowed));
                }
            }
        }
    }

    /// Wait for the next event to send to the client.
    ///
    /// Cancel safe: dropping the future loses no event.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            if self.relisten_pending {
                self.relisten().await;
            }
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            tokio::select! {
                Some(sample) = self.samples.recv() => self.deliver(&sample),
                Some(reply) = self.replies.recv() => match reply {
                    Reply::Event(event) => return Some(event),
                    Reply::Relisten => self.relisten_pending = true,
                },
                else => return None,
            }
        }
    }
}

// `<source>.<topic>.<value>` subscription addressing a value of `id`
fn is_value_of(subscription: &str, id: &str) -> bool {
    subscription
        .strip_prefix(id)
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('.'))
}

fn wanted(subscriptions: &DashSet<String>, id: &str) -> bool {
    subscriptions.contains(id) || subscriptions.iter().any(|s| is_value_of(s.key(), id))
}
