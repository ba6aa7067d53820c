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

// Asynchronous insert queue in front of a history store

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::HistoryStore;
use crate::protocol::Sample;

// Idle workers re-check the queue at least this often
const IDLE_POLL: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub accepted: u64,
    pub dropped: u64,
    pub written: u64,
    pub failed: u64,
    pub queued: usize,
}

/// Bounded queue of samples drained into the store by worker tasks.
///
/// `record` never blocks: when the queue is full the sample is dropped.
pub struct HistoryWriter {
    store: Arc<dyn HistoryStore>,
    queue: ArrayQueue<Arc<Sample>>,
    wakeup: Notify,
    stopping: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,

    accepted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

impl HistoryWriter {
    pub fn new(store: Arc<dyn HistoryStore>, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue: ArrayQueue::new(queue_capacity.max(1)),
            wakeup: Notify::new(),
            stopping: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        self.store.clone()
    }

    /// Spawn `count` insert workers
    pub fn start(self: &Arc<Self>, count: usize) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker_id in 0..count.max(1) {
            workers.push(tokio::spawn(self.clone().worker_loop(worker_id)));
        }
        info!(
            "Started {} history insert workers ({} backend)",
            workers.len(),
            self.store.backend_type()
        );
    }

    /// Queue a sample for insertion
    pub fn record(&self, sample: Arc<Sample>) {
        match self.queue.push(sample) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                self.wakeup.notify_one();
            }
            Err(sample) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "History queue full, dropping sample '{}' at {}",
                    sample.id, sample.timestamp
                );
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!("History worker {} started", worker_id);
        loop {
            while let Some(sample) = self.queue.pop() {
                self.write(&sample).await;
            }
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            let _ = tokio::time::timeout(IDLE_POLL, self.wakeup.notified()).await;
        }
        debug!("History worker {} stopped", worker_id);
    }

    async fn write(&self, sample: &Sample) {
        match self.store.insert_with_retry(sample).await {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Dropping sample '{}' at {} after failed inserts: {}",
                    sample.id,
                    sample.timestamp,
                    e
                );
            }
        }
    }

    /// Insert everything currently queued on the calling task
    pub async fn flush(&self) {
        while let Some(sample) = self.queue.pop() {
            self.write(&sample).await;
        }
    }

    /// Stop the workers once the queue is drained
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.wakeup.notify_waiters();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for mut worker in workers {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
                warn!("History worker did not stop in {:?}, aborting", SHUTDOWN_GRACE);
                worker.abort();
            }
        }

        self.flush().await;
        let stats = self.stats();
        info!(
            "History writer stopped: {} written, {} failed, {} dropped",
            stats.written, stats.failed, stats.dropped
        );
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queued: self.queue.len(),
        }
    }
}
