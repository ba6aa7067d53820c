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

// Sample listener registry
//
// Listeners are identified by an opaque handle rather than by function
// identity, so registering the same closure twice yields two independent
// registrations.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::warn;

use crate::protocol::Sample;

/// Callback invoked for every sample a source emits
pub type Listener = Arc<dyn Fn(Arc<Sample>) + Send + Sync>;

/// Ordered set of listeners for one source
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    // Ids are allocated monotonically, so key order is registration order
    listeners: Mutex<BTreeMap<u64, Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a listener; it stays registered until the handle is
    /// unlistened or dropped
    pub fn listen(self: &Arc<Self>, listener: Listener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(id, listener);
        ListenerHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Deliver a sample to every listener in registration order.
    ///
    /// The registry is snapshotted first, so listeners may unlisten (or
    /// register others) from inside the callback. A panicking listener is
    /// logged and skipped.
    pub fn notify(&self, sample: Sample) {
        let sample = Arc::new(sample);
        let snapshot: Vec<(u64, Listener)> = self
            .entries()
            .iter()
            .map(|(id, l)| (*id, l.clone()))
            .collect();

        for (id, listener) in snapshot {
            let delivered = sample.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(delivered))).is_err() {
                warn!("Listener {} panicked while handling '{}'", id, sample.id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.entries().clear();
    }

    fn remove(&self, id: u64) {
        self.entries().remove(&id);
    }
}

/// Cancellation token for one listener registration
#[must_use = "dropping the handle unregisters the listener"]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    /// Unregister the listener. Safe if the registry is already gone.
    pub fn unlisten(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Registrations of one listener across several sources
#[must_use = "dropping the handle unregisters the listener"]
#[derive(Default)]
pub struct CompositeListenerHandle {
    handles: Vec<ListenerHandle>,
}

impl CompositeListenerHandle {
    pub fn new(handles: Vec<ListenerHandle>) -> Self {
        Self { handles }
    }

    /// Number of sources the listener is registered on
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn unlisten(self) {}
}
