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

// History persistence
//
// A trait-based store abstraction with memory, filesystem and ReductStore
// backends, and a queued writer that inserts every sample once.

pub mod factory;
pub mod filesystem;
pub mod memory;
pub mod reductstore;
pub mod store;
pub mod writer;

pub use factory::HistoryFactory;
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use reductstore::ReductStore;
pub use store::{entry_path, topic_to_entry_name, HistoryStore, DEFAULT_MAX_RETRIES};
pub use writer::{HistoryWriter, WriterStats};
