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

// Error types for the bridge core

use std::time::Duration;

/// Failures talking to an upstream rosbridge source
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to connect to rosbridge at {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("rosbridge transport closed")]
    TransportClosed,

    #[error("service call {service} failed: {reason}")]
    ServiceCall { service: String, reason: String },

    #[error("malformed rosbridge message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("source '{0}' was disconnected")]
    Disconnected(String),

    #[error("dictionary not ready after {0:?}")]
    DictionaryTimeout(Duration),

    #[error("source '{name}' rejected: {reason}")]
    InvalidSource { name: String, reason: String },
}

/// Failures of the history store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

/// Malformed downstream command frames
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("command '{command}' is missing argument <{argument}>")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}
