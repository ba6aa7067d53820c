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

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::dictionary::CollectionDictionary;
use crate::error::ProtocolError;

/// Dictionary key prefix of rosbridge sources
pub const DEFAULT_SOURCE_KEY: &str = "ros.system";

/// Dictionary key of a source opened without an explicit key; unique per endpoint
pub fn source_key(address: &str, port: u16) -> String {
    format!("{}.{}:{}", DEFAULT_SOURCE_KEY, address, port)
}

/// One flattened, timestamped observation of a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// `<source>.<topic>`
    pub id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub value: Map<String, Value>,
}

impl Sample {
    pub fn new(id: impl Into<String>, timestamp: i64, value: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            value,
        }
    }

    /// Name of the source this sample belongs to
    pub fn source_prefix(&self) -> &str {
        source_prefix(&self.id)
    }

    /// Narrow the sample to the single value addressed by `value_id`
    /// (`<source>.<topic>.<value>`), re-labelled with that id.
    pub fn project(&self, value_id: &str) -> Option<Sample> {
        let value_key = value_id
            .strip_prefix(self.id.as_str())
            .and_then(|rest| rest.strip_prefix('.'))?;
        let value = self.value.get(value_key)?;

        let mut narrowed = Map::new();
        narrowed.insert(value_key.to_string(), value.clone());
        Some(Sample::new(value_id, self.timestamp, narrowed))
    }
}

/// Source part of a `<source>.<topic>` id
pub fn source_prefix(id: &str) -> &str {
    id.split_once('.').map(|(source, _)| source).unwrap_or(id)
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

/// Payload of an `OPEN` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub rosbridgeurl: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub rosbridgeport: u16,
}

/// Payload of a `CLOSE` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub rosbridgeurl: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub rosbridgeport: u16,
}

/// Commands a dashboard client sends, one per text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Dictionary,
    Request {
        id: String,
        start_ms: i64,
        end_ms: i64,
    },
    Open(OpenRequest),
    Close(CloseRequest),
}

impl Command {
    /// Parse a space-delimited command frame; the first token selects the command
    pub fn parse(frame: &str) -> Result<Command, ProtocolError> {
        let frame = frame.trim();
        if frame.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let (name, rest) = frame.split_once(' ').unwrap_or((frame, ""));
        let rest = rest.trim();

        match name {
            "subscribe" => Ok(Command::Subscribe(required(rest, "subscribe", "id")?)),
            "unsubscribe" => Ok(Command::Unsubscribe(required(rest, "unsubscribe", "id")?)),
            "dictionary" => Ok(Command::Dictionary),
            "request" => {
                let mut args = rest.split_whitespace();
                let id = args.next().ok_or(ProtocolError::MissingArgument {
                    command: "request",
                    argument: "id",
                })?;
                let start = args.next().ok_or(ProtocolError::MissingArgument {
                    command: "request",
                    argument: "startSec",
                })?;
                let end = args.next().ok_or(ProtocolError::MissingArgument {
                    command: "request",
                    argument: "endSec",
                })?;
                Ok(Command::Request {
                    id: id.to_string(),
                    start_ms: seconds_to_millis(start)?,
                    end_ms: seconds_to_millis(end)?,
                })
            }
            "OPEN" => Ok(Command::Open(serde_json::from_str(rest)?)),
            "CLOSE" => Ok(Command::Close(serde_json::from_str(rest)?)),
            unknown => Err(ProtocolError::UnknownCommand(unknown.to_string())),
        }
    }
}

fn required(rest: &str, command: &'static str, argument: &'static str) -> Result<String, ProtocolError> {
    if rest.is_empty() {
        Err(ProtocolError::MissingArgument { command, argument })
    } else {
        Ok(rest.to_string())
    }
}

/// Convert an epoch-seconds argument (integer or fractional) to milliseconds
pub fn seconds_to_millis(text: &str) -> Result<i64, ProtocolError> {
    let seconds: f64 = text
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber(text.to_string()))?;
    if !seconds.is_finite() {
        return Err(ProtocolError::InvalidNumber(text.to_string()));
    }
    Ok((seconds * 1000.0).round() as i64)
}

/// Events pushed to a dashboard client as JSON text frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Event {
    Dictionary(CollectionDictionary),
    Point(Sample),
    History(Vec<Sample>),
}

impl Event {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Source lifecycle status carried on the notify endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceStatus {
    Open,
    Close,
}

/// Frame accepted by the notify endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotification {
    pub status: SourceStatus,
    #[serde(default)]
    pub name: Option<String>,
    pub rosbridgeurl: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub rosbridgeport: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_millis() {
        assert_eq!(seconds_to_millis("12").unwrap(), 12_000);
        assert_eq!(seconds_to_millis("1.5").unwrap(), 1_500);
        assert!(seconds_to_millis("soon").is_err());
        assert!(seconds_to_millis("inf").is_err());
    }

    #[test]
    fn test_source_key_is_per_endpoint() {
        assert_eq!(source_key("robot-1", 9090), "ros.system.robot-1:9090");
        assert_ne!(source_key("robot-1", 9090), source_key("robot-1", 9091));
    }

    #[test]
    fn test_source_prefix() {
        assert_eq!(source_prefix("sys1./imu"), "sys1");
        assert_eq!(source_prefix("sys1"), "sys1");
    }
}
