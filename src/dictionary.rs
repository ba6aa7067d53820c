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

// Telemetry dictionary construction
//
// Turns the raw schema a source reports for its topics into the normalized
// dictionary consumed by the dashboard:
// - one entry per topic
// - one typed value descriptor per scalar leaf field (dotted path for nesting)
// - an implicit `utc` timestamp descriptor closing every entry

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use tracing::trace;

/// Member list name used for a source's topics
pub const TOPICS_MEMBERS: &str = "topics";

/// Member list name used for the collection's sources
pub const SYSTEMS_MEMBERS: &str = "Systems";

/// Key of the implicit timestamp descriptor
pub const TIMESTAMP_KEY: &str = "utc";

// Nested message types deeper than this are not flattened
const MAX_NESTING_DEPTH: usize = 8;

/// Display format of a telemetry value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    Int,
    Float,
    Byte,
    String,
    Utc,
}

impl ValueFormat {
    /// Map a ROS primitive type to a value format.
    ///
    /// Returns `None` for anything that is not a scalar primitive, such as
    /// nested message types.
    pub fn from_primitive(primitive: &str) -> Option<Self> {
        match primitive {
            "uint64" | "int64" | "uint32" | "int32" | "uint16" | "int16" | "uint8" | "int8" => {
                Some(ValueFormat::Int)
            }
            "float32" | "float64" => Some(ValueFormat::Float),
            "byte" => Some(ValueFormat::Byte),
            "string" => Some(ValueFormat::String),
            _ => None,
        }
    }
}

/// Axis hints for the dashboard plots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<u32>,
}

/// One typed value exposed by a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDescriptor {
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub format: ValueFormat,
    pub hints: Hints,
}

impl ValueDescriptor {
    /// Descriptor for a scalar field, addressed by its dotted path
    pub fn field(path: String, format: ValueFormat) -> Self {
        Self {
            key: path.clone(),
            name: path,
            units: Some("None".to_string()),
            source: None,
            format,
            hints: Hints {
                domain: None,
                range: Some(1),
            },
        }
    }

    /// The implicit timestamp descriptor, used as the ordering axis
    pub fn timestamp() -> Self {
        Self {
            key: TIMESTAMP_KEY.to_string(),
            name: "Timestamp".to_string(),
            units: None,
            source: Some("timestamp".to_string()),
            format: ValueFormat::Utc,
            hints: Hints {
                domain: Some(1),
                range: None,
            },
        }
    }

    pub fn is_timestamp(&self) -> bool {
        self.format == ValueFormat::Utc
    }
}

/// Dictionary entry for a single topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub name: String,
    pub key: String,
    pub values: Vec<ValueDescriptor>,
}

impl TopicEntry {
    /// Descriptors backed by message fields (everything but the timestamp)
    pub fn field_values(&self) -> impl Iterator<Item = &ValueDescriptor> {
        self.values.iter().filter(|v| !v.is_timestamp())
    }

    /// Whether the topic exposes any telemetry besides its timestamp
    pub fn has_values(&self) -> bool {
        self.field_values().next().is_some()
    }
}

/// A message type definition as reported by `rosapi/message_details`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub fieldnames: Vec<String>,
    #[serde(default)]
    pub fieldtypes: Vec<String>,
    /// -1 for scalar fields, otherwise the array length (0 when unbounded)
    #[serde(default)]
    pub fieldarraylen: Vec<i64>,
}

impl TypeDef {
    fn is_array(&self, index: usize) -> bool {
        self.fieldarraylen.get(index).copied().unwrap_or(-1) >= 0
    }
}

/// Raw schema description of one topic
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInfo {
    pub name: String,
    pub message_type: String,
    pub typedefs: Vec<TypeDef>,
}

/// Name and key of a dictionary node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryInfo {
    pub name: String,
    pub key: String,
}

impl DictionaryInfo {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

/// A dictionary node whose member list is serialized under `members_name`
#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary<M> {
    pub name: String,
    pub key: String,
    pub members_name: String,
    pub members: Vec<M>,
}

/// Dictionary of one source: its topics
pub type SourceDictionary = Dictionary<TopicEntry>;

/// Dictionary of the whole collection: one child per source
pub type CollectionDictionary = Dictionary<SourceDictionary>;

impl<M: Serialize> Serialize for Dictionary<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("key", &self.key)?;
        map.serialize_entry(&self.members_name, &self.members)?;
        map.end()
    }
}

impl SourceDictionary {
    pub fn topic(&self, name: &str) -> Option<&TopicEntry> {
        self.members.iter().find(|t| t.name == name)
    }
}

/// Build the dictionary entry for one topic.
///
/// Scalar fields whose primitive type has a format mapping become
/// descriptors; nested message fields are flattened by dotted path; arrays
/// and unmapped types are skipped. The timestamp descriptor always comes last.
pub fn build_entry(topic: &TopicInfo) -> TopicEntry {
    let by_name: HashMap<&str, &TypeDef> = topic
        .typedefs
        .iter()
        .map(|t| (t.type_name.as_str(), t))
        .collect();

    let root = by_name
        .get(topic.message_type.as_str())
        .copied()
        .or_else(|| topic.typedefs.first());

    let mut values = Vec::new();
    if let Some(root) = root {
        flatten_fields(root, &by_name, "", 0, &mut values);
    }
    values.push(ValueDescriptor::timestamp());

    TopicEntry {
        name: topic.name.clone(),
        key: topic.name.clone(),
        values,
    }
}

fn flatten_fields(
    typedef: &TypeDef,
    by_name: &HashMap<&str, &TypeDef>,
    prefix: &str,
    depth: usize,
    out: &mut Vec<ValueDescriptor>,
) {
    for (index, (field, field_type)) in typedef
        .fieldnames
        .iter()
        .zip(&typedef.fieldtypes)
        .enumerate()
    {
        let path = if prefix.is_empty() {
            field.clone()
        } else {
            format!("{}.{}", prefix, field)
        };

        if typedef.is_array(index) {
            trace!("Skipping array field '{}'", path);
            continue;
        }

        if let Some(format) = ValueFormat::from_primitive(field_type) {
            out.push(ValueDescriptor::field(path, format));
        } else if let Some(nested) = by_name.get(field_type.as_str()) {
            if depth + 1 < MAX_NESTING_DEPTH {
                flatten_fields(nested, by_name, &path, depth + 1, out);
            }
        } else {
            trace!("Skipping field '{}' of unmapped type '{}'", path, field_type);
        }
    }
}

/// Assemble a dictionary node from its members.
///
/// `members_name` is the key the member list is serialized under:
/// [`TOPICS_MEMBERS`] for a source, [`SYSTEMS_MEMBERS`] for the collection.
pub fn build_dictionary<M>(info: &DictionaryInfo, members_name: &str, members: Vec<M>) -> Dictionary<M> {
    Dictionary {
        name: info.name.clone(),
        key: info.key.clone(),
        members_name: members_name.to_string(),
        members,
    }
}
