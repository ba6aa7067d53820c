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

use rosmct_bridge::dictionary::{build_dictionary, DictionaryInfo, SYSTEMS_MEMBERS};
use rosmct_bridge::protocol::*;
use rosmct_bridge::ProtocolError;
use serde_json::{json, Map};

#[test]
fn test_parse_subscribe_commands() {
    assert_eq!(
        Command::parse("subscribe sys1./imu").unwrap(),
        Command::Subscribe("sys1./imu".to_string())
    );
    assert_eq!(
        Command::parse("unsubscribe sys1./imu").unwrap(),
        Command::Unsubscribe("sys1./imu".to_string())
    );
    assert_eq!(Command::parse("dictionary").unwrap(), Command::Dictionary);
}

#[test]
fn test_parse_request_converts_seconds() {
    assert_eq!(
        Command::parse("request sys1./imu 1.5 3").unwrap(),
        Command::Request {
            id: "sys1./imu".to_string(),
            start_ms: 1_500,
            end_ms: 3_000,
        }
    );
}

#[test]
fn test_parse_open_with_string_port() {
    let command =
        Command::parse(r#"OPEN {"name":"sys2","rosbridgeurl":"10.0.0.2","rosbridgeport":"9090"}"#).unwrap();
    assert_eq!(
        command,
        Command::Open(OpenRequest {
            name: "sys2".to_string(),
            key: None,
            rosbridgeurl: "10.0.0.2".to_string(),
            rosbridgeport: 9090,
        })
    );
}

#[test]
fn test_parse_close() {
    let command = Command::parse(r#"CLOSE {"rosbridgeurl":"10.0.0.2","rosbridgeport":9090}"#).unwrap();
    assert_eq!(
        command,
        Command::Close(CloseRequest {
            rosbridgeurl: "10.0.0.2".to_string(),
            rosbridgeport: 9090,
        })
    );
}

#[test]
fn test_parse_errors() {
    assert!(matches!(Command::parse("  "), Err(ProtocolError::Empty)));
    assert!(matches!(Command::parse("launch now"), Err(ProtocolError::UnknownCommand(_))));
    assert!(matches!(
        Command::parse("request sys1./imu 1"),
        Err(ProtocolError::MissingArgument { argument: "endSec", .. })
    ));
    assert!(matches!(
        Command::parse("request sys1./imu x 2"),
        Err(ProtocolError::InvalidNumber(_))
    ));
    assert!(matches!(
        Command::parse(r#"OPEN {"name":"a","rosbridgeurl":"h","rosbridgeport":"port"}"#),
        Err(ProtocolError::InvalidPayload(_))
    ));
}

#[test]
fn test_point_event_json() {
    let mut value = Map::new();
    value.insert("x".to_string(), json!(1.0));
    let event = Event::Point(Sample::new("sys1./imu", 1000, value));

    let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
    assert_eq!(
        json,
        json!({"type": "point", "value": {"id": "sys1./imu", "timestamp": 1000, "value": {"x": 1.0}}})
    );
}

#[test]
fn test_history_and_dictionary_event_json() {
    let history = serde_json::to_value(Event::History(vec![])).unwrap();
    assert_eq!(history, json!({"type": "history", "value": []}));

    let dictionary = build_dictionary(&DictionaryInfo::new("Ros Systems", "rsCollection"), SYSTEMS_MEMBERS, vec![]);
    let event = serde_json::to_value(Event::Dictionary(dictionary)).unwrap();
    assert_eq!(event["type"], "dictionary");
    assert_eq!(event["value"]["Systems"], json!([]));
}

#[test]
fn test_sample_projection() {
    let mut value = Map::new();
    value.insert("x".to_string(), json!(1.0));
    value.insert("pose.y".to_string(), json!(2.0));
    let sample = Sample::new("sys1./odom", 5, value);

    let narrowed = sample.project("sys1./odom.pose.y").unwrap();
    assert_eq!(narrowed.id, "sys1./odom.pose.y");
    assert_eq!(narrowed.value.len(), 1);
    assert_eq!(narrowed.value["pose.y"], json!(2.0));

    assert!(sample.project("sys1./odom.z").is_none());
    assert!(sample.project("sys1./odometry").is_none());
}

#[test]
fn test_status_notification() {
    let notification: StatusNotification =
        serde_json::from_str(r#"{"status":"OPEN","name":"sys1","rosbridgeurl":"h","rosbridgeport":"9090"}"#).unwrap();
    assert_eq!(notification.status, SourceStatus::Open);
    assert_eq!(notification.rosbridgeport, 9090);

    let close: StatusNotification =
        serde_json::from_str(r#"{"status":"CLOSE","rosbridgeurl":"h","rosbridgeport":9090}"#).unwrap();
    assert_eq!(close.status, SourceStatus::Close);
    assert!(close.name.is_none());
}
