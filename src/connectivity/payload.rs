//! Peer message shapes.
//!
//! ```json
//! {"id": "...", "schema_version": 1, "origin": "...", "sent_at": "...",
//!  "action": "sync_records", "training_programs": [...]}
//! {"id": "...", "schema_version": 1, "origin": "...", "sent_at": "...",
//!  "action": "request_full_state"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::merge::DeviceId;
use crate::models::{SyncRecord, TrainingProgram, TrainingSession};

/// Highest payload schema this build understands
pub const SCHEMA_VERSION: u32 = 1;

fn legacy_schema() -> u32 {
    1
}

/// Delivery path a frame travelled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Only while the peer is reachable
    Live,
    /// Queued, delivered eventually
    Durable,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Live => f.write_str("live"),
            Channel::Durable => f.write_str("durable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PayloadBody {
    SyncRecords {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_programs: Option<Vec<TrainingProgram>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        training_sessions: Option<Vec<TrainingSession>>,
    },
    RequestFullState,
    Ping,
    Pong,
}

impl PayloadBody {
    pub fn programs(programs: Vec<TrainingProgram>) -> Self {
        PayloadBody::SyncRecords {
            training_programs: Some(programs),
            training_sessions: None,
        }
    }

    pub fn sessions(sessions: Vec<TrainingSession>) -> Self {
        PayloadBody::SyncRecords {
            training_programs: None,
            training_sessions: Some(sessions),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PayloadBody::SyncRecords { .. } => "sync_records",
            PayloadBody::RequestFullState => "request_full_state",
            PayloadBody::Ping => "ping",
            PayloadBody::Pong => "pong",
        }
    }
}

/// Records of one type packed into a payload body
pub trait IntoBody: SyncRecord {
    fn into_body(records: Vec<Self>) -> PayloadBody;
}

impl IntoBody for TrainingProgram {
    fn into_body(records: Vec<Self>) -> PayloadBody {
        PayloadBody::programs(records)
    }
}

impl IntoBody for TrainingSession {
    fn into_body(records: Vec<Self>) -> PayloadBody {
        PayloadBody::sessions(records)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub id: Uuid,
    /// Missing on payloads from peers that predate versioning
    #[serde(default = "legacy_schema")]
    pub schema_version: u32,
    pub origin: DeviceId,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: PayloadBody,
}

impl Payload {
    pub fn new(origin: DeviceId, body: PayloadBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            origin,
            sent_at: Utc::now(),
            body,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.schema_version <= SCHEMA_VERSION
    }
}

/// What actually crosses the link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Payload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingInterval;

    #[test]
    fn test_programs_travel_under_training_programs_key() {
        let program = TrainingProgram::new("5K", vec![TrainingInterval::rest(30.0)]);
        let payload = Payload::new(DeviceId::new(), PayloadBody::programs(vec![program]));
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["action"], "sync_records");
        assert_eq!(value["schema_version"], 1);
        assert!(value["training_programs"].is_array());
        assert!(value.get("training_sessions").is_none());
    }

    #[test]
    fn test_unversioned_payload_defaults_to_v1() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "origin": "watch-1",
            "sent_at": Utc::now(),
            "action": "request_full_state"
        });
        let payload: Payload = serde_json::from_value(raw).unwrap();
        assert_eq!(payload.schema_version, 1);
        assert_eq!(payload.body, PayloadBody::RequestFullState);
        assert!(payload.is_supported());
    }

    #[test]
    fn test_future_schema_is_flagged() {
        let mut payload = Payload::new(DeviceId::new(), PayloadBody::Ping);
        payload.schema_version = SCHEMA_VERSION + 1;
        assert!(!payload.is_supported());
    }

    #[test]
    fn test_frame_serialization() {
        let frame = Frame {
            channel: Channel::Durable,
            payload: Payload::new(DeviceId::from_string("phone".into()), PayloadBody::Pong),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"channel\":\"durable\""));
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
