//! Bus events and reserved topics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Drop every cached permission graph
pub const TOPIC_GRAPH_INVALIDATE: &str = "graph.invalidate";
/// Drop compiled policies; payload names the policy
pub const TOPIC_POLICY_INVALIDATE: &str = "policy.invalidate";

/// Transient message on a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    /// Opaque bytes (hex on the wire)
    #[serde(with = "hex::serde", default)]
    pub payload: Vec<u8>,
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: None,
        }
    }

    /// Event with no payload
    pub fn signal(topic: impl Into<String>) -> Self {
        Self::new(topic, Vec::new())
    }

    /// Event carrying a JSON payload
    pub fn json<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(topic, serde_json::to_vec(payload)?))
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Decode the payload as JSON
    pub fn payload_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
