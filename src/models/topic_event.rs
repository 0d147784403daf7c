use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::inbound_message::InboundMessage;

/// An event delivered to subscription listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEvent {
    /// Wire key the server addressed the event to.
    pub topic: String,
    pub event: Option<String>,
    pub payload: JsonValue,
    /// Server-side event id, if any.
    pub id: Option<String>,
}

impl From<InboundMessage> for TopicEvent {
    fn from(msg: InboundMessage) -> Self {
        Self {
            topic: msg.topic,
            event: msg.event,
            payload: msg.payload,
            id: msg.id,
        }
    }
}
