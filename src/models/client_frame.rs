use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Client-to-server frames of the socket protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Replace the server-side registration set with `topics`.
    Subscribe {
        #[serde(rename = "requestId")]
        request_id: String,
        topics: Vec<String>,
    },

    /// Publish `data` on `topic`; the server acknowledges with the same
    /// `requestId`.
    Publish {
        #[serde(rename = "requestId")]
        request_id: String,
        topic: String,
        data: JsonValue,
    },
}

/// Body of the topic submission POST used by the event-stream transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubmissionBody {
    pub client_id: String,
    pub subscriptions: Vec<String>,
}
