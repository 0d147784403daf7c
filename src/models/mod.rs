//! Data models for realtime-link.
//!
//! Defines connection and subscription options, topic keys, and the frames
//! exchanged with the server.

pub mod client_frame;
pub mod connection_options;
pub mod error_detail;
pub mod inbound_message;
pub mod topic_event;
pub mod topic_key;
pub mod topic_options;

#[cfg(test)]
mod tests;

pub use client_frame::{ClientFrame, TopicSubmissionBody};
pub use connection_options::{ConnectionOptions, DEFAULT_RECONNECT_INTERVALS_MS};
pub use error_detail::ErrorDetail;
pub use inbound_message::InboundMessage;
pub use topic_event::TopicEvent;
pub use topic_key::TopicKey;
pub use topic_options::TopicOptions;
