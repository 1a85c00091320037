//! Topic registry and consumer coordination for the chute message queue.
//!
//! The registry guarantees one [`chute_log::TopicLog`] per topic name
//! process-wide. On top of it sit the two consumption models: broadcast
//! ([`ConsumerState`], every consumer sees every message) and exclusive
//! ([`GroupState`], one lease-holding leader per group).

mod config;
mod consumer;
mod group;
mod registry;
mod topic;

pub mod error;

pub use crate::config::BrokerConfig;
pub use crate::consumer::ConsumerState;
pub use crate::error::BrokerError;
pub use crate::group::{GroupState, DEFAULT_HEARTBEAT_TIMEOUT};
pub use crate::registry::{registry, sanitize_topic_name, TopicRegistry};
pub use crate::topic::{Topic, TopicStats};
