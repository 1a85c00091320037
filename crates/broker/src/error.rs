use thiserror::Error;

/// Error produced by the coordination layer.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid topic name `{name}`: {reason}")]
    InvalidTopicName { name: String, reason: &'static str },

    #[error("consumer `{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("consumer `{0}` is not registered")]
    UnknownConsumer(String),

    #[error("consumer `{consumer}` is not a member of group `{group}` on topic `{topic}`")]
    NotAMember {
        topic: String,
        group: String,
        consumer: String,
    },

    #[error("unknown group `{group}` on topic `{topic}`")]
    UnknownGroup { topic: String, group: String },

    #[error(transparent)]
    Log(#[from] chute_log::Error),
}

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;
