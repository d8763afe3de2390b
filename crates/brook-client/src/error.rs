use thiserror::Error;

/// Errors surfaced by the producer.
///
/// Variants carry rendered messages rather than source errors so that one
/// failed batch can hand the same error to every record in it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Metadata fetch failed for topic '{topic}': {reason}")]
    MetadataFetch { topic: String, reason: String },

    #[error("Partition selection failed for topic '{topic}': {reason}")]
    PartitionSelection { topic: String, reason: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Record of {size} bytes exceeds max request size of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Producer buffer is full")]
    BufferExhausted,

    #[error("Producer is closed")]
    Closed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Connector error: {0}")]
    Connector(String),
}

impl From<brook_core::Error> for Error {
    fn from(err: brook_core::Error) -> Self {
        match err {
            brook_core::Error::TopicNotFound(topic) => Error::MetadataFetch {
                reason: "topic not present in cluster metadata".to_string(),
                topic,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
