use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Topic not found: {0}")]
    TopicNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
