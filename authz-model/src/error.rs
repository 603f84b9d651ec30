use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid object identifier: {0}")]
    InvalidObject(String),

    #[error("invalid subject identifier: {0}")]
    InvalidSubject(String),

    #[error("invalid relation name: {0}")]
    InvalidRelation(String),

    #[error("invalid consistency token: {0}")]
    InvalidToken(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
