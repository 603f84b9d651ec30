use authz_model::ModelError;
use authz_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// No model has ever been activated; checks cannot run.
    #[error("no active authorization model")]
    NoActiveModel,

    #[error("model version {0:?} not found")]
    ModelNotFound(String),

    #[error("unknown object type {0:?}")]
    UnknownType(String),

    #[error("relation {1:?} is not defined on type {0:?}")]
    UnknownRelation(String, String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The expansion walked deeper than the configured limit.
    #[error("expansion depth limit of {0} exceeded")]
    DepthExceeded(u32),

    #[error("write batch of {given} tuples exceeds the limit of {limit}")]
    BatchTooLarge { given: usize, limit: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        EngineError::InvalidArgument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
