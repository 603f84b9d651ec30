use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient storage failure; the caller may retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Serialization failure on a write transaction; retryable.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// A scan filter that would walk the whole tuple set.
    #[error("unbounded tuple filter: an object or subject pair is required")]
    UnboundedFilter,

    /// A stored compiled blob that no longer deserializes.
    #[error("corrupt model record {version_id}: {detail}")]
    CorruptModel { version_id: String, detail: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // 40001 serialization_failure, 40P01 deadlock_detected
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
                return StoreError::Conflict(db.message().to_string());
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
