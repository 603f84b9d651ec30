//! Persistence for the authorization engine
//!
//! Two storage contracts live here:
//! - [`TupleStore`]: transactional mutation and indexed reads over the
//!   relationship-tuple set, with a monotonic consistency token minted on
//!   every write
//! - [`ModelStore`]: immutable authorization-model versions with a single
//!   active model at any time
//!
//! Both come in two flavors: [`MemoryStore`] backs tests and the dev
//! profile, [`PostgresStore`] is the production implementation.

pub mod error;
pub mod memory;
pub mod migrations;
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use authz_model::{
    CompiledModel, ConsistencyToken, ObjectRef, RelationshipTuple, SubjectRef, TupleFilter,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of a tuple write batch. Counts reflect *effective* changes:
/// re-inserting an existing tuple or deleting an absent one is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub token: ConsistencyToken,
    pub written: u64,
    pub deleted: u64,
}

/// Transactional storage for relationship tuples.
///
/// Writes are linearizable; each successful batch advances the store's
/// consistency token. Reads are safe under parallel writers and observe some
/// committed snapshot at least as fresh as any token previously handed out.
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Apply `deletes` then `writes` in one transaction.
    async fn write(
        &self,
        writes: Vec<RelationshipTuple>,
        deletes: Vec<RelationshipTuple>,
    ) -> Result<WriteResult>;

    /// Filtered scan in canonical tuple order. The filter must be bounded
    /// by an object or subject pair ([`TupleFilter::is_bounded`]).
    async fn find(
        &self,
        filter: &TupleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RelationshipTuple>>;

    /// All tuples on one object, optionally narrowed to a relation. The
    /// check engine's direct-lookup shape.
    async fn find_by_object(
        &self,
        object: &ObjectRef,
        relation: Option<&str>,
    ) -> Result<Vec<RelationshipTuple>>;

    /// All tuples granting `relation` on objects of `object_type` to this
    /// exact subject. The reverse index's shape.
    async fn find_by_user(
        &self,
        subject: &SubjectRef,
        relation: &str,
        object_type: &str,
    ) -> Result<Vec<RelationshipTuple>>;

    async fn latest_token(&self) -> Result<ConsistencyToken>;
}

/// One persisted authorization-model version.
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub model_id: Uuid,
    pub version_id: String,
    pub dsl_source: String,
    pub compiled: CompiledModel,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Listing row without the source or compiled blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSummary {
    pub model_id: Uuid,
    pub version_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Immutable model versions; exactly one may be active.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Persist a new version. With `activate`, the previous active model is
    /// deactivated in the same transaction.
    async fn insert_model(&self, model: StoredModel, activate: bool) -> Result<()>;

    async fn active_model(&self) -> Result<Option<StoredModel>>;

    async fn model_by_version(&self, version_id: &str) -> Result<Option<StoredModel>>;

    /// Atomically make `model_id` the single active model. Returns false
    /// (and mutates nothing) when the id is unknown.
    async fn activate_model(&self, model_id: Uuid) -> Result<bool>;

    /// Newest-first page of model summaries.
    async fn list_models(&self, limit: usize, offset: usize) -> Result<Vec<ModelSummary>>;
}
