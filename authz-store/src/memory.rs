use crate::error::{Result, StoreError};
use crate::{ModelStore, ModelSummary, StoredModel, TupleStore, WriteResult};
use async_trait::async_trait;
use authz_model::{ConsistencyToken, ObjectRef, RelationshipTuple, SubjectRef, TupleFilter};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory store for tests and the dev profile.
///
/// A single `RwLock` over the whole state gives the same transactional
/// batch and token semantics as the PostgreSQL store; queries sort into
/// canonical tuple order so pagination is stable.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    tuples: Vec<RelationshipTuple>,
    token: u64,
    models: Vec<StoredModel>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_key(t: &RelationshipTuple) -> (String, String, String, String, String, String) {
    (
        t.object.object_type.clone(),
        t.object.object_id.clone(),
        t.relation.clone(),
        t.subject.subject_type().to_string(),
        t.subject.subject_id().to_string(),
        t.subject.userset_relation().unwrap_or("").to_string(),
    )
}

#[async_trait]
impl TupleStore for MemoryStore {
    async fn write(
        &self,
        writes: Vec<RelationshipTuple>,
        deletes: Vec<RelationshipTuple>,
    ) -> Result<WriteResult> {
        let mut state = self.state.write().await;

        let mut deleted = 0u64;
        for tuple in &deletes {
            let before = state.tuples.len();
            state.tuples.retain(|t| t != tuple);
            deleted += (before - state.tuples.len()) as u64;
        }

        let mut written = 0u64;
        for tuple in writes {
            if !state.tuples.contains(&tuple) {
                state.tuples.push(tuple);
                written += 1;
            }
        }

        state.token += 1;
        let token = ConsistencyToken(state.token);
        debug!(%token, written, deleted, "memory store write committed");
        Ok(WriteResult {
            token,
            written,
            deleted,
        })
    }

    async fn find(
        &self,
        filter: &TupleFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RelationshipTuple>> {
        if !filter.is_bounded() {
            return Err(StoreError::UnboundedFilter);
        }
        let state = self.state.read().await;
        let mut matches: Vec<RelationshipTuple> = state
            .tuples
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matches.sort_by_key(sort_key);
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_object(
        &self,
        object: &ObjectRef,
        relation: Option<&str>,
    ) -> Result<Vec<RelationshipTuple>> {
        let filter = TupleFilter::by_object(object, relation);
        let state = self.state.read().await;
        let mut matches: Vec<RelationshipTuple> = state
            .tuples
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matches.sort_by_key(sort_key);
        Ok(matches)
    }

    async fn find_by_user(
        &self,
        subject: &SubjectRef,
        relation: &str,
        object_type: &str,
    ) -> Result<Vec<RelationshipTuple>> {
        let state = self.state.read().await;
        let mut matches: Vec<RelationshipTuple> = state
            .tuples
            .iter()
            .filter(|t| {
                &t.subject == subject
                    && t.relation == relation
                    && t.object.object_type == object_type
            })
            .cloned()
            .collect();
        matches.sort_by_key(sort_key);
        Ok(matches)
    }

    async fn latest_token(&self) -> Result<ConsistencyToken> {
        Ok(ConsistencyToken(self.state.read().await.token))
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn insert_model(&self, mut model: StoredModel, activate: bool) -> Result<()> {
        let mut state = self.state.write().await;
        model.is_active = activate;
        if activate {
            for existing in &mut state.models {
                existing.is_active = false;
            }
        }
        state.models.push(model);
        Ok(())
    }

    async fn active_model(&self) -> Result<Option<StoredModel>> {
        let state = self.state.read().await;
        Ok(state.models.iter().find(|m| m.is_active).cloned())
    }

    async fn model_by_version(&self, version_id: &str) -> Result<Option<StoredModel>> {
        let state = self.state.read().await;
        Ok(state
            .models
            .iter()
            .find(|m| m.version_id == version_id)
            .cloned())
    }

    async fn activate_model(&self, model_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.models.iter().any(|m| m.model_id == model_id) {
            return Ok(false);
        }
        for model in &mut state.models {
            model.is_active = model.model_id == model_id;
        }
        Ok(true)
    }

    async fn list_models(&self, limit: usize, offset: usize) -> Result<Vec<ModelSummary>> {
        let state = self.state.read().await;
        let mut summaries: Vec<ModelSummary> = state
            .models
            .iter()
            .map(|m| ModelSummary {
                model_id: m.model_id,
                version_id: m.version_id.clone(),
                is_active: m.is_active,
                created_at: m.created_at,
            })
            .collect();
        // version ids are time-ordered, so newest-first is a reverse sort
        summaries.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        Ok(summaries.into_iter().skip(offset).take(limit).collect())
    }
}
