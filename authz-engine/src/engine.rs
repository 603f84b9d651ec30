use crate::check::{resolve, ResolveCtx};
use crate::error::{EngineError, Result};
use crate::reader::RequestReader;
use crate::trace::ResolutionNode;
use crate::{list_objects, list_users};
use authz_model::{
    compile_source, CompiledModel, ConsistencyToken, Diagnostic, ObjectRef, RelationshipTuple,
    SubjectRef, TupleFilter,
};
use authz_store::{ModelStore, ModelSummary, StoredModel, TupleStore, WriteResult};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use ulid::Ulid;
use uuid::Uuid;

/// Engine tunables, resolved from configuration by the server.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum expansion depth of one check.
    pub depth_limit: u32,
    /// In-flight tuple reads per request.
    pub concurrency_limit: usize,
    /// Tuples per write batch (writes plus deletes).
    pub max_write_batch: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depth_limit: 25,
            concurrency_limit: 32,
            max_write_batch: 100,
            default_page_size: 50,
            max_page_size: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub subject: SubjectRef,
    pub relation: String,
    pub object: ObjectRef,
    /// Visible to this request only; never persisted.
    pub contextual_tuples: Vec<RelationshipTuple>,
    pub trace: bool,
    pub consistency_token: Option<ConsistencyToken>,
}

impl CheckRequest {
    pub fn new(subject: SubjectRef, relation: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object,
            contextual_tuples: Vec::new(),
            trace: false,
            consistency_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckResponse {
    pub allowed: bool,
    pub resolution: Option<ResolutionNode>,
    pub token: ConsistencyToken,
}

/// Per-item batch result; one failing check never fails its peers.
#[derive(Debug, Clone)]
pub struct BatchCheckOutcome {
    pub allowed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WriteModelOutcome {
    pub success: bool,
    pub model_id: Option<Uuid>,
    pub version_id: Option<String>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ActivationOutcome {
    pub success: bool,
    pub message: String,
}

/// A page of results plus the offset of the next page, if any.
pub type Page<T> = (Vec<T>, Option<usize>);

#[derive(Clone)]
pub(crate) struct ActiveModel {
    pub model_id: Uuid,
    pub version_id: String,
    pub compiled: Arc<CompiledModel>,
}

/// The authorization engine: checks, reverse-index operations, tuple writes
/// and model administration, all against pluggable stores.
pub struct AuthzEngine {
    pub(crate) tuples: Arc<dyn TupleStore>,
    pub(crate) models: Arc<dyn ModelStore>,
    pub(crate) config: EngineConfig,
    /// Process-wide compiled-model cache, keyed by model id.
    compiled_cache: DashMap<Uuid, Arc<CompiledModel>, ahash::RandomState>,
    /// Copy-on-write active-model pointer; checks already holding the
    /// previous Arc keep using it until they finish.
    active: RwLock<Option<ActiveModel>>,
    version_gen: Mutex<ulid::Generator>,
}

impl AuthzEngine {
    pub fn new(
        tuples: Arc<dyn TupleStore>,
        models: Arc<dyn ModelStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tuples,
            models,
            config,
            compiled_cache: DashMap::default(),
            active: RwLock::new(None),
            version_gen: Mutex::new(ulid::Generator::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve a page size request: zero means the default, everything is
    /// clamped to the maximum.
    pub fn page_size(&self, requested: usize) -> usize {
        if requested == 0 {
            self.config.default_page_size
        } else {
            requested.min(self.config.max_page_size)
        }
    }

    pub(crate) async fn active_model(&self) -> Result<ActiveModel> {
        if let Some(handle) = read_lock(&self.active).clone() {
            return Ok(handle);
        }
        let stored = self
            .models
            .active_model()
            .await?
            .ok_or(EngineError::NoActiveModel)?;
        // Reactivating a model the process has already compiled reuses the
        // cached Arc.
        let compiled = match self.compiled_cache.get(&stored.model_id) {
            Some(hit) => hit.clone(),
            None => {
                let compiled = Arc::new(stored.compiled);
                self.compiled_cache.insert(stored.model_id, compiled.clone());
                compiled
            }
        };
        let handle = ActiveModel {
            model_id: stored.model_id,
            version_id: stored.version_id,
            compiled,
        };
        *write_lock(&self.active) = Some(handle.clone());
        debug!(model_id = %handle.model_id, version_id = %handle.version_id, "active model loaded into cache");
        Ok(handle)
    }

    pub(crate) fn ensure_relation(
        &self,
        model: &CompiledModel,
        object_type: &str,
        relation: &str,
    ) -> Result<()> {
        let type_def = model
            .type_def(object_type)
            .ok_or_else(|| EngineError::UnknownType(object_type.to_string()))?;
        if !type_def.relations.contains_key(relation) {
            return Err(EngineError::UnknownRelation(
                object_type.to_string(),
                relation.to_string(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Check
    // =========================================================================

    pub async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
        if request.subject.is_wildcard() {
            return Err(EngineError::InvalidArgument(
                "wildcard subjects cannot be checked".into(),
            ));
        }
        let model = self.active_model().await?;
        self.ensure_relation(&model.compiled, &request.object.object_type, &request.relation)?;
        for tuple in &request.contextual_tuples {
            model.compiled.validate_tuple(tuple)?;
        }

        let ctx = ResolveCtx {
            reader: RequestReader::new(
                self.tuples.clone(),
                request.contextual_tuples.clone(),
                Arc::new(Semaphore::new(self.config.concurrency_limit)),
            ),
            model: model.compiled.clone(),
            memo: DashMap::default(),
            depth_limit: self.config.depth_limit,
            trace: request.trace,
        };
        let outcome = resolve(
            &ctx,
            &request.subject,
            request.object.clone(),
            request.relation.clone(),
            HashSet::new(),
            0,
        )
        .await?;

        // Echo (or upgrade to) the snapshot the caller pinned.
        let token = self
            .tuples
            .latest_token()
            .await?
            .max(request.consistency_token.unwrap_or_default());
        debug!(
            subject = %request.subject,
            object = %request.object,
            relation = %request.relation,
            allowed = outcome.allowed,
            "check resolved"
        );
        Ok(CheckResponse {
            allowed: outcome.allowed,
            resolution: outcome.node,
            token,
        })
    }

    /// Checks run concurrently and independently: results keep request
    /// order, and an erroring check surfaces in its own slot only.
    pub async fn batch_check(&self, requests: Vec<CheckRequest>) -> Vec<BatchCheckOutcome> {
        let futures = requests.into_iter().map(|request| async move {
            match self.check(request).await {
                Ok(response) => BatchCheckOutcome {
                    allowed: response.allowed,
                    error: None,
                },
                Err(err) => BatchCheckOutcome {
                    allowed: false,
                    error: Some(err.to_string()),
                },
            }
        });
        futures::future::join_all(futures).await
    }

    // =========================================================================
    // Tuples
    // =========================================================================

    /// Apply a write batch: deletes before writes, all-or-nothing.
    ///
    /// Writes are validated against the active model. Deletes are not: a
    /// model change must never strand tuples that can no longer be removed.
    pub async fn write(
        &self,
        writes: Vec<RelationshipTuple>,
        deletes: Vec<RelationshipTuple>,
    ) -> Result<WriteResult> {
        let total = writes.len() + deletes.len();
        if total == 0 {
            return Err(EngineError::InvalidArgument(
                "a write batch needs at least one write or delete".into(),
            ));
        }
        if total > self.config.max_write_batch {
            return Err(EngineError::BatchTooLarge {
                given: total,
                limit: self.config.max_write_batch,
            });
        }
        let model = self.active_model().await?;
        for tuple in &writes {
            model.compiled.validate_tuple(tuple)?;
        }
        Ok(self.tuples.write(writes, deletes).await?)
    }

    /// Filtered tuple page for the read surface.
    pub async fn read_tuples(
        &self,
        filter: &TupleFilter,
        page_size: usize,
        offset: usize,
    ) -> Result<Page<RelationshipTuple>> {
        let limit = self.page_size(page_size);
        let mut tuples = self.tuples.find(filter, limit + 1, offset).await?;
        let next = if tuples.len() > limit {
            tuples.truncate(limit);
            Some(offset + limit)
        } else {
            None
        };
        Ok((tuples, next))
    }

    // =========================================================================
    // Reverse index
    // =========================================================================

    pub async fn list_objects(
        &self,
        subject: &SubjectRef,
        relation: &str,
        object_type: &str,
        page_size: usize,
        offset: usize,
    ) -> Result<Page<String>> {
        list_objects::run(self, subject, relation, object_type, self.page_size(page_size), offset)
            .await
    }

    pub async fn list_users(
        &self,
        object: &ObjectRef,
        relation: &str,
        user_types: &[String],
        page_size: usize,
        offset: usize,
    ) -> Result<Page<String>> {
        list_users::run(self, object, relation, user_types, self.page_size(page_size), offset)
            .await
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// Parse, validate, compile and persist a model version. Nothing is
    /// stored when validation fails; with `activate` the new version
    /// becomes active in the same transaction.
    pub async fn write_model(&self, source: &str, activate: bool) -> Result<WriteModelOutcome> {
        let schema = match compile_source(source) {
            Err(errors) => {
                return Ok(WriteModelOutcome {
                    success: false,
                    model_id: None,
                    version_id: None,
                    errors,
                    warnings: Vec::new(),
                });
            }
            Ok(schema) => schema,
        };

        let model_id = Uuid::new_v4();
        let version_id = self.next_version_id();
        let compiled = Arc::new(schema.compiled.clone());
        self.models
            .insert_model(
                StoredModel {
                    model_id,
                    version_id: version_id.clone(),
                    dsl_source: schema.canonical_source,
                    compiled: schema.compiled,
                    is_active: activate,
                    created_at: Utc::now(),
                },
                activate,
            )
            .await?;

        self.compiled_cache.insert(model_id, compiled.clone());
        if activate {
            *write_lock(&self.active) = Some(ActiveModel {
                model_id,
                version_id: version_id.clone(),
                compiled,
            });
        }
        info!(%model_id, %version_id, activate, "model version written");
        Ok(WriteModelOutcome {
            success: true,
            model_id: Some(model_id),
            version_id: Some(version_id),
            errors: Vec::new(),
            warnings: schema.warnings,
        })
    }

    /// The pinned version, or the active model when no version is given.
    pub async fn read_model(&self, version_id: Option<&str>) -> Result<StoredModel> {
        match version_id {
            None => self
                .models
                .active_model()
                .await?
                .ok_or(EngineError::NoActiveModel),
            Some(version) => self
                .models
                .model_by_version(version)
                .await?
                .ok_or_else(|| EngineError::ModelNotFound(version.to_string())),
        }
    }

    pub async fn activate_model(&self, model_id: Uuid) -> Result<ActivationOutcome> {
        if !self.models.activate_model(model_id).await? {
            return Ok(ActivationOutcome {
                success: false,
                message: format!("model {model_id} does not exist"),
            });
        }
        // Drop the cached pointer; the next check reloads the new active
        // model while in-flight checks keep their snapshot.
        *write_lock(&self.active) = None;
        info!(%model_id, "model activated");
        Ok(ActivationOutcome {
            success: true,
            message: format!("model {model_id} is now active"),
        })
    }

    pub async fn list_models(&self, page_size: usize, offset: usize) -> Result<Page<ModelSummary>> {
        let limit = self.page_size(page_size);
        let mut models = self.models.list_models(limit + 1, offset).await?;
        let next = if models.len() > limit {
            models.truncate(limit);
            Some(offset + limit)
        } else {
            None
        };
        Ok((models, next))
    }

    /// Time-ordered, strictly increasing version ids.
    fn next_version_id(&self) -> String {
        let mut generator = self
            .version_gen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        generator
            .generate()
            .map(|ulid| ulid.to_string())
            .unwrap_or_else(|_| Ulid::new().to_string())
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
