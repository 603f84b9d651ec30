use authz_engine::{AuthzEngine, EngineError};
use authz_model::{
    ident::is_valid_name, ConsistencyToken, Diagnostic, ObjectRef, SubjectRef, TupleFilter,
};
use authz_store::StoreError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::MetadataMap;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{debug, error, info};
use uuid::Uuid;

// Include the generated gRPC code
pub mod authz {
    tonic::include_proto!("authz.v1");
}

use authz::authorization_service_server::{AuthorizationService, AuthorizationServiceServer};

/// gRPC surface over the engine.
///
/// This layer parses wire identifiers, translates page tokens, converts
/// engine errors into status codes and applies the per-call deadline. It
/// holds no authorization logic of its own.
#[derive(Clone)]
pub struct AuthzGrpcService {
    engine: Arc<AuthzEngine>,
    default_timeout: Duration,
}

impl AuthzGrpcService {
    pub fn new(engine: Arc<AuthzEngine>, default_timeout: Duration) -> Self {
        Self {
            engine,
            default_timeout,
        }
    }

    fn timeout_for(&self, metadata: &MetadataMap) -> Duration {
        metadata
            .get("grpc-timeout")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
            .unwrap_or(self.default_timeout)
    }

    async fn bounded<T>(
        &self,
        metadata: &MetadataMap,
        work: impl std::future::Future<Output = Result<T, EngineError>>,
    ) -> Result<T, Status> {
        match tokio::time::timeout(self.timeout_for(metadata), work).await {
            Ok(result) => result.map_err(status_from),
            Err(_) => Err(Status::deadline_exceeded("request deadline exceeded")),
        }
    }
}

/// `grpc-timeout` header values: an integer plus one of `H M S m u n`.
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let (amount, unit) = value.split_at(value.len().checked_sub(1)?);
    let amount: u64 = amount.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        "M" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

fn status_from(err: EngineError) -> Status {
    match &err {
        EngineError::NoActiveModel
        | EngineError::UnknownType(_)
        | EngineError::UnknownRelation(_, _) => Status::failed_precondition(err.to_string()),
        EngineError::ModelNotFound(_) => Status::not_found(err.to_string()),
        EngineError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
        EngineError::DepthExceeded(_) | EngineError::BatchTooLarge { .. } => {
            Status::resource_exhausted(err.to_string())
        }
        EngineError::Store(store_err) => match store_err {
            StoreError::Unavailable(_) => Status::unavailable(err.to_string()),
            StoreError::Conflict(_) => Status::aborted(err.to_string()),
            StoreError::UnboundedFilter => Status::invalid_argument(err.to_string()),
            StoreError::CorruptModel { .. } => internal(&err),
        },
    }
}

fn internal(err: &dyn std::fmt::Display) -> Status {
    let correlation_id = Uuid::new_v4();
    error!(%correlation_id, error = %err, "internal error");
    Status::internal(format!("internal error; correlation id {correlation_id}"))
}

fn parse_subject(value: &str) -> Result<SubjectRef, Status> {
    SubjectRef::parse(value).map_err(|e| Status::invalid_argument(e.to_string()))
}

fn parse_object(value: &str) -> Result<ObjectRef, Status> {
    ObjectRef::parse(value).map_err(|e| Status::invalid_argument(e.to_string()))
}

fn parse_relation(value: &str) -> Result<String, Status> {
    if !is_valid_name(value) {
        return Err(Status::invalid_argument(format!(
            "invalid relation name {value:?}"
        )));
    }
    Ok(value.to_string())
}

fn parse_tuple(proto: &authz::RelationshipTuple) -> Result<authz_model::RelationshipTuple, Status> {
    Ok(authz_model::RelationshipTuple::new(
        parse_subject(&proto.user)?,
        parse_relation(&proto.relation)?,
        parse_object(&proto.object)?,
    ))
}

fn tuple_to_proto(tuple: &authz_model::RelationshipTuple) -> authz::RelationshipTuple {
    authz::RelationshipTuple {
        user: tuple.subject.to_string(),
        relation: tuple.relation.clone(),
        object: tuple.object.to_string(),
    }
}

/// Page tokens are decimal offsets; empty means the first page.
fn parse_page_token(value: &str) -> Result<usize, Status> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse::<usize>()
        .map_err(|_| Status::invalid_argument(format!("invalid page token {value:?}")))
}

fn next_page_token(next: Option<usize>) -> String {
    next.map(|offset| offset.to_string()).unwrap_or_default()
}

fn parse_consistency_token(value: &str) -> Result<Option<ConsistencyToken>, Status> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<ConsistencyToken>()
        .map(Some)
        .map_err(|e| Status::invalid_argument(e.to_string()))
}

fn diagnostic_to_proto(diagnostic: &Diagnostic) -> authz::ModelDiagnostic {
    authz::ModelDiagnostic {
        kind: diagnostic.kind.code().to_string(),
        message: diagnostic.message.clone(),
        line: diagnostic.line,
        column: diagnostic.column,
    }
}

fn resolution_to_proto(node: authz_engine::ResolutionNode) -> authz::ResolutionNode {
    authz::ResolutionNode {
        label: node.label,
        outcome: node.outcome,
        children: node.children.into_iter().map(resolution_to_proto).collect(),
    }
}

fn check_request_from_proto(
    proto: &authz::CheckRequest,
) -> Result<authz_engine::CheckRequest, Status> {
    let mut request = authz_engine::CheckRequest::new(
        parse_subject(&proto.user)?,
        parse_relation(&proto.relation)?,
        parse_object(&proto.object)?,
    );
    request.contextual_tuples = proto
        .contextual_tuples
        .iter()
        .map(parse_tuple)
        .collect::<Result<_, _>>()?;
    request.trace = proto.trace;
    request.consistency_token = parse_consistency_token(&proto.consistency_token)?;
    Ok(request)
}

#[tonic::async_trait]
impl AuthorizationService for AuthzGrpcService {
    async fn check(
        &self,
        request: Request<authz::CheckRequest>,
    ) -> Result<Response<authz::CheckResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let engine_request = check_request_from_proto(&req)?;
        debug!(user = %req.user, relation = %req.relation, object = %req.object, "Check");

        let response = self
            .bounded(&metadata, self.engine.check(engine_request))
            .await?;
        Ok(Response::new(authz::CheckResponse {
            allowed: response.allowed,
            resolution: response.resolution.map(resolution_to_proto),
            consistency_token: response.token.to_string(),
        }))
    }

    async fn batch_check(
        &self,
        request: Request<authz::BatchCheckRequest>,
    ) -> Result<Response<authz::BatchCheckResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();

        // A malformed item errors in its own slot; peers still run.
        let mut results: Vec<Option<authz::BatchCheckItem>> = Vec::new();
        let mut runnable = Vec::new();
        let mut runnable_slots = Vec::new();
        for (index, item) in req.checks.iter().enumerate() {
            match check_request_from_proto(item) {
                Ok(engine_request) => {
                    results.push(None);
                    runnable.push(engine_request);
                    runnable_slots.push(index);
                }
                Err(status) => results.push(Some(authz::BatchCheckItem {
                    allowed: false,
                    error: status.message().to_string(),
                })),
            }
        }

        let outcomes = self
            .bounded(&metadata, async {
                Ok(self.engine.batch_check(runnable).await)
            })
            .await?;
        for (slot, outcome) in runnable_slots.into_iter().zip(outcomes) {
            results[slot] = Some(authz::BatchCheckItem {
                allowed: outcome.allowed,
                error: outcome.error.unwrap_or_default(),
            });
        }

        Ok(Response::new(authz::BatchCheckResponse {
            results: results.into_iter().flatten().collect(),
        }))
    }

    async fn write(
        &self,
        request: Request<authz::WriteRequest>,
    ) -> Result<Response<authz::WriteResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let writes = req
            .writes
            .iter()
            .map(parse_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        let deletes = req
            .deletes
            .iter()
            .map(parse_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(writes = writes.len(), deletes = deletes.len(), "Write");

        let result = self
            .bounded(&metadata, self.engine.write(writes, deletes))
            .await?;
        Ok(Response::new(authz::WriteResponse {
            consistency_token: result.token.to_string(),
            written_count: result.written as u32,
            deleted_count: result.deleted as u32,
        }))
    }

    async fn read(
        &self,
        request: Request<authz::ReadRequest>,
    ) -> Result<Response<authz::ReadResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();

        let mut filter = TupleFilter::default();
        if !req.user.is_empty() {
            let subject = parse_subject(&req.user)?;
            filter.subject_type = Some(subject.subject_type().to_string());
            filter.subject_id = Some(subject.subject_id().to_string());
            filter.subject_relation = subject.userset_relation().map(str::to_string);
        }
        if !req.relation.is_empty() {
            filter.relation = Some(parse_relation(&req.relation)?);
        }
        if !req.object.is_empty() {
            if req.object.contains(':') {
                let object = parse_object(&req.object)?;
                filter.object_type = Some(object.object_type);
                filter.object_id = Some(object.object_id);
            } else {
                if !is_valid_name(&req.object) {
                    return Err(Status::invalid_argument(format!(
                        "invalid object filter {:?}",
                        req.object
                    )));
                }
                filter.object_type = Some(req.object.clone());
            }
        }

        let offset = parse_page_token(&req.page_token)?;
        let (tuples, next) = self
            .bounded(
                &metadata,
                self.engine
                    .read_tuples(&filter, req.page_size as usize, offset),
            )
            .await?;
        Ok(Response::new(authz::ReadResponse {
            tuples: tuples.iter().map(tuple_to_proto).collect(),
            next_page_token: next_page_token(next),
        }))
    }

    async fn list_objects(
        &self,
        request: Request<authz::ListObjectsRequest>,
    ) -> Result<Response<authz::ListObjectsResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let subject = parse_subject(&req.user)?;
        let relation = parse_relation(&req.relation)?;
        if !is_valid_name(&req.object_type) {
            return Err(Status::invalid_argument(format!(
                "invalid type name {:?}",
                req.object_type
            )));
        }
        let offset = parse_page_token(&req.page_token)?;

        let (objects, next) = self
            .bounded(
                &metadata,
                self.engine.list_objects(
                    &subject,
                    &relation,
                    &req.object_type,
                    req.page_size as usize,
                    offset,
                ),
            )
            .await?;
        Ok(Response::new(authz::ListObjectsResponse {
            objects,
            next_page_token: next_page_token(next),
        }))
    }

    async fn list_users(
        &self,
        request: Request<authz::ListUsersRequest>,
    ) -> Result<Response<authz::ListUsersResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let object = parse_object(&req.object)?;
        let relation = parse_relation(&req.relation)?;
        for user_type in &req.user_types {
            if !is_valid_name(user_type) {
                return Err(Status::invalid_argument(format!(
                    "invalid type name {user_type:?}"
                )));
            }
        }
        let offset = parse_page_token(&req.page_token)?;

        let (users, next) = self
            .bounded(
                &metadata,
                self.engine.list_users(
                    &object,
                    &relation,
                    &req.user_types,
                    req.page_size as usize,
                    offset,
                ),
            )
            .await?;
        Ok(Response::new(authz::ListUsersResponse {
            users,
            next_page_token: next_page_token(next),
        }))
    }

    async fn write_model(
        &self,
        request: Request<authz::WriteModelRequest>,
    ) -> Result<Response<authz::WriteModelResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        info!(activate = req.activate, "WriteModel");

        let outcome = self
            .bounded(
                &metadata,
                self.engine.write_model(&req.dsl_source, req.activate),
            )
            .await?;
        Ok(Response::new(authz::WriteModelResponse {
            success: outcome.success,
            model_id: outcome.model_id.map(|id| id.to_string()).unwrap_or_default(),
            version_id: outcome.version_id.unwrap_or_default(),
            errors: outcome.errors.iter().map(diagnostic_to_proto).collect(),
            warnings: outcome.warnings.iter().map(diagnostic_to_proto).collect(),
        }))
    }

    async fn read_model(
        &self,
        request: Request<authz::ReadModelRequest>,
    ) -> Result<Response<authz::ReadModelResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let version = (!req.version_id.is_empty()).then_some(req.version_id.as_str());

        let model = self
            .bounded(&metadata, self.engine.read_model(version))
            .await?;
        Ok(Response::new(authz::ReadModelResponse {
            dsl_source: model.dsl_source,
            model_id: model.model_id.to_string(),
            version_id: model.version_id,
            is_active: model.is_active,
        }))
    }

    async fn activate_model(
        &self,
        request: Request<authz::ActivateModelRequest>,
    ) -> Result<Response<authz::ActivateModelResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let model_id = Uuid::parse_str(&req.model_id)
            .map_err(|_| Status::invalid_argument(format!("invalid model id {:?}", req.model_id)))?;

        let outcome = self
            .bounded(&metadata, self.engine.activate_model(model_id))
            .await?;
        Ok(Response::new(authz::ActivateModelResponse {
            success: outcome.success,
            message: outcome.message,
        }))
    }

    async fn list_models(
        &self,
        request: Request<authz::ListModelsRequest>,
    ) -> Result<Response<authz::ListModelsResponse>, Status> {
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let offset = parse_page_token(&req.page_token)?;

        let (models, next) = self
            .bounded(
                &metadata,
                self.engine.list_models(req.page_size as usize, offset),
            )
            .await?;
        Ok(Response::new(authz::ListModelsResponse {
            models: models
                .into_iter()
                .map(|m| authz::ModelSummary {
                    model_id: m.model_id.to_string(),
                    version_id: m.version_id,
                    is_active: m.is_active,
                    created_at: m.created_at.to_rfc3339(),
                })
                .collect(),
            next_page_token: next_page_token(next),
        }))
    }
}

/// Run the gRPC server until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    engine: Arc<AuthzEngine>,
    default_timeout: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    let service = AuthzGrpcService::new(engine, default_timeout);
    info!("starting gRPC server on {addr}");
    Server::builder()
        .add_service(AuthorizationServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_timeout_parsing() {
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout(""), None);
        assert_eq!(parse_grpc_timeout("5X"), None);
        assert_eq!(parse_grpc_timeout("S"), None);
    }

    #[test]
    fn page_tokens_are_decimal_offsets() {
        assert_eq!(parse_page_token("").unwrap(), 0);
        assert_eq!(parse_page_token("42").unwrap(), 42);
        assert!(parse_page_token("abc").is_err());
        assert_eq!(next_page_token(Some(7)), "7");
        assert_eq!(next_page_token(None), "");
    }

    #[test]
    fn engine_errors_map_to_status_codes() {
        use tonic::Code;
        assert_eq!(
            status_from(EngineError::NoActiveModel).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            status_from(EngineError::UnknownType("doc".into())).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            status_from(EngineError::ModelNotFound("v1".into())).code(),
            Code::NotFound
        );
        assert_eq!(
            status_from(EngineError::InvalidArgument("bad".into())).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            status_from(EngineError::DepthExceeded(25)).code(),
            Code::ResourceExhausted
        );
        assert_eq!(
            status_from(EngineError::Store(StoreError::Unavailable("down".into()))).code(),
            Code::Unavailable
        );
        assert_eq!(
            status_from(EngineError::Store(StoreError::Conflict("retry".into()))).code(),
            Code::Aborted
        );
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        assert!(parse_subject("user::alice").is_err());
        assert!(parse_subject(" user:alice").is_err());
        assert!(parse_object("document:").is_err());
        assert!(parse_relation("Viewer").is_err());
        assert!(parse_relation("view#er").is_err());
    }
}
