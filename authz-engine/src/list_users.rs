use crate::engine::{AuthzEngine, Page};
use crate::error::{EngineError, Result};
use crate::reader::RequestReader;
use authz_model::{CompiledModel, Expr, ObjectRef, SubjectRef};
use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Who holds `relation` on `object`?
///
/// Expands the relation AST outward from the object: direct tuples
/// contribute their subjects, computed usersets stay on the object,
/// tuple-to-userset hops into the referenced objects, and combinators apply
/// set algebra over the member sets. Wildcard grants surface as the
/// `type:*` element.
pub(crate) async fn run(
    engine: &AuthzEngine,
    object: &ObjectRef,
    relation: &str,
    user_types: &[String],
    page_size: usize,
    offset: usize,
) -> Result<Page<String>> {
    let model = engine.active_model().await?;
    engine.ensure_relation(&model.compiled, &object.object_type, relation)?;

    let ctx = ExpandCtx {
        reader: RequestReader::new(
            engine.tuples.clone(),
            Vec::new(),
            Arc::new(Semaphore::new(engine.config.concurrency_limit)),
        ),
        model: model.compiled.clone(),
        depth_limit: engine.config.depth_limit,
    };
    let members = expand(
        &ctx,
        object.clone(),
        relation.to_string(),
        HashSet::new(),
        0,
    )
    .await?;

    let filtered: Vec<String> = members
        .into_iter()
        .filter(|member| {
            if user_types.is_empty() {
                return true;
            }
            member
                .split_once(':')
                .map(|(member_type, _)| user_types.iter().any(|t| t == member_type))
                .unwrap_or(false)
        })
        .collect();

    let next = if offset + page_size < filtered.len() {
        Some(offset + page_size)
    } else {
        None
    };
    let page = filtered.into_iter().skip(offset).take(page_size).collect();
    Ok((page, next))
}

struct ExpandCtx {
    reader: RequestReader,
    model: Arc<CompiledModel>,
    depth_limit: u32,
}

type Visited = HashSet<(String, String)>;

fn expand<'a>(
    ctx: &'a ExpandCtx,
    object: ObjectRef,
    relation: String,
    visited: Visited,
    depth: u32,
) -> BoxFuture<'a, Result<BTreeSet<String>>> {
    Box::pin(async move {
        if depth >= ctx.depth_limit {
            return Err(EngineError::DepthExceeded(ctx.depth_limit));
        }
        let pair = (object.to_string(), relation.clone());
        let mut visited = visited;
        if !visited.insert(pair) {
            return Ok(BTreeSet::new());
        }

        let Some(rel_def) = ctx.model.relation(&object.object_type, &relation) else {
            warn!(object = %object, relation, "expansion hit an undefined relation; ignoring");
            return Ok(BTreeSet::new());
        };
        expand_expr(ctx, &object, &relation, &rel_def.rewrite, &visited, depth).await
    })
}

fn expand_expr<'a>(
    ctx: &'a ExpandCtx,
    object: &'a ObjectRef,
    relation: &'a str,
    expr: &'a Expr,
    visited: &'a Visited,
    depth: u32,
) -> BoxFuture<'a, Result<BTreeSet<String>>> {
    Box::pin(async move {
        match expr {
            Expr::This => {
                let tuples = ctx.reader.read_by_object(object, relation).await?;
                let mut members = BTreeSet::new();
                for tuple in tuples.iter() {
                    match &tuple.subject {
                        SubjectRef::Object(_) => {
                            members.insert(tuple.subject.to_string());
                        }
                        SubjectRef::Wildcard { object_type } => {
                            members.insert(format!("{object_type}:*"));
                        }
                        SubjectRef::Userset {
                            object: userset_object,
                            relation: userset_relation,
                        } => {
                            if ctx
                                .model
                                .relation(&userset_object.object_type, userset_relation)
                                .is_none()
                            {
                                warn!(
                                    tuple = %tuple,
                                    "tuple references an undefined userset relation; ignoring"
                                );
                                continue;
                            }
                            let nested = expand(
                                ctx,
                                userset_object.clone(),
                                userset_relation.clone(),
                                visited.clone(),
                                depth + 1,
                            )
                            .await?;
                            members.extend(nested);
                        }
                    }
                }
                Ok(members)
            }
            Expr::Computed { relation: other } => {
                expand(
                    ctx,
                    object.clone(),
                    other.text.clone(),
                    visited.clone(),
                    depth + 1,
                )
                .await
            }
            Expr::TupleToUserset { computed, tupleset } => {
                let tuples = ctx.reader.read_by_object(object, tupleset.as_str()).await?;
                let mut members = BTreeSet::new();
                for tuple in tuples.iter() {
                    let SubjectRef::Object(target) = &tuple.subject else {
                        warn!(
                            tuple = %tuple,
                            "tupleset tuples must carry concrete subjects; ignoring"
                        );
                        continue;
                    };
                    if ctx
                        .model
                        .relation(&target.object_type, computed.as_str())
                        .is_none()
                    {
                        continue;
                    }
                    let nested = expand(
                        ctx,
                        target.clone(),
                        computed.text.clone(),
                        visited.clone(),
                        depth + 1,
                    )
                    .await?;
                    members.extend(nested);
                }
                Ok(members)
            }
            Expr::Union(children) => {
                let mut members = BTreeSet::new();
                for child in children {
                    members
                        .extend(expand_expr(ctx, object, relation, child, visited, depth).await?);
                }
                Ok(members)
            }
            Expr::Intersection(children) => {
                let mut members: Option<BTreeSet<String>> = None;
                for child in children {
                    let child_members =
                        expand_expr(ctx, object, relation, child, visited, depth).await?;
                    members = Some(match members {
                        None => child_members,
                        Some(current) => {
                            current.intersection(&child_members).cloned().collect()
                        }
                    });
                    if members.as_ref().map(BTreeSet::is_empty).unwrap_or(false) {
                        break;
                    }
                }
                Ok(members.unwrap_or_default())
            }
            Expr::Difference { base, subtract } => {
                let base_members =
                    expand_expr(ctx, object, relation, base, visited, depth).await?;
                if base_members.is_empty() {
                    return Ok(base_members);
                }
                let subtract_members =
                    expand_expr(ctx, object, relation, subtract, visited, depth).await?;
                Ok(base_members
                    .difference(&subtract_members)
                    .cloned()
                    .collect())
            }
        }
    })
}
