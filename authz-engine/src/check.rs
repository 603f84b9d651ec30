use crate::error::{EngineError, Result};
use crate::reader::RequestReader;
use crate::trace::ResolutionNode;
use authz_model::{CompiledModel, Expr, ObjectRef, SubjectRef};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Everything one check request carries through its recursive expansion.
///
/// The memo is shared across concurrent branches; the visited path is
/// per-branch and breaks tuple cycles.
pub(crate) struct ResolveCtx {
    pub reader: RequestReader,
    pub model: Arc<CompiledModel>,
    pub memo: DashMap<MemoKey, bool, ahash::RandomState>,
    pub depth_limit: u32,
    pub trace: bool,
}

type MemoKey = (String, String, String);
type Path = HashSet<(String, String)>;

pub(crate) struct Outcome {
    pub allowed: bool,
    pub node: Option<ResolutionNode>,
}

impl Outcome {
    fn new(ctx: &ResolveCtx, allowed: bool, label: impl FnOnce() -> String) -> Self {
        Self {
            allowed,
            node: ctx.trace.then(|| ResolutionNode::leaf(label(), allowed)),
        }
    }
}

fn branch_node(
    ctx: &ResolveCtx,
    label: &str,
    allowed: bool,
    children: Vec<Option<ResolutionNode>>,
) -> Option<ResolutionNode> {
    ctx.trace.then(|| {
        ResolutionNode::branch(label.to_string(), allowed, children.into_iter().flatten().collect())
    })
}

/// Is `subject` a member of the userset `object#relation`?
///
/// Depth-first expansion of the relation's rewrite AST: memoized per
/// request, cycle-safe via the visited path, bounded by the depth limit.
pub(crate) fn resolve<'a>(
    ctx: &'a ResolveCtx,
    subject: &'a SubjectRef,
    object: ObjectRef,
    relation: String,
    path: Path,
    depth: u32,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        if depth >= ctx.depth_limit {
            return Err(EngineError::DepthExceeded(ctx.depth_limit));
        }

        let key: MemoKey = (subject.to_string(), object.to_string(), relation.clone());
        if let Some(hit) = ctx.memo.get(&key) {
            let allowed = *hit;
            return Ok(Outcome::new(ctx, allowed, || {
                format!("memo:{}#{relation}", object)
            }));
        }

        let pair = (object.to_string(), relation.clone());
        if path.contains(&pair) {
            ctx.memo.insert(key, false);
            return Ok(Outcome::new(ctx, false, || {
                format!("cycle:{}#{relation}", object)
            }));
        }

        let Some(rel_def) = ctx.model.relation(&object.object_type, &relation) else {
            // A tuple led us to a relation the active model no longer
            // defines; it contributes nothing.
            warn!(object = %object, relation, "expansion hit an undefined relation; ignoring");
            ctx.memo.insert(key, false);
            return Ok(Outcome::new(ctx, false, || {
                format!("undefined:{}#{relation}", object)
            }));
        };

        let mut path = path;
        path.insert(pair);

        let outcome = eval(ctx, subject, &object, &relation, &rel_def.rewrite, &path, depth).await?;
        ctx.memo.insert(key, outcome.allowed);

        let label = format!("{object}#{relation}");
        Ok(Outcome {
            allowed: outcome.allowed,
            node: branch_node(ctx, &label, outcome.allowed, vec![outcome.node]),
        })
    })
}

fn eval<'a>(
    ctx: &'a ResolveCtx,
    subject: &'a SubjectRef,
    object: &'a ObjectRef,
    relation: &'a str,
    expr: &'a Expr,
    path: &'a Path,
    depth: u32,
) -> BoxFuture<'a, Result<Outcome>> {
    Box::pin(async move {
        match expr {
            Expr::This => eval_this(ctx, subject, object, relation, path, depth).await,
            Expr::Computed { relation: other } => {
                resolve(
                    ctx,
                    subject,
                    object.clone(),
                    other.text.clone(),
                    path.clone(),
                    depth + 1,
                )
                .await
            }
            Expr::TupleToUserset { computed, tupleset } => {
                eval_tuple_to_userset(
                    ctx,
                    subject,
                    object,
                    computed.as_str(),
                    tupleset.as_str(),
                    path,
                    depth,
                )
                .await
            }
            Expr::Union(children) => {
                let mut pending: FuturesUnordered<_> = children
                    .iter()
                    .map(|child| eval(ctx, subject, object, relation, child, path, depth))
                    .collect();
                let mut nodes = Vec::new();
                while let Some(result) = pending.next().await {
                    let outcome = result?;
                    nodes.push(outcome.node);
                    if outcome.allowed {
                        // first true wins; outstanding siblings are dropped
                        return Ok(Outcome {
                            allowed: true,
                            node: branch_node(ctx, "union", true, nodes),
                        });
                    }
                }
                Ok(Outcome {
                    allowed: false,
                    node: branch_node(ctx, "union", false, nodes),
                })
            }
            Expr::Intersection(children) => {
                let mut pending: FuturesUnordered<_> = children
                    .iter()
                    .map(|child| eval(ctx, subject, object, relation, child, path, depth))
                    .collect();
                let mut nodes = Vec::new();
                while let Some(result) = pending.next().await {
                    let outcome = result?;
                    nodes.push(outcome.node);
                    if !outcome.allowed {
                        // first false wins; outstanding siblings are dropped
                        return Ok(Outcome {
                            allowed: false,
                            node: branch_node(ctx, "intersection", false, nodes),
                        });
                    }
                }
                Ok(Outcome {
                    allowed: true,
                    node: branch_node(ctx, "intersection", true, nodes),
                })
            }
            Expr::Difference { base, subtract } => {
                let mut pending = FuturesUnordered::new();
                let base_fut: BoxFuture<'a, (bool, Result<Outcome>)> = Box::pin(async move {
                    (true, eval(ctx, subject, object, relation, base, path, depth).await)
                });
                let sub_fut: BoxFuture<'a, (bool, Result<Outcome>)> = Box::pin(async move {
                    (
                        false,
                        eval(ctx, subject, object, relation, subtract, path, depth).await,
                    )
                });
                pending.push(base_fut);
                pending.push(sub_fut);

                let mut nodes = Vec::new();
                while let Some((is_base, result)) = pending.next().await {
                    let outcome = result?;
                    nodes.push(outcome.node);
                    if is_base && !outcome.allowed {
                        return Ok(Outcome {
                            allowed: false,
                            node: branch_node(ctx, "difference", false, nodes),
                        });
                    }
                    if !is_base && outcome.allowed {
                        return Ok(Outcome {
                            allowed: false,
                            node: branch_node(ctx, "difference", false, nodes),
                        });
                    }
                }
                // base resolved true and subtract resolved false
                Ok(Outcome {
                    allowed: true,
                    node: branch_node(ctx, "difference", true, nodes),
                })
            }
        }
    })
}

/// Direct tuples: concrete and wildcard matches first (no further IO), then
/// userset subjects expanded concurrently, first true winning.
async fn eval_this(
    ctx: &ResolveCtx,
    subject: &SubjectRef,
    object: &ObjectRef,
    relation: &str,
    path: &Path,
    depth: u32,
) -> Result<Outcome> {
    let tuples = ctx.reader.read_by_object(object, relation).await?;

    for tuple in tuples.iter() {
        if tuple.subject == *subject {
            return Ok(Outcome {
                allowed: true,
                node: branch_node(
                    ctx,
                    "this",
                    true,
                    vec![Some(ResolutionNode::leaf(format!("direct:{subject}"), true))],
                ),
            });
        }
        if let SubjectRef::Wildcard { object_type } = &tuple.subject {
            if matches!(subject, SubjectRef::Object(o) if &o.object_type == object_type) {
                return Ok(Outcome {
                    allowed: true,
                    node: branch_node(
                        ctx,
                        "this",
                        true,
                        vec![Some(ResolutionNode::leaf(
                            format!("wildcard:{object_type}:*"),
                            true,
                        ))],
                    ),
                });
            }
        }
    }

    let mut pending = FuturesUnordered::new();
    for tuple in tuples.iter() {
        if let SubjectRef::Userset {
            object: userset_object,
            relation: userset_relation,
        } = &tuple.subject
        {
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
            pending.push(resolve(
                ctx,
                subject,
                userset_object.clone(),
                userset_relation.clone(),
                path.clone(),
                depth + 1,
            ));
        }
    }

    let mut nodes = Vec::new();
    while let Some(result) = pending.next().await {
        let outcome = result?;
        nodes.push(outcome.node);
        if outcome.allowed {
            return Ok(Outcome {
                allowed: true,
                node: branch_node(ctx, "this", true, nodes),
            });
        }
    }
    Ok(Outcome {
        allowed: false,
        node: branch_node(ctx, "this", false, nodes),
    })
}

/// Follow `tupleset` tuples off the object, then check `computed` on each
/// referenced object.
async fn eval_tuple_to_userset(
    ctx: &ResolveCtx,
    subject: &SubjectRef,
    object: &ObjectRef,
    computed: &str,
    tupleset: &str,
    path: &Path,
    depth: u32,
) -> Result<Outcome> {
    let tuples = ctx.reader.read_by_object(object, tupleset).await?;
    let label = format!("ttu:{tupleset}->{computed}");

    let mut pending = FuturesUnordered::new();
    for tuple in tuples.iter() {
        match &tuple.subject {
            SubjectRef::Object(target) => {
                if ctx.model.relation(&target.object_type, computed).is_none() {
                    warn!(
                        tuple = %tuple,
                        computed,
                        "tupleset target has no such relation; ignoring"
                    );
                    continue;
                }
                pending.push(resolve(
                    ctx,
                    subject,
                    target.clone(),
                    computed.to_string(),
                    path.clone(),
                    depth + 1,
                ));
            }
            other => {
                warn!(
                    tuple = %tuple,
                    subject = %other,
                    "tupleset tuples must carry concrete subjects; ignoring"
                );
            }
        }
    }

    let mut nodes = Vec::new();
    while let Some(result) = pending.next().await {
        let outcome = result?;
        nodes.push(outcome.node);
        if outcome.allowed {
            return Ok(Outcome {
                allowed: true,
                node: branch_node(ctx, &label, true, nodes),
            });
        }
    }
    Ok(Outcome {
        allowed: false,
        node: branch_node(ctx, &label, false, nodes),
    })
}
