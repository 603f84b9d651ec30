use crate::engine::{AuthzEngine, CheckRequest, Page};
use crate::error::{EngineError, Result};
use authz_model::{CompiledModel, ObjectRef, SubjectRef};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Which objects of `object_type` does `subject` hold `relation` on?
///
/// Candidate collection walks the inverse index to a fixpoint: direct and
/// wildcard grants on every relation that can reach the target through
/// computed usersets, userset memberships (groups of groups included), and
/// tuple-to-userset hops through intermediate objects. When the relation's
/// rewrite closure involves intersection, difference or wildcards the
/// candidate set is a superset, and every candidate is confirmed with a
/// full check before it is returned.
pub(crate) async fn run(
    engine: &AuthzEngine,
    subject: &SubjectRef,
    relation: &str,
    object_type: &str,
    page_size: usize,
    offset: usize,
) -> Result<Page<String>> {
    if subject.is_wildcard() {
        return Err(EngineError::InvalidArgument(
            "wildcard subjects cannot be listed for".into(),
        ));
    }
    let model = engine.active_model().await?;
    engine.ensure_relation(&model.compiled, object_type, relation)?;

    let mut collector = Collector {
        engine,
        model: &model.compiled,
        subject,
        reads: HashMap::new(),
    };
    let candidates = collector
        .fixpoint(object_type.to_string(), relation.to_string())
        .await?;

    let needs_check = model
        .compiled
        .relation(object_type, relation)
        .map(|r| r.needs_check_on_list)
        .unwrap_or(true);

    let mut confirmed: Vec<String> = Vec::with_capacity(candidates.len());
    if needs_check {
        debug!(
            object_type,
            relation,
            count = candidates.len(),
            "confirming list-objects candidates"
        );
        for object_id in candidates {
            let response = engine
                .check(CheckRequest::new(
                    subject.clone(),
                    relation,
                    ObjectRef::new(object_type, object_id.as_str()),
                ))
                .await?;
            if response.allowed {
                confirmed.push(object_id);
            }
        }
    } else {
        confirmed.extend(candidates);
    }

    let next = if offset + page_size < confirmed.len() {
        Some(offset + page_size)
    } else {
        None
    };
    let page = confirmed
        .into_iter()
        .skip(offset)
        .take(page_size)
        .collect();
    Ok((page, next))
}

/// Membership-set fixpoint over `(object_type, relation)` pairs.
///
/// `sets[(T, r)]` converges on the ids of `T` objects where the subject's
/// grant can be found in the inverse index; rules are monotone, so
/// iteration terminates once no set grows and no new pair is discovered.
struct Collector<'a> {
    engine: &'a AuthzEngine,
    model: &'a CompiledModel,
    subject: &'a SubjectRef,
    /// `find_by_user` results, keyed by (subject, relation, object type),
    /// so one index shape is read at most once.
    reads: HashMap<(String, String, String), Vec<String>>,
}

impl<'a> Collector<'a> {
    async fn fixpoint(
        &mut self,
        object_type: String,
        relation: String,
    ) -> Result<BTreeSet<String>> {
        let seed = (object_type, relation);
        let mut pairs: Vec<(String, String)> = vec![seed.clone()];
        let mut sets: HashMap<(String, String), BTreeSet<String>> = HashMap::new();

        loop {
            let mut changed = false;
            let mut discovered: Vec<(String, String)> = Vec::new();

            for pair in pairs.clone() {
                let next = self.collect_once(&pair, &sets, &mut discovered).await?;
                let entry = sets.entry(pair).or_default();
                if next != *entry {
                    *entry = next;
                    changed = true;
                }
            }
            for pair in discovered {
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        Ok(sets.remove(&seed).unwrap_or_default())
    }

    /// One evaluation of the collection rules for `(object_type, relation)`
    /// against the current membership sets.
    async fn collect_once(
        &mut self,
        pair: &(String, String),
        sets: &HashMap<(String, String), BTreeSet<String>>,
        discovered: &mut Vec<(String, String)>,
    ) -> Result<BTreeSet<String>> {
        let (object_type, relation) = pair;
        let model = self.model;
        let mut out = BTreeSet::new();
        let Some(rel_def) = model.relation(object_type, relation) else {
            return Ok(out);
        };

        for reaching in rel_def.reaches.clone() {
            // direct grants to the subject itself
            let direct = self.subject.clone();
            out.extend(self.read(direct, &reaching, object_type).await?);
            // wildcard grants covering the subject's type
            if let SubjectRef::Object(object) = self.subject {
                let wildcard = SubjectRef::wildcard(object.object_type.clone());
                out.extend(self.read(wildcard, &reaching, object_type).await?);
            }

            let Some(reaching_def) = model.relation(object_type, &reaching) else {
                continue;
            };

            // userset grants: objects of S where the subject holds m, then
            // tuples (S:s#m, reaching, T:*)
            let usersets: Vec<(String, String)> = reaching_def
                .userset_subject_types()
                .map(|(s, m)| (s.to_string(), m.to_string()))
                .collect();
            for (subject_type, member_relation) in usersets {
                let inner = (subject_type.clone(), member_relation.clone());
                if !discovered.contains(&inner) {
                    discovered.push(inner.clone());
                }
                if let Some(members) = sets.get(&inner) {
                    for member_id in members.clone() {
                        let userset = SubjectRef::userset(
                            subject_type.clone(),
                            member_id,
                            member_relation.clone(),
                        );
                        out.extend(self.read(userset, &reaching, object_type).await?);
                    }
                }
            }

            // tuple-to-userset hops: objects granted `computed` to the
            // subject, then tuples (S:i, tupleset, T:*)
            let mut hops: Vec<(String, String)> = Vec::new();
            reaching_def.rewrite.walk(&mut |expr| {
                if let authz_model::Expr::TupleToUserset { computed, tupleset } = expr {
                    hops.push((computed.text.clone(), tupleset.text.clone()));
                }
            });
            for (computed, tupleset) in hops {
                let Some(tupleset_def) = model.relation(object_type, &tupleset) else {
                    continue;
                };
                let targets: Vec<String> = tupleset_def
                    .direct_subject_types()
                    .map(str::to_string)
                    .collect();
                for target_type in targets {
                    let inner = (target_type.clone(), computed.clone());
                    if !discovered.contains(&inner) {
                        discovered.push(inner.clone());
                    }
                    if let Some(intermediates) = sets.get(&inner) {
                        for intermediate_id in intermediates.clone() {
                            let via = SubjectRef::object(target_type.clone(), intermediate_id);
                            out.extend(self.read(via, &tupleset, object_type).await?);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    async fn read(
        &mut self,
        subject: SubjectRef,
        relation: &str,
        object_type: &str,
    ) -> Result<Vec<String>> {
        let key = (
            subject.to_string(),
            relation.to_string(),
            object_type.to_string(),
        );
        if let Some(hit) = self.reads.get(&key) {
            return Ok(hit.clone());
        }
        let tuples = self
            .engine
            .tuples
            .find_by_user(&subject, relation, object_type)
            .await?;
        let ids: Vec<String> = tuples
            .into_iter()
            .map(|t| t.object.object_id)
            .collect();
        self.reads.insert(key, ids.clone());
        Ok(ids)
    }
}
