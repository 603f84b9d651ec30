use crate::dsl::ast::{Expr, SchemaDoc, SubjectType};
use crate::error::ModelError;
use crate::ident::SubjectRef;
use crate::tuple::RelationshipTuple;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

type AMap<K, V> = HashMap<K, V, ahash::RandomState>;

/// A relation after compilation: its rewrite AST plus everything the engine
/// precomputes per relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledRelation {
    pub rewrite: Expr,
    pub subject_types: Vec<SubjectType>,
    /// Relations on the same type whose tuples can feed this relation
    /// through computed-userset edges, this relation included. Drives the
    /// reverse index's candidate collection.
    pub reaches: Vec<String>,
    /// True when the rewrite closure contains intersection, difference or a
    /// wildcard subject; list-objects must then confirm each candidate with
    /// a full check.
    pub needs_check_on_list: bool,
}

impl CompiledRelation {
    pub fn allows_wildcard(&self, subject_type: &str) -> bool {
        self.subject_types.iter().any(|st| {
            matches!(st, SubjectType::Wildcard { object_type } if object_type.as_str() == subject_type)
        })
    }

    pub fn allows_direct(&self, subject_type: &str) -> bool {
        self.subject_types.iter().any(|st| {
            matches!(st, SubjectType::Direct { object_type } if object_type.as_str() == subject_type)
        })
    }

    pub fn allows_userset(&self, subject_type: &str, relation: &str) -> bool {
        self.subject_types.iter().any(|st| match st {
            SubjectType::Userset {
                object_type,
                relation: r,
            } => object_type.as_str() == subject_type && r.as_str() == relation,
            _ => false,
        })
    }

    /// Direct (concrete) subject types, in declaration order.
    pub fn direct_subject_types(&self) -> impl Iterator<Item = &str> {
        self.subject_types.iter().filter_map(|st| match st {
            SubjectType::Direct { object_type } => Some(object_type.as_str()),
            _ => None,
        })
    }

    /// Userset subject types, in declaration order.
    pub fn userset_subject_types(&self) -> impl Iterator<Item = (&str, &str)> {
        self.subject_types.iter().filter_map(|st| match st {
            SubjectType::Userset {
                object_type,
                relation,
            } => Some((object_type.as_str(), relation.as_str())),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledType {
    pub relations: AMap<String, CompiledRelation>,
}

/// The compiled form of a model: per-type relation maps, ready for the
/// check engine. Serialized as the model repository's compiled blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledModel {
    pub types: AMap<String, CompiledType>,
}

impl CompiledModel {
    pub fn type_def(&self, object_type: &str) -> Option<&CompiledType> {
        self.types.get(object_type)
    }

    pub fn relation(&self, object_type: &str, relation: &str) -> Option<&CompiledRelation> {
        self.types.get(object_type)?.relations.get(relation)
    }

    pub fn has_type(&self, object_type: &str) -> bool {
        self.types.contains_key(object_type)
    }

    /// Validate a tuple against this model: the object relation must be
    /// defined and the subject shape must be in the relation's
    /// directly-assignable set (usersets additionally need a defined
    /// relation on the subject type).
    pub fn validate_tuple(&self, tuple: &RelationshipTuple) -> Result<(), ModelError> {
        let relation = self
            .relation(&tuple.object.object_type, &tuple.relation)
            .ok_or_else(|| {
                ModelError::InvalidRelation(format!(
                    "relation {}#{} is not defined in the active model",
                    tuple.object.object_type, tuple.relation
                ))
            })?;

        match &tuple.subject {
            SubjectRef::Object(object) => {
                if !self.has_type(&object.object_type) {
                    return Err(ModelError::InvalidSubject(format!(
                        "unknown subject type {:?}",
                        object.object_type
                    )));
                }
                if !relation.allows_direct(&object.object_type) {
                    return Err(ModelError::InvalidSubject(format!(
                        "{}#{} does not accept direct {} subjects",
                        tuple.object.object_type, tuple.relation, object.object_type
                    )));
                }
            }
            SubjectRef::Userset {
                object,
                relation: subject_relation,
            } => {
                if self.relation(&object.object_type, subject_relation).is_none() {
                    return Err(ModelError::InvalidSubject(format!(
                        "userset {}#{} is not defined in the active model",
                        object.object_type, subject_relation
                    )));
                }
                if !relation.allows_userset(&object.object_type, subject_relation) {
                    return Err(ModelError::InvalidSubject(format!(
                        "{}#{} does not accept {}#{} subjects",
                        tuple.object.object_type,
                        tuple.relation,
                        object.object_type,
                        subject_relation
                    )));
                }
            }
            SubjectRef::Wildcard { object_type } => {
                if !relation.allows_wildcard(object_type) {
                    return Err(ModelError::InvalidSubject(format!(
                        "{}#{} does not accept the {}:* wildcard",
                        tuple.object.object_type, tuple.relation, object_type
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Lower a validated schema document into its compiled form.
pub fn compile(doc: &SchemaDoc) -> CompiledModel {
    let mut types: AMap<String, CompiledType> = AMap::default();

    for type_decl in &doc.types {
        let mut relations: AMap<String, CompiledRelation> = AMap::default();
        for relation in &type_decl.relations {
            relations.insert(
                relation.name.text.clone(),
                CompiledRelation {
                    rewrite: relation.rewrite.clone(),
                    subject_types: relation.subject_types.clone(),
                    reaches: Vec::new(),
                    needs_check_on_list: false,
                },
            );
        }
        types.insert(type_decl.name.text.clone(), CompiledType { relations });
    }

    let mut model = CompiledModel { types };
    let reach = reachability(&model);
    let checks = confirmation_flags(&model);
    for (type_name, type_def) in &mut model.types {
        for (relation_name, relation) in &mut type_def.relations {
            let key = (type_name.clone(), relation_name.clone());
            if let Some(set) = reach.get(&key) {
                let mut reaches: Vec<String> = set.iter().cloned().collect();
                reaches.sort();
                relation.reaches = reaches;
            }
            relation.needs_check_on_list = checks.get(&key).copied().unwrap_or(false);
        }
    }
    model
}

/// For each relation, the same-type relations reachable from it through
/// computed-userset edges (itself included).
fn reachability(model: &CompiledModel) -> HashMap<(String, String), HashSet<String>> {
    let mut out = HashMap::new();
    for (type_name, type_def) in &model.types {
        for relation_name in type_def.relations.keys() {
            let mut set = HashSet::new();
            let mut stack = vec![relation_name.clone()];
            while let Some(current) = stack.pop() {
                if !set.insert(current.clone()) {
                    continue;
                }
                if let Some(relation) = type_def.relations.get(&current) {
                    relation.rewrite.walk(&mut |expr| {
                        if let Expr::Computed { relation } = expr {
                            stack.push(relation.text.clone());
                        }
                    });
                }
            }
            set.retain(|r| type_def.relations.contains_key(r));
            out.insert((type_name.clone(), relation_name.clone()), set);
        }
    }
    out
}

/// Whether list-objects must confirm candidates for each relation: true when
/// the cross-type rewrite closure holds intersection, difference or a
/// wildcard subject.
fn confirmation_flags(model: &CompiledModel) -> HashMap<(String, String), bool> {
    let mut out = HashMap::new();
    for (type_name, type_def) in &model.types {
        for relation_name in type_def.relations.keys() {
            let mut visited = HashSet::new();
            let flag = walk_for_confirmation(model, type_name, relation_name, &mut visited);
            out.insert((type_name.clone(), relation_name.clone()), flag);
        }
    }
    out
}

fn walk_for_confirmation(
    model: &CompiledModel,
    object_type: &str,
    relation_name: &str,
    visited: &mut HashSet<(String, String)>,
) -> bool {
    if !visited.insert((object_type.to_string(), relation_name.to_string())) {
        return false;
    }
    let Some(relation) = model.relation(object_type, relation_name) else {
        return false;
    };
    let mut found = relation
        .subject_types
        .iter()
        .any(|st| matches!(st, SubjectType::Wildcard { .. }));
    relation.rewrite.walk(&mut |expr| match expr {
        Expr::Intersection(_) | Expr::Difference { .. } => found = true,
        _ => {}
    });
    if found {
        return true;
    }
    let mut nested = Vec::new();
    relation.rewrite.walk(&mut |expr| match expr {
        Expr::Computed { relation } => {
            nested.push((object_type.to_string(), relation.text.clone()));
        }
        Expr::TupleToUserset { computed, tupleset } => {
            if let Some(ts) = model.relation(object_type, tupleset.as_str()) {
                for subject_type in ts.direct_subject_types() {
                    nested.push((subject_type.to_string(), computed.text.clone()));
                }
            }
        }
        _ => {}
    });
    nested
        .into_iter()
        .any(|(t, r)| walk_for_confirmation(model, &t, &r, visited))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parser::parse_schema;
    use crate::ident::ObjectRef;

    fn model(source: &str) -> CompiledModel {
        compile(&parse_schema(source).unwrap())
    }

    const SCHEMA: &str = r#"
        type user {}
        type group { relation member: [user, group#member] }
        type folder {
          relation viewer: [user]
        }
        type document {
          relation parent: [folder]
          relation editor: [user]
          relation published: [user, user:*]
          relation viewer: [user, group#member] or editor or viewer from parent
          relation visible: viewer and published
        }
    "#;

    #[test]
    fn reachability_follows_computed_edges() {
        let model = model(SCHEMA);
        let viewer = model.relation("document", "viewer").unwrap();
        assert_eq!(viewer.reaches, vec!["editor", "viewer"]);
        let editor = model.relation("document", "editor").unwrap();
        assert_eq!(editor.reaches, vec!["editor"]);
    }

    #[test]
    fn confirmation_flags_cover_closure() {
        let model = model(SCHEMA);
        assert!(!model.relation("document", "editor").unwrap().needs_check_on_list);
        // wildcard on published propagates into visible
        assert!(model.relation("document", "published").unwrap().needs_check_on_list);
        assert!(model.relation("document", "visible").unwrap().needs_check_on_list);
        // viewer has no negation or wildcard anywhere in its closure
        assert!(!model.relation("document", "viewer").unwrap().needs_check_on_list);
    }

    #[test]
    fn validates_tuples_against_subject_types() {
        let model = model(SCHEMA);
        let doc = ObjectRef::new("document", "readme");

        let ok = RelationshipTuple::new(SubjectRef::object("user", "alice"), "editor", doc.clone());
        assert!(model.validate_tuple(&ok).is_ok());

        let userset = RelationshipTuple::new(
            SubjectRef::userset("group", "eng", "member"),
            "viewer",
            doc.clone(),
        );
        assert!(model.validate_tuple(&userset).is_ok());

        let wildcard =
            RelationshipTuple::new(SubjectRef::wildcard("user"), "published", doc.clone());
        assert!(model.validate_tuple(&wildcard).is_ok());

        // group subjects are not assignable to editor
        let bad =
            RelationshipTuple::new(SubjectRef::object("group", "eng"), "editor", doc.clone());
        assert!(model.validate_tuple(&bad).is_err());

        // wildcard only where declared
        let bad_wild = RelationshipTuple::new(SubjectRef::wildcard("user"), "editor", doc.clone());
        assert!(model.validate_tuple(&bad_wild).is_err());

        // unknown relation on the object
        let bad_rel = RelationshipTuple::new(SubjectRef::object("user", "alice"), "owner", doc);
        assert!(model.validate_tuple(&bad_rel).is_err());
    }
}
