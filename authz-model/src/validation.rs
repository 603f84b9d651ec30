use crate::dsl::ast::{Expr, Ident, RelationDecl, SchemaDoc, SubjectType, TypeDecl};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A typed, positioned finding from schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: String, line: u32, column: u32) -> Self {
        Self {
            kind,
            message,
            line,
            column,
        }
    }

    fn at(kind: DiagnosticKind, message: String, ident: &Ident) -> Self {
        Self::new(kind, message, ident.line, ident.column)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.line,
            self.column,
            self.kind.code(),
            self.message
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    // Errors
    SyntaxError,
    UnknownType,
    UnknownRelation,
    SelfCycle,
    DisallowedUserType,
    DuplicateType,
    DuplicateRelation,
    // Warnings
    UnreachableRelation,
    ShadowedWildcard,
}

impl DiagnosticKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::SyntaxError => "SyntaxError",
            Self::UnknownType => "UnknownType",
            Self::UnknownRelation => "UnknownRelation",
            Self::SelfCycle => "SelfCycle",
            Self::DisallowedUserType => "DisallowedUserType",
            Self::DuplicateType => "DuplicateType",
            Self::DuplicateRelation => "DuplicateRelation",
            Self::UnreachableRelation => "UnreachableRelation",
            Self::ShadowedWildcard => "ShadowedWildcard",
        }
    }

    pub fn is_warning(self) -> bool {
        matches!(self, Self::UnreachableRelation | Self::ShadowedWildcard)
    }
}

/// Errors reject the model; warnings ride along in the write-model response.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

/// Validate a parsed schema document.
///
/// Every error is collected, not just the first, so a model author sees the
/// full picture in one round trip.
pub fn validate(doc: &SchemaDoc) -> ValidationOutcome {
    let mut out = ValidationOutcome::default();

    check_duplicates(doc, &mut out);
    for type_decl in &doc.types {
        for relation in &type_decl.relations {
            check_subject_types(doc, relation, &mut out);
            check_rewrite_references(doc, type_decl, relation, &mut out);
        }
    }
    check_computed_cycles(doc, &mut out);

    if out.errors.is_empty() {
        check_unreachable(doc, &mut out);
    }
    out
}

fn check_duplicates(doc: &SchemaDoc, out: &mut ValidationOutcome) {
    let mut seen_types = HashSet::new();
    for type_decl in &doc.types {
        if !seen_types.insert(type_decl.name.as_str()) {
            out.errors.push(Diagnostic::at(
                DiagnosticKind::DuplicateType,
                format!("type {:?} is defined more than once", type_decl.name.text),
                &type_decl.name,
            ));
        }
        let mut seen_relations = HashSet::new();
        for relation in &type_decl.relations {
            if !seen_relations.insert(relation.name.as_str()) {
                out.errors.push(Diagnostic::at(
                    DiagnosticKind::DuplicateRelation,
                    format!(
                        "relation {:?} is defined more than once on type {:?}",
                        relation.name.text, type_decl.name.text
                    ),
                    &relation.name,
                ));
            }
        }
    }
}

fn check_subject_types(doc: &SchemaDoc, relation: &RelationDecl, out: &mut ValidationOutcome) {
    let mut wildcards = HashSet::new();

    for subject_type in &relation.subject_types {
        match subject_type {
            SubjectType::Direct { object_type } => {
                if doc.type_decl(object_type.as_str()).is_none() {
                    out.errors.push(Diagnostic::at(
                        DiagnosticKind::UnknownType,
                        format!("unknown subject type {:?}", object_type.text),
                        object_type,
                    ));
                }
            }
            SubjectType::Wildcard { object_type } => {
                if doc.type_decl(object_type.as_str()).is_none() {
                    out.errors.push(Diagnostic::at(
                        DiagnosticKind::UnknownType,
                        format!("unknown subject type {:?}", object_type.text),
                        object_type,
                    ));
                }
                wildcards.insert(object_type.as_str());
            }
            SubjectType::Userset {
                object_type,
                relation: userset_relation,
            } => match doc.type_decl(object_type.as_str()) {
                None => out.errors.push(Diagnostic::at(
                    DiagnosticKind::UnknownType,
                    format!("unknown subject type {:?}", object_type.text),
                    object_type,
                )),
                Some(subject_decl) => {
                    if subject_decl.relation(userset_relation.as_str()).is_none() {
                        out.errors.push(Diagnostic::at(
                            DiagnosticKind::UnknownRelation,
                            format!(
                                "relation {:?} is not defined on type {:?}",
                                userset_relation.text, object_type.text
                            ),
                            userset_relation,
                        ));
                    }
                }
            },
        }
    }

    for subject_type in &relation.subject_types {
        if let SubjectType::Direct { object_type } = subject_type {
            if wildcards.contains(object_type.as_str()) {
                out.warnings.push(Diagnostic::at(
                    DiagnosticKind::ShadowedWildcard,
                    format!(
                        "{0:?} is shadowed by {0}:* on relation {1:?}",
                        object_type.text, relation.name.text
                    ),
                    object_type,
                ));
            }
        }
    }
}

fn check_rewrite_references(
    doc: &SchemaDoc,
    type_decl: &TypeDecl,
    relation: &RelationDecl,
    out: &mut ValidationOutcome,
) {
    let mut reaches_this = false;
    relation.rewrite.walk(&mut |expr| match expr {
        Expr::This => reaches_this = true,
        Expr::Computed {
            relation: reference,
        } => {
            if type_decl.relation(reference.as_str()).is_none() {
                out.errors.push(Diagnostic::at(
                    DiagnosticKind::UnknownRelation,
                    format!(
                        "relation {:?} is not defined on type {:?}",
                        reference.text, type_decl.name.text
                    ),
                    reference,
                ));
            }
        }
        Expr::TupleToUserset { computed, tupleset } => {
            let Some(tupleset_decl) = type_decl.relation(tupleset.as_str()) else {
                out.errors.push(Diagnostic::at(
                    DiagnosticKind::UnknownRelation,
                    format!(
                        "tupleset relation {:?} is not defined on type {:?}",
                        tupleset.text, type_decl.name.text
                    ),
                    tupleset,
                ));
                return;
            };
            for subject_type in &tupleset_decl.subject_types {
                match subject_type {
                    SubjectType::Direct { object_type } => {
                        let defined = doc
                            .type_decl(object_type.as_str())
                            .map(|t| t.relation(computed.as_str()).is_some())
                            .unwrap_or(true); // unknown type reported elsewhere
                        if !defined {
                            out.errors.push(Diagnostic::at(
                                DiagnosticKind::UnknownRelation,
                                format!(
                                    "relation {:?} is not defined on type {:?} referenced by tupleset {:?}",
                                    computed.text, object_type.text, tupleset.text
                                ),
                                computed,
                            ));
                        }
                    }
                    SubjectType::Userset { object_type, .. }
                    | SubjectType::Wildcard { object_type } => {
                        out.errors.push(Diagnostic::at(
                            DiagnosticKind::DisallowedUserType,
                            format!(
                                "tupleset relation {:?} may only carry direct {:?} subjects",
                                tupleset.text, object_type.text
                            ),
                            tupleset,
                        ));
                    }
                }
            }
        }
        _ => {}
    });

    if reaches_this && relation.subject_types.is_empty() {
        out.errors.push(Diagnostic::at(
            DiagnosticKind::DisallowedUserType,
            format!(
                "relation {:?} accepts direct tuples but declares no subject types",
                relation.name.text
            ),
            &relation.name,
        ));
    }
}

/// A relation that expands to itself through computed-userset edges alone
/// would rewrite forever; tuples are never consulted on such a path.
fn check_computed_cycles(doc: &SchemaDoc, out: &mut ValidationOutcome) {
    let mut graph: DiGraph<(), ()> = DiGraph::new();
    let mut nodes: HashMap<(&str, &str), NodeIndex> = HashMap::new();
    let mut decls: HashMap<NodeIndex, &Ident> = HashMap::new();

    for type_decl in &doc.types {
        for relation in &type_decl.relations {
            let index = graph.add_node(());
            nodes.insert((type_decl.name.as_str(), relation.name.as_str()), index);
            decls.insert(index, &relation.name);
        }
    }
    for type_decl in &doc.types {
        for relation in &type_decl.relations {
            let from = nodes[&(type_decl.name.as_str(), relation.name.as_str())];
            relation.rewrite.walk(&mut |expr| {
                if let Expr::Computed {
                    relation: reference,
                } = expr
                {
                    if let Some(&to) = nodes.get(&(type_decl.name.as_str(), reference.as_str())) {
                        graph.add_edge(from, to, ());
                    }
                }
            });
        }
    }

    for component in tarjan_scc(&graph) {
        let cyclic = component.len() > 1
            || graph.contains_edge(component[0], component[0]);
        if !cyclic {
            continue;
        }
        for index in component {
            let name = decls[&index];
            out.errors.push(Diagnostic::at(
                DiagnosticKind::SelfCycle,
                format!(
                    "relation {:?} expands to itself through computed usersets alone",
                    name.text
                ),
                name,
            ));
        }
    }
}

/// Warn on relations no tuple set can ever satisfy.
///
/// Least fixpoint over "some tuple set makes this relation nonempty": a
/// membership that is never derivable (for instance a tuple-to-userset that
/// can only recurse into itself) can't be reached at runtime either, where
/// cycle breaking resolves it to false.
fn check_unreachable(doc: &SchemaDoc, out: &mut ValidationOutcome) {
    let mut nonempty: HashSet<(String, String)> = HashSet::new();
    loop {
        let mut changed = false;
        for type_decl in &doc.types {
            for relation in &type_decl.relations {
                let key = (type_decl.name.text.clone(), relation.name.text.clone());
                if nonempty.contains(&key) {
                    continue;
                }
                if expr_satisfiable(doc, type_decl, relation, &relation.rewrite, &nonempty) {
                    nonempty.insert(key);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    for type_decl in &doc.types {
        for relation in &type_decl.relations {
            let key = (type_decl.name.text.clone(), relation.name.text.clone());
            if !nonempty.contains(&key) {
                out.warnings.push(Diagnostic::at(
                    DiagnosticKind::UnreachableRelation,
                    format!(
                        "no tuple set can satisfy relation {:?} on type {:?}",
                        relation.name.text, type_decl.name.text
                    ),
                    &relation.name,
                ));
            }
        }
    }
}

fn expr_satisfiable(
    doc: &SchemaDoc,
    type_decl: &TypeDecl,
    relation: &RelationDecl,
    expr: &Expr,
    nonempty: &HashSet<(String, String)>,
) -> bool {
    match expr {
        Expr::This => !relation.subject_types.is_empty(),
        Expr::Computed {
            relation: reference,
        } => nonempty.contains(&(type_decl.name.text.clone(), reference.text.clone())),
        Expr::TupleToUserset { computed, tupleset } => {
            if !nonempty.contains(&(type_decl.name.text.clone(), tupleset.text.clone())) {
                return false;
            }
            let Some(tupleset_decl) = type_decl.relation(tupleset.as_str()) else {
                return false;
            };
            tupleset_decl
                .subject_types
                .iter()
                .filter_map(|st| match st {
                    SubjectType::Direct { object_type } => Some(object_type.as_str()),
                    _ => None,
                })
                .any(|t| nonempty.contains(&(t.to_string(), computed.text.clone())))
        }
        Expr::Union(children) => children
            .iter()
            .any(|c| expr_satisfiable(doc, type_decl, relation, c, nonempty)),
        Expr::Intersection(children) => children
            .iter()
            .all(|c| expr_satisfiable(doc, type_decl, relation, c, nonempty)),
        Expr::Difference { base, .. } => expr_satisfiable(doc, type_decl, relation, base, nonempty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parser::parse_schema;

    fn run(source: &str) -> ValidationOutcome {
        validate(&parse_schema(source).unwrap())
    }

    fn kinds(diags: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diags.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn accepts_a_well_formed_schema() {
        let outcome = run(
            r#"
            type user {}
            type folder { relation viewer: [user] }
            type document {
              relation parent: [folder]
              relation viewer: [user] or viewer from parent
            }
            "#,
        );
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    }

    #[test]
    fn reports_unknown_types_and_relations() {
        let outcome = run(
            r#"
            type document {
              relation viewer: [user, ghost#member] or editor
            }
            "#,
        );
        let kinds = kinds(&outcome.errors);
        assert!(kinds.contains(&DiagnosticKind::UnknownType));
        assert!(kinds.contains(&DiagnosticKind::UnknownRelation));
    }

    #[test]
    fn reports_duplicates() {
        let outcome = run(
            r#"
            type user {}
            type user {}
            type doc {
              relation viewer: [user]
              relation viewer: [user]
            }
            "#,
        );
        let kinds = kinds(&outcome.errors);
        assert!(kinds.contains(&DiagnosticKind::DuplicateType));
        assert!(kinds.contains(&DiagnosticKind::DuplicateRelation));
    }

    #[test]
    fn reports_computed_only_cycles() {
        let outcome = run(
            r#"
            type doc {
              relation a: b
              relation b: a
            }
            "#,
        );
        assert_eq!(
            kinds(&outcome.errors),
            vec![DiagnosticKind::SelfCycle, DiagnosticKind::SelfCycle]
        );
    }

    #[test]
    fn tuple_traversal_breaks_the_cycle_rule() {
        // member on group reaches itself only through tuples, which is fine
        let outcome = run("type group { relation member: [group#member] }");
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    }

    #[test]
    fn reports_empty_direct_assignment() {
        let outcome = run("type doc { relation viewer: [] }");
        assert_eq!(kinds(&outcome.errors), vec![DiagnosticKind::DisallowedUserType]);
    }

    #[test]
    fn reports_bad_tupleset_subjects() {
        let outcome = run(
            r#"
            type user {}
            type folder { relation viewer: [user] }
            type doc {
              relation parent: [folder, user:*]
              relation viewer: viewer from parent
            }
            "#,
        );
        assert!(kinds(&outcome.errors).contains(&DiagnosticKind::DisallowedUserType));
    }

    #[test]
    fn warns_on_shadowed_wildcard() {
        let outcome = run(
            r#"
            type user {}
            type doc { relation viewer: [user, user:*] }
            "#,
        );
        assert!(outcome.errors.is_empty());
        assert_eq!(kinds(&outcome.warnings), vec![DiagnosticKind::ShadowedWildcard]);
    }

    #[test]
    fn warns_on_unsatisfiable_relations() {
        let outcome = run(
            r#"
            type user {}
            type doc {
              relation blocked: [user]
              relation nothing: blocked and dead
              relation dead: [user] and blocked
            }
            "#,
        );
        // `dead` intersects a direct block with `blocked`; both sides can hold,
        // so only relations that are provably empty should warn.
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);

        // viewer can only ever recurse into itself through parent tuples;
        // the engine's cycle breaking makes it constant-false.
        let outcome = run(
            r#"
            type folder {
              relation parent: [folder]
              relation viewer: viewer from parent
            }
            "#,
        );
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(
            kinds(&outcome.warnings),
            vec![DiagnosticKind::UnreachableRelation]
        );
    }
}
