use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// An identifier with its source position.
///
/// Position is carried for diagnostics only: equality and hashing consider
/// the text alone, so a reparsed canonical schema compares equal to the
/// original document.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Ident {
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl Ident {
    pub fn new(text: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            text: text.into(),
            line,
            column,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl PartialEq for Ident {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Hash for Ident {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A directly-assignable subject type on a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    /// `user` — concrete subjects of this type.
    Direct { object_type: Ident },
    /// `group#member` — userset references.
    Userset { object_type: Ident, relation: Ident },
    /// `user:*` — the per-type wildcard.
    Wildcard { object_type: Ident },
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { object_type } => write!(f, "{object_type}"),
            Self::Userset {
                object_type,
                relation,
            } => write!(f, "{object_type}#{relation}"),
            Self::Wildcard { object_type } => write!(f, "{object_type}:*"),
        }
    }
}

/// A userset rewrite expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// The relation's direct tuples; subject types live on the declaration.
    This,
    /// Users of another relation on the same object.
    Computed { relation: Ident },
    /// Follow `tupleset` tuples off this object, then take `computed` on
    /// each referenced object.
    TupleToUserset { computed: Ident, tupleset: Ident },
    Union(Vec<Expr>),
    Intersection(Vec<Expr>),
    Difference { base: Box<Expr>, subtract: Box<Expr> },
}

impl Expr {
    /// Depth-first walk over this expression and its children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Union(children) | Expr::Intersection(children) => {
                for child in children {
                    child.walk(f);
                }
            }
            Expr::Difference { base, subtract } => {
                base.walk(f);
                subtract.walk(f);
            }
            Expr::This | Expr::Computed { .. } | Expr::TupleToUserset { .. } => {}
        }
    }
}

/// One `relation name: expr` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDecl {
    pub name: Ident,
    /// Subjects allowed in direct tuples; empty when the rewrite never
    /// reaches `This`.
    pub subject_types: Vec<SubjectType>,
    pub rewrite: Expr,
}

/// One `type name { ... }` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: Ident,
    pub relations: Vec<RelationDecl>,
}

/// A parsed schema document, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaDoc {
    pub types: Vec<TypeDecl>,
}

impl SchemaDoc {
    pub fn type_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.types.iter().find(|t| t.name.as_str() == name)
    }
}

impl TypeDecl {
    pub fn relation(&self, name: &str) -> Option<&RelationDecl> {
        self.relations.iter().find(|r| r.name.as_str() == name)
    }
}
