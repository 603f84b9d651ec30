//! Data model and schema language for the authorization engine
//!
//! This crate holds everything the rest of the workspace agrees on:
//! - Object, subject and relationship-tuple identifiers with their wire grammar
//! - Consistency tokens for read-your-writes chaining
//! - The relation DSL: lexer, recursive-descent parser and canonical printer
//! - The compiled model (rewrite ASTs plus per-relation reachability)
//! - Model validation with typed, positioned diagnostics
//!
//! # Identifier grammar
//!
//! Objects are written `type:id`, usersets `type:id#relation` and the
//! wildcard subject `type:*`. Type and relation names are lowercase
//! snake_case; ids are opaque but may not contain `:`, `#`, `*` or
//! whitespace.
//!
//! # Example
//!
//! ```rust
//! use authz_model::{compile_source, ObjectRef, SubjectRef};
//!
//! let schema = compile_source(r#"
//!     type user {}
//!     type document {
//!       relation editor: [user]
//!       relation viewer: [user, user:*] or editor
//!     }
//! "#).expect("schema is valid");
//!
//! assert!(schema.compiled.relation("document", "viewer").is_some());
//! let alice = SubjectRef::parse("user:alice").unwrap();
//! let doc = ObjectRef::parse("document:readme").unwrap();
//! ```

pub mod compiled;
pub mod dsl;
pub mod error;
pub mod ident;
pub mod tuple;
pub mod validation;

pub use compiled::{CompiledModel, CompiledRelation, CompiledType};
pub use dsl::ast::{Expr, Ident, RelationDecl, SchemaDoc, SubjectType, TypeDecl};
pub use dsl::parser::parse_schema;
pub use dsl::printer::canonical_source;
pub use error::{ModelError, Result};
pub use ident::{ObjectRef, SubjectRef};
pub use tuple::{ConsistencyToken, RelationshipTuple, TupleFilter};
pub use validation::{validate, Diagnostic, DiagnosticKind, ValidationOutcome};

/// A schema compiled end-to-end from DSL source.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    /// Canonicalized DSL source, as persisted and returned by `ReadModel`.
    pub canonical_source: String,
    /// The compiled form used by the check engine.
    pub compiled: CompiledModel,
    /// Non-fatal findings (unreachable relations, shadowed wildcards).
    pub warnings: Vec<Diagnostic>,
}

/// Parse, validate and compile DSL source in one step.
///
/// Returns every validation error at once; a failed compile leaves nothing
/// behind, matching the write-model contract.
pub fn compile_source(source: &str) -> std::result::Result<CompiledSchema, Vec<Diagnostic>> {
    let doc = parse_schema(source).map_err(|d| vec![d])?;
    let outcome = validate(&doc);
    if !outcome.errors.is_empty() {
        return Err(outcome.errors);
    }
    Ok(CompiledSchema {
        canonical_source: canonical_source(&doc),
        compiled: compiled::compile(&doc),
        warnings: outcome.warnings,
    })
}
