//! Check engine and reverse-index operations
//!
//! [`AuthzEngine`] answers "does subject S hold relation R on object O?"
//! against the active authorization model and a tuple store:
//! - recursive, memoized, cycle-safe userset expansion with bounded
//!   concurrency and an expansion depth limit
//! - contextual tuples layered read-through over the store for the
//!   duration of one request
//! - `ListObjects` / `ListUsers` built on the same primitives and the
//!   model's precomputed reachability
//! - model administration (write, read, activate, list) with a
//!   copy-on-write compiled-model cache
//!
//! All policy lives here; the gRPC surface forwards and translates.

pub mod check;
pub mod engine;
pub mod error;
pub mod list_objects;
pub mod list_users;
pub mod reader;
pub mod trace;

pub use engine::{
    ActivationOutcome, AuthzEngine, BatchCheckOutcome, CheckRequest, CheckResponse, EngineConfig,
    Page, WriteModelOutcome,
};
pub use error::{EngineError, Result};
pub use trace::ResolutionNode;
