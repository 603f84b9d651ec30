use crate::error::{ModelError, Result};
use crate::ident::{ObjectRef, SubjectRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A relationship tuple: `subject` has `relation` on `object`.
///
/// Tuples are immutable facts; the stores replace them by delete-then-insert
/// and never update in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipTuple {
    pub subject: SubjectRef,
    pub relation: String,
    pub object: ObjectRef,
}

impl RelationshipTuple {
    pub fn new(subject: SubjectRef, relation: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object,
        }
    }
}

impl fmt::Display for RelationshipTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// Filter over the tuple set; `None` fields match anything.
///
/// At least one of the object pair or the subject pair must be set so a scan
/// stays index-bounded; the stores enforce this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
    pub relation: Option<String>,
    pub object_type: Option<String>,
    pub object_id: Option<String>,
}

impl TupleFilter {
    pub fn by_object(object: &ObjectRef, relation: Option<&str>) -> Self {
        Self {
            object_type: Some(object.object_type.clone()),
            object_id: Some(object.object_id.clone()),
            relation: relation.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn is_bounded(&self) -> bool {
        (self.object_type.is_some() && self.object_id.is_some())
            || (self.subject_type.is_some() && self.subject_id.is_some())
    }

    pub fn matches(&self, tuple: &RelationshipTuple) -> bool {
        if let Some(t) = &self.subject_type {
            if tuple.subject.subject_type() != t {
                return false;
            }
        }
        if let Some(id) = &self.subject_id {
            if tuple.subject.subject_id() != id {
                return false;
            }
        }
        if let Some(rel) = &self.subject_relation {
            if tuple.subject.userset_relation() != Some(rel.as_str()) {
                return false;
            }
        }
        if let Some(rel) = &self.relation {
            if &tuple.relation != rel {
                return false;
            }
        }
        if let Some(t) = &self.object_type {
            if &tuple.object.object_type != t {
                return false;
            }
        }
        if let Some(id) = &self.object_id {
            if &tuple.object.object_id != id {
                return false;
            }
        }
        true
    }
}

/// Monotonic commit identifier handed out by the tuple store's write path.
///
/// Exposed on the wire as a decimal string; a read pinned to a token observes
/// at least the state at that token.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConsistencyToken(pub u64);

impl ConsistencyToken {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn max(self, other: Self) -> Self {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ConsistencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConsistencyToken {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| ModelError::InvalidToken(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(subject: &str, relation: &str, object: &str) -> RelationshipTuple {
        RelationshipTuple::new(
            SubjectRef::parse(subject).unwrap(),
            relation,
            ObjectRef::parse(object).unwrap(),
        )
    }

    #[test]
    fn filter_matches_on_each_column() {
        let t = tuple("group:eng#member", "viewer", "document:readme");

        let mut f = TupleFilter::by_object(&t.object, Some("viewer"));
        assert!(f.matches(&t));
        f.subject_type = Some("group".into());
        f.subject_id = Some("eng".into());
        f.subject_relation = Some("member".into());
        assert!(f.matches(&t));

        f.subject_relation = Some("admin".into());
        assert!(!f.matches(&t));
    }

    #[test]
    fn filter_boundedness() {
        assert!(!TupleFilter::default().is_bounded());
        assert!(!TupleFilter {
            relation: Some("viewer".into()),
            ..TupleFilter::default()
        }
        .is_bounded());
        assert!(TupleFilter {
            subject_type: Some("user".into()),
            subject_id: Some("alice".into()),
            ..TupleFilter::default()
        }
        .is_bounded());
    }

    #[test]
    fn tokens_order_and_round_trip() {
        let a = ConsistencyToken(41);
        let b = ConsistencyToken(42);
        assert!(a < b);
        assert_eq!(a.max(b), b);
        assert_eq!("42".parse::<ConsistencyToken>().unwrap(), b);
        assert!("".parse::<ConsistencyToken>().is_err());
        assert!("abc".parse::<ConsistencyToken>().is_err());
        assert_eq!(b.to_string(), "42");
    }
}
