use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Returns true for `[a-z_][a-z0-9_]*`, the grammar shared by type and
/// relation names.
pub fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Ids are opaque UTF-8 minus the separator characters and whitespace.
pub fn is_valid_id(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(|c| c == ':' || c == '#' || c == '*' || c.is_whitespace())
}

/// A concrete object reference, written `type:id` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parse `type:id`, rejecting empty segments, stray separators and
    /// whitespace per the wire grammar.
    pub fn parse(s: &str) -> Result<Self> {
        let (object_type, object_id) = s
            .split_once(':')
            .ok_or_else(|| ModelError::InvalidObject(format!("missing ':' in {s:?}")))?;
        if !is_valid_name(object_type) {
            return Err(ModelError::InvalidObject(format!(
                "bad type name in {s:?}"
            )));
        }
        if !is_valid_id(object_id) {
            return Err(ModelError::InvalidObject(format!("bad id in {s:?}")));
        }
        Ok(Self::new(object_type, object_id))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// A subject as it appears in a relationship tuple: a concrete object, a
/// userset (`type:id#relation`), or the per-type wildcard `type:*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectRef {
    Object(ObjectRef),
    Userset { object: ObjectRef, relation: String },
    Wildcard { object_type: String },
}

impl SubjectRef {
    pub fn object(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self::Object(ObjectRef::new(object_type, object_id))
    }

    pub fn userset(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self::Userset {
            object: ObjectRef::new(object_type, object_id),
            relation: relation.into(),
        }
    }

    pub fn wildcard(object_type: impl Into<String>) -> Self {
        Self::Wildcard {
            object_type: object_type.into(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (base, relation) = match s.split_once('#') {
            Some((base, relation)) => {
                if !is_valid_name(relation) {
                    return Err(ModelError::InvalidSubject(format!(
                        "bad userset relation in {s:?}"
                    )));
                }
                (base, Some(relation))
            }
            None => (s, None),
        };

        if let Some(object_type) = base.strip_suffix(":*") {
            if relation.is_some() {
                return Err(ModelError::InvalidSubject(format!(
                    "wildcard subject may not carry a relation: {s:?}"
                )));
            }
            if !is_valid_name(object_type) {
                return Err(ModelError::InvalidSubject(format!(
                    "bad type name in {s:?}"
                )));
            }
            return Ok(Self::Wildcard {
                object_type: object_type.to_string(),
            });
        }

        let object =
            ObjectRef::parse(base).map_err(|_| ModelError::InvalidSubject(format!("{s:?}")))?;
        Ok(match relation {
            Some(relation) => Self::Userset {
                object,
                relation: relation.to_string(),
            },
            None => Self::Object(object),
        })
    }

    /// The subject's type, regardless of shape.
    pub fn subject_type(&self) -> &str {
        match self {
            Self::Object(o) => &o.object_type,
            Self::Userset { object, .. } => &object.object_type,
            Self::Wildcard { object_type } => object_type,
        }
    }

    /// The id column value used by the stores; wildcards persist as `*`.
    pub fn subject_id(&self) -> &str {
        match self {
            Self::Object(o) => &o.object_id,
            Self::Userset { object, .. } => &object.object_id,
            Self::Wildcard { .. } => "*",
        }
    }

    pub fn userset_relation(&self) -> Option<&str> {
        match self {
            Self::Userset { relation, .. } => Some(relation),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard { .. })
    }

    /// Rebuild a subject from the flattened store columns.
    pub fn from_parts(
        subject_type: &str,
        subject_id: &str,
        subject_relation: Option<&str>,
    ) -> Self {
        match (subject_id, subject_relation) {
            ("*", None) => Self::wildcard(subject_type),
            (_, None) => Self::object(subject_type, subject_id),
            (_, Some(relation)) => Self::userset(subject_type, subject_id, relation),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(o) => write!(f, "{o}"),
            Self::Userset { object, relation } => write!(f, "{object}#{relation}"),
            Self::Wildcard { object_type } => write!(f, "{object_type}:*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_refs() {
        let doc = ObjectRef::parse("document:readme").unwrap();
        assert_eq!(doc.object_type, "document");
        assert_eq!(doc.object_id, "readme");
        assert_eq!(doc.to_string(), "document:readme");
    }

    #[test]
    fn rejects_malformed_objects() {
        for bad in [
            "document",
            "document:",
            ":readme",
            "document::readme",
            "Document:readme",
            "document:read me",
            " document:readme",
            "document:readme ",
            "document:*",
            "document:a#b",
        ] {
            assert!(ObjectRef::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn parses_subject_shapes() {
        assert_eq!(
            SubjectRef::parse("user:alice").unwrap(),
            SubjectRef::object("user", "alice")
        );
        assert_eq!(
            SubjectRef::parse("group:eng#member").unwrap(),
            SubjectRef::userset("group", "eng", "member")
        );
        assert_eq!(
            SubjectRef::parse("user:*").unwrap(),
            SubjectRef::wildcard("user")
        );
    }

    #[test]
    fn rejects_malformed_subjects() {
        for bad in ["user:*#member", "user:alice#", "user:alice#Mem", "user:"] {
            assert!(SubjectRef::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn subject_round_trips_store_columns() {
        for s in ["user:alice", "group:eng#member", "user:*"] {
            let parsed = SubjectRef::parse(s).unwrap();
            let rebuilt = SubjectRef::from_parts(
                parsed.subject_type(),
                parsed.subject_id(),
                parsed.userset_relation(),
            );
            assert_eq!(parsed, rebuilt);
            assert_eq!(rebuilt.to_string(), s);
        }
    }
}
