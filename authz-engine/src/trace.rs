use serde::{Deserialize, Serialize};

/// One node of a check's resolution tree.
///
/// Only populated when a check runs with `trace` enabled; tracing records
/// what was evaluated and how it resolved but never changes the outcome.
/// Branches cancelled by a short-circuit simply do not appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionNode {
    /// What was evaluated, e.g. `document:readme#viewer`, `union`,
    /// `direct:user:alice` or `ttu:parent->viewer`.
    pub label: String,
    pub outcome: bool,
    pub children: Vec<ResolutionNode>,
}

impl ResolutionNode {
    pub fn leaf(label: impl Into<String>, outcome: bool) -> Self {
        Self {
            label: label.into(),
            outcome,
            children: Vec::new(),
        }
    }

    pub fn branch(label: impl Into<String>, outcome: bool, children: Vec<ResolutionNode>) -> Self {
        Self {
            label: label.into(),
            outcome,
            children,
        }
    }

    /// Flatten the tree into `label=outcome` lines, depth-first. Handy in
    /// tests and debug logs.
    pub fn flatten(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<String>) {
        out.push(format!("{}={}", self.label, self.outcome));
        for child in &self.children {
            child.collect(out);
        }
    }
}
