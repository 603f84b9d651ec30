use crate::dsl::ast::{Expr, RelationDecl, SchemaDoc, SubjectType};
use std::fmt::Write;

/// Render a schema document in canonical form.
///
/// The canonical form is what gets persisted and returned by `ReadModel`:
/// two-space indent, one relation per line, a blank line between types.
/// Reparsing the output yields a document equal to the input.
pub fn canonical_source(doc: &SchemaDoc) -> String {
    let mut out = String::new();
    for (i, type_decl) in doc.types.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if type_decl.relations.is_empty() {
            let _ = writeln!(out, "type {} {{}}", type_decl.name);
            continue;
        }
        let _ = writeln!(out, "type {} {{", type_decl.name);
        for relation in &type_decl.relations {
            let _ = writeln!(out, "  relation {}: {}", relation.name, render(relation));
        }
        out.push_str("}\n");
    }
    out
}

fn render(relation: &RelationDecl) -> String {
    let mut out = String::new();
    render_expr(&relation.rewrite, &relation.subject_types, false, &mut out);
    out
}

fn render_expr(expr: &Expr, subjects: &[SubjectType], nested: bool, out: &mut String) {
    match expr {
        Expr::This => {
            out.push('[');
            for (i, subject) in subjects.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{subject}");
            }
            out.push(']');
        }
        Expr::Computed { relation } => {
            let _ = write!(out, "{relation}");
        }
        Expr::TupleToUserset { computed, tupleset } => {
            let _ = write!(out, "{computed} from {tupleset}");
        }
        Expr::Union(children) => {
            render_combinator(children, subjects, " or ", nested, out);
        }
        Expr::Intersection(children) => {
            render_combinator(children, subjects, " and ", nested, out);
        }
        Expr::Difference { base, subtract } => {
            if nested {
                out.push('(');
            }
            render_expr(base, subjects, true, out);
            out.push_str(" but not ");
            render_expr(subtract, subjects, true, out);
            if nested {
                out.push(')');
            }
        }
    }
}

fn render_combinator(
    children: &[Expr],
    subjects: &[SubjectType],
    separator: &str,
    nested: bool,
    out: &mut String,
) {
    if nested {
        out.push('(');
    }
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        render_expr(child, subjects, true, out);
    }
    if nested {
        out.push(')');
    }
}
