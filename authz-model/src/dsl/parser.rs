use crate::dsl::ast::{Expr, Ident, RelationDecl, SchemaDoc, SubjectType, TypeDecl};
use crate::dsl::lexer::{tokenize, Token, TokenKind};
use crate::validation::{Diagnostic, DiagnosticKind};

/// Parse DSL source into a schema document.
///
/// Returns the first syntax error with its position; semantic checks live in
/// [`crate::validation`].
pub fn parse_schema(source: &str) -> Result<SchemaDoc, Diagnostic> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_document()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// The `[...]` block of the relation currently being parsed, if seen.
    subjects: Option<Vec<SubjectType>>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            subjects: None,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, Diagnostic> {
        if &self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected {}", kind.describe())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Ident, Diagnostic> {
        let token = self.peek().clone();
        if let TokenKind::Ident(text) = token.kind {
            self.advance();
            Ok(Ident::new(text, token.line, token.column))
        } else {
            Err(self.unexpected(&format!("expected {what}")))
        }
    }

    fn unexpected(&self, message: &str) -> Diagnostic {
        let token = self.peek();
        Diagnostic::new(
            DiagnosticKind::SyntaxError,
            format!("{message}, found {}", token.kind.describe()),
            token.line,
            token.column,
        )
    }

    fn parse_document(mut self) -> Result<SchemaDoc, Diagnostic> {
        let mut types = Vec::new();
        while self.peek().kind != TokenKind::Eof {
            types.push(self.parse_type()?);
        }
        Ok(SchemaDoc { types })
    }

    fn parse_type(&mut self) -> Result<TypeDecl, Diagnostic> {
        self.expect(&TokenKind::KwType)?;
        let name = self.expect_ident("type name")?;
        self.expect(&TokenKind::LBrace)?;
        let mut relations = Vec::new();
        while self.peek().kind != TokenKind::RBrace {
            relations.push(self.parse_relation()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(TypeDecl { name, relations })
    }

    fn parse_relation(&mut self) -> Result<RelationDecl, Diagnostic> {
        self.expect(&TokenKind::KwRelation)?;
        let name = self.expect_ident("relation name")?;
        self.expect(&TokenKind::Colon)?;
        self.subjects = None;
        let rewrite = self.parse_expr()?;
        let subject_types = self.subjects.take().unwrap_or_default();
        Ok(RelationDecl {
            name,
            subject_types,
            rewrite,
        })
    }

    /// One combinator per nesting level: `a or b or c`, `a and b`, or
    /// `a but not b`. Mixing requires parentheses.
    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        let first = self.parse_term()?;
        let expr = match self.peek().kind {
            TokenKind::KwOr => {
                let mut children = vec![first];
                while self.peek().kind == TokenKind::KwOr {
                    self.advance();
                    children.push(self.parse_term()?);
                }
                Expr::Union(children)
            }
            TokenKind::KwAnd => {
                let mut children = vec![first];
                while self.peek().kind == TokenKind::KwAnd {
                    self.advance();
                    children.push(self.parse_term()?);
                }
                Expr::Intersection(children)
            }
            TokenKind::KwBut => {
                self.advance();
                self.expect(&TokenKind::KwNot)?;
                let subtract = self.parse_term()?;
                Expr::Difference {
                    base: Box::new(first),
                    subtract: Box::new(subtract),
                }
            }
            _ => first,
        };
        match self.peek().kind {
            TokenKind::KwOr | TokenKind::KwAnd | TokenKind::KwBut => {
                Err(self.unexpected("combinators do not mix at one level; parenthesize"))
            }
            _ => Ok(expr),
        }
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        match self.peek().kind.clone() {
            TokenKind::LBracket => {
                let open = self.advance();
                if self.subjects.is_some() {
                    return Err(Diagnostic::new(
                        DiagnosticKind::SyntaxError,
                        "at most one direct-assignment block per relation".to_string(),
                        open.line,
                        open.column,
                    ));
                }
                let mut list = Vec::new();
                if self.peek().kind != TokenKind::RBracket {
                    list.push(self.parse_subject_type()?);
                    while self.peek().kind == TokenKind::Comma {
                        self.advance();
                        list.push(self.parse_subject_type()?);
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                self.subjects = Some(list);
                Ok(Expr::This)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(_) => {
                let name = self.expect_ident("relation reference")?;
                if self.peek().kind == TokenKind::KwFrom {
                    self.advance();
                    let tupleset = self.expect_ident("tupleset relation")?;
                    Ok(Expr::TupleToUserset {
                        computed: name,
                        tupleset,
                    })
                } else {
                    Ok(Expr::Computed { relation: name })
                }
            }
            _ => Err(self.unexpected("expected userset expression")),
        }
    }

    fn parse_subject_type(&mut self) -> Result<SubjectType, Diagnostic> {
        let object_type = self.expect_ident("subject type")?;
        match self.peek().kind {
            TokenKind::Hash => {
                self.advance();
                let relation = self.expect_ident("userset relation")?;
                Ok(SubjectType::Userset {
                    object_type,
                    relation,
                })
            }
            TokenKind::Colon => {
                self.advance();
                self.expect(&TokenKind::Star)?;
                Ok(SubjectType::Wildcard { object_type })
            }
            _ => Ok(SubjectType::Direct { object_type }),
        }
    }
}
