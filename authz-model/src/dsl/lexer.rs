use crate::validation::{Diagnostic, DiagnosticKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    KwType,
    KwRelation,
    KwOr,
    KwAnd,
    KwBut,
    KwNot,
    KwFrom,
    Colon,
    Hash,
    Comma,
    Star,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier {name:?}"),
            Self::KwType => "'type'".into(),
            Self::KwRelation => "'relation'".into(),
            Self::KwOr => "'or'".into(),
            Self::KwAnd => "'and'".into(),
            Self::KwBut => "'but'".into(),
            Self::KwNot => "'not'".into(),
            Self::KwFrom => "'from'".into(),
            Self::Colon => "':'".into(),
            Self::Hash => "'#'".into(),
            Self::Comma => "','".into(),
            Self::Star => "'*'".into(),
            Self::LBracket => "'['".into(),
            Self::RBracket => "']'".into(),
            Self::LBrace => "'{'".into(),
            Self::RBrace => "'}'".into(),
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

/// Tokenize DSL source. Whitespace is insignificant; `//` starts a line
/// comment. Stops at the first bad character.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;
    let mut column: u32 = 1;

    while let Some(&c) = chars.peek() {
        let (tok_line, tok_column) = (line, column);
        match c {
            '\n' => {
                chars.next();
                line += 1;
                column = 1;
            }
            c if c.is_whitespace() => {
                chars.next();
                column += 1;
            }
            '/' => {
                chars.next();
                column += 1;
                if chars.peek() == Some(&'/') {
                    while let Some(&c) = chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                        column += 1;
                    }
                } else {
                    return Err(bad_char('/', tok_line, tok_column));
                }
            }
            c if c.is_ascii_lowercase() || c == '_' => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                        text.push(c);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                let kind = match text.as_str() {
                    "type" => TokenKind::KwType,
                    "relation" => TokenKind::KwRelation,
                    "or" => TokenKind::KwOr,
                    "and" => TokenKind::KwAnd,
                    "but" => TokenKind::KwBut,
                    "not" => TokenKind::KwNot,
                    "from" => TokenKind::KwFrom,
                    _ => TokenKind::Ident(text),
                };
                tokens.push(Token {
                    kind,
                    line: tok_line,
                    column: tok_column,
                });
            }
            _ => {
                let kind = match c {
                    ':' => TokenKind::Colon,
                    '#' => TokenKind::Hash,
                    ',' => TokenKind::Comma,
                    '*' => TokenKind::Star,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    _ => return Err(bad_char(c, tok_line, tok_column)),
                };
                chars.next();
                column += 1;
                tokens.push(Token {
                    kind,
                    line: tok_line,
                    column: tok_column,
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        column,
    });
    Ok(tokens)
}

fn bad_char(c: char, line: u32, column: u32) -> Diagnostic {
    Diagnostic::new(
        DiagnosticKind::SyntaxError,
        format!("unexpected character {c:?}"),
        line,
        column,
    )
}
