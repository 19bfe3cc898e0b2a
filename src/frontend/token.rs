//! Token types for the textual IR.

use crate::utils::location::Span;
use std::fmt;

/// A token in the source code.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The source span
    pub span: Span,
    /// The lexeme (raw text)
    pub lexeme: String,
}

impl Token {
    /// Create a new token.
    pub fn new(kind: TokenKind, span: Span, lexeme: String) -> Self {
        Self { kind, span, lexeme }
    }

    /// Check if this is an EOF token.
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    /// Name without its sigil, for `%value`, `@func` and `^block` tokens.
    pub fn name(&self) -> &str {
        match self.kind {
            TokenKind::ValueName | TokenKind::FuncName | TokenKind::BlockLabel => &self.lexeme[1..],
            _ => &self.lexeme,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eof() {
            write!(f, "end of input")
        } else {
            write!(f, "'{}'", self.lexeme)
        }
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    /// Integer literal, optionally negative
    Integer,
    /// String literal (lexeme keeps the quotes)
    String,

    // Names
    /// Bare identifier: op names, attribute keys, `func`, `i64`, `true`
    Identifier,
    /// `%name`
    ValueName,
    /// `@name`
    FuncName,
    /// `^name`
    BlockLabel,
    /// `tensor<...>` scanned as one token
    TensorType,

    // Delimiters
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `=`
    Equal,

    // Special
    /// End of file
    Eof,
}

impl TokenKind {
    /// Human-readable description for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Integer => "integer",
            TokenKind::String => "string",
            TokenKind::Identifier => "identifier",
            TokenKind::ValueName => "value name",
            TokenKind::FuncName => "function name",
            TokenKind::BlockLabel => "block label",
            TokenKind::TensorType => "tensor type",
            TokenKind::LeftParen => "'('",
            TokenKind::RightParen => "')'",
            TokenKind::LeftBracket => "'['",
            TokenKind::RightBracket => "']'",
            TokenKind::LeftBrace => "'{'",
            TokenKind::RightBrace => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Equal => "'='",
            TokenKind::Eof => "end of input",
        }
    }
}
