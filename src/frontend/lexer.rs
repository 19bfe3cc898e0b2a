//! Lexer for the textual IR.
//!
//! The lexer converts source text into a stream of tokens.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::errors::{LexerError, LexerErrorKind};
use crate::utils::location::{SourceLocation, Span};
use unicode_xid::UnicodeXID;
use std::iter::Peekable;
use std::str::Chars;

/// A lexer for tokenizing IR text.
pub struct Lexer<'a> {
    /// The source text
    source: &'a str,
    /// Character iterator
    chars: Peekable<Chars<'a>>,
    /// Current byte offset
    offset: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Start of current token
    token_start: SourceLocation,
    /// Whether we've hit EOF
    at_eof: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
            offset: 0,
            line: 1,
            column: 1,
            token_start: SourceLocation::start(),
            at_eof: false,
        }
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.offset)
    }

    fn mark_token_start(&mut self) {
        self.token_start = self.current_location();
    }

    fn make_span(&self) -> Span {
        Span::from_locations(self.token_start, self.current_location())
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Peek one character past the current one.
    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.offset..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Skip whitespace and `//` line comments.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        let lexeme = self.source[self.token_start.offset..self.offset].to_string();
        Token::new(kind, self.make_span(), lexeme)
    }

    fn make_error(&self, message: &str, kind: LexerErrorKind) -> LexerError {
        LexerError {
            message: message.to_string(),
            span: self.make_span(),
            kind,
        }
    }

    fn is_name_char(c: char) -> bool {
        c.is_xid_continue() || c == '_' || c == '.' || c == '$'
    }

    fn consume_name(&mut self) -> usize {
        let mut count = 0;
        while self.peek().map(Self::is_name_char).unwrap_or(false) {
            self.advance();
            count += 1;
        }
        count
    }

    /// Scan `%name`, `@name` or `^name`; the sigil is already consumed.
    fn scan_sigil_name(&mut self, kind: TokenKind) -> Result<Token, LexerError> {
        if self.consume_name() == 0 {
            return Err(self.make_error("Expected a name after sigil", LexerErrorKind::MissingName));
        }
        Ok(self.make_token(kind))
    }

    fn scan_number(&mut self) -> Result<Token, LexerError> {
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.advance();
        }
        if self.peek().map(|c| c.is_xid_continue()).unwrap_or(false) {
            return Err(self.make_error("Invalid integer literal", LexerErrorKind::InvalidNumber));
        }
        Ok(self.make_token(TokenKind::Integer))
    }

    fn scan_identifier(&mut self) -> Result<Token, LexerError> {
        self.consume_name();
        let lexeme = &self.source[self.token_start.offset..self.offset];
        if lexeme == "tensor" && self.peek() == Some('<') {
            return self.scan_tensor_type();
        }
        Ok(self.make_token(TokenKind::Identifier))
    }

    /// Scan the rest of `tensor<4x?xi64>`.
    fn scan_tensor_type(&mut self) -> Result<Token, LexerError> {
        loop {
            match self.advance() {
                Some('>') => break,
                Some(c) if c.is_ascii_alphanumeric() || c == '?' || c == '<' => {}
                _ => return Err(self.make_error("Malformed tensor type", LexerErrorKind::InvalidType)),
            }
        }
        Ok(self.make_token(TokenKind::TensorType))
    }

    /// Scan a string literal; the opening quote is already consumed.
    fn scan_string(&mut self) -> Result<Token, LexerError> {
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\\') => {
                    if self.advance().is_none() {
                        return Err(self.make_error(
                            "Unterminated string literal",
                            LexerErrorKind::UnterminatedString,
                        ));
                    }
                }
                Some('\n') | None => {
                    return Err(self.make_error(
                        "Unterminated string literal",
                        LexerErrorKind::UnterminatedString,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(self.make_token(TokenKind::String))
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace();
        self.mark_token_start();

        let c = match self.advance() {
            Some(c) => c,
            None => {
                self.at_eof = true;
                return Ok(self.make_token(TokenKind::Eof));
            }
        };

        match c {
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '[' => Ok(self.make_token(TokenKind::LeftBracket)),
            ']' => Ok(self.make_token(TokenKind::RightBracket)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            ':' => Ok(self.make_token(TokenKind::Colon)),
            '=' => Ok(self.make_token(TokenKind::Equal)),

            '%' => self.scan_sigil_name(TokenKind::ValueName),
            '@' => self.scan_sigil_name(TokenKind::FuncName),
            '^' => self.scan_sigil_name(TokenKind::BlockLabel),

            '"' => self.scan_string(),

            '-' if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) => self.scan_number(),
            c if c.is_ascii_digit() => self.scan_number(),

            c if c.is_xid_start() || c == '_' => self.scan_identifier(),

            _ => Err(self.make_error(
                &format!("Unexpected character: '{}'", c),
                LexerErrorKind::UnexpectedChar,
            )),
        }
    }

    /// Check if we've reached EOF.
    pub fn is_at_end(&self) -> bool {
        self.at_eof
    }

    /// Collect all tokens into a vector.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}

/// Decode the body of a string literal lexeme (quotes included).
pub fn unescape(lexeme: &str) -> String {
    let inner = lexeme
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(lexeme);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}
