//! Error types for the structured loop transformations.
//!
//! This module defines all error types used throughout the crate,
//! organized by the phase that produces them.

use thiserror::Error;
use crate::ir::OpId;
use crate::utils::location::Span;
use std::fmt;

/// Top-level error type for the crate.
#[derive(Error, Debug)]
pub enum StructLoopError {
    /// Error during lexing/tokenization
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    /// Error during parsing
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// IR failed verification
    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),

    /// Error during reference evaluation
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Error during transformation
    #[error("Transformation error: {0}")]
    Transform(#[from] TransformError),

    /// Internal compiler error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error during lexical analysis.
#[derive(Error, Debug, Clone)]
pub struct LexerError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of lexer error
    pub kind: LexerErrorKind,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerErrorKind {
    /// Unexpected character
    UnexpectedChar,
    /// Unterminated string literal
    UnterminatedString,
    /// Invalid number literal
    InvalidNumber,
    /// Malformed `tensor<...>` type
    InvalidType,
    /// Sigil (`%`, `@`, `^`) not followed by a name
    MissingName,
}

/// Error during parsing.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of parse error
    pub kind: ParseErrorKind,
    /// Expected tokens (if applicable)
    pub expected: Vec<String>,
    /// What was found
    pub found: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)?;
        if !self.expected.is_empty() {
            write!(f, " (expected: {})", self.expected.join(", "))?;
        }
        if let Some(ref found) = self.found {
            write!(f, " (found: {})", found)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Unexpected token
    UnexpectedToken,
    /// Expected a specific token
    ExpectedToken,
    /// Use of a value that was never defined
    UndefinedValue,
    /// Value name defined twice
    DuplicateDefinition,
    /// Unknown operation name
    UnknownOperation,
    /// Operation attributes do not describe a valid op
    InvalidAttribute,
    /// Wrong number of result names or types
    ResultMismatch,
    /// Unexpected end of file
    UnexpectedEof,
}

/// Error raised by the IR verifier.
#[derive(Error, Debug, Clone)]
pub struct VerifyError {
    /// The error message
    pub message: String,
    /// The offending operation, if any
    pub op: Option<OpId>,
}

impl VerifyError {
    /// Create a verifier error attached to an operation.
    pub fn at(op: OpId, message: impl Into<String>) -> Self {
        Self { message: message.into(), op: Some(op) }
    }

    /// Create a verifier error not attached to an operation.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), op: None }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Some(op) => write!(f, "{} ({})", self.message, op),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Error during reference evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Wrong number of function arguments
    #[error("expected {expected} arguments, got {found}")]
    ArgumentCount { expected: usize, found: usize },
    /// Runtime value does not match the expected type
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Tensor access outside its shape
    #[error("index out of bounds: {0}")]
    OutOfBounds(String),
    /// Division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,
    /// Loop step is zero or negative
    #[error("non-positive loop step {0}")]
    NonPositiveStep(i64),
    /// Construct the evaluator cannot execute
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Error during transformation.
#[derive(Error, Debug, Clone)]
pub struct TransformError {
    /// The error message
    pub message: String,
    /// The kind of transformation error
    pub kind: TransformErrorKind,
    /// The transformation that failed
    pub transform: String,
}

impl TransformError {
    /// Create a new transformation error.
    pub fn new(kind: TransformErrorKind, transform: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            transform: transform.to_string(),
        }
    }

    /// Nothing had to change; the IR was left untouched.
    pub fn no_op(transform: &str, message: impl Into<String>) -> Self {
        Self::new(TransformErrorKind::NoOpRequired, transform, message)
    }

    /// Check whether this error only signals that nothing changed.
    pub fn is_no_op(&self) -> bool {
        self.kind == TransformErrorKind::NoOpRequired
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.transform)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// Bounds and step are already aligned, or step is 1
    NoOpRequired,
    /// Tile-size vector has the wrong length or a negative entry
    InvalidTileSpecification,
    /// Operation cannot be decomposed into a loop nest
    UnsupportedOperationShape,
}

/// Result type using StructLoopError.
pub type StructLoopResult<T> = Result<T, StructLoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError {
            message: "Unexpected token".to_string(),
            span: Span::new(1, 5, 1, 10),
            kind: ParseErrorKind::UnexpectedToken,
            expected: vec!["identifier".to_string()],
            found: Some("number".to_string()),
        };
        let s = format!("{}", err);
        assert!(s.contains("Unexpected token"));
        assert!(s.contains("identifier"));
    }

    #[test]
    fn test_transform_error_no_op() {
        let err = TransformError::no_op("peeling", "step is 1");
        assert!(err.is_no_op());
        assert_eq!(format!("{}", err), "step is 1 in peeling");

        let err = TransformError::new(
            TransformErrorKind::InvalidTileSpecification,
            "tiling",
            "expected 2 tile sizes",
        );
        assert!(!err.is_no_op());
    }
}
