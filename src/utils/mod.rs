//! Utility modules shared across the crate:
//! error types, source location tracking and indented text output.

pub mod errors;
pub mod location;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use location::{SourceLocation, Span};
pub use pretty::CodeFormatter;
