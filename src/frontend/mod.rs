//! Frontend: lexer and parser for the textual IR.
//!
//! The input is the generic form emitted by [`crate::ir::print_function`]:
//!
//! ```text
//! func @sum(%n: i64) {
//!   %c0 = constant() {value = 0} : i64
//!   %c3 = constant() {value = 3} : i64
//!   %r = for(%c0, %n, %c3, %c0) {dims = 1} ({
//!   ^bb0(%i: i64, %acc: i64):
//!     %s = add(%acc, %i) : i64
//!     yield(%s)
//!   }) : i64
//!   return(%r)
//! }
//! ```

pub mod token;
pub mod lexer;
pub mod parser;

// Re-exports
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Token, TokenKind};
pub use crate::utils::errors::ParseError;

use crate::ir::{verify, IrFunction};
use crate::utils::errors::StructLoopResult;
use anyhow::{Context, Result};

/// Parse source text into a function without verifying it.
pub fn parse_unverified(source: &str) -> StructLoopResult<IrFunction> {
    let lexer = Lexer::new(source);
    let mut parser = Parser::new(lexer)?;
    parser.parse_function()
}

/// Parse source text and verify the resulting function.
pub fn parse(source: &str) -> Result<IrFunction> {
    let func = parse_unverified(source)?;
    verify(&func).with_context(|| format!("function @{} failed verification", func.name))?;
    Ok(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::print_function;

    const SUM: &str = r#"
        // sum of 0, 3, 6, 9
        func @sum(%n: i64) {
          %c0 = constant() {value = 0} : i64
          %c3 = constant() {value = 3} : i64
          %r = for(%c0, %n, %c3, %c0) {dims = 1, label = "outer"} ({
          ^bb0(%i: i64, %acc: i64):
            %s = add(%acc, %i) : i64
            yield(%s)
          }) : i64
          return(%r)
        }
    "#;

    #[test]
    fn test_parse_simple() {
        let func = parse(SUM).unwrap();
        assert_eq!(func.name, "sum");
        assert_eq!(func.args().len(), 1);
    }

    #[test]
    fn test_print_parse_round_trip() {
        let func = parse(SUM).unwrap();
        let printed = print_function(&func);
        let reparsed = parse(&printed).unwrap();
        assert_eq!(print_function(&reparsed), printed);
        assert!(printed.contains("label = \"outer\""));
    }

    #[test]
    fn test_parse_rejects_invalid_ir() {
        let source = r#"
            func @f(%n: i64) {
              %c0 = constant() {value = 0} : i64
              for(%c0, %n, %c0) {dims = 1} ({
              ^bb0(%i: i64):
                yield()
              })
              return()
            }
        "#;
        let err = parse(source).unwrap_err();
        assert!(format!("{:#}", err).contains("must be positive"));
    }
}
