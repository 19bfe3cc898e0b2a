//! Parser for the textual IR.
//!
//! A recursive descent parser that builds an [`IrFunction`] directly
//! through the [`Rewriter`], resolving value names against a stack of
//! lexical scopes (one per region).

use crate::frontend::lexer::{unescape, Lexer};
use crate::frontend::token::{Token, TokenKind};
use crate::ir::function::{BlockId, IrFunction, ValueId};
use crate::ir::ops::{Attribute, OpKind};
use crate::ir::rewriter::Rewriter;
use crate::ir::types::{TensorType, Type};
use crate::utils::errors::{ParseError, ParseErrorKind, StructLoopError, StructLoopResult};
use crate::utils::location::Span;
use std::collections::{BTreeMap, HashMap};

type ParseResult<T> = Result<T, StructLoopError>;

/// A parser for one function in textual form.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
    scopes: Vec<HashMap<String, ValueId>>,
}

impl<'a> Parser<'a> {
    /// Create a new parser from a lexer.
    pub fn new(mut lexer: Lexer<'a>) -> StructLoopResult<Self> {
        let first_token = lexer.next_token()?;
        Ok(Self {
            lexer,
            current: first_token.clone(),
            previous: first_token,
            scopes: Vec::new(),
        })
    }

    /// Parse `func @name(args) { ops }` followed by end of input.
    pub fn parse_function(&mut self) -> StructLoopResult<IrFunction> {
        self.consume_keyword("func")?;
        let name = self.consume(TokenKind::FuncName, "Expected function name")?.name().to_string();

        self.consume(TokenKind::LeftParen, "Expected '(' after function name")?;
        let mut arg_names = Vec::new();
        let mut arg_types = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let arg = self.consume(TokenKind::ValueName, "Expected argument name")?.clone();
                self.consume(TokenKind::Colon, "Expected ':' after argument name")?;
                arg_names.push(arg);
                arg_types.push(self.parse_type()?);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after arguments")?;

        let mut func = IrFunction::new(name, arg_types);
        let body = func.body();
        let args = func.args().to_vec();
        self.scopes.push(HashMap::new());
        for (token, value) in arg_names.iter().zip(args) {
            self.define(token, value)?;
        }

        self.consume(TokenKind::LeftBrace, "Expected '{' to open function body")?;
        {
            let mut rw = Rewriter::new(&mut func);
            self.parse_ops(&mut rw, body)?;
        }
        self.consume(TokenKind::RightBrace, "Expected '}' to close function body")?;
        self.scopes.pop();

        if !self.current.is_eof() {
            return Err(self.error_here(ParseErrorKind::UnexpectedToken, "Trailing input after function"));
        }
        Ok(func)
    }

    /// Parse operations into `block` until a closing brace.
    fn parse_ops(&mut self, rw: &mut Rewriter<'_>, block: BlockId) -> ParseResult<()> {
        while !self.check(TokenKind::RightBrace) {
            if self.current.is_eof() {
                return Err(self.error_here(ParseErrorKind::UnexpectedEof, "Unexpected end of input in block"));
            }
            self.parse_op(rw, block)?;
        }
        Ok(())
    }

    fn parse_op(&mut self, rw: &mut Rewriter<'_>, block: BlockId) -> ParseResult<()> {
        let start = self.current.span;

        let mut result_names = Vec::new();
        if self.check(TokenKind::ValueName) {
            loop {
                result_names.push(self.consume(TokenKind::ValueName, "Expected result name")?.clone());
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
            self.consume(TokenKind::Equal, "Expected '=' after result names")?;
        }

        let name_token = self.consume(TokenKind::Identifier, "Expected operation name")?.clone();

        self.consume(TokenKind::LeftParen, "Expected '(' before operands")?;
        let mut operands = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let token = self.consume(TokenKind::ValueName, "Expected operand")?.clone();
                operands.push(self.lookup(&token)?);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after operands")?;

        let mut attrs = if self.check(TokenKind::LeftBrace) {
            self.parse_attr_dict()?
        } else {
            BTreeMap::new()
        };

        let kind = OpKind::from_parts(&name_token.lexeme, &mut attrs).map_err(|message| {
            let kind = if message.starts_with("unknown operation") {
                ParseErrorKind::UnknownOperation
            } else {
                ParseErrorKind::InvalidAttribute
            };
            make_error(kind, message, name_token.span, Some(name_token.lexeme.clone()))
        })?;

        let mut regions = Vec::new();
        if self.match_token(TokenKind::LeftParen)? {
            loop {
                regions.push(self.parse_region(rw)?);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
            self.consume(TokenKind::RightParen, "Expected ')' after regions")?;
        }
        if regions.len() != kind.num_regions() {
            return Err(make_error(
                ParseErrorKind::UnexpectedToken,
                format!("'{}' takes {} region(s), found {}", kind.name(), kind.num_regions(), regions.len()),
                name_token.span,
                None,
            ).into());
        }

        let mut result_types = Vec::new();
        if !result_names.is_empty() {
            self.consume(TokenKind::Colon, "Expected ':' before result types")?;
            loop {
                result_types.push(self.parse_type()?);
                if result_types.len() == result_names.len() || !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
            if result_types.len() != result_names.len() {
                return Err(make_error(
                    ParseErrorKind::ResultMismatch,
                    format!("{} result names but {} types", result_names.len(), result_types.len()),
                    start.merge(&self.previous.span),
                    None,
                ).into());
            }
        }

        rw.set_insertion_point_to_end(block);
        rw.set_span(start.merge(&self.previous.span));
        let op = rw.create_with_attrs(kind, operands, result_types, regions, attrs);
        let results = rw.func().op(op).results.clone();
        for (token, value) in result_names.iter().zip(results) {
            self.define(token, value)?;
        }
        Ok(())
    }

    /// Parse `{ ^label(args): ops }` into a fresh detached block.
    fn parse_region(&mut self, rw: &mut Rewriter<'_>) -> ParseResult<BlockId> {
        self.consume(TokenKind::LeftBrace, "Expected '{' to open region")?;
        self.consume(TokenKind::BlockLabel, "Expected block label")?;
        self.consume(TokenKind::LeftParen, "Expected '(' after block label")?;
        let mut arg_names = Vec::new();
        let mut arg_types = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                arg_names.push(self.consume(TokenKind::ValueName, "Expected block argument")?.clone());
                self.consume(TokenKind::Colon, "Expected ':' after block argument")?;
                arg_types.push(self.parse_type()?);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after block arguments")?;
        self.consume(TokenKind::Colon, "Expected ':' after block header")?;

        let block = rw.create_block(arg_types);
        let args = rw.func().block(block).args.clone();
        self.scopes.push(HashMap::new());
        for (token, value) in arg_names.iter().zip(args) {
            self.define(token, value)?;
        }
        self.parse_ops(rw, block)?;
        self.scopes.pop();
        self.consume(TokenKind::RightBrace, "Expected '}' to close region")?;
        Ok(block)
    }

    fn parse_type(&mut self) -> ParseResult<Type> {
        if self.check(TokenKind::TensorType) {
            let token = self.current.clone();
            self.advance()?;
            return TensorType::parse(&token.lexeme).map(Type::Tensor).ok_or_else(|| {
                make_error(
                    ParseErrorKind::UnexpectedToken,
                    format!("Invalid tensor type '{}'", token.lexeme),
                    token.span,
                    Some(token.lexeme.clone()),
                )
                .into()
            });
        }
        if self.check(TokenKind::Identifier) && self.current.lexeme == "i64" {
            self.advance()?;
            return Ok(Type::Int);
        }
        Err(self.expected_error(&["i64", "tensor type"]))
    }

    fn parse_attr_dict(&mut self) -> ParseResult<BTreeMap<String, Attribute>> {
        self.consume(TokenKind::LeftBrace, "Expected '{' to open attributes")?;
        let mut attrs = BTreeMap::new();
        if !self.check(TokenKind::RightBrace) {
            loop {
                let key = if self.check(TokenKind::String) {
                    unescape(&self.current.lexeme)
                } else if self.check(TokenKind::Identifier) {
                    self.current.lexeme.clone()
                } else {
                    return Err(self.expected_error(&["attribute name"]));
                };
                self.advance()?;
                let value = if self.match_token(TokenKind::Equal)? {
                    self.parse_attr_value()?
                } else {
                    Attribute::Unit
                };
                attrs.insert(key, value);
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBrace, "Expected '}' to close attributes")?;
        Ok(attrs)
    }

    fn parse_attr_value(&mut self) -> ParseResult<Attribute> {
        let token = self.current.clone();
        match token.kind {
            TokenKind::Integer => {
                self.advance()?;
                token.lexeme.parse::<i64>().map(Attribute::Int).map_err(|_| {
                    make_error(
                        ParseErrorKind::InvalidAttribute,
                        format!("Integer out of range: {}", token.lexeme),
                        token.span,
                        Some(token.lexeme.clone()),
                    )
                    .into()
                })
            }
            TokenKind::String => {
                self.advance()?;
                Ok(Attribute::Str(unescape(&token.lexeme)))
            }
            TokenKind::Identifier if matches!(token.lexeme.as_str(), "true" | "false" | "unit") => {
                self.advance()?;
                Ok(match token.lexeme.as_str() {
                    "true" => Attribute::Bool(true),
                    "false" => Attribute::Bool(false),
                    _ => Attribute::Unit,
                })
            }
            TokenKind::LeftBracket => {
                self.advance()?;
                let mut items = Vec::new();
                if !self.check(TokenKind::RightBracket) {
                    loop {
                        items.push(self.parse_attr_value()?);
                        if !self.match_token(TokenKind::Comma)? {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightBracket, "Expected ']' to close array")?;
                Ok(Attribute::Array(items))
            }
            _ => Err(self.expected_error(&["integer", "string", "true", "false", "unit", "'['"])),
        }
    }

    fn define(&mut self, token: &Token, value: ValueId) -> ParseResult<()> {
        let name = token.name().to_string();
        if self.scopes.iter().any(|scope| scope.contains_key(&name)) {
            return Err(make_error(
                ParseErrorKind::DuplicateDefinition,
                format!("Value '%{}' is already defined", name),
                token.span,
                None,
            )
            .into());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        }
        Ok(())
    }

    fn lookup(&self, token: &Token) -> ParseResult<ValueId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(token.name()).copied())
            .ok_or_else(|| {
                make_error(
                    ParseErrorKind::UndefinedValue,
                    format!("Use of undefined value '%{}'", token.name()),
                    token.span,
                    None,
                )
                .into()
            })
    }

    // Token helpers

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn advance(&mut self) -> ParseResult<&Token> {
        let next = self.lexer.next_token()?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(&self.previous)
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> ParseResult<&Token> {
        if self.check(kind) {
            self.advance()
        } else {
            let kind_desc = kind.describe();
            let error_kind = if self.current.is_eof() {
                ParseErrorKind::UnexpectedEof
            } else {
                ParseErrorKind::ExpectedToken
            };
            let mut err = self.error_here(error_kind, message);
            if let StructLoopError::Parse(ref mut parse) = err {
                parse.expected = vec![kind_desc.to_string()];
            }
            Err(err)
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.check(TokenKind::Identifier) && self.current.lexeme == keyword {
            self.advance()?;
            Ok(())
        } else {
            Err(self.expected_error(&[keyword]))
        }
    }

    fn match_token(&mut self, kind: TokenKind) -> ParseResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn error_here(&self, kind: ParseErrorKind, message: &str) -> StructLoopError {
        make_error(kind, message.to_string(), self.current.span, Some(self.current.to_string())).into()
    }

    fn expected_error(&self, expected: &[&str]) -> StructLoopError {
        let kind = if self.current.is_eof() {
            ParseErrorKind::UnexpectedEof
        } else {
            ParseErrorKind::UnexpectedToken
        };
        ParseError {
            message: "Unexpected token".to_string(),
            span: self.current.span,
            kind,
            expected: expected.iter().map(|s| s.to_string()).collect(),
            found: Some(self.current.to_string()),
        }
        .into()
    }
}

fn make_error(kind: ParseErrorKind, message: String, span: Span, found: Option<String>) -> ParseError {
    ParseError {
        message,
        span,
        kind,
        expected: Vec::new(),
        found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(source: &str) -> ParseError {
        let mut parser = Parser::new(Lexer::new(source)).unwrap();
        match parser.parse_function() {
            Err(StructLoopError::Parse(err)) => err,
            other => panic!("expected a parse error, got {:?}", other.map(|f| f.name)),
        }
    }

    #[test]
    fn test_parse_scoped_names() {
        let source = r#"
            func @f(%n: i64) {
              %c0 = constant() {value = 0} : i64
              %c1 = constant() {value = 1} : i64
              %r = for(%c0, %n, %c1, %c0) {dims = 1} ({
              ^bb0(%i: i64, %acc: i64):
                %s = add(%acc, %i) : i64
                yield(%s)
              }) : i64
              return(%r)
            }
        "#;
        let mut parser = Parser::new(Lexer::new(source)).unwrap();
        let func = parser.parse_function().unwrap();
        assert_eq!(func.name, "f");
        assert_eq!(func.num_ops(), 6);
        let lp = func.walk()[2];
        assert!(func.op(lp).kind.as_loop().is_some());
        assert!(!func.op(lp).span.is_dummy());
    }

    #[test]
    fn test_undefined_value() {
        let err = parse_err("func @f() {\n  return(%x)\n}");
        assert_eq!(err.kind, ParseErrorKind::UndefinedValue);
        assert_eq!(err.span.start.line, 2);
    }

    #[test]
    fn test_region_values_do_not_escape() {
        let source = r#"
            func @f(%n: i64) {
              %c1 = constant() {value = 1} : i64
              for(%c1, %n, %c1) {dims = 1} ({
              ^bb0(%i: i64):
                yield()
              })
              return(%i)
            }
        "#;
        assert_eq!(parse_err(source).kind, ParseErrorKind::UndefinedValue);
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let dup = "func @f() {\n %a = constant() {value = 1} : i64\n %a = constant() {value = 2} : i64\n return()\n}";
        assert_eq!(parse_err(dup).kind, ParseErrorKind::DuplicateDefinition);

        let unknown = "func @f() {\n frob()\n}";
        assert_eq!(parse_err(unknown).kind, ParseErrorKind::UnknownOperation);

        let missing = "func @f() {\n %a = constant() : i64\n return()\n}";
        assert_eq!(parse_err(missing).kind, ParseErrorKind::InvalidAttribute);
    }

    #[test]
    fn test_result_type_count() {
        let source = "func @f() {\n %a, %b = constant() {value = 1} : i64\n return()\n}";
        assert_eq!(parse_err(source).kind, ParseErrorKind::ResultMismatch);
    }

    #[test]
    fn test_unexpected_eof() {
        let err = parse_err("func @f() {\n %a = constant() {value = 1} : i64\n");
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEof);
    }
}
