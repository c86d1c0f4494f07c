//! Core parser infrastructure and statement-level parsing rules.
//!
//! The [`Parser`] struct provides primitive operations (advance, expect, eat)
//! and parses statements; expressions are handled by the Pratt parser in
//! `expr.rs`. Parsing stops at the first error.

use crate::ast::{FunctionDecl, Stmt};
use crate::error::EngineError;
use crate::lexer::{lex, lex_range};
use crate::token::{Span, Token, TokenKind};

/// Maximum nesting of statements and expressions. Deeper input is a syntax
/// error rather than a native stack overflow.
pub const MAX_NESTING: usize = 128;

/// Parses a complete script.
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, EngineError> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(tokens, source);
    parser.parse_statements_until(TokenKind::Eof)
}

/// Parses the braced function body at `span` out of a larger source.
///
/// Returns an error if the span does not hold exactly one `{ ... }` block.
pub fn parse_function_body(source: &str, span: Span) -> Result<Vec<Stmt>, EngineError> {
    let tokens = lex_range(source, span.start as usize, span.end as usize)?;
    let mut parser = Parser::new(tokens, source);
    let (body, _) = parser.parse_block()?;
    if !parser.at_eof() {
        return Err(parser.error_here("expected end of function body"));
    }
    Ok(body)
}

/// A recursive descent parser over a token stream.
pub struct Parser<'src> {
    pub(crate) tokens: Vec<Token>,
    pub(crate) pos: usize,
    source: &'src str,
    depth: usize,
}

impl<'src> Parser<'src> {
    /// Creates a new parser from a token stream.
    pub fn new(tokens: Vec<Token>, source: &'src str) -> Self {
        Self {
            tokens,
            pos: 0,
            source,
            depth: 0,
        }
    }

    // ========================================================================
    // Primitive operations
    // ========================================================================

    /// Returns the kind of the current token.
    pub(crate) fn current(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    /// Returns the span of the current token.
    pub(crate) fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    /// Returns the source text of the current token.
    pub(crate) fn current_text(&self) -> &'src str {
        let span = self.current_span();
        &self.source[span.start as usize..span.end as usize]
    }

    /// Returns `true` if the current token matches the given kind.
    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.current() == kind
    }

    /// Returns `true` if the parser is at end of input.
    pub(crate) fn at_eof(&self) -> bool {
        self.current() == TokenKind::Eof
    }

    /// Advances past the current token.
    pub(crate) fn advance(&mut self) {
        if !self.at_eof() {
            self.pos += 1;
        }
    }

    /// Consumes the current token if it matches the given kind.
    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes a token of the given kind or fails with `expected {what}`.
    pub(crate) fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, EngineError> {
        if self.at(kind) {
            let tok = self.tokens[self.pos];
            self.advance();
            Ok(tok)
        } else {
            Err(self.error_here(&format!("expected {what}")))
        }
    }

    /// Builds a syntax error located at the current token.
    pub(crate) fn error_here(&self, msg: &str) -> EngineError {
        let found = if self.at_eof() {
            "end of input".to_string()
        } else {
            format!("'{}'", self.current_text())
        };
        EngineError::syntax(
            format!("{msg}, found {found}"),
            self.source,
            self.current_span().start as usize,
        )
    }

    /// Runs `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    /// Levels added by [`deepen`](Self::deepen) inside `parse` are released
    /// on return.
    pub(crate) fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let outer = self.depth;
        self.deepen()?;
        let result = parse(self);
        self.depth = outer;
        result
    }

    /// Adds one level of nesting, for trees built by a loop rather than by
    /// recursion (operator and postfix chains).
    pub(crate) fn deepen(&mut self) -> Result<(), EngineError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Consumes an identifier and returns its text.
    pub(crate) fn expect_ident(&mut self, what: &str) -> Result<String, EngineError> {
        if self.at(TokenKind::Ident) {
            let text = self.current_text().to_string();
            self.advance();
            Ok(text)
        } else {
            Err(self.error_here(&format!("expected {what}")))
        }
    }

    /// Ends a statement: a `;`, a closing brace, end of input, or a line break.
    fn end_statement(&mut self) -> Result<(), EngineError> {
        if self.eat(TokenKind::Semicolon) {
            return Ok(());
        }
        if self.at(TokenKind::RBrace) || self.at_eof() || self.tokens[self.pos].newline_before {
            return Ok(());
        }
        Err(self.error_here("expected ';'"))
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Parses statements until `end` (which is not consumed).
    pub(crate) fn parse_statements_until(
        &mut self,
        end: TokenKind,
    ) -> Result<Vec<Stmt>, EngineError> {
        let mut stmts = Vec::new();
        while !self.at(end) {
            if self.at_eof() {
                return Err(self.error_here("expected '}'"));
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    /// Parses `{ statements }` and returns the statements with the block's span.
    pub(crate) fn parse_block(&mut self) -> Result<(Vec<Stmt>, Span), EngineError> {
        let open = self.expect(TokenKind::LBrace, "'{'")?;
        let body = self.parse_statements_until(TokenKind::RBrace)?;
        let close = self.expect(TokenKind::RBrace, "'}'")?;
        Ok((body, open.span.merge(close.span)))
    }

    /// Parses a single statement.
    pub fn parse_statement(&mut self) -> Result<Stmt, EngineError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, EngineError> {
        match self.current() {
            TokenKind::Let | TokenKind::Const | TokenKind::Var => {
                self.advance();
                let name = self.expect_ident("variable name")?;
                let init = if self.eat(TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.end_statement()?;
                Ok(Stmt::Declare { name, init })
            }
            TokenKind::Function if self.peek_kind(1) == TokenKind::Ident => {
                self.advance();
                let decl = self.parse_function_rest()?;
                self.eat(TokenKind::Semicolon);
                Ok(Stmt::Function(decl))
            }
            TokenKind::Return => {
                self.advance();
                let ends_here = self.at(TokenKind::Semicolon)
                    || self.at(TokenKind::RBrace)
                    || self.at_eof()
                    || self.tokens[self.pos].newline_before;
                let value = if ends_here {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen, "'(' after 'if'")?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                let then = self.parse_body()?;
                let otherwise = if self.eat(TokenKind::Else) {
                    Some(self.parse_body()?)
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen, "'(' after 'while'")?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                let body = self.parse_body()?;
                Ok(Stmt::While { cond, body })
            }
            TokenKind::LBrace => {
                let (body, _) = self.parse_block()?;
                Ok(Stmt::Block(body))
            }
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Empty)
            }
            _ => {
                let expr = self.parse_expr()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Parses the body of `if`/`while`: a block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, EngineError> {
        if self.at(TokenKind::LBrace) {
            Ok(self.parse_block()?.0)
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    /// Parses a function after its `function` keyword: optional name,
    /// parameter list, and body.
    pub(crate) fn parse_function_rest(&mut self) -> Result<FunctionDecl, EngineError> {
        let name = if self.at(TokenKind::Ident) {
            Some(self.expect_ident("function name")?)
        } else {
            None
        };
        self.expect(TokenKind::LParen, "'(' before parameters")?;
        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) {
            params.push(self.expect_ident("parameter name")?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' after parameters")?;
        let (body, body_span) = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            body_span,
        })
    }

    fn peek_kind(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn parse_expression_statements() {
        let prog = parse_program("console.log('hi');43;").unwrap();
        assert_eq!(prog.len(), 2);
        assert_eq!(prog[1], Stmt::Expr(Expr::Number(43.0)));
    }

    #[test]
    fn semicolons_are_optional_at_line_breaks() {
        let prog = parse_program("let a = 1\nlet b = 2\na + b").unwrap();
        assert_eq!(prog.len(), 3);
    }

    #[test]
    fn missing_semicolon_on_same_line_errors() {
        let err = parse_program("let a = 1 let b = 2").unwrap_err();
        assert!(err.to_string().contains("expected ';'"));
    }

    #[test]
    fn function_declaration_and_expression() {
        let prog = parse_program("function f(a, b) { return a + b; }\nlet g = function () {};")
            .unwrap();
        match &prog[0] {
            Stmt::Function(decl) => {
                assert_eq!(decl.name.as_deref(), Some("f"));
                assert_eq!(decl.params, vec!["a", "b"]);
                assert_eq!(decl.body.len(), 1);
            }
            other => panic!("expected function declaration, got {other:?}"),
        }
        assert!(matches!(
            &prog[1],
            Stmt::Declare {
                init: Some(Expr::Function(_)),
                ..
            }
        ));
    }

    #[test]
    fn body_span_covers_braces() {
        let src = "function f() { return 1; }";
        let prog = parse_program(src).unwrap();
        let Stmt::Function(decl) = &prog[0] else {
            panic!("expected function");
        };
        let text = &src[decl.body_span.start as usize..decl.body_span.end as usize];
        assert_eq!(text, "{ return 1; }");
        let body = parse_function_body(src, decl.body_span).unwrap();
        assert_eq!(body, decl.body);
    }

    #[test]
    fn if_else_and_while() {
        let prog = parse_program("if (a) b = 1; else { b = 2 }\nwhile (i < 3) i = i + 1").unwrap();
        assert!(matches!(
            &prog[0],
            Stmt::If {
                otherwise: Some(_),
                ..
            }
        ));
        assert!(matches!(&prog[1], Stmt::While { .. }));
    }

    #[test]
    fn return_without_value() {
        let prog = parse_program("function f() { return }").unwrap();
        let Stmt::Function(decl) = &prog[0] else {
            panic!("expected function");
        };
        assert_eq!(decl.body, vec![Stmt::Return(None)]);
    }

    #[test]
    fn unclosed_block_errors() {
        assert!(parse_program("function f() { return 1;").is_err());
    }

    #[test]
    fn deeply_nested_blocks_are_a_syntax_error() {
        let deep = format!("{}1{}", "{".repeat(1000), "}".repeat(1000));
        let err = parse_program(&deep).unwrap_err();
        assert!(matches!(err, EngineError::Syntax { .. }));
        assert!(err.to_string().contains("nesting too deep"));

        let ok = format!("{}1{}", "{".repeat(50), "}".repeat(50));
        assert!(parse_program(&ok).is_ok());
    }

    #[test]
    fn nesting_is_counted_across_functions() {
        let deep = "function f() { ".repeat(200) + &"}".repeat(200);
        let err = parse_program(&deep).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"));
    }

    #[test]
    fn function_body_must_be_a_block() {
        let src = "1 + 2";
        assert!(parse_function_body(src, Span::new(0, src.len() as u32)).is_err());
    }
}
