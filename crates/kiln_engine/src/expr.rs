//! Pratt expression parser.
//!
//! Binding powers, lowest to highest:
//!
//! 1. `=` (right-associative, handled above the Pratt loop)
//! 2. `||`
//! 3. `&&`
//! 4. `== != === !==`
//! 5. `< <= > >=`
//! 6. `+ -`
//! 7. `* / %`
//! 8. `- + ! typeof` (prefix)
//! 9. `.` `[]` `()` (postfix)

use crate::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use crate::error::EngineError;
use crate::lexer::unescape;
use crate::parser::Parser;
use crate::token::TokenKind;

/// An infix operator recognized by the Pratt loop.
#[derive(Clone, Copy)]
enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

/// Binding power for infix operators. Returns (left_bp, right_bp).
fn infix_binding_power(kind: TokenKind) -> Option<(Infix, u8, u8)> {
    let entry = match kind {
        TokenKind::OrOr => (Infix::Logical(LogicalOp::Or), 1, 2),
        TokenKind::AndAnd => (Infix::Logical(LogicalOp::And), 3, 4),
        TokenKind::EqEq => (Infix::Binary(BinaryOp::Eq), 5, 6),
        TokenKind::NotEq => (Infix::Binary(BinaryOp::NotEq), 5, 6),
        TokenKind::EqEqEq => (Infix::Binary(BinaryOp::StrictEq), 5, 6),
        TokenKind::NotEqEq => (Infix::Binary(BinaryOp::StrictNotEq), 5, 6),
        TokenKind::Lt => (Infix::Binary(BinaryOp::Lt), 7, 8),
        TokenKind::Le => (Infix::Binary(BinaryOp::Le), 7, 8),
        TokenKind::Gt => (Infix::Binary(BinaryOp::Gt), 7, 8),
        TokenKind::Ge => (Infix::Binary(BinaryOp::Ge), 7, 8),
        TokenKind::Plus => (Infix::Binary(BinaryOp::Add), 9, 10),
        TokenKind::Minus => (Infix::Binary(BinaryOp::Sub), 9, 10),
        TokenKind::Star => (Infix::Binary(BinaryOp::Mul), 11, 12),
        TokenKind::Slash => (Infix::Binary(BinaryOp::Div), 11, 12),
        TokenKind::Percent => (Infix::Binary(BinaryOp::Rem), 11, 12),
        _ => return None,
    };
    Some(entry)
}

/// Prefix binding power for unary operators.
const PREFIX_BP: u8 = 13;

fn prefix_op(kind: TokenKind) -> Option<UnaryOp> {
    match kind {
        TokenKind::Minus => Some(UnaryOp::Neg),
        TokenKind::Plus => Some(UnaryOp::Plus),
        TokenKind::Bang => Some(UnaryOp::Not),
        TokenKind::Typeof => Some(UnaryOp::Typeof),
        _ => None,
    }
}

impl Parser<'_> {
    /// Parses an expression, assignment included.
    pub fn parse_expr(&mut self) -> Result<Expr, EngineError> {
        let start = self.pos;
        let target = self.parse_expr_bp(0)?;
        if self.at(TokenKind::Assign) {
            if !target.is_assignable() {
                self.pos = start;
                return Err(self.error_here("invalid assignment target"));
            }
            self.advance();
            let value = self.parse_expr()?;
            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
            });
        }
        Ok(target)
    }

    /// Parses an expression with minimum binding power. Every operand runs
    /// one nesting level deeper, and each operator fold adds another.
    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr, EngineError> {
        self.nested(|p| p.parse_infix_chain(min_bp))
    }

    fn parse_infix_chain(&mut self, min_bp: u8) -> Result<Expr, EngineError> {
        let mut lhs = self.parse_prefix_expr()?;

        while let Some((op, l_bp, r_bp)) = infix_binding_power(self.current()) {
            if l_bp < min_bp {
                break;
            }
            self.deepen()?;
            self.advance(); // consume operator token
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = match op {
                Infix::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                Infix::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
            };
        }

        Ok(lhs)
    }

    /// Parses a prefix expression (unary operators, then a postfix chain).
    fn parse_prefix_expr(&mut self) -> Result<Expr, EngineError> {
        if let Some(op) = prefix_op(self.current()) {
            self.advance();
            let operand = self.parse_expr_bp(PREFIX_BP)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    /// Parses member access, indexing, and call suffixes.
    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, EngineError> {
        loop {
            if matches!(
                self.current(),
                TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen
            ) {
                self.deepen()?;
            }
            match self.current() {
                TokenKind::Dot => {
                    self.advance();
                    let property = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_list(TokenKind::RParen, "')'")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Accepts identifiers and keywords after `.`, as in `module.exports.default`.
    fn property_name(&mut self) -> Result<String, EngineError> {
        let text = self.current_text();
        let is_word = !text.is_empty()
            && text
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$')
            && !text.as_bytes()[0].is_ascii_digit();
        if is_word {
            let name = text.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_here("expected property name"))
        }
    }

    /// Parses comma-separated expressions up to `close`, which is consumed.
    /// A trailing comma is allowed.
    fn parse_list(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>, EngineError> {
        let mut items = Vec::new();
        while !self.at(close) {
            items.push(self.parse_expr()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(close, what)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, EngineError> {
        let expr = match self.current() {
            TokenKind::Number => {
                let text = self.current_text();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| self.error_here("invalid numeric literal"))?;
                self.advance();
                Expr::Number(value)
            }
            TokenKind::String => {
                let value = unescape(self.current_text()).map_err(|m| self.error_here(&m))?;
                self.advance();
                Expr::Str(value)
            }
            TokenKind::True => {
                self.advance();
                Expr::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                Expr::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                Expr::Null
            }
            TokenKind::Undefined => {
                self.advance();
                Expr::Undefined
            }
            TokenKind::This => {
                self.advance();
                Expr::This
            }
            TokenKind::Ident => Expr::Ident(self.expect_ident("identifier")?),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                inner
            }
            TokenKind::LBracket => {
                self.advance();
                Expr::Array(self.parse_list(TokenKind::RBracket, "']'")?)
            }
            TokenKind::LBrace => self.parse_object()?,
            TokenKind::Function => {
                self.advance();
                Expr::Function(Box::new(self.parse_function_rest()?))
            }
            _ => return Err(self.error_here("expected expression")),
        };
        Ok(expr)
    }

    /// Parses `{ key: value, ... }`. Keys are identifiers, keywords, strings,
    /// or numbers.
    fn parse_object(&mut self) -> Result<Expr, EngineError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut entries = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let key = match self.current() {
                TokenKind::String => {
                    let key = unescape(self.current_text()).map_err(|m| self.error_here(&m))?;
                    self.advance();
                    key
                }
                TokenKind::Number => {
                    let text = self.current_text();
                    let key = text
                        .parse::<f64>()
                        .map(crate::value::number_to_string)
                        .map_err(|_| self.error_here("invalid numeric literal"))?;
                    self.advance();
                    key
                }
                _ => self.property_name()?,
            };
            self.expect(TokenKind::Colon, "':' after property name")?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::Object(entries))
    }
}
