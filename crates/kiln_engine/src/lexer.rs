//! Lexical analyzer for script source text.
//!
//! Converts source text into a sequence of [`Token`]s, skipping whitespace,
//! line comments, and block comments. The lexer works on bytes; non-ASCII
//! text is only legal inside string literals and comments.

use crate::error::EngineError;
use crate::token::{lookup_keyword, Span, Token, TokenKind};

/// Lexes the whole source text into tokens.
///
/// The returned vector always ends with a [`TokenKind::Eof`] token.
pub fn lex(source: &str) -> Result<Vec<Token>, EngineError> {
    lex_range(source, 0, source.len())
}

/// Lexes `source[start..end]`, producing spans relative to the whole source.
///
/// Used to recompile a single function body out of a larger script.
pub fn lex_range(source: &str, start: usize, end: usize) -> Result<Vec<Token>, EngineError> {
    let mut lexer = Lexer {
        full: source,
        source: &source.as_bytes()[..end.min(source.len())],
        pos: start,
        newline_pending: false,
    };
    lexer.lex_all()
}

struct Lexer<'a> {
    full: &'a str,
    source: &'a [u8],
    pos: usize,
    newline_pending: bool,
}

impl<'a> Lexer<'a> {
    fn lex_all(&mut self) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.source.len() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span: Span::new(self.pos as u32, self.pos as u32),
                    newline_before: true,
                });
                break;
            }
            let start = self.pos;
            let kind = self.next_kind()?;
            tokens.push(Token {
                kind,
                span: self.span_from(start),
                newline_before: std::mem::take(&mut self.newline_pending),
            });
        }
        Ok(tokens)
    }

    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.source.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn advance(&mut self) -> u8 {
        let b = self.source[self.pos];
        self.pos += 1;
        b
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start as u32, self.pos as u32)
    }

    fn error(&self, msg: &str, offset: usize) -> EngineError {
        EngineError::syntax(msg, self.full, offset)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), EngineError> {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                if self.source[self.pos] == b'\n' {
                    self.newline_pending = true;
                }
                self.pos += 1;
            }
            if self.peek() == b'/' && self.peek_at(1) == b'/' {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            if self.peek() == b'/' && self.peek_at(1) == b'*' {
                let start = self.pos;
                self.pos += 2;
                loop {
                    if self.pos >= self.source.len() {
                        return Err(self.error("unterminated block comment", start));
                    }
                    if self.peek() == b'*' && self.peek_at(1) == b'/' {
                        self.pos += 2;
                        break;
                    }
                    if self.source[self.pos] == b'\n' {
                        self.newline_pending = true;
                    }
                    self.pos += 1;
                }
                continue;
            }
            return Ok(());
        }
    }

    fn next_kind(&mut self) -> Result<TokenKind, EngineError> {
        let start = self.pos;
        let c = self.peek();

        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_ascii_digit()) {
            self.lex_number();
            return Ok(TokenKind::Number);
        }
        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' || self.peek() == b'$'
            {
                self.pos += 1;
            }
            let text = &self.full[start..self.pos];
            return Ok(lookup_keyword(text).unwrap_or(TokenKind::Ident));
        }
        if c == b'"' || c == b'\'' {
            return self.lex_string(c);
        }

        self.advance();
        let kind = match c {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'=' => {
                if self.eat(b'=') {
                    if self.eat(b'=') {
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                } else {
                    TokenKind::Assign
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    if self.eat(b'=') {
                        TokenKind::NotEqEq
                    } else {
                        TokenKind::NotEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            b'<' => {
                if self.eat(b'=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'&' if self.eat(b'&') => TokenKind::AndAnd,
            b'|' if self.eat(b'|') => TokenKind::OrOr,
            _ => {
                let ch = self
                    .full
                    .get(start..)
                    .and_then(|s| s.chars().next())
                    .unwrap_or('?');
                return Err(self.error(&format!("unexpected character '{ch}'"), start));
            }
        };
        Ok(kind)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == b {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn lex_number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.pos += 1;
        }
        if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            self.pos += 1;
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        } else if self.peek() == b'.' && !self.peek_at(1).is_ascii_alphabetic() {
            // `1.` is a complete literal
            self.pos += 1;
        }
        if matches!(self.peek(), b'e' | b'E') {
            let sign = usize::from(matches!(self.peek_at(1), b'+' | b'-'));
            if self.peek_at(1 + sign).is_ascii_digit() {
                self.pos += 1 + sign;
                while self.peek().is_ascii_digit() {
                    self.pos += 1;
                }
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<TokenKind, EngineError> {
        let start = self.pos;
        self.advance();
        loop {
            if self.pos >= self.source.len() {
                return Err(self.error("unterminated string literal", start));
            }
            match self.advance() {
                b'\\' => {
                    if self.pos >= self.source.len() {
                        return Err(self.error("unterminated string literal", start));
                    }
                    self.pos += 1;
                }
                b'\n' => return Err(self.error("unterminated string literal", start)),
                b if b == quote => return Ok(TokenKind::String),
                _ => {}
            }
        }
    }
}

/// Decodes the escapes of a string literal's text, quotes included.
pub fn unescape(literal: &str) -> Result<String, String> {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| format!("invalid unicode escape '\\u{hex}'"))?;
                let ch = char::from_u32(code)
                    .ok_or_else(|| format!("invalid unicode escape '\\u{hex}'"))?;
                out.push(ch);
            }
            Some('\n') => {}
            Some(other) => out.push(other),
            None => return Err("dangling escape".to_string()),
        }
    }
    Ok(out)
}
