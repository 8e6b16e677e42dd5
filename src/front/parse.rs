//! The parser.
//!
//! A hand-written recursive-descent parser over the precedence grammar in
//! `SPEC_FULL.md` §4.0:
//!
//! ```text
//! expr    := or_expr
//! or_expr := and_expr ( "or" and_expr )*
//! and_expr:= unary ( "and" unary )*
//! unary   := "not" unary | cmp
//! cmp     := sum ( ("==" | "!=" | "<" | "<=" | ">" | ">=") sum )?
//! sum     := term ( ("+" | "-") term )*
//! term    := shift ( ("*" | "/" | "&" | "|" | "^") shift )*
//! shift   := atom ( ("<<" | ">>") atom )*
//! atom    := number | field | "(" expr ")"
//! ```

use std::fmt::Debug;

use super::ast::*;
use super::lex::{lex, Token, TokenKind};
use crate::common::Id;

/// A front-end failure: either the lexer rejected a character, or the parser
/// could not build an expression tree from an otherwise well-formed token
/// stream. Kept as two variants (rather than collapsing to one string) so
/// [`CompileError`](crate::error::CompileError) can distinguish lex errors
/// from syntax errors, per `SPEC_FULL.md` §7.
pub enum ParseError {
    Lex { pos: usize, ch: char },
    Syntax(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Lex { pos, ch } => write!(f, "lexer error: unexpected character {ch:?} at byte {pos}"),
            ParseError::Syntax(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<crate::front::lex::LexError> for ParseError {
    fn from(e: crate::front::lex::LexError) -> Self {
        ParseError::Lex { pos: e.pos, ch: e.ch }
    }
}

fn syntax(msg: impl Into<String>) -> ParseError {
    ParseError::Syntax(msg.into())
}

struct Parser<'a, 'src> {
    tokens: &'a [Token<'src>],
    pos: usize,
}

impl<'a, 'src> Parser<'a, 'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek_kind() {
            Some(k) if k == kind => Ok(self.advance().unwrap()),
            Some(k) => Err(syntax(format!("expected {kind}, found {k}"))),
            None => Err(syntax(format!("expected {kind}, found end of input"))),
        }
    }

    fn expr(&mut self) -> Result<Ast, ParseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.peek_kind() == Some(TokenKind::Or) {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Ast::Logical(LogOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.unary()?;
        while self.peek_kind() == Some(TokenKind::And) {
            self.advance();
            let rhs = self.unary()?;
            lhs = Ast::Logical(LogOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Ast, ParseError> {
        if self.peek_kind() == Some(TokenKind::Not) {
            self.advance();
            let inner = self.unary()?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.cmp()
    }

    fn cmp(&mut self) -> Result<Ast, ParseError> {
        let lhs = self.sum()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Eq) => CmpOp::Eq,
            Some(TokenKind::Ne) => CmpOp::Ne,
            Some(TokenKind::Lt) => CmpOp::Lt,
            Some(TokenKind::Le) => CmpOp::Le,
            Some(TokenKind::Gt) => CmpOp::Gt,
            Some(TokenKind::Ge) => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.sum()?;
        Ok(Ast::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.shift()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Amp) => BinOp::BAnd,
                Some(TokenKind::Pipe) => BinOp::BOr,
                Some(TokenKind::Caret) => BinOp::BXor,
                _ => break,
            };
            self.advance();
            let rhs = self.shift()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn shift(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.atom()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Shl) => BinOp::Lsh,
                Some(TokenKind::Shr) => BinOp::Rsh,
                _ => break,
            };
            self.advance();
            let rhs = self.atom()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn atom(&mut self) -> Result<Ast, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Num) => {
                let tok = self.advance().unwrap();
                let v = parse_number(tok.text)
                    .ok_or_else(|| syntax(format!("invalid number literal '{}'", tok.text)))?;
                Ok(Ast::Number(v))
            }
            Some(TokenKind::Field) => {
                let tok = self.advance().unwrap();
                Ok(Ast::Field(Id::from(tok.text.to_string())))
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.expr()?;
                self.eat(TokenKind::RParen)?;
                Ok(inner)
            }
            Some(k) => Err(syntax(format!("unexpected token {k}"))),
            None => Err(syntax("unexpected end of input")),
        }
    }
}

fn parse_number(text: &str) -> Option<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Parse a filter expression into an [`Ast`].
pub fn parse(input: &str) -> Result<Ast, ParseError> {
    if input.trim().is_empty() {
        return Err(syntax("empty expression"));
    }

    let tokens = lex(input)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let ast = parser.expr()?;

    if parser.pos != tokens.len() {
        let tok = &tokens[parser.pos];
        return Err(syntax(format!("unexpected trailing token '{}'", tok.text)));
    }

    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_comparison() {
        let ast = parse("ether.type == 0x800").unwrap();
        assert!(matches!(ast, Ast::Compare(CmpOp::Eq, _, _)));
    }

    #[test]
    fn parses_and_of_two_comparisons() {
        let ast = parse("ether.type == 0x800 and ipv4.ver == 4").unwrap();
        assert!(matches!(ast, Ast::Logical(LogOp::And, _, _)));
    }

    #[test]
    fn not_binds_tighter_than_and() {
        let ast = parse("not ether.type == 0x800 and ipv4.ver == 4").unwrap();
        assert!(matches!(ast, Ast::Logical(LogOp::And, _, _)));
    }

    #[test]
    fn arithmetic_precedence() {
        let ast = parse("1 + 2 == 3").unwrap();
        match ast {
            Ast::Compare(CmpOp::Eq, lhs, rhs) => {
                assert!(matches!(*lhs, Ast::Binary(BinOp::Add, _, _)));
                assert!(matches!(*rhs, Ast::Number(3)));
            }
            other => panic!("expected a comparison, got {other:?}"),
        }
    }

    #[test]
    fn empty_expression_is_an_error() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        assert!(parse("1 + 2 )").is_err());
    }
}
