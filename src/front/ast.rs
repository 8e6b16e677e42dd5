//! The abstract syntax tree produced by the parser.

use crate::common::Id;

/// Arithmetic binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    BAnd,
    BOr,
    BXor,
    Lsh,
    Rsh,
}

/// Relational comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Short-circuit boolean connectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOp {
    And,
    Or,
}

/// A filter expression, as produced by [`crate::front::parse`].
#[derive(Debug)]
pub enum Ast {
    /// A decimal or hex integer literal.
    Number(u32),
    /// A dotted `proto.field` name, resolved against the registry by `lower`.
    Field(Id),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Compare(CmpOp, Box<Ast>, Box<Ast>),
    Logical(LogOp, Box<Ast>, Box<Ast>),
    Not(Box<Ast>),
}
