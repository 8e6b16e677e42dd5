//! Lowers an [`Ast`] into the IR, via the `Compiler`'s `expr_*`/`branch_*`
//! combinators.
//!
//! Boolean structure (`and`/`or`/`not`/bare comparisons) is lowered by
//! [`lower_bool`], which threads a `negate` flag rather than building a
//! separate AST rewrite pass: `not` over a composite `and`/`or` is resolved
//! by De Morgan's laws as the flag propagates down to the leaf comparisons,
//! where it finally becomes a single polarity flip on a genuine comparison
//! block — `branch_not` only ever needs to flip one block's `is_reversed`,
//! matching `compiler.c`'s treatment, because by the time `negate` reaches a
//! leaf there is always exactly one comparison left to flip.

use super::ast::{Ast, BinOp, CmpOp, LogOp};
use crate::error::CompileError;
use crate::ir::{AluOp, BlockId, BoolOp, Compiler, Expr, JmpOp};
use crate::registry::Registry;

fn binop_to_alu(op: BinOp) -> AluOp {
    match op {
        BinOp::Add => AluOp::Add,
        BinOp::Sub => AluOp::Sub,
        BinOp::Mul => AluOp::Mul,
        BinOp::Div => AluOp::Div,
        BinOp::BAnd => AluOp::And,
        BinOp::BOr => AluOp::Or,
        BinOp::BXor => AluOp::Xor,
        BinOp::Lsh => AluOp::Lsh,
        BinOp::Rsh => AluOp::Rsh,
    }
}

fn logop_to_bool(op: LogOp) -> BoolOp {
    match op {
        LogOp::And => BoolOp::And,
        LogOp::Or => BoolOp::Or,
    }
}

/// cBPF only natively supports `==`, `>`, `>=`, and `SET`; `!=`, `<`, `<=`
/// are encoded via a native op plus the block's `is_reversed` flag.
fn cmp_to_jmp(op: CmpOp) -> (JmpOp, bool) {
    match op {
        CmpOp::Eq => (JmpOp::Jeq, false),
        CmpOp::Ne => (JmpOp::Jeq, true),
        CmpOp::Gt => (JmpOp::Jgt, false),
        CmpOp::Ge => (JmpOp::Jge, false),
        CmpOp::Lt => (JmpOp::Jge, true),
        CmpOp::Le => (JmpOp::Jgt, true),
    }
}

fn negate_cmp(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Eq => CmpOp::Ne,
        CmpOp::Ne => CmpOp::Eq,
        CmpOp::Lt => CmpOp::Ge,
        CmpOp::Ge => CmpOp::Lt,
        CmpOp::Gt => CmpOp::Le,
        CmpOp::Le => CmpOp::Gt,
    }
}

fn lower_expr(ast: &Ast, c: &mut Compiler, registry: &Registry) -> Result<Expr, CompileError> {
    match ast {
        Ast::Number(v) => c.expr_number(*v),
        Ast::Field(name) => c.expr_field(name.as_str(), registry),
        Ast::Binary(op, l, r) => {
            let le = lower_expr(l, c, registry)?;
            let re = lower_expr(r, c, registry)?;
            c.expr_alu(binop_to_alu(*op), le, re)
        }
        Ast::Compare(..) | Ast::Logical(..) | Ast::Not(..) => {
            // The grammar never nests a boolean-valued production inside an
            // arithmetic one (`sum`/`term`/`shift` only recurse into `atom`).
            unreachable!("boolean expression used where an arithmetic value was expected")
        }
    }
}

/// Lower a boolean-context `Ast` node into a comparison block, applying
/// `negate` (threaded for De Morgan pushdown through `not`).
fn lower_bool(ast: &Ast, negate: bool, c: &mut Compiler, registry: &Registry) -> Result<BlockId, CompileError> {
    match ast {
        Ast::Not(inner) => lower_bool(inner, !negate, c, registry),
        Ast::Logical(op, l, r) => {
            let effective = match (op, negate) {
                (LogOp::And, false) | (LogOp::Or, true) => BoolOp::And,
                (LogOp::Or, false) | (LogOp::And, true) => BoolOp::Or,
            };
            let lb = lower_bool(l, negate, c, registry)?;
            let rb = lower_bool(r, negate, c, registry)?;
            Ok(c.branch_merge(effective, lb, rb))
        }
        Ast::Compare(op, l, r) => {
            let le = lower_expr(l, c, registry)?;
            let re = lower_expr(r, c, registry)?;
            let effective = if negate { negate_cmp(*op) } else { *op };
            let (jop, reversed) = cmp_to_jmp(effective);
            c.branch_build(jop, reversed, le, re)
        }
        bare => {
            // A bare numeric/field expression is truthy when nonzero.
            let e = lower_expr(bare, c, registry)?;
            let effective = if negate { CmpOp::Eq } else { CmpOp::Ne };
            let (jop, reversed) = cmp_to_jmp(effective);
            let zero = c.expr_number(0)?;
            c.branch_build(jop, reversed, e, zero)
        }
    }
}

/// Lower a parsed filter expression into a finished IR graph, returning the
/// root block that [`crate::back::layout`] should start from.
pub fn lower(ast: &Ast, c: &mut Compiler, registry: &Registry) -> Result<BlockId, CompileError> {
    let root = lower_bool(ast, false, c, registry)?;
    Ok(c.finish(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Terminator;

    #[test]
    fn single_comparison_lowers_to_one_branch_block_plus_terminals() {
        let mut c = Compiler::new();
        let reg = Registry::with_builtins();
        let ast = crate::front::parse("ether.type == 0x800").unwrap();
        let root = lower(&ast, &mut c, &reg).unwrap();
        assert!(matches!(c.block(root).term, Terminator::Branch { .. }));
        assert!(c.block(root).succ_true().is_some());
        assert!(c.block(root).succ_false().is_some());
    }

    #[test]
    fn not_of_comparison_flips_reversed() {
        let mut c = Compiler::new();
        let reg = Registry::with_builtins();
        let plain = crate::front::parse("ether.type == 0x800").unwrap();
        let negated = crate::front::parse("not (ether.type == 0x800)").unwrap();

        let mut c1 = Compiler::new();
        let r1 = lower(&plain, &mut c1, &reg).unwrap();
        let r2 = lower(&negated, &mut c, &reg).unwrap();

        assert_ne!(c1.block(r1).is_reversed, c.block(r2).is_reversed);
    }

    #[test]
    fn unknown_field_is_an_error() {
        let mut c = Compiler::new();
        let reg = Registry::with_builtins();
        let ast = crate::front::parse("tcp.port == 80").unwrap();
        assert!(matches!(lower(&ast, &mut c, &reg), Err(CompileError::UnknownField(_))));
    }

    #[test]
    fn and_of_two_comparisons_links_lhs_success_into_rhs() {
        let mut c = Compiler::new();
        let reg = Registry::with_builtins();
        let ast = crate::front::parse("ether.type == 0x800 and ipv4.ver == 4").unwrap();
        let root = lower(&ast, &mut c, &reg).unwrap();
        // root is LHS's root; RHS is wherever LHS's success path points.
        let lhs_success = c.block(root).succ_true();
        assert!(lhs_success.is_some());
        assert_ne!(lhs_success, c.block(root).succ_false());
    }
}
