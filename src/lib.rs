//! This is the compiler as a library. See `src/bin` for the executable
//! program using it.
//!
//! A filter expression (`ether.type == 0x800 and ipv4.ver == 4`) goes
//! through four stages: [`front::lex`] and [`front::parse`] turn the text
//! into an [`front::Ast`]; [`front::lower`] walks that tree and builds an
//! [`ir::Compiler`] block graph via its `expr_*`/`branch_*` combinators;
//! [`back::optimize`] folds constants and drops dead writes to a fixed
//! point; [`back::layout::emit`] lays the surviving blocks out back to
//! front so every jump offset comes out forward-only, producing the final
//! [`bpf::SockFilter`] array.

#![allow(dead_code)]

pub mod back;
pub mod bpf;
pub mod common;
pub mod error;
pub mod front;
pub mod ir;
pub mod registry;

pub use bpf::SockFilter;
pub use error::CompileError;
pub use registry::Registry;

/// Compile a filter expression into a finished cBPF program.
///
/// `optimize` controls whether the constant-folding/dead-store passes run;
/// turning it off is mostly useful for inspecting the straight-line
/// translation a given expression lowers to before the optimizer touches it.
pub fn compile(expr: &str, optimize: bool, registry: &Registry) -> Result<Vec<SockFilter>, CompileError> {
    if expr.trim().is_empty() {
        return Err(CompileError::EmptyExpression);
    }

    let span = tracing::info_span!("compile", optimize);
    let _enter = span.enter();

    let ast = front::parse(expr)?;
    tracing::debug!(?ast, "parsed");

    let mut c = ir::Compiler::new();
    let root = front::lower(&ast, &mut c, registry)?;

    if optimize {
        back::optimize(&mut c, root);
    }

    let program = back::emit(&c, root)?;
    tracing::debug!(instructions = program.len(), "emitted");
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_single_comparison() {
        let reg = Registry::with_builtins();
        let prog = compile("ether.type == 0x800", true, &reg).unwrap();
        assert!(!prog.is_empty());
        assert_eq!(prog.last().unwrap().k, bpf::RET_DROP);
        assert_eq!(bpf::class(prog[0].code), bpf::BPF_LD);
        assert_eq!(bpf::mode(prog[0].code), bpf::BPF_ABS);
    }

    #[test]
    fn empty_expression_is_an_error() {
        let reg = Registry::with_builtins();
        assert!(matches!(compile("   ", true, &reg), Err(CompileError::EmptyExpression)));
    }

    #[test]
    fn constant_comparison_folds_to_a_bare_return_when_optimized() {
        let reg = Registry::with_builtins();
        let prog = compile("1 + 2 == 3", true, &reg).unwrap();
        assert_eq!(prog.len(), 1);
        assert_eq!(prog[0].k, bpf::RET_ACCEPT);
    }

    #[test]
    fn unoptimized_constant_comparison_keeps_its_shape() {
        let reg = Registry::with_builtins();
        let prog = compile("1 + 2 == 3", false, &reg).unwrap();
        assert!(prog.len() > 1);
    }
}
