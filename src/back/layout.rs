//! Turns the optimized block graph into a linear array of [`bpf::SockFilter`]s.
//!
//! cBPF jump offsets are unsigned counts of *forward* instructions only, so
//! blocks must be laid out such that every jump target sits after its
//! source. Walking the graph in post-order (successors before self) and then
//! writing blocks back-to-front, in that same post-order sequence, makes
//! every offset fall out non-negative with no backpatch pass needed —
//! `compiler.c`'s layout comment calls this "emit blocks in the reverse of a
//! depth-first successor walk"; the arena/`BlockId` form just makes the
//! "already emitted" check an array index instead of a visited-pointer set.

use crate::bpf::{self, SockFilter};
use crate::error::CompileError;
use crate::ir::{AluSrc, Block, BlockId, BodyInstr, Compiler, Instr, Reg, Terminator};

const MAX_PROGRAM_LEN: usize = bpf::BPF_MAXINSNS;

/// Follow a chain of fully-elided `Jump` blocks (every body instruction
/// optimized away) down to the first block that actually does something.
/// A `Jump` block with live body instructions keeps its `JA`; only an empty
/// one disappears entirely.
fn resolve(c: &Compiler, mut id: BlockId) -> BlockId {
    loop {
        let block = c.block(id);
        match block.term {
            Terminator::Jump { target } if block.instrs.iter().all(|i| i.optimized) => {
                id = target;
            }
            _ => return id,
        }
    }
}

fn successors(c: &Compiler, id: BlockId) -> (Option<BlockId>, Option<BlockId>) {
    match c.block(id).term {
        Terminator::Branch { succ_false, succ_true, .. } => (succ_false, succ_true),
        Terminator::Jump { target } => (None, Some(target)),
        Terminator::Ret { .. } => (None, None),
    }
}

fn walk(c: &Compiler, id: BlockId, visited: &mut crate::common::Set<BlockId>, order: &mut Vec<BlockId>) {
    if !visited.insert(id) {
        return;
    }
    let (succ_false, succ_true) = successors(c, id);
    if let Some(f) = succ_false {
        walk(c, resolve(c, f), visited, order);
    }
    if let Some(t) = succ_true {
        walk(c, resolve(c, t), visited, order);
    }
    order.push(id);
}

fn encode_body(instr: Instr) -> SockFilter {
    match instr {
        Instr::LdImm { dst, k } => {
            let code = ld_class(dst) | bpf::BPF_IMM;
            SockFilter::new(code, 0, 0, k)
        }
        Instr::LdMem { dst, slot } => {
            let code = ld_class(dst) | bpf::BPF_MEM;
            SockFilter::new(code, 0, 0, slot as u32)
        }
        Instr::St { src, slot } => {
            let code = if matches!(src, Reg::A) { bpf::BPF_ST } else { bpf::BPF_STX };
            SockFilter::new(code, 0, 0, slot as u32)
        }
        Instr::LdAbs { size, k } => {
            let code = bpf::BPF_LD | bpf::BPF_ABS | size.bpf_size();
            SockFilter::new(code, 0, 0, k)
        }
        Instr::LdInd { size, k } => {
            let code = bpf::BPF_LD | bpf::BPF_IND | size.bpf_size();
            SockFilter::new(code, 0, 0, k)
        }
        Instr::Alu { op, src } => {
            let src_bit = match src {
                AluSrc::K(_) => bpf::BPF_K,
                AluSrc::X => bpf::BPF_X,
            };
            let code = bpf::BPF_ALU | op.bpf_op() | src_bit;
            let k = match src {
                AluSrc::K(k) => k,
                AluSrc::X => 0,
            };
            SockFilter::new(code, 0, 0, k)
        }
    }
}

fn ld_class(dst: Reg) -> u16 {
    match dst {
        Reg::A => bpf::BPF_LD,
        Reg::X => bpf::BPF_LDX,
    }
}

/// Lay out and encode the block graph rooted at `root` into a finished
/// program. `root` is resolved first in case the optimizer collapsed it.
pub fn emit(c: &Compiler, root: BlockId) -> Result<Vec<SockFilter>, CompileError> {
    let root = resolve(c, root);

    let mut visited = crate::common::Set::new();
    let mut order = Vec::new();
    walk(c, root, &mut visited, &mut order);

    let total: usize = order.iter().map(|&id| c.block(id).live_len()).sum();
    if total > MAX_PROGRAM_LEN {
        return Err(CompileError::ProgramTooLarge(total));
    }

    let mut buf = vec![SockFilter::new(0, 0, 0, 0); total.max(1)];
    let mut offset_of: crate::common::Map<BlockId, usize> = crate::common::Map::new();
    let mut cursor = total;

    for &id in &order {
        let block = c.block(id);
        let live: Vec<&BodyInstr> = block.instrs.iter().filter(|i| !i.optimized).collect();
        cursor -= live.len() + 1;
        offset_of.insert(id, cursor);

        for (i, body) in live.iter().enumerate() {
            buf[cursor + i] = encode_body(body.instr);
        }
        let term_idx = cursor + live.len();
        buf[term_idx] = encode_terminator(c, block, &offset_of, term_idx)?;
    }

    Ok(buf)
}

fn encode_terminator(
    c: &Compiler,
    block: &Block,
    offset_of: &crate::common::Map<BlockId, usize>,
    term_idx: usize,
) -> Result<SockFilter, CompileError> {
    match block.term {
        Terminator::Ret { k } => Ok(SockFilter::new(bpf::BPF_RET | bpf::BPF_K, 0, 0, k)),
        Terminator::Jump { target } => {
            let target = resolve(c, target);
            let target_off = offset_of[&target];
            let rel = (target_off - (term_idx + 1)) as u32;
            Ok(SockFilter::new(bpf::BPF_JMP | bpf::BPF_JA, 0, 0, rel))
        }
        Terminator::Branch { branch, succ_true, succ_false } => {
            let t = resolve(c, succ_true.expect("branch block missing true successor"));
            let f = resolve(c, succ_false.expect("branch block missing false successor"));
            let base = term_idx + 1;
            let jt = offset_of[&t] - base;
            let jf = offset_of[&f] - base;
            if jt > 255 || jf > 255 {
                return Err(CompileError::ProgramTooLarge(jt.max(jf)));
            }
            let src_bit = match branch.src {
                AluSrc::K(_) => bpf::BPF_K,
                AluSrc::X => bpf::BPF_X,
            };
            let code = bpf::BPF_JMP | branch.op.bpf_op() | src_bit;
            let k = match branch.src {
                AluSrc::K(k) => k,
                AluSrc::X => 0,
            };
            Ok(SockFilter::new(code, jt as u8, jf as u8, k))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front;
    use crate::ir::Compiler as Ir;
    use crate::registry::Registry;

    fn compile_no_opt(src: &str) -> Vec<SockFilter> {
        let reg = Registry::with_builtins();
        let ast = front::parse(src).unwrap();
        let mut c = Ir::new();
        let root = front::lower(&ast, &mut c, &reg).unwrap();
        emit(&c, root).unwrap()
    }

    #[test]
    fn single_comparison_ends_with_the_drop_terminal() {
        // Layout visits a branch block's false successor before its true
        // successor, so for a root whose failure path falls straight to
        // DROP (no further ANDed conditions), DROP is always the very last
        // instruction written.
        let prog = compile_no_opt("ether.type == 0x800");
        assert!(prog.len() > 1);
        assert_eq!(prog.last().unwrap().k, bpf::RET_DROP);
        assert_eq!(bpf::class(prog.last().unwrap().code), bpf::BPF_RET);
    }

    #[test]
    fn jump_offsets_are_always_forward() {
        let prog = compile_no_opt("ether.type == 0x800 and ipv4.ver == 4");
        for (i, f) in prog.iter().enumerate() {
            if bpf::class(f.code) == bpf::BPF_JMP && bpf::op(f.code) != bpf::BPF_JA {
                assert!((i + 1 + f.jt as usize) <= prog.len());
                assert!((i + 1 + f.jf as usize) <= prog.len());
            }
        }
    }
}
