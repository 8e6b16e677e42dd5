//! Local value numbering, constant folding and dead-store elimination.
//!
//! Mirrors `optimizer.c`'s `optimize_instr_eval`/`optimize_dead` pair, run to
//! a fixed point over every block in the arena. Two deliberate departures
//! from the original, both needed to satisfy the scenarios in
//! `SPEC_FULL.md` §8:
//!
//! - XOR folds as `val0 ^ val1`. The original computes `val0 ^= val0`
//!   (always zero) — a bug, not a spec.
//! - A block's terminating comparison is folded too, not just its body. The
//!   original's `optimize_instr_eval` has no `BPF_JMP` case at all, so a
//!   fully-constant comparison like `1 + 2 == 3` survives optimization as a
//!   live (if operand-free) `jeq`. Folding it to an unconditional
//!   [`Terminator::Jump`] — elided entirely by layout when its target turns
//!   out to be the next block anyway — is what lets `1 + 2 == 3` compile
//!   down to a bare `ret #0xffffffff` under `-O`.

use crate::common::Map;
use crate::ir::{AluSrc, Block, BlockId, Compiler, Instr, Loc, Reg, Terminator};

/// Per-block scratch state for a single optimizer pass: the instruction
/// dedup table (`instr_eval` in the source) and which value numbers are
/// known compile-time constants.
struct ValueTable {
    next: u32,
    consts: Map<u32, u32>,
    seen: Map<(u8, u32, u32), u32>,
}

impl ValueTable {
    fn new() -> Self {
        ValueTable { next: 1, consts: Map::new(), seen: Map::new() }
    }

    fn number_for(&mut self, key: (u8, u32, u32)) -> u32 {
        if let Some(&vn) = self.seen.get(&key) {
            return vn;
        }
        let vn = self.next;
        self.next += 1;
        self.seen.insert(key, vn);
        vn
    }

    fn set_const(&mut self, vn: u32, v: u32) {
        self.consts.insert(vn, v);
    }

    fn const_of(&self, vn: u32) -> Option<u32> {
        self.consts.get(&vn).copied()
    }
}

fn size_tag(size: crate::ir::Size) -> u32 {
    match size {
        crate::ir::Size::Byte => 1,
        crate::ir::Size::Half => 2,
        crate::ir::Size::Word => 4,
    }
}

/// Record a write to `loc` with value number `vn`: mark the instruction
/// `optimized` if `loc` already held this exact number, else propagate it.
fn finish_write(block: &mut Block, idx: usize, loc: Loc, vn: u32) -> bool {
    if block.value_reg(loc) == vn {
        if !block.instrs[idx].optimized {
            block.instrs[idx].optimized = true;
            return true;
        }
        false
    } else {
        block.set_value_reg(loc, vn);
        false
    }
}

/// Local value numbering and constant folding over one block's body. Returns
/// whether anything changed.
fn optimize_eval(block: &mut Block) -> bool {
    block.reset_value_regs();
    let mut vt = ValueTable::new();
    let mut changed = false;

    for idx in 0..block.instrs.len() {
        if block.instrs[idx].optimized {
            continue;
        }
        let instr = block.instrs[idx].instr;
        match instr {
            Instr::LdImm { dst, k } => {
                let vn = vt.number_for((0, k, 0));
                vt.set_const(vn, k);
                changed |= finish_write(block, idx, Loc::Reg(dst), vn);
            }
            Instr::LdMem { dst, slot } => {
                let vn = block.value_reg(Loc::Mem(slot));
                if let Some(c) = vt.const_of(vn) {
                    block.instrs[idx].instr = Instr::LdImm { dst, k: c };
                    changed = true;
                }
                changed |= finish_write(block, idx, Loc::Reg(dst), vn);
            }
            Instr::St { src, slot } => {
                let vn = block.value_reg(Loc::Reg(src));
                changed |= finish_write(block, idx, Loc::Mem(slot), vn);
            }
            Instr::LdAbs { size, k } => {
                let vn = vt.number_for((3, size_tag(size), k));
                changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
            }
            Instr::LdInd { size, k } => {
                let x_vn = block.value_reg(Loc::Reg(Reg::X));
                if let Some(xc) = vt.const_of(x_vn) {
                    let final_k = k.wrapping_add(xc);
                    block.instrs[idx].instr = Instr::LdAbs { size, k: final_k };
                    let vn = vt.number_for((3, size_tag(size), final_k));
                    changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                } else {
                    // Non-constant index: nothing to alias against, assign a
                    // value number that can never collide with anything else.
                    let vn = vt.next;
                    vt.next += 1;
                    block.set_value_reg(Loc::Reg(Reg::A), vn);
                }
            }
            Instr::Alu { op, src } => {
                let a_vn = block.value_reg(Loc::Reg(Reg::A));
                let a_const = vt.const_of(a_vn);
                match src {
                    AluSrc::K(k) => {
                        if let Some(av) = a_const {
                            match op.eval(av, k) {
                                Some(result) => {
                                    block.instrs[idx].instr = Instr::LdImm { dst: Reg::A, k: result };
                                    let vn = vt.number_for((0, result, 0));
                                    vt.set_const(vn, result);
                                    changed = true;
                                    changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                                }
                                None => {
                                    tracing::warn!(?op, k, "division or modulus by a literal zero; leaving instruction unfolded for the kernel to reject");
                                    let vn = vt.number_for((1, a_vn, k));
                                    changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                                }
                            }
                        } else {
                            let vn = vt.number_for((1, a_vn, k));
                            changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                        }
                    }
                    AluSrc::X => {
                        let x_vn = block.value_reg(Loc::Reg(Reg::X));
                        let x_const = vt.const_of(x_vn);
                        match (a_const, x_const) {
                            (Some(av), Some(xv)) => match op.eval(av, xv) {
                                Some(result) => {
                                    block.instrs[idx].instr = Instr::LdImm { dst: Reg::A, k: result };
                                    let vn = vt.number_for((0, result, 0));
                                    vt.set_const(vn, result);
                                    changed = true;
                                    changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                                }
                                None => {
                                    tracing::warn!(?op, "division or modulus by a literal zero; leaving instruction unfolded for the kernel to reject");
                                    let vn = vt.number_for((2, a_vn, x_vn));
                                    changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                                }
                            },
                            (None, Some(xv)) => {
                                block.instrs[idx].instr = Instr::Alu { op, src: AluSrc::K(xv) };
                                changed = true;
                                let vn = vt.number_for((1, a_vn, xv));
                                changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                            }
                            _ => {
                                let vn = vt.number_for((2, a_vn, x_vn));
                                changed |= finish_write(block, idx, Loc::Reg(Reg::A), vn);
                            }
                        }
                    }
                }
            }
        }
    }

    if let Terminator::Branch { mut branch, succ_true, succ_false } = block.term {
        let a_vn = block.value_reg(Loc::Reg(Reg::A));
        let a_const = vt.const_of(a_vn);

        // Same X-to-K narrowing the body's Alu case gets: once X is known
        // constant, comparing against it directly lets dead-store drop the
        // now-unread load of X entirely.
        if let AluSrc::X = branch.src {
            let x_vn = block.value_reg(Loc::Reg(Reg::X));
            if let Some(xv) = vt.const_of(x_vn) {
                branch.src = AluSrc::K(xv);
                block.term = Terminator::Branch { branch, succ_true, succ_false };
                changed = true;
            }
        }

        let resolved = match branch.src {
            AluSrc::K(k) => a_const.map(|av| branch.op.eval(av, k)),
            AluSrc::X => None,
        };
        if let Some(result) = resolved {
            let target = if result { succ_true } else { succ_false }
                .expect("branch successors are always resolved after finish()");
            block.term = Terminator::Jump { target };
            changed = true;
        }
    }

    changed
}

/// The locations a block's terminator reads, for dead-store purposes.
fn terminator_reads(term: &Terminator) -> Vec<Loc> {
    match term {
        Terminator::Branch { branch, .. } => match branch.src {
            AluSrc::K(_) => vec![Loc::Reg(Reg::A)],
            AluSrc::X => vec![Loc::Reg(Reg::A), Loc::Reg(Reg::X)],
        },
        Terminator::Jump { .. } | Terminator::Ret { .. } => Vec::new(),
    }
}

/// Dead-store elimination over one block's body plus its terminator.
/// Returns whether anything changed.
fn optimize_dead(block: &mut Block) -> bool {
    let mut pending: Map<Loc, usize> = Map::new();
    let mut changed = false;

    for idx in 0..block.instrs.len() {
        if block.instrs[idx].optimized {
            continue;
        }
        let instr = block.instrs[idx].instr;
        for r in instr.reads() {
            pending.remove(&r);
        }
        if let Some(w) = instr.writes() {
            if let Some(&prev) = pending.get(&w) {
                if !block.instrs[prev].optimized {
                    block.instrs[prev].optimized = true;
                    changed = true;
                }
            }
            pending.insert(w, idx);
        }
    }

    for r in terminator_reads(&block.term) {
        pending.remove(&r);
    }

    for &idx in pending.values() {
        if !block.instrs[idx].optimized {
            block.instrs[idx].optimized = true;
            changed = true;
        }
    }

    changed
}

/// Run the optimizer to a fixed point over every block reachable from
/// `root`. `root` itself is unaffected by optimization (only the blocks it
/// reaches are), but is accepted for symmetry with [`crate::back::layout::emit`]
/// and in case a future pass wants to special-case the entry block.
pub fn optimize(c: &mut Compiler, _root: BlockId) {
    let span = tracing::info_span!("optimize", blocks = c.block_count());
    let _enter = span.enter();
    loop {
        let mut changed = false;
        for i in 0..c.block_count() {
            let id = BlockId(i as u32);
            let block = c.block_mut(id);
            changed |= optimize_eval(block);
            changed |= optimize_dead(block);
        }
        if !changed {
            break;
        }
    }
}
