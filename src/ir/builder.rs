//! The `Compiler`: per-compile state and the `expr_*`/`branch_*` combinator
//! family that builds the IR, mirroring `compiler.c`.
//!
//! Every compile gets its own `Compiler` value — there is no process-wide
//! mutable state, per the single-threaded, synchronous model in
//! `SPEC_FULL.md` §5.

use super::block::{Block, BlockId, BodyInstr, Terminator};
use super::instr::{AluOp, AluSrc, Branch, Instr, JmpOp, Reg, Size};
use crate::bpf;
use crate::error::CompileError;
use crate::registry::Registry;

/// Short-circuit boolean connective, mirrored from [`crate::front::LogOp`] so
/// that `ir` does not need to depend on `front` (dependency order is
/// registry → lexer → parser → IR builders, not the reverse).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// An in-progress scalar computation: an ordered instruction list ending
/// with its result stored in scratch slot `reg`.
#[derive(Clone, Debug)]
pub struct Expr {
    pub instrs: Vec<Instr>,
    pub reg: u8,
}

/// Per-compile state: the block arena and the scratch-slot free list.
/// Nothing here survives past a single call to [`crate::compile::compile`].
pub struct Compiler {
    blocks: Vec<Block>,
    free_slots: Vec<u8>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            blocks: Vec::new(),
            // Popped in ascending order: 15, 14, ..., 0 pushed so 0 pops first.
            free_slots: (0..bpf::REGS_MEM_MAX as u8).rev().collect(),
        }
    }

    fn reg_get(&mut self) -> Result<u8, CompileError> {
        self.free_slots.pop().ok_or(CompileError::RegistersExhausted)
    }

    fn reg_put(&mut self, r: u8) {
        self.free_slots.push(r);
    }

    fn alloc_block(&mut self, instrs: Vec<BodyInstr>, term: Terminator) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, instrs, term));
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    // --- expr_* combinators -------------------------------------------------

    /// `expr_number(v)`: load an immediate into a fresh scratch slot.
    pub fn expr_number(&mut self, v: u32) -> Result<Expr, CompileError> {
        let r = self.reg_get()?;
        Ok(Expr {
            instrs: vec![Instr::LdImm { dst: Reg::A, k: v }, Instr::St { src: Reg::A, slot: r }],
            reg: r,
        })
    }

    /// `expr_offset(e, size)`: treat `e`'s value as a packet byte offset and
    /// load `size` bytes from there. Frees `e`'s slot.
    pub fn expr_offset(&mut self, e: Expr, size: Size) -> Result<Expr, CompileError> {
        let mut instrs = e.instrs;
        instrs.push(Instr::LdMem { dst: Reg::X, slot: e.reg });
        self.reg_put(e.reg);
        instrs.push(Instr::LdInd { size, k: 0 });
        let r2 = self.reg_get()?;
        instrs.push(Instr::St { src: Reg::A, slot: r2 });
        Ok(Expr { instrs, reg: r2 })
    }

    /// `expr_proto(name)`: a protocol's header base offset as a constant.
    pub fn expr_proto(&mut self, name: &str, registry: &Registry) -> Result<Expr, CompileError> {
        let base = registry
            .lookup_proto(name)
            .ok_or_else(|| CompileError::UnknownProto(name.to_string()))?
            .base_offset;
        self.expr_number(base)
    }

    /// `expr_proto_offset(name, e)`: `e` added to a protocol's base offset.
    pub fn expr_proto_offset(&mut self, name: &str, e: Expr, registry: &Registry) -> Result<Expr, CompileError> {
        let base = self.expr_proto(name, registry)?;
        self.expr_alu(AluOp::Add, base, e)
    }

    /// `expr_field(field)`: resolve a dotted `proto.field` name and load it,
    /// applying its mask if one is registered.
    pub fn expr_field(&mut self, field: &str, registry: &Registry) -> Result<Expr, CompileError> {
        let fd = registry
            .lookup(field)
            .ok_or_else(|| CompileError::UnknownField(field.to_string()))?;
        let proto_base = registry
            .lookup_proto(&fd.proto)
            .ok_or_else(|| CompileError::UnknownProto(fd.proto.to_string()))?
            .base_offset;
        let size = Size::from_bytes(fd.len).expect("registry field length must be 1, 2, or 4 bytes");
        let mask = fd.mask;

        let base = self.expr_number(proto_base + fd.offset)?;
        let mut loaded = self.expr_offset(base, size)?;
        if mask != 0xffff_ffff {
            loaded.instrs.push(Instr::LdMem { dst: Reg::A, slot: loaded.reg });
            loaded.instrs.push(Instr::Alu { op: AluOp::And, src: AluSrc::K(mask) });
            loaded.instrs.push(Instr::St { src: Reg::A, slot: loaded.reg });
        }
        Ok(loaded)
    }

    /// `expr_<binop>(l, r)`: combine two scalar values with an ALU op.
    pub fn expr_alu(&mut self, op: AluOp, l: Expr, r: Expr) -> Result<Expr, CompileError> {
        let mut instrs = l.instrs;
        instrs.extend(r.instrs);
        instrs.push(Instr::LdMem { dst: Reg::A, slot: l.reg });
        instrs.push(Instr::LdMem { dst: Reg::X, slot: r.reg });
        instrs.push(Instr::Alu { op, src: AluSrc::X });
        self.reg_put(l.reg);
        self.reg_put(r.reg);
        let r2 = self.reg_get()?;
        instrs.push(Instr::St { src: Reg::A, slot: r2 });
        Ok(Expr { instrs, reg: r2 })
    }

    // --- branch_* combinators ------------------------------------------------

    /// `branch_build(op, reversed, l, r)`: a block comparing `l` against `r`.
    pub fn branch_build(&mut self, op: JmpOp, reversed: bool, l: Expr, r: Expr) -> Result<BlockId, CompileError> {
        let mut instrs = l.instrs;
        instrs.extend(r.instrs);
        instrs.push(Instr::LdMem { dst: Reg::A, slot: l.reg });
        instrs.push(Instr::LdMem { dst: Reg::X, slot: r.reg });
        self.reg_put(l.reg);
        self.reg_put(r.reg);

        let body = instrs.into_iter().map(BodyInstr::new).collect();
        let branch = Branch { op, src: AluSrc::X };
        let id = self.alloc_block(body, Terminator::Branch { branch, succ_true: None, succ_false: None });
        self.block_mut(id).is_reversed = reversed;
        Ok(id)
    }

    /// `branch_not(b)`: toggle the comparison's polarity in place.
    pub fn branch_not(&mut self, b: BlockId) -> BlockId {
        self.block_mut(b).is_reversed = !self.block_mut(b).is_reversed;
        b
    }

    /// `block_build(e)`: wrap a bare scalar as "nonzero" (the implicit
    /// truthiness test a filter expression with no explicit comparison gets).
    pub fn block_build(&mut self, e: Expr) -> Result<BlockId, CompileError> {
        let zero = self.expr_number(0)?;
        // CmpOp::Ne lowers to (Jeq, reversed=true): "not equal to zero".
        self.branch_build(JmpOp::Jeq, true, e, zero)
    }

    fn logical_true_which(reversed: bool) -> bool {
        !reversed
    }

    fn logical_false_which(reversed: bool) -> bool {
        reversed
    }

    /// Walk the chain of blocks reachable by following the `which` successor
    /// starting at `list`, replacing every open link with `target`.
    pub fn backpatch(&mut self, list: BlockId, target: BlockId, which: bool) {
        let mut cur = Some(list);
        while let Some(id) = cur {
            let next = self.block(id).succ(which);
            self.block_mut(id).set_succ(which, Some(target));
            cur = next;
        }
    }

    /// Walk the `which` chain starting at `host` until an open link is
    /// found, and thread `value` in there.
    pub fn merge(&mut self, value: BlockId, host: BlockId, which: bool) {
        let mut cur = host;
        while let Some(next) = self.block(cur).succ(which) {
            cur = next;
        }
        self.block_mut(cur).set_succ(which, Some(value));
    }

    /// `branch_merge(op, l, r)`: short-circuit boolean combination by
    /// successor rewiring. Returns `r` (now carrying `l`'s root), matching
    /// the original's convention of returning the right operand as the
    /// chain-patchable handle for the combined expression.
    pub fn branch_merge(&mut self, op: BoolOp, left: BlockId, right: BlockId) -> BlockId {
        let reversed = self.block(left).is_reversed;
        let logical_true = Self::logical_true_which(reversed);
        let logical_false = Self::logical_false_which(reversed);

        match op {
            BoolOp::Or => {
                // If the left side fails, fall into the right side.
                self.backpatch(left, right, logical_false);
                // Thread the left side's success chain onto the right's.
                self.merge(left, right, logical_true);
            }
            BoolOp::And => {
                // If the left side succeeds, fall into the right side.
                self.backpatch(left, right, logical_true);
                // Thread the left side's failure chain onto the right's.
                self.merge(left, right, logical_false);
            }
        }

        let root = self.block(left).root;
        self.block_mut(right).root = root;
        right
    }

    /// `finish(blk)`: synthesize ACCEPT/DROP terminal blocks and backpatch
    /// `blk`'s still-open chains onto them. `blk` is the chain-patchable
    /// handle `branch_merge` hands back (the rightmost block of the
    /// combination), which is not necessarily where execution begins —
    /// that entry point is tracked separately in each block's `root` field,
    /// so the actual block returned here is `blk`'s `root`, not `blk` itself.
    pub fn finish(&mut self, root: BlockId) -> BlockId {
        let accept = self.alloc_block(Vec::new(), Terminator::Ret { k: bpf::RET_ACCEPT });
        let drop = self.alloc_block(Vec::new(), Terminator::Ret { k: bpf::RET_DROP });

        let reversed = self.block(root).is_reversed;
        self.backpatch(root, accept, Self::logical_true_which(reversed));
        self.backpatch(root, drop, Self::logical_false_which(reversed));
        self.block(root).root
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expr_number_allocates_a_fresh_slot() {
        let mut c = Compiler::new();
        let e1 = c.expr_number(1).unwrap();
        let e2 = c.expr_number(2).unwrap();
        assert_ne!(e1.reg, e2.reg);
    }

    #[test]
    fn registers_exhausted_after_sixteen_live_exprs() {
        let mut c = Compiler::new();
        let mut held = Vec::new();
        for i in 0..bpf::REGS_MEM_MAX as u32 {
            held.push(c.expr_number(i).unwrap());
        }
        assert!(matches!(c.expr_number(99), Err(CompileError::RegistersExhausted)));
    }

    #[test]
    fn branch_build_sets_is_reversed_for_lt() {
        let mut c = Compiler::new();
        let l = c.expr_number(1).unwrap();
        let r = c.expr_number(2).unwrap();
        let b = c.branch_build(JmpOp::Jge, true, l, r).unwrap();
        assert!(c.block(b).is_reversed);
    }

    #[test]
    fn and_merge_wires_left_success_into_right() {
        let mut c = Compiler::new();
        let l0 = c.expr_number(1).unwrap();
        let l1 = c.expr_number(1).unwrap();
        let left = c.branch_build(JmpOp::Jeq, false, l0, l1).unwrap();
        let r0 = c.expr_number(2).unwrap();
        let r1 = c.expr_number(2).unwrap();
        let right = c.branch_build(JmpOp::Jeq, false, r0, r1).unwrap();

        let combined = c.branch_merge(BoolOp::And, left, right);
        assert_eq!(combined, right);
        assert_eq!(c.block(left).succ_true(), Some(right));
        assert_eq!(c.block(left).root, left);
    }

    #[test]
    fn finish_patches_open_chains_to_accept_and_drop() {
        let mut c = Compiler::new();
        let l0 = c.expr_number(1).unwrap();
        let l1 = c.expr_number(1).unwrap();
        let b = c.branch_build(JmpOp::Jeq, false, l0, l1).unwrap();
        let root = c.finish(b);
        assert!(c.block(root).succ_true().is_some());
        assert!(c.block(root).succ_false().is_some());
        assert_ne!(c.block(root).succ_true(), c.block(root).succ_false());
    }
}
