//! Blocks: straight-line instruction sequences ending in at most one
//! conditional branch, linked into a graph via symbolic successors.
//!
//! The original source links blocks with raw `struct block *` successor
//! pointers, reusing the very same pointer fields both as "the real
//! successor" and, transiently during parsing, as a linked list of
//! not-yet-patched escape edges (the classic backpatch-list trick). Here
//! successors are `Option<BlockId>` indices into the compiler's block arena
//! (`Vec<Block>`), which keeps the graph acyclic-by-construction from Rust's
//! point of view and sidesteps any pointer/ownership hazard — the same
//! escape-list trick still works unchanged, just over indices.

use super::instr::{Branch, Instr, Loc};

/// An index into a compiler's block arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

/// One instruction in a block's body, plus the optimizer's elision flag.
#[derive(Clone, Copy, Debug)]
pub struct BodyInstr {
    pub instr: Instr,
    pub optimized: bool,
}

impl BodyInstr {
    pub fn new(instr: Instr) -> Self {
        BodyInstr { instr, optimized: false }
    }
}

/// What a block ends in: either a two-way conditional branch, or a terminal
/// `RET`. Unlike the original's single struct with an always-present (but
/// sometimes unused) `jmp_instr`, these are mutually exclusive by
/// construction.
#[derive(Clone, Copy, Debug)]
pub enum Terminator {
    Branch {
        branch: Branch,
        succ_true: Option<BlockId>,
        succ_false: Option<BlockId>,
    },
    /// An unconditional transfer, emitted as `JA`. Never produced by the
    /// initial lowering; only the optimizer introduces these, when a
    /// branch's operands are both known constants at compile time.
    Jump {
        target: BlockId,
    },
    Ret {
        k: u32,
    },
}

/// Number of architectural locations the optimizer's per-block value-number
/// table tracks: 16 scratch slots plus `A` and `X`.
pub const NUM_LOCS: usize = crate::bpf::REGS_MEM_MAX + 2;

fn loc_index(loc: Loc) -> usize {
    match loc {
        Loc::Mem(s) => s as usize,
        Loc::Reg(super::instr::Reg::A) => crate::bpf::REGS_MEM_MAX,
        Loc::Reg(super::instr::Reg::X) => crate::bpf::REGS_MEM_MAX + 1,
    }
}

/// A basic block.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub instrs: Vec<BodyInstr>,
    pub term: Terminator,
    /// True when the comparison's `jt`/`jf` roles are logically swapped
    /// relative to its opcode (used to encode `<`/`<=` via `>=`/`>`).
    pub is_reversed: bool,
    /// The entry block of the sub-expression this block is currently the
    /// "live end" of; used by the boolean combinators to find where control
    /// flow should (re-)enter after a merge.
    pub root: BlockId,
    /// Assigned by layout; `None` means "not yet laid out".
    pub offset: Option<usize>,
    /// Value-number state used only by the optimizer, indexed by [`loc_index`].
    /// `0` means "unknown / not yet computed", matching `compiler.h`.
    pub value_regs: [u32; NUM_LOCS],
}

impl Block {
    pub fn new(id: BlockId, instrs: Vec<BodyInstr>, term: Terminator) -> Self {
        Block {
            id,
            instrs,
            term,
            is_reversed: false,
            root: id,
            offset: None,
            value_regs: [0; NUM_LOCS],
        }
    }

    pub fn value_reg(&self, loc: Loc) -> u32 {
        self.value_regs[loc_index(loc)]
    }

    pub fn set_value_reg(&mut self, loc: Loc, v: u32) {
        self.value_regs[loc_index(loc)] = v;
    }

    pub fn reset_value_regs(&mut self) {
        self.value_regs = [0; NUM_LOCS];
    }

    /// Number of instructions this block will actually emit: its live body
    /// instructions, plus one if it ends in a branch or return.
    pub fn live_len(&self) -> usize {
        let body = self.instrs.iter().filter(|i| !i.optimized).count();
        body + 1
    }

    pub fn succ_true(&self) -> Option<BlockId> {
        match self.term {
            Terminator::Branch { succ_true, .. } => succ_true,
            Terminator::Jump { .. } | Terminator::Ret { .. } => None,
        }
    }

    pub fn succ_false(&self) -> Option<BlockId> {
        match self.term {
            Terminator::Branch { succ_false, .. } => succ_false,
            Terminator::Jump { .. } | Terminator::Ret { .. } => None,
        }
    }

    pub fn set_succ(&mut self, which: bool, target: Option<BlockId>) {
        match &mut self.term {
            Terminator::Branch { succ_true, succ_false, .. } => {
                if which {
                    *succ_true = target;
                } else {
                    *succ_false = target;
                }
            }
            Terminator::Jump { .. } | Terminator::Ret { .. } => {
                panic!("internal invariant violated: tried to set a successor on a non-branch block")
            }
        }
    }

    pub fn succ(&self, which: bool) -> Option<BlockId> {
        if which {
            self.succ_true()
        } else {
            self.succ_false()
        }
    }
}
