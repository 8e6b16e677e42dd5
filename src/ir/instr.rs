//! Typed instruction payloads the IR builders and optimizer work with.
//!
//! This replaces `compiler.h`'s `struct instr` — a single struct carrying a
//! raw `code`/`jt`/`jf`/`k` quadruple for every instruction, branching or not
//! — with a tagged enum per the REDESIGN FLAGS in `SPEC_FULL.md` §9. Only the
//! block's own terminating [`Branch`] carries `jt`/`jf`; straight-line
//! [`Instr`]s never branch, so they never need those fields at all.

use crate::bpf;
use derive_more::Display;

/// The accumulator (`A`) or index (`X`) register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Reg {
    #[display("a")]
    A,
    #[display("x")]
    X,
}

/// Packet-load size in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Size {
    #[display("b")]
    Byte,
    #[display("h")]
    Half,
    #[display("w")]
    Word,
}

impl Size {
    pub fn from_bytes(n: u32) -> Option<Size> {
        match n {
            1 => Some(Size::Byte),
            2 => Some(Size::Half),
            4 => Some(Size::Word),
            _ => None,
        }
    }

    pub fn bpf_size(self) -> u16 {
        match self {
            Size::Byte => bpf::BPF_B,
            Size::Half => bpf::BPF_H,
            Size::Word => bpf::BPF_W,
        }
    }
}

/// ALU operations, shared between the `A,K` and `A,X` instruction forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum AluOp {
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("mul")]
    Mul,
    #[display("div")]
    Div,
    #[display("mod")]
    Mod,
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("xor")]
    Xor,
    #[display("lsh")]
    Lsh,
    #[display("rsh")]
    Rsh,
}

impl AluOp {
    pub fn bpf_op(self) -> u16 {
        match self {
            AluOp::Add => bpf::BPF_ADD,
            AluOp::Sub => bpf::BPF_SUB,
            AluOp::Mul => bpf::BPF_MUL,
            AluOp::Div => bpf::BPF_DIV,
            AluOp::Mod => bpf::BPF_MOD,
            AluOp::And => bpf::BPF_AND,
            AluOp::Or => bpf::BPF_OR,
            AluOp::Xor => bpf::BPF_XOR,
            AluOp::Lsh => bpf::BPF_LSH,
            AluOp::Rsh => bpf::BPF_RSH,
        }
    }

    /// Evaluate `lhs op rhs` with cBPF's 32-bit wrapping-unsigned semantics.
    /// Returns `None` for a division/modulus by zero, which the optimizer
    /// must leave unfolded.
    pub fn eval(self, lhs: u32, rhs: u32) -> Option<u32> {
        Some(match self {
            AluOp::Add => lhs.wrapping_add(rhs),
            AluOp::Sub => lhs.wrapping_sub(rhs),
            AluOp::Mul => lhs.wrapping_mul(rhs),
            AluOp::Div => lhs.checked_div(rhs)?,
            AluOp::Mod => lhs.checked_rem(rhs)?,
            AluOp::And => lhs & rhs,
            AluOp::Or => lhs | rhs,
            AluOp::Xor => lhs ^ rhs,
            AluOp::Lsh => lhs.wrapping_shl(rhs),
            AluOp::Rsh => lhs.wrapping_shr(rhs),
        })
    }
}

/// The right-hand operand of an ALU or jump instruction: either an immediate
/// or the `X` register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluSrc {
    K(u32),
    X,
}

/// Relational comparisons cBPF natively supports. `<` and `<=` are encoded by
/// reflecting onto these with the block's `is_reversed` flag, never by
/// inventing new opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum JmpOp {
    #[display("jeq")]
    Jeq,
    #[display("jgt")]
    Jgt,
    #[display("jge")]
    Jge,
    #[display("jset")]
    Jset,
}

impl JmpOp {
    pub fn bpf_op(self) -> u16 {
        match self {
            JmpOp::Jeq => bpf::BPF_JEQ,
            JmpOp::Jgt => bpf::BPF_JGT,
            JmpOp::Jge => bpf::BPF_JGE,
            JmpOp::Jset => bpf::BPF_JSET,
        }
    }

    /// Evaluate the comparison for two concrete operands.
    pub fn eval(self, a: u32, x: u32) -> bool {
        match self {
            JmpOp::Jeq => a == x,
            JmpOp::Jgt => a > x,
            JmpOp::Jge => a >= x,
            JmpOp::Jset => (a & x) != 0,
        }
    }
}

/// A straight-line (non-branching) cBPF instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    /// `LD #k` / `LDX #k`
    LdImm { dst: Reg, k: u32 },
    /// `LD M[s]` / `LDX M[s]`
    LdMem { dst: Reg, slot: u8 },
    /// `ST M[s]` / `STX M[s]`, storing `A` or `X` respectively
    St { src: Reg, slot: u8 },
    /// `LD [k]` sized absolute packet load (always loads into `A`)
    LdAbs { size: Size, k: u32 },
    /// `LD [x + k]` sized indexed packet load (always loads into `A`)
    LdInd { size: Size, k: u32 },
    /// `ALU op A, <src>` (result always left in `A`)
    Alu { op: AluOp, src: AluSrc },
}

impl Instr {
    /// Whether this instruction has been superseded and should be skipped at
    /// emission time. Carried alongside the instruction in [`super::block::Block`]
    /// rather than as a field here, mirroring `compiler.h`'s `is_optimized`
    /// flag without requiring every combinator to thread it through.
    pub fn writes(&self) -> Option<Loc> {
        match *self {
            Instr::LdImm { dst, .. } => Some(Loc::Reg(dst)),
            Instr::LdMem { dst, .. } => Some(Loc::Reg(dst)),
            Instr::St { slot, .. } => Some(Loc::Mem(slot)),
            Instr::LdAbs { .. } | Instr::LdInd { .. } => Some(Loc::Reg(Reg::A)),
            Instr::Alu { .. } => Some(Loc::Reg(Reg::A)),
        }
    }

    pub fn reads(&self) -> Vec<Loc> {
        match *self {
            Instr::LdImm { .. } => vec![],
            Instr::LdMem { slot, .. } => vec![Loc::Mem(slot)],
            Instr::St { src, .. } => vec![Loc::Reg(src)],
            Instr::LdAbs { .. } => vec![],
            Instr::LdInd { .. } => vec![Loc::Reg(Reg::X)],
            Instr::Alu { src, .. } => match src {
                AluSrc::K(_) => vec![Loc::Reg(Reg::A)],
                AluSrc::X => vec![Loc::Reg(Reg::A), Loc::Reg(Reg::X)],
            },
        }
    }
}

/// An architectural location the optimizer tracks value numbers for: one of
/// the 16 scratch memory slots, or the `A`/`X` registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Loc {
    #[display("m{_0}")]
    Mem(u8),
    #[display("{_0}")]
    Reg(Reg),
}

/// The block-terminating conditional comparison. Always present on every
/// non-terminal block; terminal (`ACCEPT`/`DROP`) blocks have none.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Branch {
    pub op: JmpOp,
    pub src: AluSrc,
}
