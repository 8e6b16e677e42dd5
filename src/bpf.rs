//! Raw classic BPF (cBPF) constants and the packed instruction layout.
//!
//! Bit-for-bit these mirror the Linux `<linux/bpf_common.h>` / `<linux/filter.h>`
//! definitions that `struct sock_filter` and the `BPF_CLASS`/`BPF_OP`/... macros
//! use. The rest of the compiler works in terms of the typed [`crate::ir::instr`]
//! enums; this module is where that typed form meets the raw wire layout, at
//! emission time and in the disassembler.

use derive_more::Display;

/// instruction classes, `code & 0x07`
pub const BPF_LD: u16 = 0x00;
pub const BPF_LDX: u16 = 0x01;
pub const BPF_ST: u16 = 0x02;
pub const BPF_STX: u16 = 0x03;
pub const BPF_ALU: u16 = 0x04;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;
pub const BPF_MISC: u16 = 0x07;
pub const CLASS_MASK: u16 = 0x07;

/// load/store size, `code & 0x18`
pub const BPF_W: u16 = 0x00;
pub const BPF_H: u16 = 0x08;
pub const BPF_B: u16 = 0x10;
pub const SIZE_MASK: u16 = 0x18;

/// load addressing mode, `code & 0xe0`
pub const BPF_IMM: u16 = 0x00;
pub const BPF_ABS: u16 = 0x20;
pub const BPF_IND: u16 = 0x40;
pub const BPF_MEM: u16 = 0x60;
pub const BPF_LEN: u16 = 0x80;
pub const BPF_MSH: u16 = 0xa0;
pub const MODE_MASK: u16 = 0xe0;

/// ALU/JMP operation, `code & 0xf0`
pub const BPF_ADD: u16 = 0x00;
pub const BPF_SUB: u16 = 0x10;
pub const BPF_MUL: u16 = 0x20;
pub const BPF_DIV: u16 = 0x30;
pub const BPF_OR: u16 = 0x40;
pub const BPF_AND: u16 = 0x50;
pub const BPF_LSH: u16 = 0x60;
pub const BPF_RSH: u16 = 0x70;
pub const BPF_NEG: u16 = 0x80;
pub const BPF_MOD: u16 = 0x90;
pub const BPF_XOR: u16 = 0xa0;

pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JGT: u16 = 0x20;
pub const BPF_JGE: u16 = 0x30;
pub const BPF_JSET: u16 = 0x40;
pub const OP_MASK: u16 = 0xf0;

/// operand source, `code & 0x08`
pub const BPF_K: u16 = 0x00;
pub const BPF_X: u16 = 0x08;
pub const SRC_MASK: u16 = 0x08;

/// `RET` return-value source, `code & 0x18`
pub const BPF_RET_A: u16 = 0x10;
pub const RVAL_MASK: u16 = 0x18;

/// `MISC` sub-opcode, `code & 0xf8`
pub const BPF_TAX: u16 = 0x00;
pub const BPF_TXA: u16 = 0x80;
pub const MISCOP_MASK: u16 = 0xf8;

pub const fn class(code: u16) -> u16 {
    code & CLASS_MASK
}
pub const fn size(code: u16) -> u16 {
    code & SIZE_MASK
}
pub const fn mode(code: u16) -> u16 {
    code & MODE_MASK
}
pub const fn op(code: u16) -> u16 {
    code & OP_MASK
}
pub const fn src(code: u16) -> u16 {
    code & SRC_MASK
}
pub const fn rval(code: u16) -> u16 {
    code & RVAL_MASK
}
pub const fn miscop(code: u16) -> u16 {
    code & MISCOP_MASK
}

/// Number of addressable scratch memory slots, `M[0..16)`.
pub const REGS_MEM_MAX: usize = 16;

/// Maximum instructions the kernel verifier accepts in one cBPF program.
pub const BPF_MAXINSNS: usize = 4096;

/// `RET` value accepting the whole packet, i.e. `-1` reinterpreted as `u32`.
pub const RET_ACCEPT: u32 = 0xFFFF_FFFF;
/// `RET` value dropping the packet.
pub const RET_DROP: u32 = 0;

/// A single cBPF instruction in the exact wire layout the kernel expects:
/// 16-bit opcode, two 8-bit jump targets, 32-bit immediate.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("{{code: {code:#06x}, jt: {jt}, jf: {jf}, k: {k:#x}}}")]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    pub const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        SockFilter { code, jt, jf, k }
    }
}

/// Ancillary packet-metadata offsets (`SKF_AD_OFF + SKF_AD_*`). A `BPF_LD_ABS`
/// whose `k` falls in this range asks the kernel for metadata (protocol,
/// ifindex, VLAN tag, ...) instead of payload bytes.
pub const SKF_AD_OFF: u32 = 0xFFFF_F000; // -0x1000 reinterpreted as u32
pub const SKF_AD_PROTOCOL: u32 = 0;
pub const SKF_AD_PKTTYPE: u32 = 4;
pub const SKF_AD_IFINDEX: u32 = 8;
pub const SKF_AD_NLATTR: u32 = 12;
pub const SKF_AD_NLATTR_NEST: u32 = 16;
pub const SKF_AD_MARK: u32 = 20;
pub const SKF_AD_QUEUE: u32 = 24;
pub const SKF_AD_HATYPE: u32 = 28;
pub const SKF_AD_RXHASH: u32 = 32;
pub const SKF_AD_CPU: u32 = 36;
pub const SKF_AD_VLAN_TAG: u32 = 44;
pub const SKF_AD_VLAN_TAG_PRESENT: u32 = 48;
pub const SKF_AD_PAY_OFFSET: u32 = 52;

/// Render an ancillary-data `k` as its symbolic name, if it falls in the
/// `SKF_AD_OFF` range that the disassembler should render symbolically.
pub fn ancillary_name(k: u32) -> Option<&'static str> {
    if k < SKF_AD_OFF {
        return None;
    }
    let off = k.wrapping_sub(SKF_AD_OFF);
    Some(match off {
        x if x == SKF_AD_PROTOCOL => "proto",
        x if x == SKF_AD_PKTTYPE => "type",
        x if x == SKF_AD_IFINDEX => "ifidx",
        x if x == SKF_AD_NLATTR => "nla",
        x if x == SKF_AD_NLATTR_NEST => "nlan",
        x if x == SKF_AD_MARK => "mark",
        x if x == SKF_AD_QUEUE => "queue",
        x if x == SKF_AD_HATYPE => "hatype",
        x if x == SKF_AD_RXHASH => "rxhash",
        x if x == SKF_AD_CPU => "cpu",
        x if x == SKF_AD_VLAN_TAG => "vlant",
        x if x == SKF_AD_VLAN_TAG_PRESENT => "vlanp",
        x if x == SKF_AD_PAY_OFFSET => "poff",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_extracts_low_bits() {
        assert_eq!(class(BPF_LD | BPF_ABS | BPF_W), BPF_LD);
        assert_eq!(mode(BPF_LD | BPF_ABS | BPF_W), BPF_ABS);
        assert_eq!(size(BPF_LD | BPF_ABS | BPF_W), BPF_W);
    }

    #[test]
    fn ancillary_name_recognizes_protocol_offset() {
        assert_eq!(ancillary_name(SKF_AD_OFF + SKF_AD_PROTOCOL), Some("proto"));
        assert_eq!(ancillary_name(12), None);
    }
}
