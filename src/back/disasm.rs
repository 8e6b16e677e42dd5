//! Renders an assembled program back into `tcpdump -d`-style text, mostly
//! as a testable oracle for the optimizer and layout passes: two programs
//! that disassemble identically are equivalent for our purposes even if the
//! encoding differs in, say, instruction numbering.

use crate::bpf::{self, SockFilter};

fn alu_name(op: u16) -> &'static str {
    match op {
        bpf::BPF_ADD => "add",
        bpf::BPF_SUB => "sub",
        bpf::BPF_MUL => "mul",
        bpf::BPF_DIV => "div",
        bpf::BPF_MOD => "mod",
        bpf::BPF_AND => "and",
        bpf::BPF_OR => "or",
        bpf::BPF_XOR => "xor",
        bpf::BPF_LSH => "lsh",
        bpf::BPF_RSH => "rsh",
        bpf::BPF_NEG => "neg",
        _ => "alu?",
    }
}

fn jmp_name(op: u16) -> &'static str {
    match op {
        bpf::BPF_JEQ => "jeq",
        bpf::BPF_JGT => "jgt",
        bpf::BPF_JGE => "jge",
        bpf::BPF_JSET => "jset",
        _ => "jmp?",
    }
}

fn size_suffix(code: u16) -> &'static str {
    match bpf::size(code) {
        bpf::BPF_H => "h",
        bpf::BPF_B => "b",
        _ => "",
    }
}

fn ld_operand(f: &SockFilter) -> String {
    match bpf::mode(f.code) {
        bpf::BPF_IMM => format!("#{:#x}", f.k),
        bpf::BPF_ABS => match bpf::ancillary_name(f.k) {
            Some(name) => format!("#{name}"),
            None => format!("[{}]", f.k),
        },
        bpf::BPF_IND => format!("[x + {}]", f.k),
        bpf::BPF_MEM => format!("M[{}]", f.k),
        bpf::BPF_LEN => "len".to_string(),
        bpf::BPF_MSH => format!("4*([{}]&0xf)", f.k),
        _ => format!("?{:#x}", f.k),
    }
}

/// Disassemble a single already-assembled instruction. `n` is its index in
/// the surrounding program, used to render jump targets as absolute labels.
pub fn disassemble_one(f: &SockFilter, n: usize) -> String {
    match bpf::class(f.code) {
        bpf::BPF_LD => format!("ld{} {}", size_suffix(f.code), ld_operand(f)),
        bpf::BPF_LDX => format!("ldx{} {}", size_suffix(f.code), ld_operand(f)),
        bpf::BPF_ST => format!("st M[{}]", f.k),
        bpf::BPF_STX => format!("stx M[{}]", f.k),
        bpf::BPF_ALU => {
            let op = alu_name(bpf::op(f.code));
            if bpf::src(f.code) == bpf::BPF_X {
                format!("{op} x")
            } else {
                format!("{op} #{:#x}", f.k)
            }
        }
        bpf::BPF_JMP => {
            if bpf::op(f.code) == bpf::BPF_JA {
                format!("ja L{}", n + 1 + f.k as usize)
            } else {
                let op = jmp_name(bpf::op(f.code));
                let operand = if bpf::src(f.code) == bpf::BPF_X { "x".to_string() } else { format!("#{:#x}", f.k) };
                format!("{op} {operand}, L{}, L{}", n + 1 + f.jt as usize, n + 1 + f.jf as usize)
            }
        }
        bpf::BPF_RET => {
            if bpf::rval(f.code) == bpf::BPF_RET_A {
                "ret a".to_string()
            } else {
                format!("ret #{:#x}", f.k)
            }
        }
        bpf::BPF_MISC => match bpf::miscop(f.code) {
            bpf::BPF_TAX => "tax".to_string(),
            bpf::BPF_TXA => "txa".to_string(),
            _ => format!("misc {:#x}", f.code),
        },
        _ => format!("unimp {:#x}", f.code),
    }
}

/// Disassemble a whole program, one line per instruction, in the style of
/// `tcpdump -d` / `bpf_asm -d`: `L0  ld #0x1\nL1  ret #0xffffffff`.
pub fn disassemble(prog: &[SockFilter]) -> Vec<String> {
    prog.iter()
        .enumerate()
        .map(|(n, f)| format!("L{n}: {}", disassemble_one(f, n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_a_return() {
        let prog = vec![SockFilter::new(bpf::BPF_RET | bpf::BPF_K, 0, 0, bpf::RET_ACCEPT)];
        let lines = disassemble(&prog);
        assert_eq!(lines, vec!["L0: ret #0xffffffff"]);
    }

    #[test]
    fn disassembles_a_conditional_jump_with_resolved_labels() {
        let prog = vec![
            SockFilter::new(bpf::BPF_LD | bpf::BPF_ABS | bpf::BPF_H, 0, 0, 12),
            SockFilter::new(bpf::BPF_JMP | bpf::BPF_JEQ | bpf::BPF_K, 0, 1, 0x800),
            SockFilter::new(bpf::BPF_RET | bpf::BPF_K, 0, 0, bpf::RET_ACCEPT),
            SockFilter::new(bpf::BPF_RET | bpf::BPF_K, 0, 0, bpf::RET_DROP),
        ];
        let lines = disassemble(&prog);
        assert_eq!(lines[1], "L1: jeq #0x800, L2, L3");
    }

    #[test]
    fn ancillary_loads_render_symbolically() {
        let prog = vec![SockFilter::new(
            bpf::BPF_LD | bpf::BPF_ABS | bpf::BPF_W,
            0,
            0,
            bpf::SKF_AD_OFF + bpf::SKF_AD_PROTOCOL,
        )];
        assert_eq!(disassemble(&prog), vec!["L0: ld #proto"]);
    }
}
