//! End-to-end compilation scenarios exercising the full pipeline:
//! lex → parse → lower → optimize → layout → disassemble.

use pflang::back::disassemble;
use pflang::registry::Registry;
use pflang::{bpf, compile, CompileError};

fn registry() -> Registry {
    Registry::with_builtins()
}

#[test]
fn ether_type_comparison_matches_the_expected_disassembly() {
    let prog = compile("ether.type == 0x800", true, &registry()).unwrap();
    let lines = disassemble(&prog);
    assert_eq!(
        lines,
        vec!["L0: ldh [12]", "L1: jeq #0x800, L2, L3", "L2: ret #0xffffffff", "L3: ret #0x0",]
    );
}

#[test]
fn ihl_comparison_keeps_its_mask_instruction_under_optimization() {
    let prog = compile("ipv4.ihl >= 5", true, &registry()).unwrap();
    let lines = disassemble(&prog);
    // The mask is not a no-op (0xf0 != 0xffffffff) so the optimizer must not
    // drop it, even though the load and mask are otherwise pure arithmetic.
    assert!(lines.iter().any(|l| l.contains("and #0xf0")));
    assert!(lines.iter().any(|l| l.starts_with("L0: ldb")));
    assert!(lines.iter().any(|l| l.contains("jge #0x5,")));
}

#[test]
fn fully_constant_comparison_folds_to_a_bare_accept() {
    let optimized = compile("1 + 2 == 3", true, &registry()).unwrap();
    assert_eq!(disassemble(&optimized), vec!["L0: ret #0xffffffff"]);

    let unoptimized = compile("1 + 2 == 3", false, &registry()).unwrap();
    assert!(unoptimized.len() > 1, "unoptimized form should still perform the arithmetic");
}

#[test]
fn and_wires_the_left_false_path_to_drop_and_true_path_into_the_right() {
    let prog = compile("ether.type == 0x800 and ipv4.ver == 4", true, &registry()).unwrap();
    let jeqs: Vec<_> = prog
        .iter()
        .filter(|f| bpf::class(f.code) == bpf::BPF_JMP && bpf::op(f.code) == bpf::BPF_JEQ)
        .collect();
    assert_eq!(jeqs.len(), 2, "two conditional comparisons in series");

    let rets: Vec<_> = prog.iter().filter(|f| bpf::class(f.code) == bpf::BPF_RET).collect();
    assert_eq!(rets.len(), 2, "exactly one ACCEPT and one DROP terminal");
    assert!(rets.iter().any(|f| f.k == bpf::RET_ACCEPT));
    assert!(rets.iter().any(|f| f.k == bpf::RET_DROP));
}

#[test]
fn not_of_a_comparison_swaps_accept_and_drop() {
    let plain = disassemble(&compile("ether.type == 0x800", true, &registry()).unwrap());
    let negated = disassemble(&compile("not (ether.type == 0x800)", true, &registry()).unwrap());

    assert_eq!(plain.len(), negated.len());
    // Same load and comparison, but the terminal return values at the jump
    // targets are swapped.
    assert!(negated[0].starts_with("L0: ldh"));
    assert!(negated[1].contains("jeq #0x800"));
    assert!(negated.iter().any(|l| l.ends_with("ret #0xffffffff")));
    assert!(negated.iter().any(|l| l.ends_with("ret #0x0")));
}

#[test]
fn division_by_a_literal_zero_is_a_diagnostic_not_a_hard_error() {
    // compile() must still return Ok; the optimizer just declines to fold
    // the division instead of panicking or erroring.
    let prog = compile("10 / 0", true, &registry()).unwrap();
    let has_div = prog.iter().any(|f| bpf::class(f.code) == bpf::BPF_ALU && bpf::op(f.code) == bpf::BPF_DIV);
    assert!(has_div, "division by zero must be preserved verbatim for the kernel to reject");
}

#[test]
fn unknown_field_surfaces_as_a_compile_error_not_a_panic() {
    let err = compile("tcp.port == 80", true, &registry()).unwrap_err();
    assert!(matches!(err, CompileError::UnknownField(_)));
}

#[test]
fn every_jump_target_is_strictly_forward() {
    let prog = compile("ether.type == 0x800 and ipv4.ver == 4", true, &registry()).unwrap();
    for (i, f) in prog.iter().enumerate() {
        if bpf::class(f.code) == bpf::BPF_JMP && bpf::op(f.code) != bpf::BPF_JA {
            assert!(f.jt as usize + i + 1 <= prog.len());
            assert!(f.jf as usize + i + 1 <= prog.len());
        }
    }
}
