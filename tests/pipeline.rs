//! Pipeline invariants checked over fully compiled kernels.

use qpukit::source::gen::{generate, GenOptions};
use qpukit::source::{any, end, index, where_, while_, Int, Ptr};
use qpukit::target::instr::{Instr, Operand, Reg, Special};
use qpukit::{compile, compile_program, Target};

fn read_file(reg: Reg) -> Option<char> {
    match reg {
        Reg::A(_) | Reg::Special(Special::ElemNum) | Reg::Special(Special::DmaLdWait) => Some('A'),
        Reg::B(_) | Reg::Special(Special::QpuNum) | Reg::Special(Special::DmaStWait) => Some('B'),
        _ => None,
    }
}

fn check_compiled(instrs: &[Instr], target: Target) {
    let reg_limit = match target {
        Target::Vc4 => 32,
        Target::V3d => 64,
    };
    for (i, instr) in instrs.iter().enumerate() {
        // Label form is gone after resolution.
        assert!(
            !matches!(
                instr,
                Instr::Brl { .. } | Instr::Lab(_) | Instr::InitBegin | Instr::InitEnd
            ),
            "unresolved instruction {i} on {target:?}"
        );
        if let Instr::Alu {
            dest, src_a, src_b, ..
        } = instr
        {
            // Physical register ids stay inside the dialect's regfile.
            for reg in [Some(dest), operand_reg(src_a), operand_reg(src_b)]
                .into_iter()
                .flatten()
            {
                if let Reg::A(id) | Reg::B(id) = reg {
                    assert!(*id < reg_limit, "register {id} out of range at {i}");
                }
            }
            if target == Target::Vc4 {
                // At most one read per regfile, and an immediate occupies
                // the B slot.
                let files: Vec<char> = match (src_a, src_b) {
                    (Operand::Reg(a), Operand::Reg(b)) if a == b => {
                        read_file(*a).into_iter().collect()
                    }
                    (Operand::Reg(a), Operand::Reg(b)) => read_file(*a)
                        .into_iter()
                        .chain(read_file(*b))
                        .collect(),
                    (Operand::Reg(a), Operand::Imm(_)) | (Operand::Imm(_), Operand::Reg(a)) => {
                        read_file(*a).into_iter().chain(Some('B')).collect()
                    }
                    _ => Vec::new(),
                };
                let a_reads = files.iter().filter(|&&f| f == 'A').count();
                let b_reads = files.iter().filter(|&&f| f == 'B').count();
                assert!(a_reads <= 1, "instruction {i} reads regfile A twice");
                assert!(b_reads <= 1, "instruction {i} reads regfile B twice");
            }
        }
    }
    // Exactly one halt, at the end.
    assert_eq!(
        instrs.iter().filter(|i| matches!(i, Instr::End)).count(),
        1
    );
    assert!(matches!(instrs.last(), Some(Instr::End)));
}

#[test]
fn compiled_kernels_respect_register_constraints() {
    for target in [Target::Vc4, Target::V3d] {
        let k = compile::<(Ptr<Int>,), _>(target, |(p,)| {
            let mut a = Int::from(index());
            let b = Int::from(a + 1);
            let c = Int::from((a & b) ^ 3);
            where_(c.gt(b));
            a += 2;
            end();
            while_(any(a.lt(40)));
            a += b;
            end();
            p.deref().set(a + c);
        })
        .unwrap();
        check_compiled(k.code(), target);
    }
}

#[test]
fn random_programs_compile_within_constraints() {
    let opts = GenOptions::default();
    for seed in 0..100 {
        let (prog, _) = generate(&opts, 0x4000 + seed);
        for target in [Target::Vc4, Target::V3d] {
            let compiled = compile_program(&prog, target).expect("compile");
            check_compiled(&compiled.instrs, target);
        }
    }
}

#[test]
fn empty_kernel_compiles_to_loads_and_halt() {
    let k = compile::<(), _>(Target::V3d, |_| {}).unwrap();
    assert_eq!(k.code().len(), 3);
    assert!(k.code()[0].is_uniform_load());
    assert!(k.code()[1].is_uniform_load());
    assert!(matches!(k.code()[2], Instr::End));
}

fn operand_reg(op: &Operand) -> Option<&Reg> {
    match op {
        Operand::Reg(r) => Some(r),
        Operand::Imm(_) => None,
    }
}
