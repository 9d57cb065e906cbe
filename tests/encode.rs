//! Encoder laws: the vc4 encoder against its independent decoder, the v3d
//! pack/unpack identity, and whole-kernel encoding for both dialects.

use qpukit::source::{any, end, index, where_, Int, Ptr};
use qpukit::target::instr::{
    AluOp, AssignCond, BranchCond, Flag, Instr, Operand, Reg, SmallImm, Special,
};
use qpukit::{compile, v3d, vc4, Target};

/// A representative slice of everything the vc4 encoder accepts.
fn vc4_instruction_corpus() -> Vec<Instr> {
    let mut corpus = vec![
        Instr::li(Reg::A(0), 0),
        Instr::li(Reg::B(31), i32::MIN),
        Instr::Li {
            set_flags: true,
            cond: AssignCond::Flag(Flag::Ns),
            dest: Reg::Special(Special::WrSetup),
            imm: qpukit::target::instr::Imm::Int(0x1234_5678),
        },
        Instr::mov(Reg::A(1), Reg::Special(Special::Uniform)),
        Instr::mov(Reg::Special(Special::Tmu0S), Reg::A(2)),
        Instr::mov(Reg::Special(Special::DmaStAddr), Reg::A(3)),
        Instr::Br {
            cond: BranchCond::Always,
            offset: 2,
        },
        Instr::Br {
            cond: BranchCond::All(Flag::Nc),
            offset: -20,
        },
        Instr::End,
        Instr::Tmu0ToAcc4,
        Instr::SInc(0),
        Instr::SDec(7),
        Instr::NoOp,
    ];
    // Every add-unit and mul-unit op over a register/register pair.
    let add_ops = [
        AluOp::FAdd,
        AluOp::FSub,
        AluOp::FMin,
        AluOp::FMax,
        AluOp::FMinAbs,
        AluOp::FMaxAbs,
        AluOp::FtoI,
        AluOp::ItoF,
        AluOp::Add,
        AluOp::Sub,
        AluOp::Shr,
        AluOp::Asr,
        AluOp::Ror,
        AluOp::Shl,
        AluOp::Min,
        AluOp::Max,
        AluOp::BAnd,
        AluOp::BOr,
        AluOp::BXor,
        AluOp::BNot,
        AluOp::Clz,
        AluOp::V8Adds,
        AluOp::V8Subs,
    ];
    for (i, op) in add_ops.into_iter().enumerate() {
        corpus.push(Instr::alu(
            Reg::A(i as u32),
            Operand::Reg(Reg::A(i as u32)),
            op,
            Operand::Reg(Reg::B(i as u32)),
        ));
    }
    let mul_ops = [
        AluOp::MFMul,
        AluOp::MMul24,
        AluOp::MV8Mul,
        AluOp::MV8Min,
        AluOp::MV8Max,
        AluOp::MV8Adds,
        AluOp::MV8Subs,
    ];
    for (i, op) in mul_ops.into_iter().enumerate() {
        corpus.push(Instr::alu(
            Reg::B(i as u32),
            Operand::Reg(Reg::Acc(0)),
            op,
            Operand::Reg(Reg::A(i as u32)),
        ));
    }
    // Small immediates across the whole legal range, on either side.
    for v in -16..=15 {
        corpus.push(Instr::alu(
            Reg::A(4),
            Operand::Reg(Reg::A(5)),
            AluOp::Add,
            Operand::Imm(SmallImm::new(v).unwrap()),
        ));
        corpus.push(Instr::alu(
            Reg::A(4),
            Operand::Imm(SmallImm::new(v).unwrap()),
            AluOp::Sub,
            Operand::Reg(Reg::A(5)),
        ));
    }
    // Rotations by every legal immediate and by r5.
    for n in 1..=15 {
        corpus.push(Instr::alu(
            Reg::A(6),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MRotate,
            Operand::Imm(SmallImm::new(n).unwrap()),
        ));
    }
    corpus.push(Instr::alu(
        Reg::A(6),
        Operand::Reg(Reg::Acc(0)),
        AluOp::MRotate,
        Operand::Reg(Reg::Acc(5)),
    ));
    // Conditional and flag-setting variants.
    for flag in [Flag::Zs, Flag::Zc, Flag::Ns, Flag::Nc] {
        corpus.push(Instr::Alu {
            set_flags: true,
            cond: AssignCond::Flag(flag),
            dest: Reg::A(7),
            src_a: Operand::Reg(Reg::A(8)),
            op: AluOp::Sub,
            src_b: Operand::Reg(Reg::B(9)),
        });
    }
    // File-constrained specials.
    corpus.push(Instr::alu(
        Reg::A(1),
        Operand::Reg(Reg::Special(Special::ElemNum)),
        AluOp::Add,
        Operand::Reg(Reg::Special(Special::QpuNum)),
    ));
    corpus.push(Instr::mov(Reg::A(2), Reg::Special(Special::DmaLdWait)));
    corpus.push(Instr::mov(Reg::A(2), Reg::Special(Special::DmaStWait)));
    corpus
}

#[test]
fn vc4_decoder_inverts_the_encoder() {
    for instr in vc4_instruction_corpus() {
        let (high, low) = vc4::encode::encode_instr(&instr).expect("encode");
        let back = vc4::encode::decode_instr(high, low).expect("decode");
        // Prints and no-ops share one encoding; everything else must
        // reconstruct exactly.
        if matches!(instr, Instr::NoOp) {
            assert_eq!(back, Instr::NoOp);
        } else if let Instr::Li { imm, .. } = &instr {
            // The decoder sees raw bits.
            if let (Instr::Li { imm: back_imm, .. }, b) = (&back, imm.bits()) {
                assert_eq!(back_imm.bits(), b);
            } else {
                panic!("LI decoded as {back:?}");
            }
        } else {
            assert_eq!(back, instr, "{instr:?}");
        }
    }
}

#[test]
fn vc4_pseudo_instructions_expand_before_encoding() {
    let (high, low) = vc4::encode::encode_instr(&Instr::DmaLoadWait).unwrap();
    let back = vc4::encode::decode_instr(high, low).unwrap();
    match back {
        Instr::Alu {
            cond: AssignCond::Never,
            dest: Reg::None,
            src_a: Operand::Reg(Reg::Special(Special::DmaLdWait)),
            ..
        } => {}
        other => panic!("unexpected expansion {other:?}"),
    }

    let (high, low) = vc4::encode::encode_instr(&Instr::DmaStoreWait).unwrap();
    let back = vc4::encode::decode_instr(high, low).unwrap();
    match back {
        Instr::Alu {
            src_a: Operand::Reg(Reg::Special(Special::DmaStWait)),
            ..
        } => {}
        other => panic!("unexpected expansion {other:?}"),
    }
}

#[test]
fn v3d_unpack_inverts_pack() {
    let corpus = vec![
        Instr::li(Reg::A(0), 42),
        Instr::mov(Reg::A(3), Reg::Special(Special::Uniform)),
        Instr::mov(Reg::A(4), Reg::Special(Special::ElemNum)),
        Instr::mov(Reg::A(5), Reg::Special(Special::QpuNum)),
        Instr::mov(Reg::Special(Special::TmuD), Reg::A(6)),
        Instr::mov(Reg::Special(Special::TmuA), Reg::A(7)),
        Instr::Recv { dest: Reg::A(9) },
        Instr::Tmu0ToAcc4,
        Instr::End,
        Instr::NoOp,
        Instr::SInc(1),
        Instr::SDec(14),
        Instr::Br {
            cond: BranchCond::Any(Flag::Ns),
            offset: 7,
        },
        Instr::alu(
            Reg::A(1),
            Operand::Reg(Reg::A(2)),
            AluOp::Add,
            Operand::Reg(Reg::A(3)),
        ),
        Instr::alu(
            Reg::A(1),
            Operand::Reg(Reg::A(2)),
            AluOp::Shl,
            Operand::Imm(SmallImm::new(2).unwrap()),
        ),
        Instr::alu(
            Reg::Acc(2),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MFMul,
            Operand::Reg(Reg::Acc(1)),
        ),
        Instr::Alu {
            set_flags: true,
            cond: AssignCond::Flag(Flag::Zc),
            dest: Reg::None,
            src_a: Operand::Reg(Reg::A(10)),
            op: AluOp::Sub,
            src_b: Operand::Imm(SmallImm::new(-16).unwrap()),
        },
        Instr::alu(
            Reg::A(6),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MRotate,
            Operand::Imm(SmallImm::new(15).unwrap()),
        ),
    ];
    for instr in corpus {
        let word = v3d::encode::pack_instr(&instr).expect("pack");
        let back = v3d::encode::unpack_instr(word).expect("unpack");
        assert_eq!(back, instr, "word {word:016x}");
    }
}

#[test]
fn whole_kernels_encode_for_both_targets() {
    for target in [Target::Vc4, Target::V3d] {
        let mut k = compile::<(Ptr<Int>,), _>(target, |(p,)| {
            let a = Int::from(index());
            where_(a.lt(8));
            a.set(a + 1);
            end();
            if_helper(a);
            p.deref().set(a);
        })
        .unwrap();
        let code = k.encode().expect("machine code");
        assert!(!code.is_empty());
        // vc4 words come in 32-bit pairs, v3d words are 64-bit; both
        // streams are whole numbers of 64-bit instructions.
        assert_eq!(code.len() % 8, 0, "{target:?}");
    }

    fn if_helper(a: Int) {
        qpukit::source::if_(any(a.gt(4)));
        a.set(a - 1);
        end();
    }
}

#[test]
fn v3d_code_ends_with_the_halt_sequence() {
    let mut k = compile::<(), _>(Target::V3d, |_| {}).unwrap();
    let code = k.encode().unwrap();
    let words: Vec<u64> = code
        .chunks(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let n = words.len();
    let thrsw = v3d::encode::pack_instr(&Instr::End).unwrap();
    assert_eq!(words[n - 3], thrsw);
    assert_eq!(words[n - 2], 0);
    assert_eq!(words[n - 1], 0);
}

#[test]
fn rotation_amount_bounds_are_conjunctive() {
    for bad in [0, -3] {
        if let Some(imm) = SmallImm::new(bad) {
            let instr = Instr::alu(
                Reg::A(0),
                Operand::Reg(Reg::Acc(0)),
                AluOp::MRotate,
                Operand::Imm(imm),
            );
            assert!(vc4::encode::encode_instr(&instr).is_err(), "amount {bad}");
            assert!(v3d::encode::pack_instr(&instr).is_err(), "amount {bad}");
        }
    }
}
