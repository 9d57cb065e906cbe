//! Target-code mnemonics.
//!
//! Used by `Kernel::pretty` and by compile-error diagnostics, which name the
//! failing instruction.

use super::instr::{AluOp, AssignCond, BranchCond, Flag, Imm, Instr, Operand, Reg, Special};

fn flag_str(f: Flag) -> &'static str {
    match f {
        Flag::Zs => "ZS",
        Flag::Zc => "ZC",
        Flag::Ns => "NS",
        Flag::Nc => "NC",
    }
}

fn cond_str(c: AssignCond) -> String {
    match c {
        AssignCond::Always => String::new(),
        AssignCond::Never => ".never".to_string(),
        AssignCond::Flag(f) => format!(".if{}", flag_str(f).to_lowercase()),
    }
}

fn branch_cond_str(c: BranchCond) -> String {
    match c {
        BranchCond::Always => String::new(),
        BranchCond::Never => ".never".to_string(),
        BranchCond::All(f) => format!(".all{}", flag_str(f).to_lowercase()),
        BranchCond::Any(f) => format!(".any{}", flag_str(f).to_lowercase()),
    }
}

pub fn reg_str(r: Reg) -> String {
    match r {
        Reg::A(id) => format!("A{id}"),
        Reg::B(id) => format!("B{id}"),
        Reg::Acc(n) => format!("r{n}"),
        Reg::None => "_".to_string(),
        Reg::TmpA(id) => format!("TmpA{id}"),
        Reg::TmpB(id) => format!("TmpB{id}"),
        Reg::Special(s) => special_str(s).to_string(),
    }
}

fn special_str(s: Special) -> &'static str {
    match s {
        Special::Uniform => "UNIFORM",
        Special::ElemNum => "ELEM_NUM",
        Special::QpuNum => "QPU_NUM",
        Special::VpmRead => "VPM_READ",
        Special::VpmWrite => "VPM_WRITE",
        Special::RdSetup => "RD_SETUP",
        Special::WrSetup => "WR_SETUP",
        Special::DmaLdAddr => "DMA_LD_ADDR",
        Special::DmaLdWait => "DMA_LD_WAIT",
        Special::DmaStAddr => "DMA_ST_ADDR",
        Special::DmaStWait => "DMA_ST_WAIT",
        Special::HostInt => "HOST_INT",
        Special::Tmu0S => "TMU0_S",
        Special::TmuD => "TMUD",
        Special::TmuA => "TMUA",
        Special::SfuRecip => "SFU_RECIP",
        Special::SfuRecipSqrt => "SFU_RECIPSQRT",
        Special::SfuExp => "SFU_EXP",
        Special::SfuLog => "SFU_LOG",
    }
}

fn operand_str(o: &Operand) -> String {
    match o {
        Operand::Reg(r) => reg_str(*r),
        Operand::Imm(imm) => format!("#{}", imm.value()),
    }
}

fn op_str(op: AluOp) -> &'static str {
    match op {
        AluOp::Nop => "nop",
        AluOp::FAdd => "fadd",
        AluOp::FSub => "fsub",
        AluOp::FMin => "fmin",
        AluOp::FMax => "fmax",
        AluOp::FMinAbs => "fminabs",
        AluOp::FMaxAbs => "fmaxabs",
        AluOp::FtoI => "ftoi",
        AluOp::ItoF => "itof",
        AluOp::Add => "add",
        AluOp::Sub => "sub",
        AluOp::Shr => "shr",
        AluOp::Asr => "asr",
        AluOp::Ror => "ror",
        AluOp::Shl => "shl",
        AluOp::Min => "min",
        AluOp::Max => "max",
        AluOp::BAnd => "and",
        AluOp::BOr => "or",
        AluOp::BXor => "xor",
        AluOp::BNot => "not",
        AluOp::Clz => "clz",
        AluOp::V8Adds => "v8adds",
        AluOp::V8Subs => "v8subs",
        AluOp::MFMul => "fmul",
        AluOp::MMul24 => "mul24",
        AluOp::MV8Mul => "v8mul",
        AluOp::MV8Min => "v8min",
        AluOp::MV8Max => "v8max",
        AluOp::MV8Adds => "v8adds.m",
        AluOp::MV8Subs => "v8subs.m",
        AluOp::MRotate => "rotate",
    }
}

/// One-line mnemonic for an instruction.
pub fn mnemonic(instr: &Instr) -> String {
    match instr {
        Instr::Li {
            set_flags,
            cond,
            dest,
            imm,
        } => {
            let value = match imm {
                Imm::Int(i) => format!("{i}"),
                Imm::Float(f) => format!("{f}"),
            };
            format!(
                "li{}{} {}, {}",
                cond_str(*cond),
                if *set_flags { ".setf" } else { "" },
                reg_str(*dest),
                value
            )
        }
        Instr::Alu {
            set_flags,
            cond,
            dest,
            src_a,
            op,
            src_b,
        } => format!(
            "{}{}{} {}, {}, {}",
            op_str(*op),
            cond_str(*cond),
            if *set_flags { ".setf" } else { "" },
            reg_str(*dest),
            operand_str(src_a),
            operand_str(src_b)
        ),
        Instr::Br { cond, offset } => format!("br{} {offset:+}", branch_cond_str(*cond)),
        Instr::Brl { cond, label } => format!("br{} L{label}", branch_cond_str(*cond)),
        Instr::Lab(label) => format!("L{label}:"),
        Instr::End => "end".to_string(),
        Instr::SInc(id) => format!("sinc {id}"),
        Instr::SDec(id) => format!("sdec {id}"),
        Instr::Tmu0ToAcc4 => "ldtmu r4".to_string(),
        Instr::Recv { dest } => format!("ldtmu {}", reg_str(*dest)),
        Instr::DmaLoadWait => "dma_ld_wait".to_string(),
        Instr::DmaStoreWait => "dma_st_wait".to_string(),
        Instr::NoOp => "nop".to_string(),
        Instr::InitBegin => "init_begin".to_string(),
        Instr::InitEnd => "init_end".to_string(),
        Instr::Irq => "irq".to_string(),
        Instr::PrintStr(s) => format!("prs {s:?}"),
        Instr::PrintInt(r) => format!("pri {}", reg_str(*r)),
        Instr::PrintFloat(r) => format!("prf {}", reg_str(*r)),
    }
}

/// Multi-line listing with instruction indices.
pub fn mnemonics(instrs: &[Instr]) -> String {
    let mut out = String::new();
    for (i, instr) in instrs.iter().enumerate() {
        out.push_str(&format!("{i}: {}\n", mnemonic(instr)));
    }
    out
}
