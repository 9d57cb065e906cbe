//! v3d instruction encoding.
//!
//! One 64-bit word per instruction. The ALU field layout follows the v3d
//! style: mul op in the top bits, a five-bit signal field, condition and
//! write-address fields in the middle, and the add op, read addresses and
//! input muxes in the low word:
//!
//! ```text
//! [63:58] op_mul   [57:53] sig      [52]    unused   [49] set_flags
//! [48:46] cond     [45]    magic_a  [44]    magic_m
//! [43:38] waddr_a  [37:32] waddr_m  [31:24] op_add
//! [23:18] raddr_a  [17:12] raddr_b
//! [11:9]  add_b    [8:6]   add_a    [5:3]   mul_b    [2:0] mul_a
//! ```
//!
//! There is a single 64-entry regfile; code that still carries vc4 file-B
//! ids has them folded in at offset 32. Uniform loads become `ldunifrf`
//! signals, TMU receives become `ldtmu`, and the element/thread index reads
//! become the `eidx`/`tidx` add-unit ops. [`unpack_instr`] inverts every
//! word [`pack_instr`] can produce.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{QpuError, Result};
use crate::target::instr::{
    AluOp, AssignCond, BranchCond, Flag, Imm, Instr, Operand, Reg, SmallImm, Special,
};
use crate::target::pretty::mnemonic;

/// File-B ids are folded into the single regfile at this offset.
pub const REGB_OFFSET: u32 = 32;

// Signal field values.
const SIG_NONE: u64 = 0;
const SIG_THRSW: u64 = 1;
const SIG_LDUNIFRF: u64 = 2;
const SIG_LDTMU: u64 = 3;
const SIG_SMALL_IMM: u64 = 4;
const SIG_ROTATE: u64 = 5;
const SIG_SEMA: u64 = 6;
const SIG_LDIMM: u64 = 7;
const SIG_BRANCH: u64 = 31;

// Magic write addresses (magic_* bit set).
const MAGIC_R0: u32 = 0;
const MAGIC_TMUD: u32 = 11;
const MAGIC_TMUA: u32 = 12;
const MAGIC_TMU0S: u32 = 13;
const MAGIC_SFU_RECIP: u32 = 16;
const MAGIC_SFU_RSQRT: u32 = 17;
const MAGIC_SFU_EXP: u32 = 18;
const MAGIC_SFU_LOG: u32 = 19;
const MAGIC_NONE: u32 = 63;

// Add-unit opcodes.
const A_NOP: u32 = 0;
const A_FADD: u32 = 1;
const A_FSUB: u32 = 2;
const A_FMIN: u32 = 3;
const A_FMAX: u32 = 4;
const A_ITOF: u32 = 5;
const A_FTOIN: u32 = 6;
const A_ADD: u32 = 7;
const A_SUB: u32 = 8;
const A_SHR: u32 = 9;
const A_ASR: u32 = 10;
const A_ROR: u32 = 11;
const A_SHL: u32 = 12;
const A_MIN: u32 = 13;
const A_MAX: u32 = 14;
const A_AND: u32 = 15;
const A_OR: u32 = 16;
const A_XOR: u32 = 17;
const A_NOT: u32 = 18;
const A_CLZ: u32 = 19;
const A_EIDX: u32 = 20;
const A_TIDX: u32 = 21;

// Mul-unit opcodes.
const M_FMUL: u32 = 1;
const M_UMUL24: u32 = 2;
const M_MOV: u32 = 3;

fn encode_add_op(op: AluOp) -> std::result::Result<u32, String> {
    Ok(match op {
        AluOp::Nop => A_NOP,
        AluOp::FAdd => A_FADD,
        AluOp::FSub => A_FSUB,
        AluOp::FMin => A_FMIN,
        AluOp::FMax => A_FMAX,
        AluOp::ItoF => A_ITOF,
        AluOp::FtoI => A_FTOIN,
        AluOp::Add => A_ADD,
        AluOp::Sub => A_SUB,
        AluOp::Shr => A_SHR,
        AluOp::Asr => A_ASR,
        AluOp::Ror => A_ROR,
        AluOp::Shl => A_SHL,
        AluOp::Min => A_MIN,
        AluOp::Max => A_MAX,
        AluOp::BAnd => A_AND,
        AluOp::BOr => A_OR,
        AluOp::BXor => A_XOR,
        AluOp::BNot => A_NOT,
        AluOp::Clz => A_CLZ,
        other => return Err(format!("{other:?} has no v3d add-unit encoding")),
    })
}

fn decode_add_op(bits: u32) -> Option<AluOp> {
    Some(match bits {
        A_FADD => AluOp::FAdd,
        A_FSUB => AluOp::FSub,
        A_FMIN => AluOp::FMin,
        A_FMAX => AluOp::FMax,
        A_ITOF => AluOp::ItoF,
        A_FTOIN => AluOp::FtoI,
        A_ADD => AluOp::Add,
        A_SUB => AluOp::Sub,
        A_SHR => AluOp::Shr,
        A_ASR => AluOp::Asr,
        A_ROR => AluOp::Ror,
        A_SHL => AluOp::Shl,
        A_MIN => AluOp::Min,
        A_MAX => AluOp::Max,
        A_AND => AluOp::BAnd,
        A_OR => AluOp::BOr,
        A_XOR => AluOp::BXor,
        A_NOT => AluOp::BNot,
        A_CLZ => AluOp::Clz,
        _ => return None,
    })
}

fn encode_mul_op(op: AluOp) -> std::result::Result<u32, String> {
    Ok(match op {
        AluOp::MFMul => M_FMUL,
        AluOp::MMul24 => M_UMUL24,
        other => return Err(format!("{other:?} has no v3d mul-unit encoding")),
    })
}

fn decode_mul_op(bits: u32) -> Option<AluOp> {
    Some(match bits {
        M_FMUL => AluOp::MFMul,
        M_UMUL24 => AluOp::MMul24,
        _ => return None,
    })
}

fn encode_assign_cond(cond: AssignCond) -> u64 {
    match cond {
        AssignCond::Never => 0,
        AssignCond::Always => 1,
        AssignCond::Flag(Flag::Zs) => 2,
        AssignCond::Flag(Flag::Zc) => 3,
        AssignCond::Flag(Flag::Ns) => 4,
        AssignCond::Flag(Flag::Nc) => 5,
    }
}

fn decode_assign_cond(bits: u64) -> Option<AssignCond> {
    Some(match bits {
        0 => AssignCond::Never,
        1 => AssignCond::Always,
        2 => AssignCond::Flag(Flag::Zs),
        3 => AssignCond::Flag(Flag::Zc),
        4 => AssignCond::Flag(Flag::Ns),
        5 => AssignCond::Flag(Flag::Nc),
        _ => return None,
    })
}

fn encode_branch_cond(cond: BranchCond) -> std::result::Result<u64, String> {
    Ok(match cond {
        BranchCond::Never => return Err("'never' branch condition not supported".to_string()),
        BranchCond::Always => 15,
        BranchCond::All(Flag::Zs) => 0,
        BranchCond::All(Flag::Zc) => 1,
        BranchCond::All(Flag::Ns) => 4,
        BranchCond::All(Flag::Nc) => 5,
        BranchCond::Any(Flag::Zs) => 2,
        BranchCond::Any(Flag::Zc) => 3,
        BranchCond::Any(Flag::Ns) => 6,
        BranchCond::Any(Flag::Nc) => 7,
    })
}

fn decode_branch_cond(bits: u64) -> Option<BranchCond> {
    Some(match bits {
        15 => BranchCond::Always,
        0 => BranchCond::All(Flag::Zs),
        1 => BranchCond::All(Flag::Zc),
        4 => BranchCond::All(Flag::Ns),
        5 => BranchCond::All(Flag::Nc),
        2 => BranchCond::Any(Flag::Zs),
        3 => BranchCond::Any(Flag::Zc),
        6 => BranchCond::Any(Flag::Ns),
        7 => BranchCond::Any(Flag::Nc),
        _ => return None,
    })
}

/// Regfile slot for a register, folding file B in at [`REGB_OFFSET`].
fn to_rf_addr(reg: Reg) -> std::result::Result<u32, String> {
    match reg {
        Reg::A(id) if id < 64 => Ok(id),
        Reg::B(id) if id < REGB_OFFSET => Ok(REGB_OFFSET + id),
        other => Err(format!("{other:?} has no v3d regfile slot")),
    }
}

/// Write address plus the magic bit.
fn encode_waddr(reg: Reg) -> std::result::Result<(u32, bool), String> {
    Ok(match reg {
        Reg::A(_) | Reg::B(_) => (to_rf_addr(reg)?, false),
        Reg::Acc(n) if n <= 5 => (MAGIC_R0 + n as u32, true),
        Reg::Acc(n) => return Err(format!("accumulator r{n} out of range")),
        Reg::None => (MAGIC_NONE, true),
        Reg::Special(s) => match s {
            Special::TmuD => (MAGIC_TMUD, true),
            Special::TmuA => (MAGIC_TMUA, true),
            Special::Tmu0S => (MAGIC_TMU0S, true),
            Special::SfuRecip => (MAGIC_SFU_RECIP, true),
            Special::SfuRecipSqrt => (MAGIC_SFU_RSQRT, true),
            Special::SfuExp => (MAGIC_SFU_EXP, true),
            Special::SfuLog => (MAGIC_SFU_LOG, true),
            other => return Err(format!("{other:?} is not writable on v3d")),
        },
        Reg::TmpA(_) | Reg::TmpB(_) => {
            return Err("renaming temporary leaked into the encoder".to_string())
        }
    })
}

fn decode_waddr(addr: u32, magic: bool) -> Option<Reg> {
    if !magic {
        return Some(Reg::A(addr));
    }
    Some(match addr {
        0..=5 => Reg::Acc(addr as u8),
        MAGIC_TMUD => Reg::Special(Special::TmuD),
        MAGIC_TMUA => Reg::Special(Special::TmuA),
        MAGIC_TMU0S => Reg::Special(Special::Tmu0S),
        MAGIC_SFU_RECIP => Reg::Special(Special::SfuRecip),
        MAGIC_SFU_RSQRT => Reg::Special(Special::SfuRecipSqrt),
        MAGIC_SFU_EXP => Reg::Special(Special::SfuExp),
        MAGIC_SFU_LOG => Reg::Special(Special::SfuLog),
        MAGIC_NONE => Reg::None,
        _ => return None,
    })
}

/// True for `mov dest, src` (a bitwise-or of a register with itself).
fn as_mov(instr: &Instr) -> Option<(Reg, Reg)> {
    if let Instr::Alu {
        op: AluOp::BOr,
        dest,
        src_a: Operand::Reg(a),
        src_b: Operand::Reg(b),
        cond: AssignCond::Always,
        set_flags: false,
    } = instr
    {
        if a == b {
            return Some((*dest, *a));
        }
    }
    None
}

struct SrcFields {
    sig: u64,
    raddr_a: u32,
    raddr_b: u32,
    mux_a: u32,
    mux_b: u32,
}

fn encode_srcs(src_a: Operand, src_b: Operand) -> std::result::Result<SrcFields, String> {
    let mut f = SrcFields {
        sig: SIG_NONE,
        raddr_a: 0,
        raddr_b: 0,
        mux_a: 0,
        mux_b: 0,
    };
    let reg_mux = |reg: Reg,
                       raddr_a: &mut u32,
                       raddr_b: &mut u32,
                       use_b: bool|
     -> std::result::Result<u32, String> {
        match reg {
            Reg::Acc(n) if n <= 5 => Ok(n as u32),
            Reg::A(_) | Reg::B(_) => {
                let addr = to_rf_addr(reg)?;
                if use_b {
                    *raddr_b = addr;
                    Ok(7)
                } else {
                    *raddr_a = addr;
                    Ok(6)
                }
            }
            other => Err(format!("{other:?} not readable on v3d")),
        }
    };
    match (src_a, src_b) {
        (Operand::Reg(a), Operand::Reg(b)) => {
            f.mux_a = reg_mux(a, &mut f.raddr_a, &mut f.raddr_b, false)?;
            f.mux_b = reg_mux(b, &mut f.raddr_a, &mut f.raddr_b, true)?;
        }
        (Operand::Reg(a), Operand::Imm(imm)) => {
            f.sig = SIG_SMALL_IMM;
            f.mux_a = reg_mux(a, &mut f.raddr_a, &mut f.raddr_b, false)?;
            f.raddr_b = imm.encode();
            f.mux_b = 7;
        }
        (Operand::Imm(imm), Operand::Reg(b)) => {
            f.sig = SIG_SMALL_IMM;
            f.mux_b = reg_mux(b, &mut f.raddr_a, &mut f.raddr_b, false)?;
            f.raddr_b = imm.encode();
            f.mux_a = 7;
        }
        (Operand::Imm(_), Operand::Imm(_)) => {
            return Err("both operands are small immediates".to_string())
        }
    }
    Ok(f)
}

fn pack_one(instr: &Instr) -> std::result::Result<u64, String> {
    match instr {
        Instr::Alu {
            set_flags,
            cond,
            dest,
            src_a,
            op,
            src_b,
        } => {
            // Uniform loads are a signal, not an ALU op.
            if instr.is_uniform_load() {
                let addr = to_rf_addr(*dest)?;
                return Ok((SIG_LDUNIFRF << 53) | ((addr as u64) << 38));
            }
            // Element and thread index reads are dedicated add ops.
            if let Some((dest, src)) = as_mov(instr) {
                if let Reg::Special(s) = src {
                    let op_add = match s {
                        Special::ElemNum => Some(A_EIDX),
                        Special::QpuNum => Some(A_TIDX),
                        _ => None,
                    };
                    if let Some(op_add) = op_add {
                        let (waddr, magic) = encode_waddr(dest)?;
                        return Ok(((SIG_NONE) << 53)
                            | (encode_assign_cond(AssignCond::Always) << 46)
                            | (u64::from(magic) << 45)
                            | ((waddr as u64) << 38)
                            | ((op_add as u64) << 24));
                    }
                }
            }
            if *op == AluOp::MRotate {
                if src_a != &Operand::Reg(Reg::Acc(0)) {
                    return Err("rotation source must be r0".to_string());
                }
                let raddr_b = match src_b {
                    Operand::Reg(Reg::Acc(5)) => 48u64,
                    Operand::Reg(other) => {
                        return Err(format!("rotation amount must be r5, got {other:?}"))
                    }
                    Operand::Imm(imm) => {
                        let n = imm.value();
                        if !(1..=15).contains(&n) {
                            return Err(format!("rotation amount {n} outside 1..=15"));
                        }
                        48 + n as u64
                    }
                };
                let (waddr, magic) = encode_waddr(*dest)?;
                return Ok((M_MOV as u64) << 58
                    | (SIG_ROTATE << 53)
                    | (encode_assign_cond(*cond) << 46)
                    | (u64::from(*set_flags) << 49)
                    | (u64::from(magic) << 44)
                    | ((waddr as u64) << 32)
                    | (raddr_b << 12));
            }
            let is_mul = op.is_mul();
            let srcs = encode_srcs(*src_a, *src_b)?;
            let (waddr, magic) = encode_waddr(*dest)?;
            let cond = encode_assign_cond(*cond);
            let sf = u64::from(*set_flags) << 49;
            let word = if is_mul {
                let op_mul = encode_mul_op(*op)? as u64;
                (op_mul << 58)
                    | (srcs.sig << 53)
                    | sf
                    | (cond << 46)
                    | (u64::from(magic) << 44)
                    | ((waddr as u64) << 32)
                    | ((srcs.raddr_a as u64) << 18)
                    | ((srcs.raddr_b as u64) << 12)
                    | ((srcs.mux_b as u64) << 3)
                    | (srcs.mux_a as u64)
            } else {
                let op_add = encode_add_op(*op)? as u64;
                (srcs.sig << 53)
                    | sf
                    | (cond << 46)
                    | (u64::from(magic) << 45)
                    | ((waddr as u64) << 38)
                    | (op_add << 24)
                    | ((srcs.raddr_a as u64) << 18)
                    | ((srcs.raddr_b as u64) << 12)
                    | ((srcs.mux_b as u64) << 9)
                    | ((srcs.mux_a as u64) << 6)
            };
            Ok(word)
        }
        Instr::Li {
            set_flags,
            cond,
            dest,
            imm,
        } => {
            let (waddr, magic) = encode_waddr(*dest)?;
            Ok((SIG_LDIMM << 53)
                | (u64::from(*set_flags) << 49)
                | (encode_assign_cond(*cond) << 46)
                | (u64::from(magic) << 45)
                | ((waddr as u64) << 38)
                | (imm.bits() as u32 as u64))
        }
        Instr::Br { cond, offset } => Ok((SIG_BRANCH << 53)
            | (encode_branch_cond(*cond)? << 46)
            | (1 << 45)
            | (*offset as u32 as u64)),
        Instr::Recv { dest } => {
            let addr = to_rf_addr(*dest)?;
            Ok((SIG_LDTMU << 53) | ((addr as u64) << 38))
        }
        Instr::Tmu0ToAcc4 => {
            // ldtmu into the accumulator file: magic r4.
            Ok((SIG_LDTMU << 53) | (1 << 45) | (4u64 << 38))
        }
        Instr::End => Ok(SIG_THRSW << 53),
        Instr::SInc(id) | Instr::SDec(id) => {
            let inc_or_dec = u64::from(matches!(instr, Instr::SDec(_))) << 4;
            Ok((SIG_SEMA << 53) | inc_or_dec | *id as u64)
        }
        Instr::NoOp | Instr::PrintStr(_) | Instr::PrintInt(_) | Instr::PrintFloat(_) => Ok(0),
        Instr::Irq => Err("host interrupts are not available on v3d".to_string()),
        Instr::DmaLoadWait | Instr::DmaStoreWait => {
            Err("DMA is not available on v3d".to_string())
        }
        Instr::Brl { .. } | Instr::Lab(_) | Instr::InitBegin | Instr::InitEnd => {
            Err("unresolved pseudo instruction".to_string())
        }
    }
}

/// Pack one instruction into its 64-bit word.
pub fn pack_instr(instr: &Instr) -> Result<u64> {
    pack_one(instr).map_err(|reason| QpuError::Encode {
        index: 0,
        mnemonic: mnemonic(instr),
        reason,
    })
}

/// Invert [`pack_instr`] on every word it can produce.
pub fn unpack_instr(word: u64) -> Result<Instr> {
    unpack_one(word).map_err(|reason| QpuError::Encode {
        index: 0,
        mnemonic: format!("{word:016x}"),
        reason,
    })
}

fn unpack_one(word: u64) -> std::result::Result<Instr, String> {
    if word == 0 {
        return Ok(Instr::NoOp);
    }
    let sig = (word >> 53) & 0x1f;
    let op_mul = ((word >> 58) & 0x3f) as u32;
    match sig {
        SIG_THRSW => Ok(Instr::End),
        SIG_LDUNIFRF => {
            let addr = ((word >> 38) & 0x3f) as u32;
            Ok(Instr::mov(Reg::A(addr), Reg::Special(Special::Uniform)))
        }
        SIG_LDTMU => {
            if word & (1 << 45) != 0 {
                Ok(Instr::Tmu0ToAcc4)
            } else {
                let addr = ((word >> 38) & 0x3f) as u32;
                Ok(Instr::Recv { dest: Reg::A(addr) })
            }
        }
        SIG_SEMA => {
            let id = (word & 0xf) as u8;
            Ok(if word & 0x10 == 0 {
                Instr::SInc(id)
            } else {
                Instr::SDec(id)
            })
        }
        SIG_LDIMM => {
            let magic = word & (1 << 45) != 0;
            let waddr = ((word >> 38) & 0x3f) as u32;
            let dest = decode_waddr(waddr, magic).ok_or("bad waddr")?;
            Ok(Instr::Li {
                set_flags: word & (1 << 49) != 0,
                cond: decode_assign_cond((word >> 46) & 0x7).ok_or("bad cond")?,
                dest,
                imm: Imm::Int(word as u32 as i32),
            })
        }
        SIG_BRANCH => Ok(Instr::Br {
            cond: decode_branch_cond((word >> 46) & 0xf).ok_or("bad branch cond")?,
            offset: word as u32 as i32,
        }),
        SIG_ROTATE => {
            let magic = word & (1 << 44) != 0;
            let waddr = ((word >> 32) & 0x3f) as u32;
            let dest = decode_waddr(waddr, magic).ok_or("bad waddr")?;
            let raddr_b = ((word >> 12) & 0x3f) as u32;
            let src_b = if raddr_b == 48 {
                Operand::Reg(Reg::Acc(5))
            } else {
                Operand::Imm(SmallImm::new((raddr_b - 48) as i32).ok_or("bad rotate imm")?)
            };
            Ok(Instr::Alu {
                set_flags: word & (1 << 49) != 0,
                cond: decode_assign_cond((word >> 46) & 0x7).ok_or("bad cond")?,
                dest,
                src_a: Operand::Reg(Reg::Acc(0)),
                op: AluOp::MRotate,
                src_b,
            })
        }
        SIG_NONE | SIG_SMALL_IMM => {
            let set_flags = word & (1 << 49) != 0;
            let cond = decode_assign_cond((word >> 46) & 0x7).ok_or("bad cond")?;
            let raddr_a = ((word >> 18) & 0x3f) as u32;
            let raddr_b = ((word >> 12) & 0x3f) as u32;
            let op_add = ((word >> 24) & 0xff) as u32;

            let src_from_mux = |mux: u32| -> std::result::Result<Reg, String> {
                Ok(match mux {
                    0..=5 => Reg::Acc(mux as u8),
                    6 => Reg::A(raddr_a),
                    7 => Reg::A(raddr_b),
                    _ => unreachable!(),
                })
            };

            if op_add != A_NOP {
                let magic = word & (1 << 45) != 0;
                let waddr = ((word >> 38) & 0x3f) as u32;
                let dest = decode_waddr(waddr, magic).ok_or("bad waddr")?;
                if op_add == A_EIDX {
                    return Ok(Instr::mov(dest, Reg::Special(Special::ElemNum)));
                }
                if op_add == A_TIDX {
                    return Ok(Instr::mov(dest, Reg::Special(Special::QpuNum)));
                }
                let op = decode_add_op(op_add).ok_or("bad add op")?;
                let mux_a = ((word >> 6) & 0x7) as u32;
                let mux_b = ((word >> 9) & 0x7) as u32;
                let (src_a, src_b) = decode_operands(
                    sig == SIG_SMALL_IMM,
                    mux_a,
                    mux_b,
                    raddr_b,
                    &src_from_mux,
                )?;
                return Ok(Instr::Alu {
                    set_flags,
                    cond,
                    dest,
                    src_a,
                    op,
                    src_b,
                });
            }

            let magic = word & (1 << 44) != 0;
            let waddr = ((word >> 32) & 0x3f) as u32;
            let dest = decode_waddr(waddr, magic).ok_or("bad waddr")?;
            let op = decode_mul_op(op_mul).ok_or("bad mul op")?;
            let mux_a = (word & 0x7) as u32;
            let mux_b = ((word >> 3) & 0x7) as u32;
            let (src_a, src_b) =
                decode_operands(sig == SIG_SMALL_IMM, mux_a, mux_b, raddr_b, &src_from_mux)?;
            Ok(Instr::Alu {
                set_flags,
                cond,
                dest,
                src_a,
                op,
                src_b,
            })
        }
        other => Err(format!("unknown signal {other}")),
    }
}

fn decode_operands(
    has_imm: bool,
    mux_a: u32,
    mux_b: u32,
    raddr_b: u32,
    src_from_mux: &dyn Fn(u32) -> std::result::Result<Reg, String>,
) -> std::result::Result<(Operand, Operand), String> {
    if has_imm {
        let imm = Operand::Imm(SmallImm::decode(raddr_b).ok_or("bad small imm")?);
        if mux_b == 7 {
            Ok((Operand::Reg(src_from_mux(mux_a)?), imm))
        } else {
            Ok((imm, Operand::Reg(src_from_mux(mux_b)?)))
        }
    } else {
        Ok((
            Operand::Reg(src_from_mux(mux_a)?),
            Operand::Reg(src_from_mux(mux_b)?),
        ))
    }
}

/// Encode a whole sequence. The stream is closed by the v3d halt idiom:
/// the `thrsw` word followed by two no-op words.
pub fn encode(instrs: &[Instr]) -> Result<Vec<u64>> {
    let mut code = Vec::with_capacity(instrs.len() + 2);
    for (index, instr) in instrs.iter().enumerate() {
        let word = pack_one(instr).map_err(|reason| QpuError::Encode {
            index,
            mnemonic: mnemonic(instr),
            reason,
        })?;
        code.push(word);
        if matches!(instr, Instr::End) {
            code.push(0);
            code.push(0);
        }
    }
    Ok(code)
}

/// Encode to the little-endian byte stream handed to the driver.
pub fn encode_to_bytes(instrs: &[Instr]) -> Result<Vec<u8>> {
    let words = encode(instrs)?;
    let mut bytes = Vec::with_capacity(words.len() * 8);
    for w in words {
        bytes
            .write_u64::<LittleEndian>(w)
            .expect("writing to a Vec cannot fail");
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(instr: Instr) {
        let word = pack_instr(&instr).unwrap();
        let back = unpack_instr(word).unwrap();
        assert_eq!(back, instr, "word {word:016x}");
    }

    #[test]
    fn alu_round_trips() {
        round_trip(Instr::alu(
            Reg::A(3),
            Operand::Reg(Reg::A(1)),
            AluOp::Add,
            Operand::Reg(Reg::A(2)),
        ));
        round_trip(Instr::alu(
            Reg::A(7),
            Operand::Reg(Reg::A(1)),
            AluOp::Shl,
            Operand::Imm(SmallImm::new(2).unwrap()),
        ));
        round_trip(Instr::alu(
            Reg::Acc(1),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MMul24,
            Operand::Reg(Reg::Acc(2)),
        ));
        round_trip(Instr::Alu {
            set_flags: true,
            cond: AssignCond::Always,
            dest: Reg::None,
            src_a: Operand::Reg(Reg::A(4)),
            op: AluOp::Sub,
            src_b: Operand::Imm(SmallImm::new(8).unwrap()),
        });
    }

    #[test]
    fn signals_round_trip() {
        round_trip(Instr::mov(Reg::A(9), Reg::Special(Special::Uniform)));
        round_trip(Instr::Recv { dest: Reg::A(31) });
        round_trip(Instr::Tmu0ToAcc4);
        round_trip(Instr::End);
        round_trip(Instr::NoOp);
        round_trip(Instr::li(Reg::A(5), -77));
        round_trip(Instr::Br {
            cond: BranchCond::All(Flag::Zc),
            offset: -12,
        });
        round_trip(Instr::SInc(2));
        round_trip(Instr::SDec(15));
        round_trip(Instr::mov(Reg::A(0), Reg::Special(Special::ElemNum)));
        round_trip(Instr::mov(Reg::A(1), Reg::Special(Special::QpuNum)));
    }

    #[test]
    fn store_and_sfu_targets_encode() {
        round_trip(Instr::mov(Reg::Special(Special::TmuD), Reg::A(3)));
        round_trip(Instr::mov(Reg::Special(Special::TmuA), Reg::A(4)));
        round_trip(Instr::mov(Reg::Special(Special::SfuRecip), Reg::A(5)));
    }

    #[test]
    fn file_b_ids_fold_into_the_single_file() {
        let word = pack_instr(&Instr::mov(Reg::A(1), Reg::B(3))).unwrap();
        let back = unpack_instr(word).unwrap();
        assert_eq!(back, Instr::mov(Reg::A(1), Reg::A(REGB_OFFSET + 3)));
    }

    #[test]
    fn dma_and_irq_are_rejected() {
        assert!(pack_instr(&Instr::Irq).is_err());
        assert!(pack_instr(&Instr::DmaLoadWait).is_err());
        assert!(pack_instr(&Instr::mov(Reg::Special(Special::VpmWrite), Reg::A(0))).is_err());
    }

    #[test]
    fn halt_sequence_closes_the_stream() {
        let code = encode(&[Instr::NoOp, Instr::End]).unwrap();
        assert_eq!(code.len(), 4);
        assert_eq!(code[1], pack_instr(&Instr::End).unwrap());
        assert_eq!(code[2], 0);
        assert_eq!(code[3], 0);
    }
}
