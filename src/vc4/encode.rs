//! vc4 instruction encoding.
//!
//! Every instruction packs into one 64-bit word, emitted low half first.
//! The layout follows the VideoCore IV reference: signal bits in the top
//! nibble of the high word, write addresses and conditions below them, and
//! the read addresses plus the four input mux selectors in the low word.
//!
//! [`decode_instr`] is an independent inverse used by the round-trip tests;
//! it reconstructs the structural instruction for every word the encoder
//! can produce (load-immediates come back with raw integer bits).

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{QpuError, Result};
use crate::target::instr::{
    AluOp, AssignCond, BranchCond, Flag, Imm, Instr, Operand, Reg, SmallImm, Special,
};
use crate::target::pretty::mnemonic;

use super::regalloc::RegFile;

const NOP_ADDR: u32 = 39;

fn encode_add_op(op: AluOp) -> std::result::Result<u32, String> {
    Ok(match op {
        AluOp::Nop => 0,
        AluOp::FAdd => 1,
        AluOp::FSub => 2,
        AluOp::FMin => 3,
        AluOp::FMax => 4,
        AluOp::FMinAbs => 5,
        AluOp::FMaxAbs => 6,
        AluOp::FtoI => 7,
        AluOp::ItoF => 8,
        AluOp::Add => 12,
        AluOp::Sub => 13,
        AluOp::Shr => 14,
        AluOp::Asr => 15,
        AluOp::Ror => 16,
        AluOp::Shl => 17,
        AluOp::Min => 18,
        AluOp::Max => 19,
        AluOp::BAnd => 20,
        AluOp::BOr => 21,
        AluOp::BXor => 22,
        AluOp::BNot => 23,
        AluOp::Clz => 24,
        AluOp::V8Adds => 30,
        AluOp::V8Subs => 31,
        other => return Err(format!("{other:?} is not an add-unit op")),
    })
}

fn decode_add_op(bits: u32) -> Option<AluOp> {
    Some(match bits {
        1 => AluOp::FAdd,
        2 => AluOp::FSub,
        3 => AluOp::FMin,
        4 => AluOp::FMax,
        5 => AluOp::FMinAbs,
        6 => AluOp::FMaxAbs,
        7 => AluOp::FtoI,
        8 => AluOp::ItoF,
        12 => AluOp::Add,
        13 => AluOp::Sub,
        14 => AluOp::Shr,
        15 => AluOp::Asr,
        16 => AluOp::Ror,
        17 => AluOp::Shl,
        18 => AluOp::Min,
        19 => AluOp::Max,
        20 => AluOp::BAnd,
        21 => AluOp::BOr,
        22 => AluOp::BXor,
        23 => AluOp::BNot,
        24 => AluOp::Clz,
        30 => AluOp::V8Adds,
        31 => AluOp::V8Subs,
        _ => return None,
    })
}

fn encode_mul_op(op: AluOp) -> std::result::Result<u32, String> {
    Ok(match op {
        AluOp::Nop => 0,
        AluOp::MFMul => 1,
        AluOp::MMul24 => 2,
        AluOp::MV8Mul => 3,
        AluOp::MV8Min => 4,
        AluOp::MV8Max => 5,
        AluOp::MV8Adds => 6,
        AluOp::MV8Subs => 7,
        other => return Err(format!("{other:?} is not a mul-unit op")),
    })
}

fn decode_mul_op(bits: u32) -> Option<AluOp> {
    Some(match bits {
        1 => AluOp::MFMul,
        2 => AluOp::MMul24,
        3 => AluOp::MV8Mul,
        4 => AluOp::MV8Min,
        5 => AluOp::MV8Max,
        6 => AluOp::MV8Adds,
        7 => AluOp::MV8Subs,
        _ => return None,
    })
}

fn encode_assign_cond(cond: AssignCond) -> u32 {
    match cond {
        AssignCond::Never => 0,
        AssignCond::Always => 1,
        AssignCond::Flag(Flag::Zs) => 2,
        AssignCond::Flag(Flag::Zc) => 3,
        AssignCond::Flag(Flag::Ns) => 4,
        AssignCond::Flag(Flag::Nc) => 5,
    }
}

fn decode_assign_cond(bits: u32) -> Option<AssignCond> {
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

fn encode_branch_cond(cond: BranchCond) -> std::result::Result<u32, String> {
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

fn decode_branch_cond(bits: u32) -> Option<BranchCond> {
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

/// Regfile and index for a register write.
fn encode_dest_reg(reg: Reg) -> std::result::Result<(RegFile, u32), String> {
    Ok(match reg {
        Reg::A(id) if id < 32 => (RegFile::A, id),
        Reg::B(id) if id < 32 => (RegFile::B, id),
        Reg::A(id) | Reg::B(id) => return Err(format!("regfile index {id} out of range")),
        // r5 is only writable through file B; the others go through A.
        Reg::Acc(n) if n <= 5 => (
            if n == 5 { RegFile::B } else { RegFile::A },
            32 + n as u32,
        ),
        Reg::Acc(n) => return Err(format!("accumulator r{n} out of range")),
        Reg::None => (RegFile::A, NOP_ADDR),
        Reg::Special(s) => match s {
            Special::RdSetup => (RegFile::A, 49),
            Special::WrSetup => (RegFile::B, 49),
            Special::DmaLdAddr => (RegFile::A, 50),
            Special::DmaStAddr => (RegFile::B, 50),
            Special::VpmWrite => (RegFile::A, 48),
            Special::HostInt => (RegFile::A, 38),
            Special::Tmu0S => (RegFile::A, 56),
            Special::SfuRecip => (RegFile::A, 52),
            Special::SfuRecipSqrt => (RegFile::A, 53),
            Special::SfuExp => (RegFile::A, 54),
            Special::SfuLog => (RegFile::A, 55),
            other => return Err(format!("{other:?} is not writable on vc4")),
        },
        Reg::TmpA(_) | Reg::TmpB(_) => {
            return Err("renaming temporary leaked into the encoder".to_string())
        }
    })
}

fn decode_dest_reg(file: RegFile, index: u32) -> Option<Reg> {
    Some(match (file, index) {
        (RegFile::A, id) if id < 32 => Reg::A(id),
        (RegFile::B, id) if id < 32 => Reg::B(id),
        (RegFile::A, 32..=36) => Reg::Acc((index - 32) as u8),
        (RegFile::B, 37) => Reg::Acc(5),
        (_, 39) => Reg::None,
        (RegFile::A, 49) => Reg::Special(Special::RdSetup),
        (RegFile::B, 49) => Reg::Special(Special::WrSetup),
        (RegFile::A, 50) => Reg::Special(Special::DmaLdAddr),
        (RegFile::B, 50) => Reg::Special(Special::DmaStAddr),
        (RegFile::A, 48) => Reg::Special(Special::VpmWrite),
        (RegFile::A, 38) => Reg::Special(Special::HostInt),
        (RegFile::A, 56) => Reg::Special(Special::Tmu0S),
        (RegFile::A, 52) => Reg::Special(Special::SfuRecip),
        (RegFile::A, 53) => Reg::Special(Special::SfuRecipSqrt),
        (RegFile::A, 54) => Reg::Special(Special::SfuExp),
        (RegFile::A, 55) => Reg::Special(Special::SfuLog),
        _ => return None,
    })
}

/// Regfile index and input-mux value for a register read through `file`.
fn encode_src_reg(reg: Reg, file: RegFile) -> std::result::Result<(u32, u32), String> {
    let either_mux = if file == RegFile::A { 6 } else { 7 };
    Ok(match reg {
        Reg::A(id) if id < 32 && file == RegFile::A => (id, 6),
        Reg::B(id) if id < 32 && file == RegFile::B => (id, 7),
        Reg::A(_) | Reg::B(_) => {
            return Err(format!("{reg:?} not readable through file {file:?}"))
        }
        // r5 has no read mux; rotation reads it implicitly.
        Reg::Acc(n) if n <= 4 => (0, n as u32),
        Reg::Acc(n) => return Err(format!("accumulator r{n} not readable")),
        Reg::None => (NOP_ADDR, either_mux),
        Reg::Special(s) => match (s, file) {
            (Special::Uniform, _) => (32, either_mux),
            (Special::ElemNum, RegFile::A) => (38, 6),
            (Special::QpuNum, RegFile::B) => (38, 7),
            (Special::VpmRead, _) => (48, either_mux),
            (Special::DmaLdWait, RegFile::A) => (50, 6),
            (Special::DmaStWait, RegFile::B) => (50, 7),
            (other, f) => return Err(format!("{other:?} not readable through file {f:?}")),
        },
        Reg::TmpA(_) | Reg::TmpB(_) => {
            return Err("renaming temporary leaked into the encoder".to_string())
        }
    })
}

fn decode_src_reg(file: RegFile, index: u32) -> Option<Reg> {
    Some(match (file, index) {
        (RegFile::A, id) if id < 32 => Reg::A(id),
        (RegFile::B, id) if id < 32 => Reg::B(id),
        (_, 32) => Reg::Special(Special::Uniform),
        (RegFile::A, 38) => Reg::Special(Special::ElemNum),
        (RegFile::B, 38) => Reg::Special(Special::QpuNum),
        (_, 39) => Reg::None,
        (_, 48) => Reg::Special(Special::VpmRead),
        (RegFile::A, 50) => Reg::Special(Special::DmaLdWait),
        (RegFile::B, 50) => Reg::Special(Special::DmaStWait),
        _ => return None,
    })
}

/// The file a register read is constrained to, if any.
fn reg_file_of(reg: Reg) -> Option<RegFile> {
    match reg {
        Reg::A(_) => Some(RegFile::A),
        Reg::B(_) => Some(RegFile::B),
        Reg::Special(Special::ElemNum) | Reg::Special(Special::DmaLdWait) => Some(RegFile::A),
        Reg::Special(Special::QpuNum) | Reg::Special(Special::DmaStWait) => Some(RegFile::B),
        _ => None,
    }
}

/// Expand the pseudo tags the encoder does not emit directly.
fn expand_pseudo(instr: &Instr) -> Instr {
    match instr {
        Instr::Irq => Instr::Li {
            set_flags: false,
            cond: AssignCond::Always,
            dest: Reg::Special(Special::HostInt),
            imm: Imm::Int(1),
        },
        Instr::DmaLoadWait | Instr::DmaStoreWait => {
            let src = if matches!(instr, Instr::DmaLoadWait) {
                Special::DmaLdWait
            } else {
                Special::DmaStWait
            };
            Instr::Alu {
                set_flags: false,
                cond: AssignCond::Never,
                dest: Reg::None,
                src_a: Operand::Reg(Reg::Special(src)),
                op: AluOp::BOr,
                src_b: Operand::Reg(Reg::Special(src)),
            }
        }
        other => other.clone(),
    }
}

fn encode_one(instr: &Instr) -> std::result::Result<(u32, u32), String> {
    let instr = expand_pseudo(instr);
    match instr {
        Instr::Li {
            set_flags,
            cond,
            dest,
            imm,
        } => {
            let cond = encode_assign_cond(cond) << 17;
            let (file, index) = encode_dest_reg(dest)?;
            let waddr_add = index << 6;
            let waddr_mul = NOP_ADDR;
            let ws = u32::from(file != RegFile::A) << 12;
            let sf = u32::from(set_flags) << 13;
            Ok((0xe000_0000 | cond | ws | sf | waddr_add | waddr_mul, imm.bits() as u32))
        }
        Instr::Br { cond, offset } => {
            let cond = encode_branch_cond(cond)? << 20;
            let rel = 1 << 19;
            let high = 0xf000_0000 | cond | rel | (NOP_ADDR << 6) | NOP_ADDR;
            Ok((high, (8 * offset) as u32))
        }
        Instr::Alu {
            set_flags,
            cond,
            dest,
            src_a,
            op,
            src_b,
        } => {
            let is_mul = op.is_mul();
            let has_imm = matches!(src_a, Operand::Imm(_)) || matches!(src_b, Operand::Imm(_));
            let is_rot = op == AluOp::MRotate;
            let sig = if has_imm || is_rot { 13u32 } else { 1 } << 28;
            let cond = encode_assign_cond(cond) << if is_mul { 14 } else { 17 };
            let (file, dest_index) = encode_dest_reg(dest)?;
            let (waddr_add, waddr_mul, ws) = if is_mul {
                (NOP_ADDR << 6, dest_index, u32::from(file != RegFile::B) << 12)
            } else {
                (dest_index << 6, NOP_ADDR, u32::from(file != RegFile::A) << 12)
            };
            let sf = u32::from(set_flags) << 13;
            let high = sig | cond | ws | sf | waddr_add | waddr_mul;

            if is_rot {
                if src_a != Operand::Reg(Reg::Acc(0)) {
                    return Err("rotation source must be r0".to_string());
                }
                let raddrb = match src_b {
                    Operand::Reg(Reg::Acc(5)) => 48,
                    Operand::Reg(other) => {
                        return Err(format!("rotation amount must be r5, got {other:?}"))
                    }
                    Operand::Imm(imm) => {
                        let n = imm.value();
                        if !(1..=15).contains(&n) {
                            return Err(format!("rotation amount {n} outside 1..=15"));
                        }
                        48 + n as u32
                    }
                };
                let mul_op = encode_mul_op(AluOp::MV8Min)? << 29;
                let low = mul_op | (raddrb << 12) | (NOP_ADDR << 18);
                return Ok((high, low));
            }

            let mul_op = if is_mul { encode_mul_op(op)? } else { 0 } << 29;
            let add_op = if is_mul { 0 } else { encode_add_op(op)? } << 24;

            let (raddra, raddrb, muxa, muxb);
            match (src_a, src_b) {
                (Operand::Reg(a), Operand::Reg(b)) => {
                    let a_file = reg_file_of(a);
                    let b_file = reg_file_of(b);
                    if a == b && a != Reg::None {
                        // One read port serves both operands.
                        if a_file == Some(RegFile::B) {
                            let (index, mux) = encode_src_reg(a, RegFile::B)?;
                            raddrb = index;
                            muxa = mux;
                            muxb = mux;
                            raddra = NOP_ADDR;
                        } else {
                            let (index, mux) = encode_src_reg(a, RegFile::A)?;
                            raddra = index;
                            muxa = mux;
                            muxb = mux;
                            raddrb = NOP_ADDR;
                        }
                    } else {
                        if a_file.is_some() && a_file == b_file {
                            return Err(format!(
                                "both operands read regfile {:?}",
                                a_file.unwrap()
                            ));
                        }
                        if a_file == Some(RegFile::A) || b_file == Some(RegFile::B) {
                            let (ia, ma) = encode_src_reg(a, RegFile::A)?;
                            let (ib, mb) = encode_src_reg(b, RegFile::B)?;
                            raddra = ia;
                            muxa = ma;
                            raddrb = ib;
                            muxb = mb;
                        } else {
                            let (ib, ma) = encode_src_reg(a, RegFile::B)?;
                            let (ia, mb) = encode_src_reg(b, RegFile::A)?;
                            raddrb = ib;
                            muxa = ma;
                            raddra = ia;
                            muxb = mb;
                        }
                    }
                }
                (Operand::Reg(a), Operand::Imm(imm)) => {
                    let (ia, ma) = encode_src_reg(a, RegFile::A)?;
                    raddra = ia;
                    muxa = ma;
                    raddrb = imm.encode();
                    muxb = 7;
                }
                (Operand::Imm(imm), Operand::Reg(b)) => {
                    let (ia, mb) = encode_src_reg(b, RegFile::A)?;
                    raddra = ia;
                    muxb = mb;
                    raddrb = imm.encode();
                    muxa = 7;
                }
                (Operand::Imm(_), Operand::Imm(_)) => {
                    return Err("both operands are small immediates".to_string())
                }
            }
            let low = mul_op
                | add_op
                | (raddra << 18)
                | (raddrb << 12)
                | (muxa << 9)
                | (muxb << 6)
                | (muxa << 3)
                | muxb;
            Ok((high, low))
        }
        Instr::End | Instr::Tmu0ToAcc4 => {
            let sig = if instr == Instr::End {
                0x3000_0000
            } else {
                0xa000_0000
            };
            let high = sig | (NOP_ADDR << 6) | NOP_ADDR;
            let low = (NOP_ADDR << 18) | (NOP_ADDR << 12);
            Ok((high, low))
        }
        Instr::SInc(id) | Instr::SDec(id) => {
            let high = 0xe800_0000 | (NOP_ADDR << 6) | NOP_ADDR;
            let inc_or_dec = u32::from(matches!(instr, Instr::SDec(_))) << 4;
            Ok((high, inc_or_dec | id as u32))
        }
        // No-ops and prints occupy a slot but do nothing on the device.
        Instr::NoOp | Instr::PrintStr(_) | Instr::PrintInt(_) | Instr::PrintFloat(_) => {
            Ok((0xe000_0000 | (NOP_ADDR << 6) | NOP_ADDR, 0))
        }
        Instr::Brl { .. } | Instr::Lab(_) | Instr::InitBegin | Instr::InitEnd => {
            Err("unresolved pseudo instruction".to_string())
        }
        Instr::Recv { .. } => Err("RECV is a v3d instruction".to_string()),
        Instr::Irq | Instr::DmaLoadWait | Instr::DmaStoreWait => unreachable!("expanded above"),
    }
}

/// Encode an instruction sequence as 32-bit words, low half first.
pub fn encode(instrs: &[Instr]) -> Result<Vec<u32>> {
    let mut code = Vec::with_capacity(instrs.len() * 2);
    for (index, instr) in instrs.iter().enumerate() {
        let (high, low) = encode_one(instr).map_err(|reason| QpuError::Encode {
            index,
            mnemonic: mnemonic(instr),
            reason,
        })?;
        code.push(low);
        code.push(high);
    }
    Ok(code)
}

/// Encode to the little-endian byte stream handed to the driver.
pub fn encode_to_bytes(instrs: &[Instr]) -> Result<Vec<u8>> {
    let words = encode(instrs)?;
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for w in words {
        bytes
            .write_u32::<LittleEndian>(w)
            .expect("writing to a Vec cannot fail");
    }
    Ok(bytes)
}

/// Single-instruction encoder, exposed for the round-trip law.
pub fn encode_instr(instr: &Instr) -> Result<(u32, u32)> {
    encode_one(instr).map_err(|reason| QpuError::Encode {
        index: 0,
        mnemonic: mnemonic(instr),
        reason,
    })
}

/// Independent decoder for words produced by [`encode_instr`].
pub fn decode_instr(high: u32, low: u32) -> Result<Instr> {
    decode_one(high, low).map_err(|reason| QpuError::Encode {
        index: 0,
        mnemonic: format!("{high:08x}:{low:08x}"),
        reason,
    })
}

fn decode_one(high: u32, low: u32) -> std::result::Result<Instr, String> {
    let sig = high >> 28;
    match sig {
        0xf => {
            let cond = decode_branch_cond((high >> 20) & 0xf).ok_or("bad branch cond")?;
            Ok(Instr::Br {
                cond,
                offset: (low as i32) / 8,
            })
        }
        0x3 => Ok(Instr::End),
        0xa => Ok(Instr::Tmu0ToAcc4),
        0xe => {
            if high & 0x0800_0000 != 0 {
                let id = (low & 0xf) as u8;
                return Ok(if low & 0x10 == 0 {
                    Instr::SInc(id)
                } else {
                    Instr::SDec(id)
                });
            }
            let cond = decode_assign_cond((high >> 17) & 0x7).ok_or("bad assign cond")?;
            let set_flags = high & (1 << 13) != 0;
            let file = if high & (1 << 12) == 0 {
                RegFile::A
            } else {
                RegFile::B
            };
            let dest = decode_dest_reg(file, (high >> 6) & 0x3f).ok_or("bad dest")?;
            if cond == AssignCond::Never && dest == Reg::None && low == 0 {
                return Ok(Instr::NoOp);
            }
            Ok(Instr::Li {
                set_flags,
                cond,
                dest,
                imm: Imm::Int(low as i32),
            })
        }
        0x1 | 0xd => {
            let mul_bits = (low >> 29) & 0x7;
            let add_bits = (low >> 24) & 0x1f;
            let raddra = (low >> 18) & 0x3f;
            let raddrb = (low >> 12) & 0x3f;

            // A rotation is a v8min on the mul unit with the rotate signal
            // range in raddr_b.
            if sig == 0xd && mul_bits == 4 && raddrb >= 48 {
                let ws = high & (1 << 12) != 0;
                let file = if ws { RegFile::A } else { RegFile::B };
                let dest = decode_dest_reg(file, high & 0x3f).ok_or("bad dest")?;
                let cond = decode_assign_cond((high >> 14) & 0x7).ok_or("bad cond")?;
                let src_b = if raddrb == 48 {
                    Operand::Reg(Reg::Acc(5))
                } else {
                    Operand::Imm(SmallImm::new((raddrb - 48) as i32).ok_or("bad rotate imm")?)
                };
                return Ok(Instr::Alu {
                    set_flags: high & (1 << 13) != 0,
                    cond,
                    dest,
                    src_a: Operand::Reg(Reg::Acc(0)),
                    op: AluOp::MRotate,
                    src_b,
                });
            }

            let is_mul = add_bits == 0 && mul_bits != 0;
            let op = if is_mul {
                decode_mul_op(mul_bits).ok_or("bad mul op")?
            } else {
                decode_add_op(add_bits).ok_or("bad add op")?
            };
            let cond_shift = if is_mul { 14 } else { 17 };
            let cond = decode_assign_cond((high >> cond_shift) & 0x7).ok_or("bad cond")?;
            let set_flags = high & (1 << 13) != 0;
            let ws = high & (1 << 12) != 0;
            let dest = if is_mul {
                let file = if ws { RegFile::A } else { RegFile::B };
                decode_dest_reg(file, high & 0x3f).ok_or("bad dest")?
            } else {
                let file = if ws { RegFile::B } else { RegFile::A };
                decode_dest_reg(file, (high >> 6) & 0x3f).ok_or("bad dest")?
            };
            let (muxa, muxb) = if is_mul {
                ((low >> 3) & 0x7, low & 0x7)
            } else {
                ((low >> 9) & 0x7, (low >> 6) & 0x7)
            };

            let src_from_mux = |mux: u32| -> std::result::Result<Reg, String> {
                Ok(match mux {
                    0..=4 => Reg::Acc(mux as u8),
                    5 => Reg::Acc(5),
                    6 => decode_src_reg(RegFile::A, raddra).ok_or("bad raddr_a")?,
                    7 => decode_src_reg(RegFile::B, raddrb).ok_or("bad raddr_b")?,
                    _ => unreachable!(),
                })
            };

            let (src_a, src_b);
            if sig == 0xd {
                // One operand is a small immediate in raddr_b.
                let imm = Operand::Imm(SmallImm::decode(raddrb).ok_or("bad small imm")?);
                if muxb == 7 {
                    src_a = Operand::Reg(src_from_mux(muxa)?);
                    src_b = imm;
                } else {
                    src_a = imm;
                    src_b = Operand::Reg(src_from_mux(muxb)?);
                }
            } else {
                src_a = Operand::Reg(src_from_mux(muxa)?);
                src_b = Operand::Reg(src_from_mux(muxb)?);
            }
            Ok(Instr::Alu {
                set_flags,
                cond,
                dest,
                src_a,
                op,
                src_b,
            })
        }
        other => Err(format!("unknown signal nibble {other:#x}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::instr::SmallImm;

    fn round_trip(instr: Instr) {
        let (high, low) = encode_instr(&instr).unwrap();
        let back = decode_instr(high, low).unwrap();
        assert_eq!(back, instr, "word {high:08x}:{low:08x}");
    }

    #[test]
    fn alu_round_trips() {
        round_trip(Instr::alu(
            Reg::A(3),
            Operand::Reg(Reg::A(1)),
            AluOp::Add,
            Operand::Reg(Reg::B(2)),
        ));
        round_trip(Instr::alu(
            Reg::B(7),
            Operand::Reg(Reg::A(1)),
            AluOp::Sub,
            Operand::Imm(SmallImm::new(-3).unwrap()),
        ));
        round_trip(Instr::mov(Reg::A(0), Reg::Special(Special::Uniform)));
        round_trip(Instr::alu(
            Reg::A(5),
            Operand::Reg(Reg::Special(Special::ElemNum)),
            AluOp::Add,
            Operand::Reg(Reg::B(1)),
        ));
        round_trip(Instr::alu(
            Reg::Acc(1),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MMul24,
            Operand::Reg(Reg::Acc(2)),
        ));
    }

    #[test]
    fn li_and_control_round_trip() {
        round_trip(Instr::li(Reg::A(9), 1234));
        round_trip(Instr::Li {
            set_flags: true,
            cond: AssignCond::Flag(Flag::Zc),
            dest: Reg::B(2),
            imm: Imm::Int(-1),
        });
        round_trip(Instr::Br {
            cond: BranchCond::Always,
            offset: -6,
        });
        round_trip(Instr::Br {
            cond: BranchCond::Any(Flag::Zc),
            offset: 10,
        });
        round_trip(Instr::End);
        round_trip(Instr::Tmu0ToAcc4);
        round_trip(Instr::SInc(3));
        round_trip(Instr::SDec(11));
        round_trip(Instr::NoOp);
    }

    #[test]
    fn rotation_round_trips_and_checks_bounds() {
        round_trip(Instr::alu(
            Reg::A(4),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MRotate,
            Operand::Imm(SmallImm::new(1).unwrap()),
        ));
        round_trip(Instr::alu(
            Reg::A(4),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MRotate,
            Operand::Reg(Reg::Acc(5)),
        ));
        // Amount 0 is rejected; the conjunction of the bounds holds.
        let bad = Instr::alu(
            Reg::A(4),
            Operand::Reg(Reg::Acc(0)),
            AluOp::MRotate,
            Operand::Imm(SmallImm::new(0).unwrap()),
        );
        assert!(encode_instr(&bad).is_err());
    }

    #[test]
    fn irq_expands_to_host_interrupt_li() {
        let (high, low) = encode_instr(&Instr::Irq).unwrap();
        let back = decode_instr(high, low).unwrap();
        assert_eq!(
            back,
            Instr::Li {
                set_flags: false,
                cond: AssignCond::Always,
                dest: Reg::Special(Special::HostInt),
                imm: Imm::Int(1),
            }
        );
    }

    #[test]
    fn same_file_reads_are_rejected() {
        let bad = Instr::alu(
            Reg::A(0),
            Operand::Reg(Reg::A(1)),
            AluOp::Add,
            Operand::Reg(Reg::A(2)),
        );
        assert!(encode_instr(&bad).is_err());
    }

    #[test]
    fn code_stream_is_low_half_first() {
        let code = encode(&[Instr::End]).unwrap();
        assert_eq!(code.len(), 2);
        let (high, low) = encode_instr(&Instr::End).unwrap();
        assert_eq!(code[0], low);
        assert_eq!(code[1], high);
    }
}
