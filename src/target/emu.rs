//! Target-IR emulator.
//!
//! Executes resolved target code (branches by offset, registers allocated)
//! on the 16-lane vector machine: two 64-entry regfiles, six accumulators,
//! per-lane Z/N flags, a uniform FIFO, a TMU request queue, the shared VPM
//! with its DMA engine, and sixteen semaphores. Branches take effect three
//! instructions after they execute, as on the hardware. QPUs step
//! round-robin; PRINT output goes to one shared stream.

use std::collections::VecDeque;

use log::{trace, warn};

use super::instr::{AluOp, AssignCond, BranchCond, Flag, Instr, Operand, Reg, Special};
use super::vpm::{parse_rd_setup, parse_wr_setup, RdSetup, WrSetup};
use crate::driver::heap;
use crate::driver::BufferObject;
use crate::error::{QpuError, Result};
use crate::vector::{self, Vec16, NUM_LANES};

const VPM_ROWS: usize = 64;
const REGFILE_SIZE: usize = 64;

/// Safety valve against runaway kernels (missed loop exits and the like).
const MAX_STEPS: u64 = 50_000_000;

struct VpmReadState {
    addr: i32,
    stride: i32,
}

struct VpmWriteState {
    addr: i32,
    stride: i32,
}

struct Qpu {
    id: u32,
    regs_a: Vec<Vec16>,
    regs_b: Vec<Vec16>,
    acc: [Vec16; 6],
    flag_z: [bool; NUM_LANES],
    flag_n: [bool; NUM_LANES],
    pc: usize,
    /// Pending branch target and remaining delay slots.
    pending: Option<(usize, u8)>,
    uniforms: Vec<i32>,
    next_uniform: usize,
    tmu_queue: VecDeque<Vec16>,
    tmu_store_data: Vec16,
    vpm_read: Option<VpmReadState>,
    vpm_write: Option<VpmWriteState>,
    dma_read: Option<RdSetup>,
    dma_write: Option<WrSetup>,
    read_pitch: i32,
    write_pitch: i32,
    done: bool,
}

impl Qpu {
    fn new(id: u32, uniforms: Vec<i32>) -> Qpu {
        Qpu {
            id,
            regs_a: vec![[0; NUM_LANES]; REGFILE_SIZE],
            regs_b: vec![[0; NUM_LANES]; REGFILE_SIZE],
            acc: [[0; NUM_LANES]; 6],
            flag_z: [false; NUM_LANES],
            flag_n: [false; NUM_LANES],
            pc: 0,
            pending: None,
            uniforms,
            next_uniform: 0,
            tmu_queue: VecDeque::new(),
            tmu_store_data: [0; NUM_LANES],
            vpm_read: None,
            vpm_write: None,
            dma_read: None,
            dma_write: None,
            read_pitch: 0,
            write_pitch: 0,
            done: false,
        }
    }

    fn cond_mask(&self, cond: AssignCond) -> [bool; NUM_LANES] {
        let mut mask = [false; NUM_LANES];
        for l in 0..NUM_LANES {
            mask[l] = match cond {
                AssignCond::Never => false,
                AssignCond::Always => true,
                AssignCond::Flag(Flag::Zs) => self.flag_z[l],
                AssignCond::Flag(Flag::Zc) => !self.flag_z[l],
                AssignCond::Flag(Flag::Ns) => self.flag_n[l],
                AssignCond::Flag(Flag::Nc) => !self.flag_n[l],
            };
        }
        mask
    }

    fn branch_taken(&self, cond: BranchCond) -> bool {
        let flag_lane = |f: Flag, l: usize| match f {
            Flag::Zs => self.flag_z[l],
            Flag::Zc => !self.flag_z[l],
            Flag::Ns => self.flag_n[l],
            Flag::Nc => !self.flag_n[l],
        };
        match cond {
            BranchCond::Never => false,
            BranchCond::Always => true,
            BranchCond::All(f) => (0..NUM_LANES).all(|l| flag_lane(f, l)),
            BranchCond::Any(f) => (0..NUM_LANES).any(|l| flag_lane(f, l)),
        }
    }

    fn set_flags(&mut self, result: &Vec16) {
        for l in 0..NUM_LANES {
            self.flag_z[l] = result[l] == 0;
            self.flag_n[l] = result[l] < 0;
        }
    }
}

/// One emulation run over a set of QPUs.
pub struct Emulator<'a> {
    instrs: &'a [Instr],
    qpus: Vec<Qpu>,
    vpm: Vec<Vec16>,
    semaphores: [u8; 16],
    output: Vec<u8>,
}

/// Run `num_qpus` QPUs over `instrs` and return the PRINT byte stream.
///
/// The uniform stream is copied per QPU with the leading placeholder word
/// rewritten to the QPU's index, mirroring what the dispatch path does.
pub fn emulate(num_qpus: u32, instrs: &[Instr], uniforms: &[i32]) -> Result<Vec<u8>> {
    let qpus = (0..num_qpus)
        .map(|id| {
            let mut u = uniforms.to_vec();
            if !u.is_empty() {
                u[0] = id as i32;
            }
            Qpu::new(id, u)
        })
        .collect();
    let mut emu = Emulator {
        instrs,
        qpus,
        vpm: vec![[0; NUM_LANES]; VPM_ROWS],
        semaphores: [0; 16],
        output: Vec::new(),
    };
    emu.run()?;
    Ok(emu.output)
}

enum StepResult {
    Progress,
    Blocked,
}

impl<'a> Emulator<'a> {
    fn run(&mut self) -> Result<()> {
        let mut steps: u64 = 0;
        loop {
            let mut all_done = true;
            let mut any_progress = false;
            for q in 0..self.qpus.len() {
                if self.qpus[q].done {
                    continue;
                }
                all_done = false;
                match self.step(q)? {
                    StepResult::Progress => any_progress = true,
                    StepResult::Blocked => {}
                }
                steps += 1;
                if steps > MAX_STEPS {
                    return Err(QpuError::dispatch("emulation step limit exceeded"));
                }
            }
            if all_done {
                return Ok(());
            }
            if !any_progress {
                return Err(QpuError::dispatch(
                    "all QPUs blocked on semaphores; kernel deadlocks",
                ));
            }
        }
    }

    fn step(&mut self, q: usize) -> Result<StepResult> {
        let pc = self.qpus[q].pc;
        let instr = self.instrs.get(pc).ok_or_else(|| {
            QpuError::dispatch(format!("program counter {pc} ran off the end"))
        })?;
        trace!("qpu{q} pc={pc} {:?}", instr);

        match instr.clone() {
            Instr::End => {
                self.qpus[q].done = true;
                return Ok(StepResult::Progress);
            }
            Instr::Li { set_flags, cond, dest, imm } => {
                let value = vector::splat(imm.bits());
                self.write_reg(q, dest, &value, cond)?;
                if set_flags {
                    self.qpus[q].set_flags(&value);
                }
            }
            Instr::Alu {
                set_flags,
                cond,
                dest,
                src_a,
                op,
                src_b,
            } => {
                let a = self.read_operand(q, &src_a)?;
                let b = self.read_operand(q, &src_b)?;
                let result = eval_alu(op, a, b);
                self.write_reg(q, dest, &result, cond)?;
                if set_flags {
                    self.qpus[q].set_flags(&result);
                }
            }
            Instr::Br { cond, offset } => {
                if self.qpus[q].branch_taken(cond) {
                    let target = pc as i32 + 4 + offset;
                    if target < 0 {
                        return Err(QpuError::dispatch("branch before program start"));
                    }
                    self.qpus[q].pending = Some((target as usize, 3));
                }
                self.qpus[q].pc += 1;
                return Ok(StepResult::Progress);
            }
            Instr::SInc(id) => {
                if self.semaphores[id as usize] == 15 {
                    return Ok(StepResult::Blocked);
                }
                self.semaphores[id as usize] += 1;
            }
            Instr::SDec(id) => {
                if self.semaphores[id as usize] == 0 {
                    return Ok(StepResult::Blocked);
                }
                self.semaphores[id as usize] -= 1;
            }
            Instr::Tmu0ToAcc4 => {
                let value = self.tmu_pop(q)?;
                self.qpus[q].acc[4] = value;
            }
            Instr::Recv { dest } => {
                let value = self.tmu_pop(q)?;
                self.write_reg(q, dest, &value, AssignCond::Always)?;
            }
            Instr::PrintStr(s) => vector::emit_str(&mut self.output, &s),
            Instr::PrintInt(reg) => {
                let v = self.read_reg(q, reg)?;
                vector::emit_int_vec(&mut self.output, &v);
            }
            Instr::PrintFloat(reg) => {
                let v = self.read_reg(q, reg)?;
                vector::emit_float_vec(&mut self.output, &v);
            }
            // DMA transfers complete synchronously here.
            Instr::DmaLoadWait | Instr::DmaStoreWait => {}
            Instr::Irq => {}
            Instr::NoOp | Instr::Lab(_) | Instr::InitBegin | Instr::InitEnd => {}
            Instr::Brl { .. } => {
                return Err(QpuError::dispatch("unresolved branch reached the emulator"))
            }
        }

        self.retire(q);
        Ok(StepResult::Progress)
    }

    /// Advance the pc and count down any pending branch.
    fn retire(&mut self, q: usize) {
        let qpu = &mut self.qpus[q];
        qpu.pc += 1;
        if let Some((target, ref mut left)) = qpu.pending {
            *left -= 1;
            if *left == 0 {
                qpu.pc = target;
                qpu.pending = None;
            }
        }
    }

    fn tmu_pop(&mut self, q: usize) -> Result<Vec16> {
        let addrs = self.qpus[q]
            .tmu_queue
            .pop_front()
            .ok_or_else(|| QpuError::dispatch("TMU receive without outstanding request"))?;
        let mut out = [0; NUM_LANES];
        for l in 0..NUM_LANES {
            out[l] = heap().read_word(addrs[l] as u32);
        }
        Ok(out)
    }

    fn read_operand(&mut self, q: usize, op: &Operand) -> Result<Vec16> {
        match op {
            Operand::Imm(imm) => Ok(vector::splat(imm.value())),
            Operand::Reg(r) => self.read_reg(q, *r),
        }
    }

    fn read_reg(&mut self, q: usize, reg: Reg) -> Result<Vec16> {
        let qpu = &mut self.qpus[q];
        match reg {
            Reg::A(id) => Ok(qpu.regs_a[id as usize % REGFILE_SIZE]),
            Reg::B(id) => Ok(qpu.regs_b[id as usize % REGFILE_SIZE]),
            Reg::Acc(n) => Ok(qpu.acc[n as usize]),
            Reg::None => Ok(vector::splat(0)),
            Reg::TmpA(_) | Reg::TmpB(_) => {
                Err(QpuError::dispatch("renaming temporary reached the emulator"))
            }
            Reg::Special(s) => match s {
                Special::Uniform => {
                    let i = qpu.next_uniform;
                    let value = *qpu.uniforms.get(i).ok_or_else(|| {
                        QpuError::dispatch("uniform FIFO underrun")
                    })?;
                    qpu.next_uniform += 1;
                    Ok(vector::splat(value))
                }
                Special::ElemNum => Ok(vector::lane_index()),
                // The thread index; four threads per physical QPU.
                Special::QpuNum => Ok(vector::splat((qpu.id << 2) as i32)),
                Special::VpmRead => {
                    let state = qpu
                        .vpm_read
                        .as_mut()
                        .ok_or_else(|| QpuError::dispatch("VPM read without setup"))?;
                    let row = state.addr as usize % VPM_ROWS;
                    state.addr += state.stride;
                    Ok(self.vpm[row])
                }
                Special::DmaLdWait | Special::DmaStWait => Ok(vector::splat(0)),
                other => Err(QpuError::dispatch(format!(
                    "special register {other:?} is not readable"
                ))),
            },
        }
    }

    fn write_reg(&mut self, q: usize, reg: Reg, value: &Vec16, cond: AssignCond) -> Result<()> {
        let mask = self.qpus[q].cond_mask(cond);
        let merge = |current: &mut Vec16| {
            for l in 0..NUM_LANES {
                if mask[l] {
                    current[l] = value[l];
                }
            }
        };
        match reg {
            Reg::A(id) => merge(&mut self.qpus[q].regs_a[id as usize % REGFILE_SIZE]),
            Reg::B(id) => merge(&mut self.qpus[q].regs_b[id as usize % REGFILE_SIZE]),
            Reg::Acc(4) => {
                // r4 is read-only from the ALU's point of view.
                warn!("write to r4 ignored");
            }
            Reg::Acc(n) => merge(&mut self.qpus[q].acc[n as usize]),
            Reg::None => {}
            Reg::TmpA(_) | Reg::TmpB(_) => {
                return Err(QpuError::dispatch("renaming temporary reached the emulator"))
            }
            Reg::Special(s) => return self.write_special(q, s, value),
        }
        Ok(())
    }

    fn write_special(&mut self, q: usize, s: Special, value: &Vec16) -> Result<()> {
        match s {
            Special::Tmu0S => self.qpus[q].tmu_queue.push_back(*value),
            Special::TmuD => self.qpus[q].tmu_store_data = *value,
            Special::TmuA => {
                let data = self.qpus[q].tmu_store_data;
                for l in 0..NUM_LANES {
                    heap().write_word(value[l] as u32, data[l]);
                }
            }
            Special::SfuRecip => self.qpus[q].acc[4] = vector::map(*value, vector::sfu_recip),
            Special::SfuRecipSqrt => {
                self.qpus[q].acc[4] = vector::map(*value, vector::sfu_recip_sqrt)
            }
            Special::SfuExp => self.qpus[q].acc[4] = vector::map(*value, vector::sfu_exp),
            Special::SfuLog => self.qpus[q].acc[4] = vector::map(*value, vector::sfu_log),
            Special::HostInt => {}
            Special::VpmWrite => {
                let state = self.qpus[q]
                    .vpm_write
                    .as_mut()
                    .ok_or_else(|| QpuError::dispatch("VPM write without setup"))?;
                let row = state.addr as usize % VPM_ROWS;
                state.addr += state.stride;
                self.vpm[row] = *value;
            }
            Special::RdSetup => {
                let word = value[0];
                match parse_rd_setup(word) {
                    RdSetup::Vpm { num_vecs: _, horizontal, stride, addr } => {
                        if !horizontal {
                            warn!("vertical VPM reads are not modelled; treating as horizontal");
                        }
                        self.qpus[q].vpm_read = Some(VpmReadState { addr, stride });
                    }
                    dma @ RdSetup::Dma { .. } => self.qpus[q].dma_read = Some(dma),
                    RdSetup::Pitch(p) => self.qpus[q].read_pitch = p,
                }
            }
            Special::WrSetup => {
                let word = value[0];
                match parse_wr_setup(word) {
                    WrSetup::Vpm { horizontal, stride, addr } => {
                        if !horizontal {
                            warn!("vertical VPM writes are not modelled; treating as horizontal");
                        }
                        self.qpus[q].vpm_write = Some(VpmWriteState { addr, stride });
                    }
                    dma @ WrSetup::Dma { .. } => self.qpus[q].dma_write = Some(dma),
                    WrSetup::Pitch(p) => self.qpus[q].write_pitch = p,
                }
            }
            Special::DmaLdAddr => {
                let Some(RdSetup::Dma {
                    num_rows,
                    row_len,
                    vpm_addr,
                    ..
                }) = self.qpus[q].dma_read
                else {
                    return Err(QpuError::dispatch("DMA load without setup"));
                };
                let pitch = self.qpus[q].read_pitch;
                let mut base = value[0];
                for r in 0..num_rows {
                    let row = (vpm_addr + r) as usize % VPM_ROWS;
                    for c in 0..row_len.min(NUM_LANES as i32) {
                        self.vpm[row][c as usize] = heap().read_word((base + 4 * c) as u32);
                    }
                    base += 4 * row_len + pitch;
                }
            }
            Special::DmaStAddr => {
                let Some(WrSetup::Dma {
                    num_rows,
                    row_len,
                    vpm_addr,
                    ..
                }) = self.qpus[q].dma_write
                else {
                    return Err(QpuError::dispatch("DMA store without setup"));
                };
                let pitch = self.qpus[q].write_pitch;
                let mut base = value[0];
                for r in 0..num_rows {
                    let row = (vpm_addr + r) as usize % VPM_ROWS;
                    for c in 0..row_len.min(NUM_LANES as i32) {
                        heap().write_word((base + 4 * c) as u32, self.vpm[row][c as usize]);
                    }
                    base += 4 * row_len + pitch;
                }
            }
            other => {
                return Err(QpuError::dispatch(format!(
                    "special register {other:?} is not writable"
                )))
            }
        }
        Ok(())
    }
}

fn eval_alu(op: AluOp, a: Vec16, b: Vec16) -> Vec16 {
    use vector::*;
    match op {
        AluOp::Nop => a,
        AluOp::Add => map2(a, b, add_i),
        AluOp::Sub => map2(a, b, sub_i),
        AluOp::Min => map2(a, b, i32::min),
        AluOp::Max => map2(a, b, i32::max),
        AluOp::Shl => map2(a, b, shl),
        AluOp::Shr => map2(a, b, shr_logical),
        AluOp::Asr => map2(a, b, shr_arith),
        AluOp::Ror => map2(a, b, ror),
        AluOp::BAnd => map2(a, b, |x, y| x & y),
        AluOp::BOr => map2(a, b, |x, y| x | y),
        AluOp::BXor => map2(a, b, |x, y| x ^ y),
        AluOp::BNot => map(a, |x| !x),
        AluOp::Clz => map(a, clz),
        AluOp::FAdd => map2(a, b, fadd),
        AluOp::FSub => map2(a, b, fsub),
        AluOp::FMin => map2(a, b, fmin),
        AluOp::FMax => map2(a, b, fmax),
        AluOp::FMinAbs => map2(a, b, fmin_abs),
        AluOp::FMaxAbs => map2(a, b, fmax_abs),
        AluOp::FtoI => map(a, ftoi),
        AluOp::ItoF => map(a, itof),
        AluOp::MFMul => map2(a, b, fmul),
        AluOp::MMul24 | AluOp::MV8Mul => map2(a, b, mul24),
        AluOp::MV8Min => map2(a, b, i32::min),
        AluOp::MV8Max => map2(a, b, i32::max),
        AluOp::V8Adds | AluOp::MV8Adds => map2(a, b, add_i),
        AluOp::V8Subs | AluOp::MV8Subs => map2(a, b, sub_i),
        AluOp::MRotate => rotate_lanes(a, b[0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::instr::{Imm, SmallImm};

    fn run(instrs: Vec<Instr>, uniforms: &[i32]) -> Vec<u8> {
        emulate(1, &instrs, uniforms).unwrap()
    }

    #[test]
    fn add_and_print() {
        let out = run(
            vec![
                Instr::li(Reg::A(0), 40),
                Instr::Alu {
                    set_flags: false,
                    cond: AssignCond::Always,
                    dest: Reg::A(1),
                    src_a: Operand::Reg(Reg::A(0)),
                    op: AluOp::Add,
                    src_b: Operand::Imm(SmallImm::new(2).unwrap()),
                },
                Instr::PrintInt(Reg::A(1)),
                Instr::End,
            ],
            &[],
        );
        assert!(String::from_utf8(out).unwrap().starts_with("<42,42,"));
    }

    #[test]
    fn branch_delay_is_three_instructions() {
        // The three instructions behind a taken branch still execute.
        let instrs = vec![
            Instr::li(Reg::A(0), 0),
            Instr::Br {
                cond: BranchCond::Always,
                offset: 0, // lands on index 5 = 1 + 4 + 0
            },
            Instr::li(Reg::A(0), 1), // delay slot, executes
            Instr::NoOp,
            Instr::NoOp,
            Instr::PrintInt(Reg::A(0)),
            Instr::End,
        ];
        let out = run(instrs, &[]);
        assert!(String::from_utf8(out).unwrap().starts_with("<1,"));
    }

    #[test]
    fn conditional_write_respects_flags() {
        let out = run(
            vec![
                // flags from ELEM_NUM - 8: N set for lanes 0..8
                Instr::Alu {
                    set_flags: true,
                    cond: AssignCond::Always,
                    dest: Reg::None,
                    src_a: Operand::Reg(Reg::Special(Special::ElemNum)),
                    op: AluOp::Sub,
                    src_b: Operand::Imm(SmallImm::new(8).unwrap()),
                },
                Instr::li(Reg::A(0), 0),
                Instr::Li {
                    set_flags: false,
                    cond: AssignCond::Flag(Flag::Ns),
                    dest: Reg::A(0),
                    imm: Imm::Int(7),
                },
                Instr::PrintInt(Reg::A(0)),
                Instr::End,
            ],
            &[],
        );
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, "<7,7,7,7,7,7,7,7,0,0,0,0,0,0,0,0>");
    }

    #[test]
    fn uniform_fifo_is_per_qpu_with_id_rewrite() {
        let instrs = vec![
            Instr::mov(Reg::A(0), Reg::Special(Special::Uniform)),
            Instr::PrintInt(Reg::A(0)),
            Instr::End,
        ];
        let out = emulate(2, &instrs, &[0, 2]).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("<0,0"));
        assert!(s.contains("<1,1"));
    }

    #[test]
    fn semaphore_blocks_until_signalled() {
        // QPU0 waits on sema 0; QPU1 increments it. Both must finish.
        let instrs = vec![
            Instr::mov(Reg::A(0), Reg::Special(Special::Uniform)),
            // flags: qpu id == 0 ?
            Instr::Alu {
                set_flags: true,
                cond: AssignCond::Always,
                dest: Reg::None,
                src_a: Operand::Reg(Reg::A(0)),
                op: AluOp::Sub,
                src_b: Operand::Imm(SmallImm::new(0).unwrap()),
            },
            Instr::Br {
                cond: BranchCond::All(Flag::Zc),
                offset: 1, // qpu1 jumps to the SInc at 2+4+1=7
            },
            Instr::NoOp,
            Instr::NoOp,
            Instr::NoOp,
            Instr::SDec(0),
            Instr::SInc(0),
            Instr::End,
        ];
        emulate(2, &instrs, &[0]).unwrap();
    }
}
