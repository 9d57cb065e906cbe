//! Source-language interpreter.
//!
//! Evaluates the statement tree directly on 16-lane vectors, with a lane
//! mask for `Where` regions. This is the gold standard the target emulator
//! is differentially tested against, so every arithmetic detail routes
//! through the shared [`vector`] helpers: comparisons go through the
//! subtract-unit flag rules and integer multiplies are 24-bit, exactly as
//! the lowered code behaves.

use log::warn;

use super::build::{self, Program};
use super::expr::{BExpr, BExprId, BaseType, CQuant, CmpId, Expr, ExprId, OpId, Var};
use super::stmt::{Stmt, StmtId};
use crate::driver::heap;
use crate::driver::BufferObject;
use crate::error::{QpuError, Result};
use crate::vector::{self, Vec16, NUM_LANES};

type Mask = [bool; NUM_LANES];

const FULL_MASK: Mask = [true; NUM_LANES];

/// Iteration guard against non-terminating source loops.
const MAX_LOOP_STEPS: u64 = 5_000_000;

/// Run `num_qpus` interpreter instances over the program, sequentially,
/// and return the PRINT byte stream.
pub fn interpret(num_qpus: u32, prog: &Program, uniforms: &[i32]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    for id in 0..num_qpus {
        let mut u = uniforms.to_vec();
        if !u.is_empty() {
            u[0] = id as i32;
        }
        let mut interp = Interp {
            prog,
            qpu_id: id,
            vars: vec![[0; NUM_LANES]; prog.num_vars as usize],
            uniforms: u,
            next_uniform: 0,
            gather_queue: Vec::new(),
            loop_steps: 0,
            output: &mut output,
        };
        interp.stmt(prog.body, FULL_MASK)?;
    }
    Ok(output)
}

struct Interp<'a> {
    prog: &'a Program,
    qpu_id: u32,
    vars: Vec<Vec16>,
    uniforms: Vec<i32>,
    next_uniform: usize,
    gather_queue: Vec<Vec16>,
    loop_steps: u64,
    output: &'a mut Vec<u8>,
}

impl<'a> Interp<'a> {
    fn expr(&mut self, e: ExprId) -> Result<Vec16> {
        match self.prog.expr(e).clone() {
            Expr::IntLit(i) => Ok(vector::splat(i)),
            Expr::FloatLit(f) => Ok(vector::splat(f.to_bits() as i32)),
            Expr::Var(v) => match v {
                Var::Standard(id) => Ok(self.vars[id as usize]),
                Var::Uniform => {
                    let index = self.next_uniform;
                    let value = *self
                        .uniforms
                        .get(index)
                        .ok_or_else(|| QpuError::dispatch("uniform FIFO underrun"))?;
                    self.next_uniform += 1;
                    // Pointer parameters land pre-offset per lane and per
                    // QPU, as the target init block arranges on the device.
                    let is_ptr = index
                        .checked_sub(2)
                        .and_then(|p| self.prog.param_kinds.get(p))
                        .is_some_and(|k| *k == build::ParamKind::Ptr);
                    if is_ptr {
                        let base = value.wrapping_add(4 * 16 * self.qpu_id as i32);
                        let mut v = [0; NUM_LANES];
                        for (l, lane) in v.iter_mut().enumerate() {
                            *lane = base.wrapping_add(4 * l as i32);
                        }
                        return Ok(v);
                    }
                    Ok(vector::splat(value))
                }
                Var::ElemNum => Ok(vector::lane_index()),
                Var::QpuNum => Ok(vector::splat((self.qpu_id << 2) as i32)),
                Var::VpmRead | Var::VpmWrite => Err(QpuError::dispatch(
                    "the VPM is not modelled by the source interpreter",
                )),
            },
            Expr::Deref(p) => {
                let addrs = self.expr(p)?;
                let mut out = [0; NUM_LANES];
                for l in 0..NUM_LANES {
                    out[l] = heap().read_word(addrs[l] as u32);
                }
                Ok(out)
            }
            Expr::ApplyUnary { op, rhs } => {
                let a = self.expr(rhs)?;
                Ok(match op.id {
                    OpId::BNot => vector::map(a, |x| !x),
                    OpId::ItoF => vector::map(a, vector::itof),
                    OpId::FtoI => vector::map(a, vector::ftoi),
                    OpId::Recip => vector::map(a, vector::sfu_recip),
                    OpId::RecipSqrt => vector::map(a, vector::sfu_recip_sqrt),
                    OpId::Exp => vector::map(a, vector::sfu_exp),
                    OpId::Log => vector::map(a, vector::sfu_log),
                    other => {
                        return Err(QpuError::lowering(format!(
                            "operator {other:?} is not unary"
                        )))
                    }
                })
            }
            Expr::Apply { lhs, op, rhs } => {
                let a = self.expr(lhs)?;
                let b = self.expr(rhs)?;
                let int = op.ty == BaseType::Int;
                Ok(match op.id {
                    OpId::Add if int => vector::map2(a, b, vector::add_i),
                    OpId::Add => vector::map2(a, b, vector::fadd),
                    OpId::Sub if int => vector::map2(a, b, vector::sub_i),
                    OpId::Sub => vector::map2(a, b, vector::fsub),
                    OpId::Mul if int => vector::map2(a, b, vector::mul24),
                    OpId::Mul => vector::map2(a, b, vector::fmul),
                    OpId::Min if int => vector::map2(a, b, i32::min),
                    OpId::Min => vector::map2(a, b, vector::fmin),
                    OpId::Max if int => vector::map2(a, b, i32::max),
                    OpId::Max => vector::map2(a, b, vector::fmax),
                    OpId::Shl => vector::map2(a, b, vector::shl),
                    OpId::Shr => vector::map2(a, b, vector::shr_arith),
                    OpId::Ushr => vector::map2(a, b, vector::shr_logical),
                    OpId::Ror => vector::map2(a, b, vector::ror),
                    OpId::BAnd => vector::map2(a, b, |x, y| x & y),
                    OpId::BOr => vector::map2(a, b, |x, y| x | y),
                    OpId::BXor => vector::map2(a, b, |x, y| x ^ y),
                    OpId::Rotate => vector::rotate_lanes(a, b[0]),
                    other => {
                        return Err(QpuError::lowering(format!(
                            "operator {other:?} is not binary"
                        )))
                    }
                })
            }
        }
    }

    fn bexpr(&mut self, b: BExprId) -> Result<Mask> {
        match self.prog.bexpr(b).clone() {
            BExpr::Not(x) => {
                let m = self.bexpr(x)?;
                Ok(std::array::from_fn(|l| !m[l]))
            }
            BExpr::And(x, y) => {
                let mx = self.bexpr(x)?;
                let my = self.bexpr(y)?;
                Ok(std::array::from_fn(|l| mx[l] && my[l]))
            }
            BExpr::Or(x, y) => {
                let mx = self.bexpr(x)?;
                let my = self.bexpr(y)?;
                Ok(std::array::from_fn(|l| mx[l] || my[l]))
            }
            BExpr::Cmp { lhs, op, rhs } => {
                // GT and LE evaluate as their swapped counterparts, exactly
                // as the lowerer emits them.
                let (a, b, id) = match op.id {
                    CmpId::Gt => (rhs, lhs, CmpId::Lt),
                    CmpId::Le => (rhs, lhs, CmpId::Ge),
                    other => (lhs, rhs, other),
                };
                let va = self.expr(a)?;
                let vb = self.expr(b)?;
                let mut m = [false; NUM_LANES];
                for l in 0..NUM_LANES {
                    let (z, n) = match op.ty {
                        BaseType::Int => vector::cmp_flags_i(va[l], vb[l]),
                        BaseType::Float => vector::cmp_flags_f(va[l], vb[l]),
                    };
                    m[l] = match id {
                        CmpId::Eq => z,
                        CmpId::Neq => !z,
                        CmpId::Lt => n,
                        CmpId::Ge => !n,
                        CmpId::Gt | CmpId::Le => unreachable!("swapped above"),
                    };
                }
                Ok(m)
            }
        }
    }

    fn assign_var(&mut self, id: u32, value: Vec16, mask: Mask) {
        let slot = &mut self.vars[id as usize];
        for l in 0..NUM_LANES {
            if mask[l] {
                slot[l] = value[l];
            }
        }
    }

    fn stmt(&mut self, s: StmtId, mask: Mask) -> Result<()> {
        match self.prog.stmt(s).clone() {
            Stmt::Skip => {}
            Stmt::Seq { s0, s1 } => {
                self.stmt(s0, mask)?;
                self.stmt(s1, mask)?;
            }
            Stmt::Assign { lhs, rhs } => match self.prog.expr(lhs).clone() {
                Expr::Var(Var::Standard(id)) => {
                    let value = self.expr(rhs)?;
                    self.assign_var(id, value, mask);
                }
                // Stores are whole-vector operations; a surrounding Where
                // does not mask them (the memory units have no lane enables).
                Expr::Deref(p) => {
                    let addrs = self.expr(p)?;
                    let data = self.expr(rhs)?;
                    for l in 0..NUM_LANES {
                        heap().write_word(addrs[l] as u32, data[l]);
                    }
                }
                Expr::Var(Var::VpmWrite) => {
                    return Err(QpuError::dispatch(
                        "the VPM is not modelled by the source interpreter",
                    ))
                }
                _ => return Err(QpuError::lowering("invalid assignment target")),
            },
            Stmt::Where {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let m = self.bexpr(cond)?;
                let then_mask = std::array::from_fn(|l| mask[l] && m[l]);
                self.stmt(then_stmt, then_mask)?;
                if let Some(e) = else_stmt {
                    let else_mask = std::array::from_fn(|l| mask[l] && !m[l]);
                    self.stmt(e, else_mask)?;
                }
            }
            Stmt::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let m = self.bexpr(cond.bexpr)?;
                let taken = match cond.quant {
                    CQuant::Any => m.iter().any(|&x| x),
                    CQuant::All => m.iter().all(|&x| x),
                };
                if taken {
                    self.stmt(then_stmt, mask)?;
                } else if let Some(e) = else_stmt {
                    self.stmt(e, mask)?;
                }
            }
            Stmt::While { cond, body } => loop {
                let m = self.bexpr(cond.bexpr)?;
                let taken = match cond.quant {
                    CQuant::Any => m.iter().any(|&x| x),
                    CQuant::All => m.iter().all(|&x| x),
                };
                if !taken {
                    break;
                }
                self.bump_loop_guard()?;
                self.stmt(body, mask)?;
            },
            Stmt::For { cond, inc, body } => loop {
                let m = self.bexpr(cond.bexpr)?;
                let taken = match cond.quant {
                    CQuant::Any => m.iter().any(|&x| x),
                    CQuant::All => m.iter().all(|&x| x),
                };
                if !taken {
                    break;
                }
                self.bump_loop_guard()?;
                self.stmt(body, mask)?;
                self.stmt(inc, mask)?;
            },
            Stmt::PrintStr(text) => vector::emit_str(self.output, &text),
            Stmt::PrintInt(e) => {
                let v = self.expr(e)?;
                vector::emit_int_vec(self.output, &v);
            }
            Stmt::PrintFloat(e) => {
                let v = self.expr(e)?;
                vector::emit_float_vec(self.output, &v);
            }
            Stmt::StoreRequest { data, addr } => {
                let addrs = self.expr(addr)?;
                let values = self.expr(data)?;
                for l in 0..NUM_LANES {
                    heap().write_word(addrs[l] as u32, values[l]);
                }
            }
            Stmt::Gather { addr } => {
                let addrs = self.expr(addr)?;
                self.gather_queue.push(addrs);
            }
            Stmt::LoadReceive { dest } => {
                if self.gather_queue.is_empty() {
                    return Err(QpuError::dispatch("receive without outstanding gather"));
                }
                let addrs = self.gather_queue.remove(0);
                let mut value = [0; NUM_LANES];
                for l in 0..NUM_LANES {
                    value[l] = heap().read_word(addrs[l] as u32);
                }
                match self.prog.expr(dest) {
                    Expr::Var(Var::Standard(id)) => {
                        let id = *id;
                        self.assign_var(id, value, FULL_MASK);
                    }
                    _ => return Err(QpuError::lowering("receive target must be a variable")),
                }
            }
            // Host signalling and semaphores have no observable effect on a
            // single sequential interpreter instance.
            Stmt::SemaInc(_) | Stmt::SemaDec(_) | Stmt::SendIrqToHost => {}
            Stmt::SetReadStride(_)
            | Stmt::SetWriteStride(_)
            | Stmt::SetupVpmRead { .. }
            | Stmt::SetupVpmWrite { .. }
            | Stmt::SetupDmaRead { .. }
            | Stmt::SetupDmaWrite { .. }
            | Stmt::DmaStartRead(_)
            | Stmt::DmaStartWrite(_)
            | Stmt::DmaReadWait
            | Stmt::DmaWriteWait => {
                warn!("raw VPM/DMA statement ignored by the source interpreter");
            }
        }
        Ok(())
    }

    fn bump_loop_guard(&mut self) -> Result<()> {
        self.loop_steps += 1;
        if self.loop_steps > MAX_LOOP_STEPS {
            return Err(QpuError::dispatch("interpretation step limit exceeded"));
        }
        Ok(())
    }
}
