//! Lowering from the source statement tree to the target IR.
//!
//! The lowerer walks the statement tree and emits a linear instruction
//! sequence with labels and variable-tagged registers. A post pass inserts
//! the kernel init block (QPU id derivation and per-QPU pointer offsetting)
//! between the `INIT_BEGIN`/`INIT_END` markers placed after the leading
//! uniform loads. Branch resolution happens last, after register
//! allocation: three delay slots are padded behind every branch and label
//! references become instruction offsets.

use log::debug;

use super::instr::{
    AluOp, AssignCond, BranchCond, Flag, Imm, Instr, Label, Operand, Reg, RegId, SmallImm,
    Special, ACC0, ACC1, ACC4, ACC5,
};
use super::vpm;
use crate::error::{QpuError, Result};
use crate::source::build::{ParamKind, Program};
use crate::source::expr::{
    BExpr, BExprId, BaseType, CExpr, CQuant, CmpId, Expr, ExprId, Op, OpId, Var, RSV_NUM_QPUS,
    RSV_QPU_ID,
};
use crate::source::stmt::{Stmt, StmtId};
use crate::Target;

/// Result of lowering: label-form instructions plus the final variable
/// count (lowering introduces temporaries past the source count).
#[derive(Debug)]
pub struct LowerOutput {
    pub instrs: Vec<Instr>,
    pub num_vars: u32,
}

pub fn lower_program(prog: &Program, target: Target) -> Result<LowerOutput> {
    let mut ctx = Lower {
        prog,
        target,
        seq: Vec::new(),
        next_var: prog.num_vars,
        next_label: 0,
    };
    ctx.stmt(prog.body, None)?;

    // Kernel exit: signal the host on vc4, then halt.
    if target == Target::Vc4 {
        ctx.seq.push(Instr::Irq);
    }
    ctx.seq.push(Instr::End);

    ctx.place_init_markers();
    ctx.insert_init_code();

    debug!(
        "lowered {} statements to {} instructions ({} vars)",
        prog.stmts.len(),
        ctx.seq.len(),
        ctx.next_var
    );
    Ok(LowerOutput {
        instrs: ctx.seq,
        num_vars: ctx.next_var,
    })
}

/// Remove the init markers once the init block is in place.
pub fn strip_markers(instrs: &mut Vec<Instr>) {
    instrs.retain(|i| !matches!(i, Instr::InitBegin | Instr::InitEnd));
}

/// Pad three delay slots behind every branch; both the hardware and the
/// emulator execute them before the branch takes effect.
pub fn insert_delay_slots(instrs: &mut Vec<Instr>) {
    let mut out = Vec::with_capacity(instrs.len());
    for instr in instrs.drain(..) {
        let is_branch = matches!(instr, Instr::Brl { .. });
        out.push(instr);
        if is_branch {
            out.extend([Instr::NoOp, Instr::NoOp, Instr::NoOp]);
        }
    }
    *instrs = out;
}

/// Resolve label branches to offsets and retire label sites to no-ops.
///
/// The offset compensates for the four-instruction branch latency:
/// `offset = target - current - 4`.
pub fn resolve_branches(instrs: &mut [Instr]) -> Result<()> {
    let mut label_pos: std::collections::HashMap<Label, usize> = std::collections::HashMap::new();
    for (i, instr) in instrs.iter().enumerate() {
        if let Instr::Lab(l) = instr {
            label_pos.insert(*l, i);
        }
    }
    for i in 0..instrs.len() {
        if let Instr::Brl { cond, label } = instrs[i] {
            let target = *label_pos.get(&label).ok_or(QpuError::Cfg { label })?;
            instrs[i] = Instr::Br {
                cond,
                offset: target as i32 - i as i32 - 4,
            };
        }
    }
    for instr in instrs.iter_mut() {
        if matches!(instr, Instr::Lab(_)) {
            *instr = Instr::NoOp;
        }
    }
    Ok(())
}

struct Lower<'a> {
    prog: &'a Program,
    target: Target,
    seq: Vec<Instr>,
    next_var: RegId,
    next_label: Label,
}

impl<'a> Lower<'a> {
    fn fresh_var(&mut self) -> RegId {
        let v = self.next_var;
        self.next_var += 1;
        v
    }

    fn fresh_label(&mut self) -> Label {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    fn push(&mut self, instr: Instr) {
        self.seq.push(instr);
    }

    fn err(&self, reason: impl Into<String>) -> QpuError {
        QpuError::Lowering {
            reason: reason.into(),
        }
    }

    // -- masked emission ----------------------------------------------------

    /// Re-establish the flags for `mask` and return the matching condition.
    /// A mask variable holds -1 in active lanes, so "mask active" is ZC.
    fn apply_mask(&mut self, mask: Option<RegId>) -> AssignCond {
        match mask {
            None => AssignCond::Always,
            Some(m) => {
                self.push(Instr::Alu {
                    set_flags: true,
                    cond: AssignCond::Always,
                    dest: Reg::None,
                    src_a: Operand::Reg(Reg::A(m)),
                    op: AluOp::BOr,
                    src_b: Operand::Reg(Reg::A(m)),
                });
                AssignCond::Flag(Flag::Zc)
            }
        }
    }

    fn cond_li(&mut self, dest: Reg, imm: Imm, mask: Option<RegId>) {
        let cond = self.apply_mask(mask);
        self.push(Instr::Li {
            set_flags: false,
            cond,
            dest,
            imm,
        });
    }

    fn cond_mov(&mut self, dest: Reg, src: Reg, mask: Option<RegId>) {
        let cond = self.apply_mask(mask);
        self.push(Instr::mov_cond(cond, dest, src));
    }

    fn cond_alu(
        &mut self,
        dest: Reg,
        src_a: Operand,
        op: AluOp,
        src_b: Operand,
        mask: Option<RegId>,
    ) {
        let cond = self.apply_mask(mask);
        self.push(Instr::Alu {
            set_flags: false,
            cond,
            dest,
            src_a,
            op,
            src_b,
        });
    }

    // -- expressions --------------------------------------------------------

    fn src_var(&self, v: Var) -> Result<Reg> {
        Ok(match v {
            Var::Standard(id) => Reg::A(id),
            Var::Uniform => Reg::Special(Special::Uniform),
            Var::ElemNum => Reg::Special(Special::ElemNum),
            Var::QpuNum => Reg::Special(Special::QpuNum),
            Var::VpmRead => Reg::Special(Special::VpmRead),
            Var::VpmWrite => {
                return Err(self.err("VPM write port cannot be read"));
            }
        })
    }

    /// Lower `e` into an operand; integer literals in small-immediate range
    /// stay immediates, everything else lands in a register.
    fn expr_operand(&mut self, e: ExprId) -> Result<Operand> {
        match self.prog.expr(e) {
            Expr::IntLit(i) => {
                if let Some(imm) = SmallImm::new(*i) {
                    return Ok(Operand::Imm(imm));
                }
                let t = self.fresh_var();
                self.cond_li(Reg::A(t), Imm::Int(*i), None);
                Ok(Operand::Reg(Reg::A(t)))
            }
            Expr::Var(v) => {
                let v = *v;
                // v3d reads the element/thread index through dedicated ops,
                // so those sources cannot sit in an ALU operand slot.
                if self.target == Target::V3d
                    && matches!(v, Var::ElemNum | Var::QpuNum)
                {
                    let t = self.fresh_var();
                    let src = self.src_var(v)?;
                    self.cond_mov(Reg::A(t), src, None);
                    return Ok(Operand::Reg(Reg::A(t)));
                }
                Ok(Operand::Reg(self.src_var(v)?))
            }
            _ => {
                let t = self.fresh_var();
                self.var_assign(t, e, None)?;
                Ok(Operand::Reg(Reg::A(t)))
            }
        }
    }

    /// Lower `e` into a register, never an immediate.
    fn expr_reg(&mut self, e: ExprId) -> Result<Reg> {
        match self.expr_operand(e)? {
            Operand::Reg(r) => Ok(r),
            Operand::Imm(imm) => {
                let t = self.fresh_var();
                self.cond_li(Reg::A(t), Imm::Int(imm.value()), None);
                Ok(Reg::A(t))
            }
        }
    }

    /// Lower `e` into a variable id.
    fn expr_var(&mut self, e: ExprId) -> Result<RegId> {
        if let Expr::Var(Var::Standard(id)) = self.prog.expr(e) {
            return Ok(*id);
        }
        let t = self.fresh_var();
        self.var_assign(t, e, None)?;
        Ok(t)
    }

    /// Two operands for a binary ALU op; at most one may be an immediate.
    fn operand_pair(&mut self, a: ExprId, b: ExprId) -> Result<(Operand, Operand)> {
        let oa = self.expr_operand(a)?;
        let ob = self.expr_operand(b)?;
        if matches!(oa, Operand::Imm(_)) && matches!(ob, Operand::Imm(_)) {
            let Operand::Imm(imm) = oa else { unreachable!() };
            let t = self.fresh_var();
            self.cond_li(Reg::A(t), Imm::Int(imm.value()), None);
            return Ok((Operand::Reg(Reg::A(t)), ob));
        }
        Ok((oa, ob))
    }

    fn map_binary_op(&self, op: Op) -> Result<AluOp> {
        use BaseType::*;
        Ok(match (op.id, op.ty) {
            (OpId::Add, Int) => AluOp::Add,
            (OpId::Add, Float) => AluOp::FAdd,
            (OpId::Sub, Int) => AluOp::Sub,
            (OpId::Sub, Float) => AluOp::FSub,
            (OpId::Mul, Int) => AluOp::MMul24,
            (OpId::Mul, Float) => AluOp::MFMul,
            (OpId::Min, Int) => AluOp::Min,
            (OpId::Min, Float) => AluOp::FMin,
            (OpId::Max, Int) => AluOp::Max,
            (OpId::Max, Float) => AluOp::FMax,
            (OpId::Shl, _) => AluOp::Shl,
            (OpId::Shr, _) => AluOp::Asr,
            (OpId::Ushr, _) => AluOp::Shr,
            (OpId::Ror, _) => AluOp::Ror,
            (OpId::BAnd, _) => AluOp::BAnd,
            (OpId::BOr, _) => AluOp::BOr,
            (OpId::BXor, _) => AluOp::BXor,
            _ => {
                return Err(self.err(format!("operator {:?} is not a binary ALU op", op.id)));
            }
        })
    }

    /// Lower `rhs` into variable `dest`; the final write respects `mask`.
    fn var_assign(&mut self, dest: RegId, rhs: ExprId, mask: Option<RegId>) -> Result<()> {
        let dest_reg = Reg::A(dest);
        match self.prog.expr(rhs).clone() {
            Expr::IntLit(i) => self.cond_li(dest_reg, Imm::Int(i), mask),
            Expr::FloatLit(f) => self.cond_li(dest_reg, Imm::Float(f), mask),
            Expr::Var(v) => {
                // A masked element/thread-index read on v3d must stage
                // through a temporary; the index ops cannot be conditional.
                if self.target == Target::V3d
                    && mask.is_some()
                    && matches!(v, Var::ElemNum | Var::QpuNum)
                {
                    let t = self.fresh_var();
                    let src = self.src_var(v)?;
                    self.cond_mov(Reg::A(t), src, None);
                    self.cond_mov(dest_reg, Reg::A(t), mask);
                    return Ok(());
                }
                let src = self.src_var(v)?;
                self.cond_mov(dest_reg, src, mask);
            }
            Expr::Deref(p) => self.deref_load(dest_reg, p, mask)?,
            Expr::ApplyUnary { op, rhs: inner } => match op.id {
                OpId::Recip | OpId::RecipSqrt | OpId::Exp | OpId::Log => {
                    let sfu = match op.id {
                        OpId::Recip => Special::SfuRecip,
                        OpId::RecipSqrt => Special::SfuRecipSqrt,
                        OpId::Exp => Special::SfuExp,
                        _ => Special::SfuLog,
                    };
                    let src = self.expr_reg(inner)?;
                    self.push(Instr::mov(Reg::Special(sfu), src));
                    self.push(Instr::NoOp);
                    self.push(Instr::NoOp);
                    self.cond_mov(dest_reg, ACC4, mask);
                }
                OpId::BNot | OpId::ItoF | OpId::FtoI => {
                    let alu_op = match op.id {
                        OpId::BNot => AluOp::BNot,
                        OpId::ItoF => AluOp::ItoF,
                        _ => AluOp::FtoI,
                    };
                    let src = self.expr_operand(inner)?;
                    self.cond_alu(dest_reg, src, alu_op, src, mask);
                }
                _ => return Err(self.err(format!("operator {:?} is not unary", op.id))),
            },
            Expr::Apply { lhs, op, rhs: r } => {
                if op.id == OpId::Rotate {
                    self.rotate(dest_reg, lhs, r, mask)?;
                } else {
                    let alu_op = self.map_binary_op(op)?;
                    let (oa, ob) = self.operand_pair(lhs, r)?;
                    self.cond_alu(dest_reg, oa, alu_op, ob, mask);
                }
            }
        }
        Ok(())
    }

    /// Vector rotation: the source must sit in r0 and the amount in r5 (or a
    /// small immediate in 1..=15).
    fn rotate(&mut self, dest: Reg, src: ExprId, amount: ExprId, mask: Option<RegId>) -> Result<()> {
        let src_reg = self.expr_reg(src)?;
        self.push(Instr::mov(ACC0, src_reg));
        if let Expr::IntLit(n) = self.prog.expr(amount) {
            let n = *n;
            if n == 0 {
                self.cond_mov(dest, ACC0, mask);
                return Ok(());
            }
            if (1..=15).contains(&n) {
                let imm = SmallImm::new(n).unwrap();
                self.cond_alu(dest, Operand::Reg(ACC0), AluOp::MRotate, Operand::Imm(imm), mask);
                return Ok(());
            }
        }
        let amount_reg = self.expr_reg(amount)?;
        self.push(Instr::mov(ACC5, amount_reg));
        self.cond_alu(
            dest,
            Operand::Reg(ACC0),
            AluOp::MRotate,
            Operand::Reg(ACC5),
            mask,
        );
        Ok(())
    }

    /// TMU load: issue the per-lane addresses, wait out the latency, then
    /// collect the response from r4.
    fn deref_load(&mut self, dest: Reg, addr: ExprId, mask: Option<RegId>) -> Result<()> {
        let addr_reg = self.expr_reg(addr)?;
        self.push(Instr::mov(Reg::Special(Special::Tmu0S), addr_reg));
        self.push(Instr::NoOp);
        self.push(Instr::NoOp);
        self.push(Instr::Tmu0ToAcc4);
        self.cond_mov(dest, ACC4, mask);
        Ok(())
    }

    /// Store `data` to the addresses in `addr`. The v3d path goes through
    /// the TMU; vc4 stages the vector in its VPM row and DMAs it out.
    fn store(&mut self, data: ExprId, addr: ExprId) -> Result<()> {
        let data_reg = self.expr_reg(data)?;
        let addr_reg = self.expr_reg(addr)?;
        match self.target {
            Target::V3d => {
                self.push(Instr::mov(Reg::Special(Special::TmuD), data_reg));
                self.push(Instr::mov(Reg::Special(Special::TmuA), addr_reg));
            }
            Target::Vc4 => {
                let qpu_id = Reg::A(RSV_QPU_ID);
                // Stage the vector in this QPU's VPM row.
                self.push(Instr::li(ACC0, vpm::vpm_write_setup(true, 1, 0)));
                self.push(Instr::alu(
                    Reg::Special(Special::WrSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    Operand::Reg(qpu_id),
                ));
                self.push(Instr::mov(Reg::Special(Special::VpmWrite), data_reg));
                // DMA the row out to memory.
                self.push(Instr::li(ACC0, vpm::dma_write_setup(1, 16, true, 0)));
                self.push(Instr::alu(
                    ACC1,
                    Operand::Reg(qpu_id),
                    AluOp::Shl,
                    Operand::Imm(SmallImm::new(3).unwrap()),
                ));
                self.push(Instr::alu(
                    Reg::Special(Special::WrSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    Operand::Reg(ACC1),
                ));
                self.push(Instr::mov(Reg::Special(Special::DmaStAddr), addr_reg));
                self.push(Instr::DmaStoreWait);
            }
        }
        Ok(())
    }

    // -- boolean expressions ------------------------------------------------

    /// Emit a flag-setting comparison and name the flag that is true in the
    /// lanes where the comparison holds.
    fn cmp_flags(&mut self, lhs: ExprId, op: crate::source::expr::CmpOp, rhs: ExprId) -> Result<Flag> {
        // GT and LE are the swapped forms of LT and GE.
        let (a, b, id) = match op.id {
            CmpId::Gt => (rhs, lhs, CmpId::Lt),
            CmpId::Le => (rhs, lhs, CmpId::Ge),
            other => (lhs, rhs, other),
        };
        let sub_op = match op.ty {
            BaseType::Int => AluOp::Sub,
            BaseType::Float => AluOp::FSub,
        };
        let (oa, ob) = self.operand_pair(a, b)?;
        self.push(Instr::Alu {
            set_flags: true,
            cond: AssignCond::Always,
            dest: Reg::None,
            src_a: oa,
            op: sub_op,
            src_b: ob,
        });
        Ok(match id {
            CmpId::Eq => Flag::Zs,
            CmpId::Neq => Flag::Zc,
            CmpId::Lt => Flag::Ns,
            CmpId::Ge => Flag::Nc,
            CmpId::Gt | CmpId::Le => unreachable!("swapped above"),
        })
    }

    /// Lower a boolean expression so the flags reflect it; the returned flag
    /// is true in exactly the lanes where the expression holds.
    fn bexpr_flags(&mut self, b: BExprId) -> Result<Flag> {
        match self.prog.bexpr(b).clone() {
            BExpr::Cmp { lhs, op, rhs } => self.cmp_flags(lhs, op, rhs),
            BExpr::Not(inner) => Ok(self.bexpr_flags(inner)?.negate()),
            BExpr::And(_, _) | BExpr::Or(_, _) => {
                let m = self.bexpr_mask(b)?;
                self.apply_mask(Some(m));
                Ok(Flag::Zc)
            }
        }
    }

    /// Materialise a boolean expression as a mask variable holding -1 in
    /// the true lanes. Conjunctions and disjunctions combine child masks
    /// through temporaries.
    fn bexpr_mask(&mut self, b: BExprId) -> Result<RegId> {
        match self.prog.bexpr(b).clone() {
            BExpr::And(x, y) => {
                let mx = self.bexpr_mask(x)?;
                let my = self.bexpr_mask(y)?;
                let m = self.fresh_var();
                self.cond_alu(
                    Reg::A(m),
                    Operand::Reg(Reg::A(mx)),
                    AluOp::BAnd,
                    Operand::Reg(Reg::A(my)),
                    None,
                );
                Ok(m)
            }
            BExpr::Or(x, y) => {
                let mx = self.bexpr_mask(x)?;
                let my = self.bexpr_mask(y)?;
                let m = self.fresh_var();
                self.cond_alu(
                    Reg::A(m),
                    Operand::Reg(Reg::A(mx)),
                    AluOp::BOr,
                    Operand::Reg(Reg::A(my)),
                    None,
                );
                Ok(m)
            }
            BExpr::Not(x) => {
                let mx = self.bexpr_mask(x)?;
                let m = self.fresh_var();
                self.cond_alu(
                    Reg::A(m),
                    Operand::Reg(Reg::A(mx)),
                    AluOp::BNot,
                    Operand::Reg(Reg::A(mx)),
                    None,
                );
                Ok(m)
            }
            BExpr::Cmp { lhs, op, rhs } => {
                let f = self.cmp_flags(lhs, op, rhs)?;
                let m = self.fresh_var();
                self.push(Instr::li(Reg::A(m), 0));
                self.push(Instr::Li {
                    set_flags: false,
                    cond: AssignCond::Flag(f),
                    dest: Reg::A(m),
                    imm: Imm::Int(-1),
                });
                Ok(m)
            }
        }
    }

    /// Branch condition that skips a block guarded by `cond`.
    fn skip_branch_cond(&mut self, cond: CExpr) -> Result<BranchCond> {
        let f = self.bexpr_flags(cond.bexpr)?;
        let taken = match cond.quant {
            CQuant::Any => BranchCond::Any(f),
            CQuant::All => BranchCond::All(f),
        };
        Ok(taken.negate())
    }

    // -- statements ---------------------------------------------------------

    fn require_vc4(&self, what: &str) -> Result<()> {
        if self.target == Target::V3d {
            return Err(self.err(format!("{what} can not be used for v3d")));
        }
        Ok(())
    }

    fn stmt(&mut self, s: StmtId, mask: Option<RegId>) -> Result<()> {
        match self.prog.stmt(s).clone() {
            Stmt::Skip => {}
            Stmt::Seq { s0, s1 } => {
                self.stmt(s0, mask)?;
                self.stmt(s1, mask)?;
            }
            Stmt::Assign { lhs, rhs } => match self.prog.expr(lhs).clone() {
                Expr::Var(Var::Standard(id)) => self.var_assign(id, rhs, mask)?,
                Expr::Var(Var::VpmWrite) => {
                    self.require_vc4("the VPM write port")?;
                    let r = self.expr_reg(rhs)?;
                    self.push(Instr::mov(Reg::Special(Special::VpmWrite), r));
                }
                Expr::Deref(addr) => self.store(rhs, addr)?,
                _ => return Err(self.err("invalid assignment target")),
            },
            Stmt::Where {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let m_inner = self.bexpr_mask(cond)?;
                let m_then = match mask {
                    None => m_inner,
                    Some(m0) => {
                        let t = self.fresh_var();
                        self.cond_alu(
                            Reg::A(t),
                            Operand::Reg(Reg::A(m0)),
                            AluOp::BAnd,
                            Operand::Reg(Reg::A(m_inner)),
                            None,
                        );
                        t
                    }
                };
                self.stmt(then_stmt, Some(m_then))?;
                if let Some(e) = else_stmt {
                    let m_not = self.fresh_var();
                    self.cond_alu(
                        Reg::A(m_not),
                        Operand::Reg(Reg::A(m_inner)),
                        AluOp::BNot,
                        Operand::Reg(Reg::A(m_inner)),
                        None,
                    );
                    let m_else = match mask {
                        None => m_not,
                        Some(m0) => {
                            let t = self.fresh_var();
                            self.cond_alu(
                                Reg::A(t),
                                Operand::Reg(Reg::A(m0)),
                                AluOp::BAnd,
                                Operand::Reg(Reg::A(m_not)),
                                None,
                            );
                            t
                        }
                    };
                    self.stmt(e, Some(m_else))?;
                }
            }
            Stmt::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                let skip = self.skip_branch_cond(cond)?;
                match else_stmt {
                    Some(e) => {
                        let l_else = self.fresh_label();
                        let l_end = self.fresh_label();
                        self.push(Instr::Brl {
                            cond: skip,
                            label: l_else,
                        });
                        self.stmt(then_stmt, mask)?;
                        self.push(Instr::Brl {
                            cond: BranchCond::Always,
                            label: l_end,
                        });
                        self.push(Instr::Lab(l_else));
                        self.stmt(e, mask)?;
                        self.push(Instr::Lab(l_end));
                    }
                    None => {
                        let l_end = self.fresh_label();
                        self.push(Instr::Brl {
                            cond: skip,
                            label: l_end,
                        });
                        self.stmt(then_stmt, mask)?;
                        self.push(Instr::Lab(l_end));
                    }
                }
            }
            Stmt::While { cond, body } => self.lower_loop(cond, body, None, mask)?,
            Stmt::For { cond, inc, body } => self.lower_loop(cond, body, Some(inc), mask)?,
            Stmt::PrintStr(text) => self.push(Instr::PrintStr(text)),
            Stmt::PrintInt(e) => {
                let r = self.expr_reg(e)?;
                self.push(Instr::PrintInt(r));
            }
            Stmt::PrintFloat(e) => {
                let r = self.expr_reg(e)?;
                self.push(Instr::PrintFloat(r));
            }
            Stmt::StoreRequest { data, addr } => self.store(data, addr)?,
            Stmt::Gather { addr } => {
                let r = self.expr_reg(addr)?;
                self.push(Instr::mov(Reg::Special(Special::Tmu0S), r));
            }
            Stmt::LoadReceive { dest } => {
                let id = self.expr_var(dest)?;
                match self.target {
                    Target::V3d => self.push(Instr::Recv { dest: Reg::A(id) }),
                    Target::Vc4 => {
                        self.push(Instr::Tmu0ToAcc4);
                        self.push(Instr::mov(Reg::A(id), ACC4));
                    }
                }
            }
            Stmt::SemaInc(id) => self.push(Instr::SInc(id)),
            Stmt::SemaDec(id) => self.push(Instr::SDec(id)),
            Stmt::SendIrqToHost => self.push(Instr::Irq),
            Stmt::SetReadStride(e) => {
                self.require_vc4("the DMA read stride")?;
                let o = self.expr_operand(e)?;
                self.push(Instr::li(ACC0, vpm::stride_read_setup(0)));
                self.push(Instr::alu(
                    Reg::Special(Special::RdSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    o,
                ));
            }
            Stmt::SetWriteStride(e) => {
                self.require_vc4("the DMA write stride")?;
                let o = self.expr_operand(e)?;
                self.push(Instr::li(ACC0, vpm::stride_write_setup(0)));
                self.push(Instr::alu(
                    Reg::Special(Special::WrSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    o,
                ));
            }
            Stmt::SetupVpmRead {
                num_vecs,
                addr,
                horizontal,
                stride,
            } => {
                self.require_vc4("VPM reads")?;
                let o = self.expr_operand(addr)?;
                self.push(Instr::li(
                    ACC0,
                    vpm::vpm_read_setup(num_vecs, horizontal, stride, 0),
                ));
                self.push(Instr::alu(
                    Reg::Special(Special::RdSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    o,
                ));
            }
            Stmt::SetupVpmWrite {
                addr,
                horizontal,
                stride,
            } => {
                self.require_vc4("VPM writes")?;
                let o = self.expr_operand(addr)?;
                self.push(Instr::li(ACC0, vpm::vpm_write_setup(horizontal, stride, 0)));
                self.push(Instr::alu(
                    Reg::Special(Special::WrSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    o,
                ));
            }
            Stmt::SetupDmaRead {
                num_rows,
                row_len,
                horizontal,
                vpitch,
                vpm_addr,
            } => {
                self.require_vc4("DMA reads")?;
                let o = self.expr_operand(vpm_addr)?;
                self.push(Instr::li(
                    ACC0,
                    vpm::dma_read_setup(num_rows, row_len, horizontal, vpitch, 0),
                ));
                self.push(Instr::alu(
                    Reg::Special(Special::RdSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    o,
                ));
            }
            Stmt::SetupDmaWrite {
                num_rows,
                row_len,
                horizontal,
                vpm_addr,
            } => {
                self.require_vc4("DMA writes")?;
                let r = self.expr_reg(vpm_addr)?;
                self.push(Instr::alu(
                    ACC1,
                    Operand::Reg(r),
                    AluOp::Shl,
                    Operand::Imm(SmallImm::new(3).unwrap()),
                ));
                self.push(Instr::li(
                    ACC0,
                    vpm::dma_write_setup(num_rows, row_len, horizontal, 0),
                ));
                self.push(Instr::alu(
                    Reg::Special(Special::WrSetup),
                    Operand::Reg(ACC0),
                    AluOp::Add,
                    Operand::Reg(ACC1),
                ));
            }
            Stmt::DmaStartRead(e) => {
                self.require_vc4("DMA reads")?;
                let r = self.expr_reg(e)?;
                self.push(Instr::mov(Reg::Special(Special::DmaLdAddr), r));
            }
            Stmt::DmaStartWrite(e) => {
                self.require_vc4("DMA writes")?;
                let r = self.expr_reg(e)?;
                self.push(Instr::mov(Reg::Special(Special::DmaStAddr), r));
            }
            Stmt::DmaReadWait => {
                self.require_vc4("DMA reads")?;
                self.push(Instr::DmaLoadWait);
            }
            Stmt::DmaWriteWait => {
                self.require_vc4("DMA writes")?;
                self.push(Instr::DmaStoreWait);
            }
        }
        Ok(())
    }

    /// Header-test loop with a back edge; `for` appends its increment to
    /// the body.
    fn lower_loop(
        &mut self,
        cond: CExpr,
        body: StmtId,
        inc: Option<StmtId>,
        mask: Option<RegId>,
    ) -> Result<()> {
        let l_start = self.fresh_label();
        let l_end = self.fresh_label();
        self.push(Instr::Lab(l_start));
        let skip = self.skip_branch_cond(cond)?;
        self.push(Instr::Brl {
            cond: skip,
            label: l_end,
        });
        self.stmt(body, mask)?;
        if let Some(inc) = inc {
            self.stmt(inc, mask)?;
        }
        self.push(Instr::Brl {
            cond: BranchCond::Always,
            label: l_start,
        });
        self.push(Instr::Lab(l_end));
        Ok(())
    }

    // -- init block ---------------------------------------------------------

    /// Bracket the insertion point after the leading uniform loads.
    fn place_init_markers(&mut self) {
        let mut split = 0;
        while split < self.seq.len() && self.seq[split].is_uniform_load() {
            split += 1;
        }
        self.seq.insert(split, Instr::InitEnd);
        self.seq.insert(split, Instr::InitBegin);
    }

    /// Insert QPU-id derivation and per-QPU pointer offsetting after the
    /// `INIT_BEGIN` marker, using r0/r1 as scratch.
    fn insert_init_code(&mut self) {
        let begin = self
            .seq
            .iter()
            .position(|i| matches!(i, Instr::InitBegin))
            .expect("markers placed");

        // Destination registers of the pointer uniform loads, in order.
        let mut ptr_dests: Vec<Reg> = Vec::new();
        let mut param_idx = 0usize;
        let mut uniform_idx = 0usize;
        for instr in &self.seq[..begin] {
            if !instr.is_uniform_load() {
                continue;
            }
            // The first two uniforms are the reserved id/count pair.
            if uniform_idx >= 2 {
                if let Some(&ParamKind::Ptr) = self.prog.param_kinds.get(param_idx) {
                    if let Instr::Alu { dest, .. } = instr {
                        ptr_dests.push(*dest);
                    }
                }
                param_idx += 1;
            }
            uniform_idx += 1;
        }

        // The id derivation is only needed when something consumes the QPU
        // id: a pointer offset, or a direct read of the reserved variable.
        let needs_qpu_id = !ptr_dests.is_empty()
            || self.seq[begin..]
                .iter()
                .any(|i| super::subst::use_def(i).uses.contains(&RSV_QPU_ID));

        let mut init: Vec<Instr> = Vec::new();

        if self.target == Target::V3d && needs_qpu_id {
            // On v3d the QPU id is derived from the thread index when all
            // eight QPUs run; with one QPU the uniform value stands.
            let endif = self.fresh_label();
            init.push(Instr::Alu {
                set_flags: true,
                cond: AssignCond::Always,
                dest: ACC0,
                src_a: Operand::Reg(Reg::A(RSV_NUM_QPUS)),
                op: AluOp::Sub,
                src_b: Operand::Imm(SmallImm::new(8).unwrap()),
            });
            init.push(Instr::Brl {
                cond: BranchCond::All(Flag::Zc),
                label: endif,
            });
            init.push(Instr::mov(ACC0, Reg::Special(Special::QpuNum)));
            init.push(Instr::alu(
                ACC0,
                Operand::Reg(ACC0),
                AluOp::Shr,
                Operand::Imm(SmallImm::new(2).unwrap()),
            ));
            init.push(Instr::alu(
                Reg::A(RSV_QPU_ID),
                Operand::Reg(ACC0),
                AluOp::BAnd,
                Operand::Imm(SmallImm::new(15).unwrap()),
            ));
            init.push(Instr::Lab(endif));
        }

        if !ptr_dests.is_empty() {
            // offset = 4 * (elem_num + 16 * qpu_id) bytes
            init.push(Instr::alu(
                ACC1,
                Operand::Reg(Reg::A(RSV_QPU_ID)),
                AluOp::Shl,
                Operand::Imm(SmallImm::new(4).unwrap()),
            ));
            init.push(Instr::mov(ACC0, Reg::Special(Special::ElemNum)));
            init.push(Instr::alu(
                ACC1,
                Operand::Reg(ACC1),
                AluOp::Add,
                Operand::Reg(ACC0),
            ));
            init.push(Instr::alu(
                ACC0,
                Operand::Reg(ACC1),
                AluOp::Shl,
                Operand::Imm(SmallImm::new(2).unwrap()),
            ));
            for dest in ptr_dests {
                init.push(Instr::alu(
                    dest,
                    Operand::Reg(dest),
                    AluOp::Add,
                    Operand::Reg(ACC0),
                ));
            }
        }

        self.seq.splice(begin + 1..begin + 1, init);
    }
}
