//! Use/def extraction and register renaming.
//!
//! The allocators rewrite variables in two steps: `A(var)` becomes a
//! `TmpA`/`TmpB` carrying the physical id, and once every occurrence in the
//! instruction has been renamed the temporaries collapse back to `A`/`B`.
//! The intermediate tag keeps a use and a def of the same variable within
//! one instruction from colliding with an already-assigned physical id.

use super::instr::{Instr, Operand, Reg, RegId};

/// Variables read and written by one instruction.
#[derive(Debug, Default, Clone)]
pub struct UseDef {
    pub uses: Vec<RegId>,
    pub defs: Vec<RegId>,
}

fn collect_reg(reg: &Reg, out: &mut Vec<RegId>) {
    if let Reg::A(id) = reg {
        if !out.contains(id) {
            out.push(*id);
        }
    }
}

fn collect_operand(op: &Operand, out: &mut Vec<RegId>) {
    if let Operand::Reg(r) = op {
        collect_reg(r, out);
    }
}

/// Compute the variables used and defined by `instr`.
///
/// A conditional write only replaces the lanes its condition selects, so
/// the destination's old value is live into the instruction: conditional
/// defs count as uses too.
pub fn use_def(instr: &Instr) -> UseDef {
    let mut ud = UseDef::default();
    match instr {
        Instr::Li { dest, cond, .. } => {
            collect_reg(dest, &mut ud.defs);
            if !cond.is_always() {
                collect_reg(dest, &mut ud.uses);
            }
        }
        Instr::Alu {
            dest,
            cond,
            src_a,
            src_b,
            ..
        } => {
            collect_operand(src_a, &mut ud.uses);
            collect_operand(src_b, &mut ud.uses);
            collect_reg(dest, &mut ud.defs);
            if !cond.is_always() {
                collect_reg(dest, &mut ud.uses);
            }
        }
        Instr::Recv { dest } => collect_reg(dest, &mut ud.defs),
        Instr::PrintInt(reg) | Instr::PrintFloat(reg) => collect_reg(reg, &mut ud.uses),
        _ => {}
    }
    ud
}

fn rename_reg(reg: &mut Reg, var: RegId, to: Reg) {
    if *reg == Reg::A(var) {
        *reg = to;
    }
}

/// Rename the destination of `instr` from variable `var` to `to`.
pub fn rename_dest(instr: &mut Instr, var: RegId, to: Reg) {
    match instr {
        Instr::Li { dest, .. } | Instr::Alu { dest, .. } | Instr::Recv { dest } => {
            rename_reg(dest, var, to)
        }
        _ => {}
    }
}

/// Rename every use of variable `var` in `instr` to `to`.
pub fn rename_uses(instr: &mut Instr, var: RegId, to: Reg) {
    match instr {
        Instr::Alu { src_a, src_b, .. } => {
            if let Operand::Reg(r) = src_a {
                rename_reg(r, var, to);
            }
            if let Operand::Reg(r) = src_b {
                rename_reg(r, var, to);
            }
        }
        Instr::PrintInt(reg) | Instr::PrintFloat(reg) => rename_reg(reg, var, to),
        _ => {}
    }
}

fn collapse(reg: &mut Reg) {
    match *reg {
        Reg::TmpA(id) => *reg = Reg::A(id),
        Reg::TmpB(id) => *reg = Reg::B(id),
        _ => {}
    }
}

/// Collapse the renaming temporaries back into plain regfile references.
pub fn collapse_tmp_tags(instr: &mut Instr) {
    match instr {
        Instr::Li { dest, .. } | Instr::Recv { dest } => collapse(dest),
        Instr::Alu {
            dest, src_a, src_b, ..
        } => {
            collapse(dest);
            if let Operand::Reg(r) = src_a {
                collapse(r);
            }
            if let Operand::Reg(r) = src_b {
                collapse(r);
            }
        }
        Instr::PrintInt(reg) | Instr::PrintFloat(reg) => collapse(reg),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::instr::{AluOp, AssignCond, Flag, Imm, Operand, Reg};

    #[test]
    fn conditional_writes_keep_the_old_value_live() {
        let i = Instr::Li {
            set_flags: false,
            cond: AssignCond::Flag(Flag::Zc),
            dest: Reg::A(3),
            imm: Imm::Int(1),
        };
        let ud = use_def(&i);
        assert!(ud.defs.contains(&3));
        assert!(ud.uses.contains(&3));
    }

    #[test]
    fn use_def_of_alu() {
        let i = Instr::alu(
            Reg::A(3),
            Operand::Reg(Reg::A(1)),
            AluOp::Add,
            Operand::Reg(Reg::A(2)),
        );
        let ud = use_def(&i);
        assert_eq!(ud.uses, vec![1, 2]);
        assert_eq!(ud.defs, vec![3]);
    }

    #[test]
    fn same_var_use_and_def_renames_without_collision() {
        // v1 := v1 + v0, allocating v1 -> A5 while v0 -> A1.
        let mut i = Instr::alu(
            Reg::A(1),
            Operand::Reg(Reg::A(1)),
            AluOp::Add,
            Operand::Reg(Reg::A(0)),
        );
        rename_dest(&mut i, 1, Reg::TmpA(5));
        rename_uses(&mut i, 1, Reg::TmpA(5));
        rename_uses(&mut i, 0, Reg::TmpA(1));
        collapse_tmp_tags(&mut i);
        match i {
            Instr::Alu {
                dest, src_a, src_b, ..
            } => {
                assert_eq!(dest, Reg::A(5));
                assert_eq!(src_a, Operand::Reg(Reg::A(5)));
                assert_eq!(src_b, Operand::Reg(Reg::A(1)));
            }
            _ => unreachable!(),
        }
    }
}
