//! v3d register allocation.
//!
//! v3d has a single 64-entry regfile, modelled as file A throughout. The
//! walk assigns each variable the lowest id not taken by a concurrently
//! live variable.

use log::{debug, trace};

use crate::error::{QpuError, Result};
use crate::target::cfg::Cfg;
use crate::target::instr::{Instr, Reg, RegId};
use crate::target::liveness::{LiveSets, Liveness};
use crate::target::pretty::mnemonic;
use crate::target::subst::{collapse_tmp_tags, rename_dest, rename_uses, use_def};

pub const NUM_REGS: u32 = 64;

fn failing_instr(instrs: &[Instr], var: RegId) -> (usize, String) {
    for (i, instr) in instrs.iter().enumerate() {
        let ud = use_def(instr);
        if ud.uses.contains(&var) || ud.defs.contains(&var) {
            return (i, mnemonic(instr));
        }
    }
    (0, String::from("<unknown>"))
}

/// Allocate registers for every variable and rewrite the code in place.
pub fn reg_alloc(cfg: &Cfg, instrs: &mut [Instr], num_vars: u32) -> Result<()> {
    let live = Liveness::compute(instrs, cfg);
    let live_sets = LiveSets::build(instrs, &live, num_vars);

    let mut alloc: Vec<Option<RegId>> = vec![None; num_vars as usize];
    for var in 0..num_vars {
        let mut possible = [true; NUM_REGS as usize];
        for &other in live_sets.live_with(var) {
            if let Some(id) = alloc[other as usize] {
                possible[id as usize] = false;
            }
        }
        let id = possible.iter().position(|&free| free).ok_or_else(|| {
            let (index, mnemonic) = failing_instr(instrs, var);
            QpuError::Alloc {
                index,
                mnemonic,
                reason: "insufficient regfile capacity".to_string(),
            }
        })? as RegId;
        trace!("alloc v{var} -> rf{id}");
        alloc[var as usize] = Some(id);
    }

    for instr in instrs.iter_mut() {
        let ud = use_def(instr);
        for &d in &ud.defs {
            rename_dest(instr, d, Reg::TmpA(alloc[d as usize].expect("allocated")));
        }
        for &u in &ud.uses {
            rename_uses(instr, u, Reg::TmpA(alloc[u as usize].expect("allocated")));
        }
        collapse_tmp_tags(instr);
    }
    debug!("v3d allocation done for {num_vars} vars");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::cfg::build_cfg;
    use crate::target::instr::{AluOp, Operand};

    #[test]
    fn reuses_lowest_free_ids() {
        // v0 and v1 are dead once v2 is defined; v3 can reuse id 0.
        let mut instrs = vec![
            Instr::li(Reg::A(0), 1),
            Instr::li(Reg::A(1), 2),
            Instr::alu(
                Reg::A(2),
                Operand::Reg(Reg::A(0)),
                AluOp::Add,
                Operand::Reg(Reg::A(1)),
            ),
            Instr::alu(
                Reg::A(3),
                Operand::Reg(Reg::A(2)),
                AluOp::Add,
                Operand::Reg(Reg::A(2)),
            ),
            Instr::PrintInt(Reg::A(3)),
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        reg_alloc(&cfg, &mut instrs, 4).unwrap();
        match &instrs[3] {
            Instr::Alu { dest, .. } => assert_eq!(*dest, Reg::A(0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn exhaustion_is_an_alloc_error() {
        let mut instrs = Vec::new();
        for v in 0..80u32 {
            instrs.push(Instr::li(Reg::A(v), v as i32));
        }
        for v in 0..80u32 {
            instrs.push(Instr::PrintInt(Reg::A(v)));
        }
        instrs.push(Instr::End);
        let cfg = build_cfg(&instrs).unwrap();
        assert!(matches!(
            reg_alloc(&cfg, &mut instrs, 80),
            Err(QpuError::Alloc { .. })
        ));
    }
}
