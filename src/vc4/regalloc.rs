//! vc4 register allocation.
//!
//! Graph colouring over the two 32-entry regfiles. A preference pre-pass
//! scores each variable toward file A or B: variables read together want
//! opposite files (each instruction has one read port per file), and a
//! variable paired with a small immediate wants A, since the immediate
//! occupies the B read slot. The allocation walk then picks the lowest free
//! id in the chosen file, breaking preference ties by alternating files.
//!
//! A final pass resolves the conflicts colouring cannot express: two
//! same-file reads in one instruction, or a file-B read next to a small
//! immediate. The offending operand detours through an accumulator.

use log::{debug, trace};

use crate::error::{QpuError, Result};
use crate::target::cfg::Cfg;
use crate::target::instr::{Instr, Operand, Reg, RegId, Special};
use crate::target::liveness::{LiveSets, Liveness};
use crate::target::pretty::mnemonic;
use crate::target::subst::{collapse_tmp_tags, rename_dest, rename_uses, use_def};

pub const NUM_REGS_PER_FILE: u32 = 32;

/// Which physical file a register read goes through, if constrained.
fn read_file(reg: Reg) -> Option<RegFile> {
    match reg {
        Reg::A(_) => Some(RegFile::A),
        Reg::B(_) => Some(RegFile::B),
        Reg::Special(Special::ElemNum) => Some(RegFile::A),
        Reg::Special(Special::QpuNum) => Some(RegFile::B),
        Reg::Special(Special::DmaLdWait) => Some(RegFile::A),
        Reg::Special(Special::DmaStWait) => Some(RegFile::B),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegFile {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Alloc {
    file: RegFile,
    id: RegId,
}

/// Score regfile preferences for every variable.
fn determine_regfile_pref(instrs: &[Instr], num_vars: u32) -> (Vec<i32>, Vec<i32>) {
    let mut pref_a = vec![0i32; num_vars as usize];
    let mut pref_b = vec![0i32; num_vars as usize];
    for instr in instrs {
        if let Instr::Alu { src_a, src_b, .. } = instr {
            match (src_a, src_b) {
                (Operand::Reg(Reg::A(x)), Operand::Reg(Reg::A(y))) if x != y => {
                    let (x, y) = (*x as usize, *y as usize);
                    if pref_a[x] > pref_a[y] || pref_b[y] > pref_b[x] {
                        pref_a[x] += 1;
                        pref_b[y] += 1;
                    } else {
                        pref_a[y] += 1;
                        pref_b[x] += 1;
                    }
                }
                (Operand::Reg(Reg::A(x)), Operand::Imm(_))
                | (Operand::Imm(_), Operand::Reg(Reg::A(x))) => {
                    pref_a[*x as usize] += 1;
                }
                _ => {}
            }
        }
    }
    (pref_a, pref_b)
}

/// Free ids in one file once concurrently-live allocations are excluded.
fn possible_registers(var: RegId, live_sets: &LiveSets, alloc: &[Option<Alloc>], file: RegFile) -> [bool; 32] {
    let mut possible = [true; 32];
    for &other in live_sets.live_with(var) {
        if let Some(a) = alloc[other as usize] {
            if a.file == file {
                possible[a.id as usize] = false;
            }
        }
    }
    possible
}

fn choose_register(possible: &[bool; 32]) -> Option<RegId> {
    possible.iter().position(|&free| free).map(|i| i as RegId)
}

/// Point the diagnostic at the first instruction mentioning `var`.
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
pub fn reg_alloc(cfg: &Cfg, instrs: &mut Vec<Instr>, num_vars: u32) -> Result<()> {
    let live = Liveness::compute(instrs, cfg);
    let (pref_a, pref_b) = determine_regfile_pref(instrs, num_vars);
    let live_sets = LiveSets::build(instrs, &live, num_vars);

    let mut alloc: Vec<Option<Alloc>> = vec![None; num_vars as usize];
    let mut prev_file = RegFile::B;

    for var in 0..num_vars {
        let possible_a = possible_registers(var, &live_sets, &alloc, RegFile::A);
        let possible_b = possible_registers(var, &live_sets, &alloc, RegFile::B);
        let chosen_a = choose_register(&possible_a);
        let chosen_b = choose_register(&possible_b);

        let file = match (chosen_a, chosen_b) {
            (None, None) => {
                let (index, mnemonic) = failing_instr(instrs, var);
                return Err(QpuError::Alloc {
                    index,
                    mnemonic,
                    reason: "insufficient regfile capacity".to_string(),
                });
            }
            (None, Some(_)) => RegFile::B,
            (Some(_), None) => RegFile::A,
            (Some(_), Some(_)) => {
                let (pa, pb) = (pref_a[var as usize], pref_b[var as usize]);
                if pa > pb {
                    RegFile::A
                } else if pa < pb {
                    RegFile::B
                } else if prev_file == RegFile::A {
                    RegFile::B
                } else {
                    RegFile::A
                }
            }
        };
        prev_file = file;
        let id = match file {
            RegFile::A => chosen_a.unwrap(),
            RegFile::B => chosen_b.unwrap(),
        };
        trace!("alloc v{var} -> {file:?}{id}");
        alloc[var as usize] = Some(Alloc { file, id });
    }

    // Rewrite through the temporary tags so a use and a def of the same
    // variable in one instruction cannot collide.
    for instr in instrs.iter_mut() {
        let ud = use_def(instr);
        for &d in &ud.defs {
            let a = alloc[d as usize].expect("allocated above");
            let to = match a.file {
                RegFile::A => Reg::TmpA(a.id),
                RegFile::B => Reg::TmpB(a.id),
            };
            rename_dest(instr, d, to);
        }
        for &u in &ud.uses {
            let a = alloc[u as usize].expect("allocated above");
            let to = match a.file {
                RegFile::A => Reg::TmpA(a.id),
                RegFile::B => Reg::TmpB(a.id),
            };
            rename_uses(instr, u, to);
        }
        collapse_tmp_tags(instr);
    }

    resolve_read_conflicts(instrs);
    debug!("vc4 allocation done for {num_vars} vars");
    Ok(())
}

/// Detour operands through r2/r3 where an instruction would need two reads
/// from one file, or a file-B read alongside a small immediate.
fn resolve_read_conflicts(instrs: &mut Vec<Instr>) {
    let mut out: Vec<Instr> = Vec::with_capacity(instrs.len());
    for mut instr in instrs.drain(..) {
        if let Instr::Alu {
            ref mut src_a,
            ref mut src_b,
            ..
        } = instr
        {
            match (&*src_a, &*src_b) {
                (Operand::Reg(ra), Operand::Reg(rb)) if ra != rb => {
                    if let (Some(fa), Some(fb)) = (read_file(*ra), read_file(*rb)) {
                        if fa == fb {
                            out.push(Instr::mov(Reg::Acc(2), *ra));
                            *src_a = Operand::Reg(Reg::Acc(2));
                        }
                    }
                }
                (Operand::Reg(ra), Operand::Imm(_)) => {
                    // The immediate occupies the B read slot.
                    if read_file(*ra) == Some(RegFile::B) {
                        out.push(Instr::mov(Reg::Acc(2), *ra));
                        *src_a = Operand::Reg(Reg::Acc(2));
                    }
                }
                (Operand::Imm(_), Operand::Reg(rb)) => {
                    if read_file(*rb) == Some(RegFile::B) {
                        out.push(Instr::mov(Reg::Acc(3), *rb));
                        *src_b = Operand::Reg(Reg::Acc(3));
                    }
                }
                _ => {}
            }
        }
        out.push(instr);
    }
    *instrs = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::cfg::build_cfg;
    use crate::target::instr::{AluOp, SmallImm};
    use crate::target::liveness::Liveness;
    use std::collections::HashSet;

    fn add(dest: u32, a: u32, b: u32) -> Instr {
        Instr::alu(
            Reg::A(dest),
            Operand::Reg(Reg::A(a)),
            AluOp::Add,
            Operand::Reg(Reg::A(b)),
        )
    }

    #[test]
    fn co_used_vars_land_in_opposite_files() {
        let mut instrs = vec![
            Instr::li(Reg::A(0), 1),
            Instr::li(Reg::A(1), 2),
            add(2, 0, 1),
            Instr::PrintInt(Reg::A(2)),
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        reg_alloc(&cfg, &mut instrs, 3).unwrap();
        // The add now reads one A register and one B register.
        let alu = instrs
            .iter()
            .find(|i| matches!(i, Instr::Alu { op: AluOp::Add, .. }))
            .unwrap();
        if let Instr::Alu { src_a, src_b, .. } = alu {
            let files: Vec<_> = [src_a, src_b]
                .iter()
                .map(|o| match o {
                    Operand::Reg(r) => read_file(*r),
                    _ => None,
                })
                .collect();
            assert!(files.contains(&Some(RegFile::A)));
            assert!(files.contains(&Some(RegFile::B)));
        }
    }

    #[test]
    fn no_variable_tags_survive_allocation() {
        let mut instrs = vec![
            Instr::li(Reg::A(0), 3),
            Instr::Alu {
                set_flags: false,
                cond: crate::target::instr::AssignCond::Always,
                dest: Reg::A(1),
                src_a: Operand::Reg(Reg::A(0)),
                op: AluOp::Add,
                src_b: Operand::Imm(SmallImm::new(4).unwrap()),
            },
            Instr::PrintInt(Reg::A(1)),
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        reg_alloc(&cfg, &mut instrs, 2).unwrap();
        for instr in &instrs {
            let ud = use_def(instr);
            // Whatever remains tagged A must be a physical id below 32.
            for id in ud.uses.iter().chain(ud.defs.iter()) {
                assert!(*id < NUM_REGS_PER_FILE);
            }
        }
    }

    #[test]
    fn live_register_pressure_stays_within_capacity() {
        // Chain of 40 defs where at most two are live at once.
        let mut instrs = Vec::new();
        instrs.push(Instr::li(Reg::A(0), 0));
        for v in 1..40u32 {
            instrs.push(add(v, v - 1, v - 1));
        }
        instrs.push(Instr::End);
        let cfg = build_cfg(&instrs).unwrap();
        let live = Liveness::compute(&instrs, &cfg);
        for i in 0..instrs.len() {
            assert!(live.live_in(i).len() <= 64);
        }
        reg_alloc(&cfg, &mut instrs, 40).unwrap();
    }

    #[test]
    fn exhaustion_reports_the_failing_instruction() {
        // 70 variables all live simultaneously cannot fit in 2 x 32.
        let mut instrs = Vec::new();
        for v in 0..70u32 {
            instrs.push(Instr::li(Reg::A(v), v as i32));
        }
        let mut readers = HashSet::new();
        for v in 0..70u32 {
            instrs.push(Instr::PrintInt(Reg::A(v)));
            readers.insert(v);
        }
        instrs.push(Instr::End);
        let cfg = build_cfg(&instrs).unwrap();
        let err = reg_alloc(&cfg, &mut instrs, 70).unwrap_err();
        match err {
            QpuError::Alloc { mnemonic, .. } => assert!(!mnemonic.is_empty()),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
