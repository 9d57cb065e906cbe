//! Liveness analysis and concurrent-liveness sets.
//!
//! Standard backward dataflow over the CFG:
//!
//! ```text
//! live_in(i)  = use(i) ∪ (live_out(i) \ def(i))
//! live_out(i) = ⋃ live_in(s) for s ∈ succ(i)
//! ```
//!
//! Iteration walks the sequence in reverse and repeats until no set changes.

use std::collections::HashSet;

use log::debug;

use super::cfg::Cfg;
use super::instr::{Instr, RegId};
use super::subst::use_def;

/// Per-instruction live-in sets.
#[derive(Debug)]
pub struct Liveness {
    live_in: Vec<HashSet<RegId>>,
}

impl Liveness {
    /// Compute liveness to a fixpoint.
    pub fn compute(instrs: &[Instr], cfg: &Cfg) -> Liveness {
        let mut live_in: Vec<HashSet<RegId>> = vec![HashSet::new(); instrs.len()];
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;
            for i in (0..instrs.len()).rev() {
                let mut out: HashSet<RegId> = HashSet::new();
                for &s in cfg.succ(i) {
                    out.extend(live_in[s].iter().copied());
                }
                let ud = use_def(&instrs[i]);
                let mut new_in: HashSet<RegId> = ud.uses.iter().copied().collect();
                for v in out {
                    if !ud.defs.contains(&v) {
                        new_in.insert(v);
                    }
                }
                if new_in != live_in[i] {
                    live_in[i] = new_in;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        debug!("liveness fixpoint after {rounds} rounds over {} instrs", instrs.len());
        Liveness { live_in }
    }

    pub fn live_in(&self, i: usize) -> &HashSet<RegId> {
        &self.live_in[i]
    }

    pub fn len(&self) -> usize {
        self.live_in.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live_in.is_empty()
    }
}

/// For each variable, the set of variables ever live at the same time.
///
/// Variables `x` and `y` interfere when `y` is live into an instruction
/// defining `x` (and symmetrically); this is the interference relation the
/// allocators colour against.
#[derive(Debug)]
pub struct LiveSets {
    sets: Vec<HashSet<RegId>>,
}

impl LiveSets {
    pub fn build(instrs: &[Instr], live: &Liveness, num_vars: u32) -> LiveSets {
        let mut sets: Vec<HashSet<RegId>> = vec![HashSet::new(); num_vars as usize];
        for (i, instr) in instrs.iter().enumerate() {
            let ud = use_def(instr);
            for &d in &ud.defs {
                for &v in live.live_in(i) {
                    if v != d {
                        sets[d as usize].insert(v);
                        sets[v as usize].insert(d);
                    }
                }
            }
        }
        LiveSets { sets }
    }

    pub fn live_with(&self, var: RegId) -> &HashSet<RegId> {
        &self.sets[var as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::cfg::build_cfg;
    use crate::target::instr::{AluOp, Instr, Operand, Reg};

    fn add(dest: u32, a: u32, b: u32) -> Instr {
        Instr::alu(
            Reg::A(dest),
            Operand::Reg(Reg::A(a)),
            AluOp::Add,
            Operand::Reg(Reg::A(b)),
        )
    }

    #[test]
    fn straight_line_liveness() {
        // v0 = 1; v1 = 2; v2 = v0 + v1; end
        let instrs = vec![
            Instr::li(Reg::A(0), 1),
            Instr::li(Reg::A(1), 2),
            add(2, 0, 1),
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        let live = Liveness::compute(&instrs, &cfg);
        assert!(live.live_in(1).contains(&0));
        assert!(live.live_in(2).contains(&0));
        assert!(live.live_in(2).contains(&1));
        assert!(live.live_in(3).is_empty());
        // live_in(s) ⊆ live_out(i) along every edge, by construction of
        // live_out as the union over successors; check it explicitly.
        for i in 0..instrs.len() {
            let mut out: HashSet<RegId> = HashSet::new();
            for &s in cfg.succ(i) {
                out.extend(live.live_in(s).iter().copied());
            }
            for &s in cfg.succ(i) {
                assert!(live.live_in(s).is_subset(&out));
            }
        }
    }

    #[test]
    fn loop_keeps_counter_live() {
        use crate::target::instr::{BranchCond, Flag};
        // v0 = 5; loop: v0 = v0 + v0 (flags); branch back while not zero; end
        let instrs = vec![
            Instr::li(Reg::A(0), 5),
            Instr::Lab(0),
            Instr::Alu {
                set_flags: true,
                cond: crate::target::instr::AssignCond::Always,
                dest: Reg::A(0),
                src_a: Operand::Reg(Reg::A(0)),
                op: AluOp::Sub,
                src_b: Operand::Reg(Reg::A(1)),
            },
            Instr::Brl {
                cond: BranchCond::Any(Flag::Zc),
                label: 0,
            },
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        let live = Liveness::compute(&instrs, &cfg);
        // The decrement amount is live around the back edge.
        assert!(live.live_in(3).contains(&1));
        assert!(live.live_in(1).contains(&1));
    }

    #[test]
    fn live_sets_record_interference() {
        let instrs = vec![
            Instr::li(Reg::A(0), 1),
            Instr::li(Reg::A(1), 2),
            add(2, 0, 1),
            add(3, 2, 2),
            Instr::PrintInt(Reg::A(3)),
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        let live = Liveness::compute(&instrs, &cfg);
        let sets = LiveSets::build(&instrs, &live, 4);
        assert!(sets.live_with(1).contains(&0));
        assert!(sets.live_with(0).contains(&1));
        // v3 is defined once v0/v1 are dead.
        assert!(!sets.live_with(3).contains(&0));
    }
}
