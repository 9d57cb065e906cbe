//! Control-flow graph over a target instruction sequence.

use std::collections::{HashMap, HashSet};

use super::instr::{BranchCond, Instr, Label};
use crate::error::{QpuError, Result};

/// Per-instruction successor sets.
#[derive(Debug, Clone)]
pub struct Cfg {
    succs: Vec<HashSet<usize>>,
}

impl Cfg {
    pub fn succ(&self, i: usize) -> &HashSet<usize> {
        &self.succs[i]
    }

    pub fn len(&self) -> usize {
        self.succs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }
}

/// Build the CFG for an instruction sequence still in label form.
///
/// Two passes: fall-through edges (except after halts and unconditional
/// jumps) plus a label table, then one extra edge per branch-to-label.
pub fn build_cfg(instrs: &[Instr]) -> Result<Cfg> {
    let mut succs: Vec<HashSet<usize>> = vec![HashSet::new(); instrs.len()];
    let mut label_map: HashMap<Label, usize> = HashMap::new();

    for (i, instr) in instrs.iter().enumerate() {
        let uncond = matches!(
            instr,
            Instr::Brl {
                cond: BranchCond::Always,
                ..
            }
        );
        let end = matches!(instr, Instr::End) || i + 1 == instrs.len();
        if !(uncond || end) {
            succs[i].insert(i + 1);
        }
        if let Instr::Lab(label) = instr {
            label_map.insert(*label, i);
        }
    }

    for (i, instr) in instrs.iter().enumerate() {
        if let Some(label) = instr.branch_label() {
            let target = *label_map
                .get(&label)
                .ok_or(QpuError::Cfg { label })?;
            succs[i].insert(target);
        }
    }

    Ok(Cfg { succs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::instr::{BranchCond, Instr, Reg};

    #[test]
    fn fallthrough_and_branch_edges() {
        let instrs = vec![
            Instr::li(Reg::A(0), 1),
            Instr::Brl {
                cond: BranchCond::Any(crate::target::instr::Flag::Zs),
                label: 7,
            },
            Instr::li(Reg::A(0), 2),
            Instr::Lab(7),
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        assert!(cfg.succ(0).contains(&1));
        assert!(cfg.succ(1).contains(&2));
        assert!(cfg.succ(1).contains(&3));
        assert!(cfg.succ(4).is_empty());
        // Every successor stays in bounds.
        for i in 0..cfg.len() {
            assert!(cfg.succ(i).iter().all(|&s| s < instrs.len()));
        }
    }

    #[test]
    fn unconditional_branch_has_no_fallthrough() {
        let instrs = vec![
            Instr::Brl {
                cond: BranchCond::Always,
                label: 1,
            },
            Instr::NoOp,
            Instr::Lab(1),
            Instr::End,
        ];
        let cfg = build_cfg(&instrs).unwrap();
        assert_eq!(cfg.succ(0).len(), 1);
        assert!(cfg.succ(0).contains(&2));
    }

    #[test]
    fn dangling_label_is_an_error() {
        let instrs = vec![Instr::Brl {
            cond: BranchCond::Always,
            label: 42,
        }];
        assert!(build_cfg(&instrs).is_err());
    }
}
