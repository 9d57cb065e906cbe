//! Target IR and its passes: lowering, CFG construction, liveness, the
//! renaming machinery shared by the allocators, and the emulator.

pub mod cfg;
pub mod emu;
pub mod instr;
pub mod liveness;
pub mod lower;
pub mod pretty;
pub mod subst;
pub mod vpm;
