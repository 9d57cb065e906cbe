//! Source-level statement trees.

use super::expr::{BExprId, CExpr, ExprId};

/// Index of a [`Stmt`] node in the compilation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub u32);

/// A source statement node.
///
/// The vc4-only DMA and VPM statements are rejected by the v3d lowerer; on
/// v3d, stores and gathers go through the TMU instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Skip,
    Assign {
        lhs: ExprId,
        rhs: ExprId,
    },
    Seq {
        s0: StmtId,
        s1: StmtId,
    },
    /// Lane-wise masked assignment region.
    Where {
        cond: BExprId,
        then_stmt: StmtId,
        else_stmt: Option<StmtId>,
    },
    /// Whole-vector branch on a quantified condition.
    If {
        cond: CExpr,
        then_stmt: StmtId,
        else_stmt: Option<StmtId>,
    },
    While {
        cond: CExpr,
        body: StmtId,
    },
    For {
        cond: CExpr,
        inc: StmtId,
        body: StmtId,
    },
    PrintStr(String),
    PrintInt(ExprId),
    PrintFloat(ExprId),
    /// Write `data` to the 16 per-lane addresses in `addr`.
    StoreRequest {
        data: ExprId,
        addr: ExprId,
    },
    /// Issue a TMU fetch for the addresses in `addr`.
    Gather {
        addr: ExprId,
    },
    /// Receive the oldest outstanding TMU fetch into `dest` (a variable).
    LoadReceive {
        dest: ExprId,
    },
    SemaInc(u8),
    SemaDec(u8),
    SendIrqToHost,
    // vc4-only statements below.
    SetReadStride(ExprId),
    SetWriteStride(ExprId),
    SetupVpmRead {
        num_vecs: i32,
        addr: ExprId,
        horizontal: bool,
        stride: i32,
    },
    SetupVpmWrite {
        addr: ExprId,
        horizontal: bool,
        stride: i32,
    },
    SetupDmaRead {
        num_rows: i32,
        row_len: i32,
        horizontal: bool,
        vpitch: i32,
        vpm_addr: ExprId,
    },
    SetupDmaWrite {
        num_rows: i32,
        row_len: i32,
        horizontal: bool,
        vpm_addr: ExprId,
    },
    DmaStartRead(ExprId),
    DmaStartWrite(ExprId),
    DmaReadWait,
    DmaWriteWait,
}
