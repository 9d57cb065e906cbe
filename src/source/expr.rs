//! Source-level expression trees.
//!
//! Expressions are immutable after construction and live in an index arena
//! owned by the compilation state; nodes reference children by id, which
//! keeps shared subexpressions cheap and sidesteps ownership cycles.

/// Identifies a source variable. Dense in `[0, num_vars)`.
pub type VarId = u32;

/// Reserved variable holding this QPU's index, loaded from the first uniform.
pub const RSV_QPU_ID: VarId = 0;
/// Reserved variable holding the number of participating QPUs.
pub const RSV_NUM_QPUS: VarId = 1;

/// Index of an [`Expr`] node in the compilation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Index of a [`BExpr`] node in the compilation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BExprId(pub u32);

/// A source variable: either a numbered standard variable or one of the
/// hardware-backed pseudo variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    Standard(VarId),
    /// Next word from the uniform FIFO.
    Uniform,
    /// The per-lane element index `[0..16)`.
    ElemNum,
    /// The hardware QPU/thread number.
    QpuNum,
    /// Next vector from the VPM read FIFO (vc4 only).
    VpmRead,
    /// The VPM write FIFO (vc4 only, assignment target).
    VpmWrite,
}

/// Element type of a vector expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Int,
    Float,
}

/// Operator identifiers for `Apply` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpId {
    Add,
    Sub,
    Mul,
    Min,
    Max,
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Logical shift right.
    Ushr,
    Ror,
    BAnd,
    BOr,
    BXor,
    BNot,
    ItoF,
    FtoI,
    Recip,
    RecipSqrt,
    Exp,
    Log,
    /// Vector lane rotation.
    Rotate,
}

/// An operator together with the element type it acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Op {
    pub id: OpId,
    pub ty: BaseType,
}

impl Op {
    pub const fn new(id: OpId, ty: BaseType) -> Self {
        Op { id, ty }
    }

    /// True for operators taking a single operand.
    pub fn is_unary(self) -> bool {
        matches!(
            self.id,
            OpId::BNot
                | OpId::ItoF
                | OpId::FtoI
                | OpId::Recip
                | OpId::RecipSqrt
                | OpId::Exp
                | OpId::Log
        )
    }
}

/// A source expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i32),
    FloatLit(f32),
    Var(Var),
    Apply { lhs: ExprId, op: Op, rhs: ExprId },
    ApplyUnary { op: Op, rhs: ExprId },
    /// Load through a 16-lane pointer.
    Deref(ExprId),
}

/// Comparison operator identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpId {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A comparison operator together with its element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmpOp {
    pub id: CmpId,
    pub ty: BaseType,
}

/// A per-lane boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub enum BExpr {
    Not(BExprId),
    And(BExprId, BExprId),
    Or(BExprId, BExprId),
    Cmp {
        lhs: ExprId,
        op: CmpOp,
        rhs: ExprId,
    },
}

/// Quantifier reducing a 16-lane boolean to a scalar condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CQuant {
    Any,
    All,
}

/// A whole-vector condition: a boolean expression under a lane quantifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CExpr {
    pub quant: CQuant,
    pub bexpr: BExprId,
}
