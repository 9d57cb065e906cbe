//! Host-side DSL builder.
//!
//! The DSL presents value types `Int`, `Float` and `Ptr<T>` whose operators
//! build [`Expr`] nodes without evaluating anything. Statements accumulate on
//! a thread-local statement stack owned by the current compilation; scoped
//! constructs (`if_`/`else_`/`end`, `where_`, `while_`, `for_`) push a
//! placeholder on entry and synthesise the enclosing node when `end` pops it.
//!
//! The stack is not reentrant: one kernel compilation owns it exclusively,
//! and mismatched `end` calls are a bug in the host program, reported by
//! panic rather than by error value.

use std::cell::RefCell;
use std::marker::PhantomData;

use super::expr::{
    BExpr, BExprId, BaseType, CExpr, CQuant, CmpId, CmpOp, Expr, ExprId, Op, OpId, Var, VarId,
};
use super::stmt::{Stmt, StmtId};

// ---------------------------------------------------------------------------
// Compilation state
// ---------------------------------------------------------------------------

/// Kind of a kernel parameter, used for uniform marshalling and for the
/// per-QPU pointer-offset pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Ptr,
}

/// A finished source program: the arenas, the root statement, and the
/// bookkeeping the target passes need.
#[derive(Debug, Clone)]
pub struct Program {
    pub exprs: Vec<Expr>,
    pub bexprs: Vec<BExpr>,
    pub stmts: Vec<Stmt>,
    pub body: StmtId,
    pub num_vars: u32,
    pub param_kinds: Vec<ParamKind>,
}

impl Program {
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn bexpr(&self, id: BExprId) -> &BExpr {
        &self.bexprs[id.0 as usize]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }
}

enum Frame {
    If {
        cond: CExpr,
        then_stmt: Option<StmtId>,
    },
    Where {
        cond: BExprId,
        then_stmt: Option<StmtId>,
    },
    While {
        cond: CExpr,
    },
    For {
        cond: CExpr,
        inc: Option<StmtId>,
    },
}

struct CompileState {
    exprs: Vec<Expr>,
    bexprs: Vec<BExpr>,
    stmts: Vec<Stmt>,
    stmt_stack: Vec<StmtId>,
    control_stack: Vec<Frame>,
    next_var: VarId,
    param_kinds: Vec<ParamKind>,
}

thread_local! {
    static STATE: RefCell<Option<CompileState>> = const { RefCell::new(None) };
}

fn with<R>(f: impl FnOnce(&mut CompileState) -> R) -> R {
    STATE.with(|s| {
        let mut borrow = s.borrow_mut();
        let state = borrow
            .as_mut()
            .expect("qpukit DSL used outside a kernel compilation");
        f(state)
    })
}

/// Start a fresh compilation on this thread. The two reserved variables
/// (QPU id, QPU count) are allocated first and loaded from the uniform FIFO.
pub(crate) fn begin_compile() {
    STATE.with(|s| {
        let mut borrow = s.borrow_mut();
        assert!(
            borrow.is_none(),
            "a kernel compilation is already in progress on this thread"
        );
        let mut state = CompileState {
            exprs: Vec::new(),
            bexprs: Vec::new(),
            stmts: Vec::new(),
            stmt_stack: Vec::new(),
            control_stack: Vec::new(),
            next_var: 0,
            param_kinds: Vec::new(),
        };
        let skip = StmtId(0);
        state.stmts.push(Stmt::Skip);
        state.stmt_stack.push(skip);
        *borrow = Some(state);
    });

    // Reserved general-purpose variables, always the first two uniforms.
    let qpu_id = Int::new();
    qpu_id.set(uniform_int());
    let qpu_count = Int::new();
    qpu_count.set(uniform_int());
}

/// Finish the current compilation and hand back the program.
pub(crate) fn finish_compile() -> Program {
    STATE.with(|s| {
        let state = s
            .borrow_mut()
            .take()
            .expect("finish_compile without begin_compile");
        assert!(
            state.control_stack.is_empty(),
            "kernel ended inside an open If/Where/While/For (missing end())"
        );
        assert_eq!(state.stmt_stack.len(), 1, "unbalanced statement stack");
        Program {
            body: state.stmt_stack[0],
            exprs: state.exprs,
            bexprs: state.bexprs,
            stmts: state.stmts,
            num_vars: state.next_var,
            param_kinds: state.param_kinds,
        }
    })
}

fn add_expr(e: Expr) -> ExprId {
    with(|s| {
        s.exprs.push(e);
        ExprId((s.exprs.len() - 1) as u32)
    })
}

fn add_bexpr(b: BExpr) -> BExprId {
    with(|s| {
        s.bexprs.push(b);
        BExprId((s.bexprs.len() - 1) as u32)
    })
}

fn fresh_var() -> VarId {
    with(|s| {
        let v = s.next_var;
        s.next_var += 1;
        v
    })
}

/// Append a statement to the sequence under construction.
fn append(stmt: Stmt) {
    with(|s| {
        s.stmts.push(stmt);
        let id = StmtId((s.stmts.len() - 1) as u32);
        let top = s.stmt_stack.pop().expect("empty statement stack");
        s.stmts.push(Stmt::Seq { s0: top, s1: id });
        s.stmt_stack.push(StmtId((s.stmts.len() - 1) as u32));
    })
}

/// Record an assignment `lhs := rhs`.
pub(crate) fn assign(lhs: ExprId, rhs: ExprId) {
    append(Stmt::Assign { lhs, rhs });
}

// ---------------------------------------------------------------------------
// Integer expressions and variables
// ---------------------------------------------------------------------------

/// An integer vector expression; usable only on the right-hand side.
#[derive(Debug, Clone, Copy)]
pub struct IntExpr {
    expr: ExprId,
}

impl IntExpr {
    pub(crate) fn from_id(expr: ExprId) -> Self {
        IntExpr { expr }
    }

    pub(crate) fn id(self) -> ExprId {
        self.expr
    }
}

/// An integer vector variable; usable on both sides of an assignment.
#[derive(Debug, Clone, Copy)]
pub struct Int {
    expr: ExprId,
}

impl Int {
    /// A fresh, uninitialised variable.
    pub fn new() -> Self {
        let v = fresh_var();
        Int {
            expr: add_expr(Expr::Var(Var::Standard(v))),
        }
    }

    pub fn set(&self, rhs: impl Into<IntExpr>) {
        assign(self.expr, rhs.into().id());
    }

    pub fn to_expr(self) -> IntExpr {
        IntExpr { expr: self.expr }
    }

    pub(crate) fn id(self) -> ExprId {
        self.expr
    }
}

impl Default for Int {
    fn default() -> Self {
        Int::new()
    }
}

impl From<i32> for IntExpr {
    fn from(x: i32) -> Self {
        IntExpr {
            expr: add_expr(Expr::IntLit(x)),
        }
    }
}

impl From<Int> for IntExpr {
    fn from(x: Int) -> Self {
        x.to_expr()
    }
}

impl From<i32> for Int {
    fn from(x: i32) -> Self {
        let v = Int::new();
        v.set(IntExpr::from(x));
        v
    }
}

impl From<IntExpr> for Int {
    fn from(e: IntExpr) -> Self {
        let v = Int::new();
        v.set(e);
        v
    }
}

fn int_apply(lhs: IntExpr, id: OpId, rhs: IntExpr) -> IntExpr {
    IntExpr {
        expr: add_expr(Expr::Apply {
            lhs: lhs.id(),
            op: Op::new(id, BaseType::Int),
            rhs: rhs.id(),
        }),
    }
}

macro_rules! int_binop {
    ($trait:ident, $method:ident, $opid:expr) => {
        impl<R: Into<IntExpr>> std::ops::$trait<R> for IntExpr {
            type Output = IntExpr;
            fn $method(self, rhs: R) -> IntExpr {
                int_apply(self, $opid, rhs.into())
            }
        }
        impl<R: Into<IntExpr>> std::ops::$trait<R> for Int {
            type Output = IntExpr;
            fn $method(self, rhs: R) -> IntExpr {
                int_apply(self.to_expr(), $opid, rhs.into())
            }
        }
    };
}

int_binop!(Add, add, OpId::Add);
int_binop!(Sub, sub, OpId::Sub);
int_binop!(Mul, mul, OpId::Mul);
int_binop!(Shl, shl, OpId::Shl);
int_binop!(Shr, shr, OpId::Shr);
int_binop!(BitAnd, bitand, OpId::BAnd);
int_binop!(BitOr, bitor, OpId::BOr);
int_binop!(BitXor, bitxor, OpId::BXor);

impl std::ops::Not for IntExpr {
    type Output = IntExpr;
    fn not(self) -> IntExpr {
        IntExpr {
            expr: add_expr(Expr::ApplyUnary {
                op: Op::new(OpId::BNot, BaseType::Int),
                rhs: self.id(),
            }),
        }
    }
}

impl std::ops::Not for Int {
    type Output = IntExpr;
    fn not(self) -> IntExpr {
        !self.to_expr()
    }
}

impl<R: Into<IntExpr>> std::ops::AddAssign<R> for Int {
    fn add_assign(&mut self, rhs: R) {
        let e = self.to_expr() + rhs;
        self.set(e);
    }
}

impl<R: Into<IntExpr>> std::ops::SubAssign<R> for Int {
    fn sub_assign(&mut self, rhs: R) {
        let e = self.to_expr() - rhs;
        self.set(e);
    }
}

fn int_cmp(lhs: IntExpr, id: CmpId, rhs: IntExpr) -> BoolExpr {
    BoolExpr {
        bexpr: add_bexpr(BExpr::Cmp {
            lhs: lhs.id(),
            op: CmpOp {
                id,
                ty: BaseType::Int,
            },
            rhs: rhs.id(),
        }),
    }
}

macro_rules! int_cmp_methods {
    ($ty:ident) => {
        impl $ty {
            pub fn eq(self, rhs: impl Into<IntExpr>) -> BoolExpr {
                int_cmp(self.into(), CmpId::Eq, rhs.into())
            }
            pub fn ne(self, rhs: impl Into<IntExpr>) -> BoolExpr {
                int_cmp(self.into(), CmpId::Neq, rhs.into())
            }
            pub fn lt(self, rhs: impl Into<IntExpr>) -> BoolExpr {
                int_cmp(self.into(), CmpId::Lt, rhs.into())
            }
            pub fn le(self, rhs: impl Into<IntExpr>) -> BoolExpr {
                int_cmp(self.into(), CmpId::Le, rhs.into())
            }
            pub fn gt(self, rhs: impl Into<IntExpr>) -> BoolExpr {
                int_cmp(self.into(), CmpId::Gt, rhs.into())
            }
            pub fn ge(self, rhs: impl Into<IntExpr>) -> BoolExpr {
                int_cmp(self.into(), CmpId::Ge, rhs.into())
            }
            pub fn min(self, rhs: impl Into<IntExpr>) -> IntExpr {
                int_apply(self.into(), OpId::Min, rhs.into())
            }
            pub fn max(self, rhs: impl Into<IntExpr>) -> IntExpr {
                int_apply(self.into(), OpId::Max, rhs.into())
            }
            /// Logical (unsigned) shift right; `>>` is the arithmetic shift.
            pub fn ushr(self, rhs: impl Into<IntExpr>) -> IntExpr {
                int_apply(self.into(), OpId::Ushr, rhs.into())
            }
            pub fn ror(self, rhs: impl Into<IntExpr>) -> IntExpr {
                int_apply(self.into(), OpId::Ror, rhs.into())
            }
        }
    };
}

int_cmp_methods!(IntExpr);
int_cmp_methods!(Int);

// ---------------------------------------------------------------------------
// Float expressions and variables
// ---------------------------------------------------------------------------

/// A float vector expression; usable only on the right-hand side.
#[derive(Debug, Clone, Copy)]
pub struct FloatExpr {
    expr: ExprId,
}

impl FloatExpr {
    pub(crate) fn from_id(expr: ExprId) -> Self {
        FloatExpr { expr }
    }

    pub(crate) fn id(self) -> ExprId {
        self.expr
    }
}

/// A float vector variable.
#[derive(Debug, Clone, Copy)]
pub struct Float {
    expr: ExprId,
}

impl Float {
    pub fn new() -> Self {
        let v = fresh_var();
        Float {
            expr: add_expr(Expr::Var(Var::Standard(v))),
        }
    }

    pub fn set(&self, rhs: impl Into<FloatExpr>) {
        assign(self.expr, rhs.into().id());
    }

    pub fn to_expr(self) -> FloatExpr {
        FloatExpr { expr: self.expr }
    }
}

impl Default for Float {
    fn default() -> Self {
        Float::new()
    }
}

impl From<f32> for FloatExpr {
    fn from(x: f32) -> Self {
        FloatExpr {
            expr: add_expr(Expr::FloatLit(x)),
        }
    }
}

impl From<Float> for FloatExpr {
    fn from(x: Float) -> Self {
        x.to_expr()
    }
}

impl From<f32> for Float {
    fn from(x: f32) -> Self {
        let v = Float::new();
        v.set(FloatExpr::from(x));
        v
    }
}

impl From<FloatExpr> for Float {
    fn from(e: FloatExpr) -> Self {
        let v = Float::new();
        v.set(e);
        v
    }
}

fn float_apply(lhs: FloatExpr, id: OpId, rhs: FloatExpr) -> FloatExpr {
    FloatExpr {
        expr: add_expr(Expr::Apply {
            lhs: lhs.id(),
            op: Op::new(id, BaseType::Float),
            rhs: rhs.id(),
        }),
    }
}

fn float_apply_unary(id: OpId, rhs: FloatExpr) -> FloatExpr {
    FloatExpr {
        expr: add_expr(Expr::ApplyUnary {
            op: Op::new(id, BaseType::Float),
            rhs: rhs.id(),
        }),
    }
}

macro_rules! float_binop {
    ($trait:ident, $method:ident, $opid:expr) => {
        impl<R: Into<FloatExpr>> std::ops::$trait<R> for FloatExpr {
            type Output = FloatExpr;
            fn $method(self, rhs: R) -> FloatExpr {
                float_apply(self, $opid, rhs.into())
            }
        }
        impl<R: Into<FloatExpr>> std::ops::$trait<R> for Float {
            type Output = FloatExpr;
            fn $method(self, rhs: R) -> FloatExpr {
                float_apply(self.to_expr(), $opid, rhs.into())
            }
        }
    };
}

float_binop!(Add, add, OpId::Add);
float_binop!(Sub, sub, OpId::Sub);
float_binop!(Mul, mul, OpId::Mul);

impl<R: Into<FloatExpr>> std::ops::AddAssign<R> for Float {
    fn add_assign(&mut self, rhs: R) {
        let e = self.to_expr() + rhs;
        self.set(e);
    }
}

fn float_cmp(lhs: FloatExpr, id: CmpId, rhs: FloatExpr) -> BoolExpr {
    BoolExpr {
        bexpr: add_bexpr(BExpr::Cmp {
            lhs: lhs.id(),
            op: CmpOp {
                id,
                ty: BaseType::Float,
            },
            rhs: rhs.id(),
        }),
    }
}

macro_rules! float_cmp_methods {
    ($ty:ident) => {
        impl $ty {
            pub fn eq(self, rhs: impl Into<FloatExpr>) -> BoolExpr {
                float_cmp(self.into(), CmpId::Eq, rhs.into())
            }
            pub fn ne(self, rhs: impl Into<FloatExpr>) -> BoolExpr {
                float_cmp(self.into(), CmpId::Neq, rhs.into())
            }
            pub fn lt(self, rhs: impl Into<FloatExpr>) -> BoolExpr {
                float_cmp(self.into(), CmpId::Lt, rhs.into())
            }
            pub fn le(self, rhs: impl Into<FloatExpr>) -> BoolExpr {
                float_cmp(self.into(), CmpId::Le, rhs.into())
            }
            pub fn gt(self, rhs: impl Into<FloatExpr>) -> BoolExpr {
                float_cmp(self.into(), CmpId::Gt, rhs.into())
            }
            pub fn ge(self, rhs: impl Into<FloatExpr>) -> BoolExpr {
                float_cmp(self.into(), CmpId::Ge, rhs.into())
            }
            pub fn min(self, rhs: impl Into<FloatExpr>) -> FloatExpr {
                float_apply(self.into(), OpId::Min, rhs.into())
            }
            pub fn max(self, rhs: impl Into<FloatExpr>) -> FloatExpr {
                float_apply(self.into(), OpId::Max, rhs.into())
            }
        }
    };
}

float_cmp_methods!(FloatExpr);
float_cmp_methods!(Float);

// SFU functions.

pub fn recip(x: impl Into<FloatExpr>) -> FloatExpr {
    float_apply_unary(OpId::Recip, x.into())
}

pub fn recipsqrt(x: impl Into<FloatExpr>) -> FloatExpr {
    float_apply_unary(OpId::RecipSqrt, x.into())
}

/// Base-2 exponential.
pub fn exp(x: impl Into<FloatExpr>) -> FloatExpr {
    float_apply_unary(OpId::Exp, x.into())
}

/// Base-2 logarithm.
pub fn log(x: impl Into<FloatExpr>) -> FloatExpr {
    float_apply_unary(OpId::Log, x.into())
}

// Conversions.

pub fn to_float(a: impl Into<IntExpr>) -> FloatExpr {
    FloatExpr {
        expr: add_expr(Expr::ApplyUnary {
            op: Op::new(OpId::ItoF, BaseType::Float),
            rhs: a.into().id(),
        }),
    }
}

pub fn to_int(a: impl Into<FloatExpr>) -> IntExpr {
    IntExpr {
        expr: add_expr(Expr::ApplyUnary {
            op: Op::new(OpId::FtoI, BaseType::Int),
            rhs: a.into().id(),
        }),
    }
}

/// Rotate the 16-lane vector `a` right by `n` lanes.
pub fn rotate(a: impl Into<IntExpr>, n: impl Into<IntExpr>) -> IntExpr {
    int_apply(a.into(), OpId::Rotate, n.into())
}

pub fn rotate_float(a: impl Into<FloatExpr>, n: impl Into<IntExpr>) -> FloatExpr {
    FloatExpr {
        expr: add_expr(Expr::Apply {
            lhs: a.into().id(),
            op: Op::new(OpId::Rotate, BaseType::Float),
            rhs: n.into().id(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Hardware-backed expressions
// ---------------------------------------------------------------------------

/// The per-lane element index `<0, 1, .., 15>`.
pub fn index() -> IntExpr {
    IntExpr {
        expr: add_expr(Expr::Var(Var::ElemNum)),
    }
}

/// This QPU's index in `[0, num_qpus)`.
pub fn me() -> IntExpr {
    IntExpr {
        expr: add_expr(Expr::Var(Var::Standard(super::expr::RSV_QPU_ID))),
    }
}

/// The number of QPUs the kernel runs on.
pub fn num_qpus() -> IntExpr {
    IntExpr {
        expr: add_expr(Expr::Var(Var::Standard(super::expr::RSV_NUM_QPUS))),
    }
}

pub(crate) fn uniform_int() -> IntExpr {
    IntExpr {
        expr: add_expr(Expr::Var(Var::Uniform)),
    }
}

pub(crate) fn uniform_float() -> FloatExpr {
    FloatExpr {
        expr: add_expr(Expr::Var(Var::Uniform)),
    }
}

/// Read the next vector from the VPM (vc4 only).
pub fn vpm_get_int() -> IntExpr {
    IntExpr {
        expr: add_expr(Expr::Var(Var::VpmRead)),
    }
}

/// Write a vector to the VPM (vc4 only).
pub fn vpm_put(data: impl Into<IntExpr>) {
    let lhs = add_expr(Expr::Var(Var::VpmWrite));
    assign(lhs, data.into().id());
}

// ---------------------------------------------------------------------------
// Pointers
// ---------------------------------------------------------------------------

/// Marker trait tying a variable type to its expression type.
pub trait Elem: Copy {
    type ExprT: Copy;
    fn expr_from_id(e: ExprId) -> Self::ExprT;
    fn expr_to_id(e: Self::ExprT) -> ExprId;
}

impl Elem for Int {
    type ExprT = IntExpr;
    fn expr_from_id(e: ExprId) -> IntExpr {
        IntExpr::from_id(e)
    }
    fn expr_to_id(e: IntExpr) -> ExprId {
        e.id()
    }
}

impl Elem for Float {
    type ExprT = FloatExpr;
    fn expr_from_id(e: ExprId) -> FloatExpr {
        FloatExpr::from_id(e)
    }
    fn expr_to_id(e: FloatExpr) -> ExprId {
        e.id()
    }
}

/// A 16-lane pointer expression.
#[derive(Debug)]
pub struct PtrExpr<T: Elem> {
    expr: ExprId,
    _marker: PhantomData<T>,
}

impl<T: Elem> Clone for PtrExpr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Elem> Copy for PtrExpr<T> {}

impl<T: Elem> PtrExpr<T> {
    pub(crate) fn id(self) -> ExprId {
        self.expr
    }
}

/// A 16-lane pointer variable; one device address per lane.
#[derive(Debug)]
pub struct Ptr<T: Elem> {
    expr: ExprId,
    _marker: PhantomData<T>,
}

impl<T: Elem> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Elem> Copy for Ptr<T> {}

/// Pointer arithmetic is in elements; the byte scaling (`<< 2`) is built
/// into the expression here so the lowerer sees plain integer arithmetic.
fn ptr_offset(base: ExprId, n: IntExpr) -> ExprId {
    let scaled = add_expr(Expr::Apply {
        lhs: n.id(),
        op: Op::new(OpId::Shl, BaseType::Int),
        rhs: add_expr(Expr::IntLit(2)),
    });
    add_expr(Expr::Apply {
        lhs: base,
        op: Op::new(OpId::Add, BaseType::Int),
        rhs: scaled,
    })
}

impl<T: Elem> Ptr<T> {
    pub fn new() -> Self {
        let v = fresh_var();
        Ptr {
            expr: add_expr(Expr::Var(Var::Standard(v))),
            _marker: PhantomData,
        }
    }

    pub fn set(&self, rhs: impl Into<PtrExpr<T>>) {
        assign(self.expr, rhs.into().id());
    }

    pub fn to_expr(self) -> PtrExpr<T> {
        PtrExpr {
            expr: self.expr,
            _marker: PhantomData,
        }
    }

    /// The dereference `*p`.
    pub fn deref(self) -> DerefRef<T> {
        DerefRef {
            expr: add_expr(Expr::Deref(self.expr)),
            _marker: PhantomData,
        }
    }

    /// The indexed dereference `p[i]` (in elements).
    pub fn at(self, i: impl Into<IntExpr>) -> DerefRef<T> {
        let addr = ptr_offset(self.expr, i.into());
        DerefRef {
            expr: add_expr(Expr::Deref(addr)),
            _marker: PhantomData,
        }
    }

    pub(crate) fn id(self) -> ExprId {
        self.expr
    }
}

impl<T: Elem> Default for Ptr<T> {
    fn default() -> Self {
        Ptr::new()
    }
}

impl<T: Elem> From<Ptr<T>> for PtrExpr<T> {
    fn from(p: Ptr<T>) -> Self {
        p.to_expr()
    }
}

impl<T: Elem, R: Into<IntExpr>> std::ops::Add<R> for Ptr<T> {
    type Output = PtrExpr<T>;
    fn add(self, rhs: R) -> PtrExpr<T> {
        PtrExpr {
            expr: ptr_offset(self.expr, rhs.into()),
            _marker: PhantomData,
        }
    }
}

impl<T: Elem, R: Into<IntExpr>> std::ops::Add<R> for PtrExpr<T> {
    type Output = PtrExpr<T>;
    fn add(self, rhs: R) -> PtrExpr<T> {
        PtrExpr {
            expr: ptr_offset(self.expr, rhs.into()),
            _marker: PhantomData,
        }
    }
}

impl<T: Elem, R: Into<IntExpr>> std::ops::AddAssign<R> for Ptr<T> {
    fn add_assign(&mut self, rhs: R) {
        let e = *self + rhs;
        self.set(e);
    }
}

/// Proxy for a dereferenced location: read with [`DerefRef::get`], write
/// with [`DerefRef::set`].
#[derive(Debug)]
pub struct DerefRef<T: Elem> {
    expr: ExprId,
    _marker: PhantomData<T>,
}

impl<T: Elem> Clone for DerefRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Elem> Copy for DerefRef<T> {}

impl<T: Elem> DerefRef<T> {
    pub fn get(self) -> T::ExprT {
        T::expr_from_id(self.expr)
    }

    pub fn set(self, rhs: impl Into<T::ExprT>) {
        assign(self.expr, T::expr_to_id(rhs.into()));
    }
}

impl From<DerefRef<Int>> for IntExpr {
    fn from(d: DerefRef<Int>) -> Self {
        d.get()
    }
}

impl From<DerefRef<Float>> for FloatExpr {
    fn from(d: DerefRef<Float>) -> Self {
        d.get()
    }
}

impl From<DerefRef<Int>> for Int {
    fn from(d: DerefRef<Int>) -> Self {
        Int::from(d.get())
    }
}

impl From<DerefRef<Float>> for Float {
    fn from(d: DerefRef<Float>) -> Self {
        Float::from(d.get())
    }
}

// ---------------------------------------------------------------------------
// Boolean and conditional expressions
// ---------------------------------------------------------------------------

/// A per-lane boolean expression, built by the comparison methods.
#[derive(Debug, Clone, Copy)]
pub struct BoolExpr {
    bexpr: BExprId,
}

impl BoolExpr {
    pub(crate) fn id(self) -> BExprId {
        self.bexpr
    }
}

impl std::ops::BitAnd for BoolExpr {
    type Output = BoolExpr;
    fn bitand(self, rhs: BoolExpr) -> BoolExpr {
        BoolExpr {
            bexpr: add_bexpr(BExpr::And(self.bexpr, rhs.bexpr)),
        }
    }
}

impl std::ops::BitOr for BoolExpr {
    type Output = BoolExpr;
    fn bitor(self, rhs: BoolExpr) -> BoolExpr {
        BoolExpr {
            bexpr: add_bexpr(BExpr::Or(self.bexpr, rhs.bexpr)),
        }
    }
}

impl std::ops::Not for BoolExpr {
    type Output = BoolExpr;
    fn not(self) -> BoolExpr {
        BoolExpr {
            bexpr: add_bexpr(BExpr::Not(self.bexpr)),
        }
    }
}

/// A whole-vector condition for `if_`/`while_`/`for_`.
#[derive(Debug, Clone, Copy)]
pub struct Cond {
    pub(crate) cexpr: CExpr,
}

pub fn any(b: BoolExpr) -> Cond {
    Cond {
        cexpr: CExpr {
            quant: CQuant::Any,
            bexpr: b.id(),
        },
    }
}

pub fn all(b: BoolExpr) -> Cond {
    Cond {
        cexpr: CExpr {
            quant: CQuant::All,
            bexpr: b.id(),
        },
    }
}

/// A bare boolean in `if_` position means `any`.
impl From<BoolExpr> for Cond {
    fn from(b: BoolExpr) -> Self {
        any(b)
    }
}

// ---------------------------------------------------------------------------
// Scoped statement builders
// ---------------------------------------------------------------------------

fn push_scope(frame: Frame) {
    with(|s| {
        s.control_stack.push(frame);
        s.stmts.push(Stmt::Skip);
        s.stmt_stack.push(StmtId((s.stmts.len() - 1) as u32));
    })
}

pub fn if_(cond: impl Into<Cond>) {
    push_scope(Frame::If {
        cond: cond.into().cexpr,
        then_stmt: None,
    });
}

pub fn where_(cond: BoolExpr) {
    push_scope(Frame::Where {
        cond: cond.id(),
        then_stmt: None,
    });
}

pub fn while_(cond: impl Into<Cond>) {
    push_scope(Frame::While {
        cond: cond.into().cexpr,
    });
}

/// Open a `for` loop. Statements up to [`for_body`] form the increment;
/// statements after it form the body. Close with [`end`].
pub fn for_(cond: impl Into<Cond>) {
    push_scope(Frame::For {
        cond: cond.into().cexpr,
        inc: None,
    });
}

/// Separate the increment section of an open `for_` from its body.
pub fn for_body() {
    with(|s| {
        let frame = s
            .control_stack
            .last_mut()
            .expect("for_body() outside any for_");
        match frame {
            Frame::For { inc, .. } if inc.is_none() => {
                *inc = Some(s.stmt_stack.pop().expect("empty statement stack"));
                s.stmts.push(Stmt::Skip);
                s.stmt_stack.push(StmtId((s.stmts.len() - 1) as u32));
            }
            _ => panic!("for_body() does not match an open for_"),
        }
    })
}

/// Start the else-branch of the innermost open `if_` or `where_`.
pub fn else_() {
    with(|s| {
        let frame = s.control_stack.last_mut().expect("else_() outside any scope");
        let then = s.stmt_stack.pop().expect("empty statement stack");
        match frame {
            Frame::If { then_stmt, .. } | Frame::Where { then_stmt, .. }
                if then_stmt.is_none() =>
            {
                *then_stmt = Some(then);
            }
            _ => panic!("else_() does not match an open if_/where_"),
        }
        s.stmts.push(Stmt::Skip);
        s.stmt_stack.push(StmtId((s.stmts.len() - 1) as u32));
    })
}

/// Close the innermost open scope and splice the synthesised statement into
/// the enclosing sequence.
pub fn end() {
    with(|s| {
        let frame = s.control_stack.pop().expect("end() without an open scope");
        let tail = s.stmt_stack.pop().expect("empty statement stack");
        let stmt = match frame {
            Frame::If { cond, then_stmt } => match then_stmt {
                Some(then) => Stmt::If {
                    cond,
                    then_stmt: then,
                    else_stmt: Some(tail),
                },
                None => Stmt::If {
                    cond,
                    then_stmt: tail,
                    else_stmt: None,
                },
            },
            Frame::Where { cond, then_stmt } => match then_stmt {
                Some(then) => Stmt::Where {
                    cond,
                    then_stmt: then,
                    else_stmt: Some(tail),
                },
                None => Stmt::Where {
                    cond,
                    then_stmt: tail,
                    else_stmt: None,
                },
            },
            Frame::While { cond } => Stmt::While { cond, body: tail },
            Frame::For { cond, inc } => Stmt::For {
                cond,
                inc: inc.expect("for_ closed without for_body()"),
                body: tail,
            },
        };
        s.stmts.push(stmt);
        let id = StmtId((s.stmts.len() - 1) as u32);
        let top = s.stmt_stack.pop().expect("empty statement stack");
        s.stmts.push(Stmt::Seq { s0: top, s1: id });
        s.stmt_stack.push(StmtId((s.stmts.len() - 1) as u32));
    })
}

// ---------------------------------------------------------------------------
// Memory, semaphore and print statements
// ---------------------------------------------------------------------------

/// Request a store of `data` to the per-lane addresses in `addr`.
pub fn store<T: Elem>(data: impl Into<T::ExprT>, addr: impl Into<PtrExpr<T>>) {
    append(Stmt::StoreRequest {
        data: T::expr_to_id(data.into()),
        addr: addr.into().id(),
    });
}

/// Issue a TMU fetch; pair with [`receive`].
pub fn gather<T: Elem>(addr: impl Into<PtrExpr<T>>) {
    append(Stmt::Gather {
        addr: addr.into().id(),
    });
}

/// Receive the oldest outstanding TMU fetch into `dest`.
pub fn receive_int(dest: Int) {
    append(Stmt::LoadReceive { dest: dest.id() });
}

pub fn receive_float(dest: Float) {
    append(Stmt::LoadReceive {
        dest: dest.to_expr().id(),
    });
}

pub fn sema_inc(id: u8) {
    assert!(id < 16, "semaphore id out of range");
    append(Stmt::SemaInc(id));
}

pub fn sema_dec(id: u8) {
    assert!(id < 16, "semaphore id out of range");
    append(Stmt::SemaDec(id));
}

pub fn host_irq() {
    append(Stmt::SendIrqToHost);
}

pub fn print_str(s: &str) {
    append(Stmt::PrintStr(s.to_string()));
}

pub fn print_int(e: impl Into<IntExpr>) {
    append(Stmt::PrintInt(e.into().id()));
}

pub fn print_float(e: impl Into<FloatExpr>) {
    append(Stmt::PrintFloat(e.into().id()));
}

// vc4-only DMA/VPM statements.

pub fn set_read_stride(e: impl Into<IntExpr>) {
    append(Stmt::SetReadStride(e.into().id()));
}

pub fn set_write_stride(e: impl Into<IntExpr>) {
    append(Stmt::SetWriteStride(e.into().id()));
}

pub fn setup_vpm_read(num_vecs: i32, addr: impl Into<IntExpr>, horizontal: bool, stride: i32) {
    append(Stmt::SetupVpmRead {
        num_vecs,
        addr: addr.into().id(),
        horizontal,
        stride,
    });
}

pub fn setup_vpm_write(addr: impl Into<IntExpr>, horizontal: bool, stride: i32) {
    append(Stmt::SetupVpmWrite {
        addr: addr.into().id(),
        horizontal,
        stride,
    });
}

pub fn setup_dma_read(
    num_rows: i32,
    row_len: i32,
    horizontal: bool,
    vpitch: i32,
    vpm_addr: impl Into<IntExpr>,
) {
    append(Stmt::SetupDmaRead {
        num_rows,
        row_len,
        horizontal,
        vpitch,
        vpm_addr: vpm_addr.into().id(),
    });
}

pub fn setup_dma_write(
    num_rows: i32,
    row_len: i32,
    horizontal: bool,
    vpm_addr: impl Into<IntExpr>,
) {
    append(Stmt::SetupDmaWrite {
        num_rows,
        row_len,
        horizontal,
        vpm_addr: vpm_addr.into().id(),
    });
}

pub fn dma_start_read<T: Elem>(addr: impl Into<PtrExpr<T>>) {
    append(Stmt::DmaStartRead(addr.into().id()));
}

pub fn dma_start_write<T: Elem>(addr: impl Into<PtrExpr<T>>) {
    append(Stmt::DmaStartWrite(addr.into().id()));
}

pub fn dma_read_wait() {
    append(Stmt::DmaReadWait);
}

pub fn dma_write_wait() {
    append(Stmt::DmaWriteWait);
}

// ---------------------------------------------------------------------------
// Kernel parameters
// ---------------------------------------------------------------------------

/// A DSL type usable as a kernel parameter.
pub trait KernelParam: Sized {
    fn fresh_param() -> Self;
    fn kind() -> ParamKind;
}

impl KernelParam for Int {
    fn fresh_param() -> Self {
        let v = Int::new();
        v.set(uniform_int());
        v
    }
    fn kind() -> ParamKind {
        ParamKind::Int
    }
}

impl KernelParam for Float {
    fn fresh_param() -> Self {
        let v = Float::new();
        v.set(uniform_float());
        v
    }
    fn kind() -> ParamKind {
        ParamKind::Float
    }
}

impl<T: Elem> KernelParam for Ptr<T> {
    fn fresh_param() -> Self {
        let v = Ptr::new();
        let uni = add_expr(Expr::Var(Var::Uniform));
        assign(v.id(), uni);
        v
    }
    fn kind() -> ParamKind {
        ParamKind::Ptr
    }
}

/// A tuple of kernel parameters.
pub trait ParamTuple: Sized {
    fn fresh() -> Self;
    fn kinds() -> Vec<ParamKind>;
}

impl ParamTuple for () {
    fn fresh() -> Self {}
    fn kinds() -> Vec<ParamKind> {
        Vec::new()
    }
}

macro_rules! param_tuple {
    ($($name:ident),+) => {
        impl<$($name: KernelParam),+> ParamTuple for ($($name,)+) {
            fn fresh() -> Self {
                ($($name::fresh_param(),)+)
            }
            fn kinds() -> Vec<ParamKind> {
                vec![$($name::kind()),+]
            }
        }
    };
}

param_tuple!(P0);
param_tuple!(P0, P1);
param_tuple!(P0, P1, P2);
param_tuple!(P0, P1, P2, P3);
param_tuple!(P0, P1, P2, P3, P4);
param_tuple!(P0, P1, P2, P3, P4, P5);
param_tuple!(P0, P1, P2, P3, P4, P5, P6);
param_tuple!(P0, P1, P2, P3, P4, P5, P6, P7);

/// Record the parameter kinds for the current compilation.
pub(crate) fn record_param_kinds(kinds: Vec<ParamKind>) {
    with(|s| s.param_kinds = kinds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::stmt::Stmt;

    fn compile_body(f: impl FnOnce()) -> Program {
        begin_compile();
        f();
        finish_compile()
    }

    #[test]
    fn reserved_vars_come_first() {
        let prog = compile_body(|| {});
        assert_eq!(prog.num_vars, 2);
    }

    #[test]
    fn assignment_appends_statement() {
        let prog = compile_body(|| {
            let a = Int::new();
            a.set(index() + 3);
        });
        let has_assign = prog
            .stmts
            .iter()
            .filter(|s| matches!(s, Stmt::Assign { .. }))
            .count();
        // Two reserved uniform loads plus the user assignment.
        assert_eq!(has_assign, 3);
    }

    #[test]
    fn if_else_end_builds_if_node() {
        let prog = compile_body(|| {
            let a = Int::from(index());
            if_(any(a.lt(8)));
            a.set(1);
            else_();
            a.set(0);
            end();
        });
        assert!(prog
            .stmts
            .iter()
            .any(|s| matches!(s, Stmt::If { else_stmt: Some(_), .. })));
    }

    #[test]
    fn for_requires_body_marker() {
        let prog = compile_body(|| {
            let mut n = Int::from(0);
            for_(n.lt(3));
            n += 1;
            for_body();
            print_str("x");
            end();
        });
        assert!(prog.stmts.iter().any(|s| matches!(s, Stmt::For { .. })));
    }

    #[test]
    #[should_panic(expected = "missing end()")]
    fn unbalanced_scope_is_detected() {
        begin_compile();
        if_(any(index().lt(1)));
        let _ = finish_compile();
    }
}
