//! Target instruction set.
//!
//! A linear three-address IR shared by both hardware dialects. Before
//! register allocation, variables appear as `Reg::A(var_id)`; afterwards
//! every operand is a physical register, a special register, an accumulator
//! or a small immediate.

pub type RegId = u32;
pub type Label = u32;

/// Hardware resources addressable as registers.
///
/// `DmaLdWait` and `DmaStWait` share read address 50 but live in regfiles A
/// and B respectively; the per-file source maps keep them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Special {
    Uniform,
    ElemNum,
    QpuNum,
    VpmRead,
    VpmWrite,
    RdSetup,
    WrSetup,
    DmaLdAddr,
    DmaLdWait,
    DmaStAddr,
    DmaStWait,
    HostInt,
    Tmu0S,
    /// v3d TMU store data register.
    TmuD,
    /// v3d TMU store address register.
    TmuA,
    SfuRecip,
    SfuRecipSqrt,
    SfuExp,
    SfuLog,
}

/// A register reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    /// Regfile A entry; before allocation this is a variable id.
    A(RegId),
    /// Regfile B entry.
    B(RegId),
    /// Accumulator r0..r5. r4 is read-only (TMU/SFU results land there).
    Acc(u8),
    Special(Special),
    /// Write target that discards the result.
    None,
    /// Renaming intermediates used by the allocator rewrite.
    TmpA(RegId),
    TmpB(RegId),
}

pub const ACC0: Reg = Reg::Acc(0);
pub const ACC1: Reg = Reg::Acc(1);
pub const ACC4: Reg = Reg::Acc(4);
pub const ACC5: Reg = Reg::Acc(5);

/// One of the 32 legal vc4 small immediates, `-16..=15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmallImm(i8);

impl SmallImm {
    pub fn new(v: i32) -> Option<SmallImm> {
        if (-16..=15).contains(&v) {
            Some(SmallImm(v as i8))
        } else {
            None
        }
    }

    pub fn value(self) -> i32 {
        self.0 as i32
    }

    /// The 6-bit encoding: non-negative values as-is, negatives biased by 32.
    pub fn encode(self) -> u32 {
        if self.0 >= 0 {
            self.0 as u32
        } else {
            (32 + self.0 as i32) as u32
        }
    }

    pub fn decode(bits: u32) -> Option<SmallImm> {
        match bits {
            0..=15 => Some(SmallImm(bits as i8)),
            16..=31 => Some(SmallImm((bits as i32 - 32) as i8)),
            _ => None,
        }
    }
}

/// An instruction operand: a register or a small immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Reg),
    Imm(SmallImm),
}

impl Operand {
    pub fn reg(self) -> Reg {
        match self {
            Operand::Reg(r) => r,
            Operand::Imm(_) => panic!("operand is an immediate, not a register"),
        }
    }
}

/// Per-lane condition flags produced by flag-setting ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Zero set.
    Zs,
    /// Zero clear.
    Zc,
    /// Negative set.
    Ns,
    /// Negative clear.
    Nc,
}

impl Flag {
    pub fn negate(self) -> Flag {
        match self {
            Flag::Zs => Flag::Zc,
            Flag::Zc => Flag::Zs,
            Flag::Ns => Flag::Nc,
            Flag::Nc => Flag::Ns,
        }
    }
}

/// Assignment condition on ALU and LI instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignCond {
    Never,
    Always,
    Flag(Flag),
}

impl AssignCond {
    pub fn is_always(self) -> bool {
        self == AssignCond::Always
    }
}

/// Branch condition: a flag under a lane quantifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCond {
    Never,
    Always,
    All(Flag),
    Any(Flag),
}

impl BranchCond {
    /// Logical negation, used to derive skip branches.
    pub fn negate(self) -> BranchCond {
        match self {
            BranchCond::Never => BranchCond::Always,
            BranchCond::Always => BranchCond::Never,
            BranchCond::All(f) => BranchCond::Any(f.negate()),
            BranchCond::Any(f) => BranchCond::All(f.negate()),
        }
    }
}

/// ALU operation. The `M`-prefixed entries execute on the multiply unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Nop,
    FAdd,
    FSub,
    FMin,
    FMax,
    FMinAbs,
    FMaxAbs,
    FtoI,
    ItoF,
    Add,
    Sub,
    Shr,
    Asr,
    Ror,
    Shl,
    Min,
    Max,
    BAnd,
    BOr,
    BXor,
    BNot,
    Clz,
    V8Adds,
    V8Subs,
    MFMul,
    MMul24,
    MV8Mul,
    MV8Min,
    MV8Max,
    MV8Adds,
    MV8Subs,
    MRotate,
}

impl AluOp {
    pub fn is_mul(self) -> bool {
        matches!(
            self,
            AluOp::MFMul
                | AluOp::MMul24
                | AluOp::MV8Mul
                | AluOp::MV8Min
                | AluOp::MV8Max
                | AluOp::MV8Adds
                | AluOp::MV8Subs
                | AluOp::MRotate
        )
    }
}

/// Immediate payload of an `LI`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Imm {
    Int(i32),
    Float(f32),
}

impl Imm {
    /// The raw 32-bit pattern loaded into every lane.
    pub fn bits(self) -> i32 {
        match self {
            Imm::Int(i) => i,
            Imm::Float(f) => f.to_bits() as i32,
        }
    }
}

/// A target instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Load immediate into all 16 lanes.
    Li {
        set_flags: bool,
        cond: AssignCond,
        dest: Reg,
        imm: Imm,
    },
    /// Two-operand ALU operation.
    Alu {
        set_flags: bool,
        cond: AssignCond,
        dest: Reg,
        src_a: Operand,
        op: AluOp,
        src_b: Operand,
    },
    /// Branch by instruction offset (resolved form).
    Br { cond: BranchCond, offset: i32 },
    /// Branch to label (pre-resolution form).
    Brl { cond: BranchCond, label: Label },
    /// Label site.
    Lab(Label),
    /// Kernel halt.
    End,
    /// Semaphore increment/decrement.
    SInc(u8),
    SDec(u8),
    /// Move the oldest TMU response into r4.
    Tmu0ToAcc4,
    /// v3d: move the oldest TMU response straight into a regfile slot.
    Recv { dest: Reg },
    DmaLoadWait,
    DmaStoreWait,
    NoOp,
    /// Pseudo-markers bracketing the kernel init block; consumed by the
    /// target lowerer.
    InitBegin,
    InitEnd,
    /// Interrupt the host (expands to an LI of HOST_INT).
    Irq,
    /// Print pseudo-instructions, consumed by the emulator.
    PrintStr(String),
    PrintInt(Reg),
    PrintFloat(Reg),
}

impl Instr {
    /// A plain move: `dest = src` via the bitwise-or identity.
    pub fn mov(dest: Reg, src: Reg) -> Instr {
        Instr::Alu {
            set_flags: false,
            cond: AssignCond::Always,
            dest,
            src_a: Operand::Reg(src),
            op: AluOp::BOr,
            src_b: Operand::Reg(src),
        }
    }

    /// A conditional move.
    pub fn mov_cond(cond: AssignCond, dest: Reg, src: Reg) -> Instr {
        Instr::Alu {
            set_flags: false,
            cond,
            dest,
            src_a: Operand::Reg(src),
            op: AluOp::BOr,
            src_b: Operand::Reg(src),
        }
    }

    /// An unconditional load-immediate.
    pub fn li(dest: Reg, imm: i32) -> Instr {
        Instr::Li {
            set_flags: false,
            cond: AssignCond::Always,
            dest,
            imm: Imm::Int(imm),
        }
    }

    pub fn alu(dest: Reg, src_a: Operand, op: AluOp, src_b: Operand) -> Instr {
        Instr::Alu {
            set_flags: false,
            cond: AssignCond::Always,
            dest,
            src_a,
            op,
            src_b,
        }
    }

    /// True for `mov dest, UNIFORM` instructions (the kernel header).
    pub fn is_uniform_load(&self) -> bool {
        match self {
            Instr::Alu { src_a, .. } => {
                matches!(src_a, Operand::Reg(Reg::Special(Special::Uniform)))
            }
            _ => false,
        }
    }

    /// Labels referenced by this instruction, if any.
    pub fn branch_label(&self) -> Option<Label> {
        match self {
            Instr::Brl { label, .. } => Some(*label),
            _ => None,
        }
    }
}
