//! qpukit - an embedded-DSL compiler and runtime for the Raspberry Pi
//! VideoCore QPUs.
//!
//! Host programs express SIMD kernels over 16-lane integer and float
//! vectors with the types in [`source`]; the pipeline lowers them through
//! an AST, a three-address target IR, a control-flow graph, a
//! liveness-directed register allocator and per-target binary encoders.
//! Kernels run on the vc4 (VideoCore IV) or v3d (VideoCore VI) QPUs, or in
//! the target emulator for testing.
//!
//! # Usage
//!
//! ```no_run
//! use qpukit::{compile, SharedArray, Target};
//! use qpukit::source::{index, Int, Ptr};
//!
//! let array = SharedArray::<i32>::new(16);
//! array.fill(0);
//!
//! let mut kernel = compile::<(Ptr<Int>,), _>(Target::V3d, |(p,)| {
//!     p.deref().set(index());
//! })?;
//! kernel.load((&array,)).call()?;
//! # Ok::<(), qpukit::QpuError>(())
//! ```
//!
//! # Architecture
//!
//! - [`source`] - expression/statement trees, DSL builder, interpreter
//! - [`target`] - target IR, lowering, CFG, liveness, emulator
//! - [`vc4`] / [`v3d`] - per-dialect register allocation and encoding
//! - [`kernel`] - the `Kernel` object and the compile pipeline
//! - [`driver`] - buffer-object service and shared arrays

pub mod driver;
pub mod error;
pub mod kernel;
pub mod source;
pub mod target;
pub mod v3d;
pub mod vc4;
pub mod vector;

pub use driver::{BufferObject, SharedArray};
pub use error::{QpuError, Result};
pub use kernel::{compile, compile_program, CompiledCode, Kernel};

/// Hardware dialect a kernel is compiled for.
///
/// Selected per compilation at runtime; emulation is always available, so
/// both dialects can coexist in one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// VideoCore IV (Raspberry Pi 1-3): two regfiles, VPM/DMA memory path.
    Vc4,
    /// VideoCore VI (Raspberry Pi 4): one regfile, TMU memory path.
    V3d,
}
