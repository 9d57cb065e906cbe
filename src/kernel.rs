//! Kernel objects: compile, load, run.
//!
//! A [`Kernel`] owns the source program and its compiled target code for
//! one hardware dialect, selected at compile time by a runtime [`Target`]
//! value. Three sinks exist: `call` (device when present, emulator
//! otherwise), `emu` (target emulator) and `interpret` (source
//! interpreter); the latter two exist for differential testing.

use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;

use crate::driver::{heap, BufferObject, SharedArray};
use crate::error::{QpuError, Result};
use crate::source::build::{self, Float, Int, ParamTuple, Program, Ptr};
use crate::source::{interp, pretty as source_pretty};
use crate::target::emu::emulate;
use crate::target::instr::Instr;
use crate::target::lower::{
    insert_delay_slots, lower_program, resolve_branches, strip_markers,
};
use crate::target::{cfg, pretty as target_pretty};
use crate::{v3d, vc4, Target};

/// A fully compiled kernel body.
#[derive(Debug)]
pub struct CompiledCode {
    pub instrs: Vec<Instr>,
    pub num_vars: u32,
}

/// Run the whole pipeline: lowering, CFG, liveness-directed allocation,
/// delay-slot padding and branch resolution.
pub fn compile_program(prog: &Program, target: Target) -> Result<CompiledCode> {
    let lowered = lower_program(prog, target)?;
    let mut instrs = lowered.instrs;
    let cfg = cfg::build_cfg(&instrs)?;
    match target {
        Target::Vc4 => vc4::regalloc::reg_alloc(&cfg, &mut instrs, lowered.num_vars)?,
        Target::V3d => v3d::regalloc::reg_alloc(&cfg, &mut instrs, lowered.num_vars)?,
    }
    strip_markers(&mut instrs);
    insert_delay_slots(&mut instrs);
    resolve_branches(&mut instrs)?;
    debug!("compiled kernel: {} instructions", instrs.len());
    Ok(CompiledCode {
        instrs,
        num_vars: lowered.num_vars,
    })
}

/// Host value accepted for a kernel parameter of DSL type `P`.
pub trait KernelArg<P> {
    fn append_uniform(&self, uniforms: &mut Vec<i32>);
}

impl KernelArg<Int> for i32 {
    fn append_uniform(&self, uniforms: &mut Vec<i32>) {
        uniforms.push(*self);
    }
}

impl KernelArg<Float> for f32 {
    fn append_uniform(&self, uniforms: &mut Vec<i32>) {
        uniforms.push(self.to_bits() as i32);
    }
}

impl KernelArg<Ptr<Int>> for &SharedArray<i32> {
    fn append_uniform(&self, uniforms: &mut Vec<i32>) {
        uniforms.push(self.address() as i32);
    }
}

impl KernelArg<Ptr<Float>> for &SharedArray<f32> {
    fn append_uniform(&self, uniforms: &mut Vec<i32>) {
        uniforms.push(self.address() as i32);
    }
}

/// Host argument tuple matching a parameter tuple `P`.
pub trait ArgTuple<P> {
    fn append(&self, uniforms: &mut Vec<i32>);
}

impl ArgTuple<()> for () {
    fn append(&self, _uniforms: &mut Vec<i32>) {}
}

macro_rules! arg_tuple {
    ($(($p:ident, $a:ident, $idx:tt)),+) => {
        impl<$($p),+, $($a: KernelArg<$p>),+> ArgTuple<($($p,)+)> for ($($a,)+) {
            fn append(&self, uniforms: &mut Vec<i32>) {
                $(self.$idx.append_uniform(uniforms);)+
            }
        }
    };
}

arg_tuple!((P0, A0, 0));
arg_tuple!((P0, A0, 0), (P1, A1, 1));
arg_tuple!((P0, A0, 0), (P1, A1, 1), (P2, A2, 2));
arg_tuple!((P0, A0, 0), (P1, A1, 1), (P2, A2, 2), (P3, A3, 3));
arg_tuple!((P0, A0, 0), (P1, A1, 1), (P2, A2, 2), (P3, A3, 3), (P4, A4, 4));
arg_tuple!(
    (P0, A0, 0),
    (P1, A1, 1),
    (P2, A2, 2),
    (P3, A3, 3),
    (P4, A4, 4),
    (P5, A5, 5)
);

/// A compiled kernel parameterised over its DSL parameter tuple.
pub struct Kernel<P: ParamTuple> {
    target: Target,
    program: Program,
    code: Vec<Instr>,
    num_qpus: u32,
    params: Vec<i32>,
    _marker: PhantomData<P>,
}

impl<P: ParamTuple> Kernel<P> {
    /// Build the AST by applying `f` to freshly generated parameters, then
    /// compile it for `target`. The kernel exit sequence is appended
    /// automatically.
    pub fn compile(target: Target, f: impl FnOnce(P)) -> Result<Kernel<P>> {
        build::begin_compile();
        let params = P::fresh();
        f(params);
        build::record_param_kinds(P::kinds());
        let program = build::finish_compile();
        let compiled = compile_program(&program, target)?;
        Ok(Kernel {
            target,
            program,
            code: compiled.instrs,
            num_qpus: 1,
            params: Vec::new(),
            _marker: PhantomData,
        })
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn code(&self) -> &[Instr] {
        &self.code
    }

    /// Set the number of QPUs the kernel runs on: 1..=12 on vc4, 1..=8 on
    /// v3d.
    pub fn set_num_qpus(&mut self, n: u32) -> Result<&mut Self> {
        let max = match self.target {
            Target::Vc4 => 12,
            Target::V3d => 8,
        };
        if n < 1 || n > max {
            return Err(QpuError::usage(format!(
                "num_qpus {n} outside 1..={max} for {:?}",
                self.target
            )));
        }
        self.num_qpus = n;
        Ok(self)
    }

    /// Store the uniforms for the next invocation.
    pub fn load<A: ArgTuple<P>>(&mut self, args: A) -> &mut Self {
        self.params.clear();
        args.append(&mut self.params);
        self
    }

    /// The uniform stream: QPU-id placeholder, QPU count, then one word per
    /// parameter, in FIFO order.
    fn uniforms(&self) -> Vec<i32> {
        let mut u = Vec::with_capacity(2 + self.params.len());
        u.push(0);
        u.push(self.num_qpus as i32);
        u.extend_from_slice(&self.params);
        u
    }

    /// The uniform stream packed as little-endian bytes (the wire format).
    pub fn uniform_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for w in self.uniforms() {
            bytes
                .write_i32::<LittleEndian>(w)
                .expect("writing to a Vec cannot fail");
        }
        bytes
    }

    /// Machine code for the kernel's target.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self.target {
            Target::Vc4 => vc4::encode::encode_to_bytes(&self.code),
            Target::V3d => v3d::encode::encode_to_bytes(&self.code),
        }
    }

    /// Invoke on the device when one is present; otherwise encode (so the
    /// machine-code path stays honest) and fall back to the emulator.
    pub fn call(&mut self) -> Result<()> {
        let code = self.encode()?;
        let uniforms = self.uniforms();
        let dispatched = match self.target {
            Target::Vc4 => heap().invoke_vc4(&code, &uniforms, self.num_qpus),
            Target::V3d => heap().invoke_v3d(&code, &uniforms, self.num_qpus),
        };
        match dispatched {
            Ok(()) => Ok(()),
            Err(QpuError::Dispatch { .. }) => self.emu(),
            Err(other) => Err(other),
        }
    }

    /// Run on the target emulator, printing to stdout.
    pub fn emu(&mut self) -> Result<()> {
        let out = self.emu_captured()?;
        std::io::stdout()
            .write_all(&out)
            .map_err(|e| QpuError::dispatch(format!("stdout: {e}")))
    }

    /// Run on the target emulator and capture the output stream.
    pub fn emu_captured(&mut self) -> Result<Vec<u8>> {
        emulate(self.num_qpus, &self.code, &self.uniforms())
    }

    /// Run the source interpreter, printing to stdout.
    pub fn interpret(&mut self) -> Result<()> {
        let out = self.interpret_captured()?;
        std::io::stdout()
            .write_all(&out)
            .map_err(|e| QpuError::dispatch(format!("stdout: {e}")))
    }

    /// Run the source interpreter and capture the output stream.
    pub fn interpret_captured(&mut self) -> Result<Vec<u8>> {
        interp::interpret(self.num_qpus, &self.program, &self.uniforms())
    }

    /// Dump the source and target code, to stdout or to `path`.
    pub fn pretty(&self, path: Option<&Path>) -> Result<()> {
        let mut text = String::new();
        text.push_str("Source code\n===========\n\n");
        text.push_str(&source_pretty::pretty(&self.program));
        text.push_str("\nTarget code\n===========\n\n");
        text.push_str(&target_pretty::mnemonics(&self.code));
        match path {
            None => print!("{text}"),
            Some(p) => std::fs::write(p, text)
                .map_err(|e| QpuError::dispatch(format!("writing {}: {e}", p.display())))?,
        }
        Ok(())
    }
}

/// Compile a kernel function, mirroring the free-standing constructor of
/// the original library.
pub fn compile<P: ParamTuple, F: FnOnce(P)>(target: Target, f: F) -> Result<Kernel<P>> {
    Kernel::compile(target, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::build::{index, Int, Ptr};

    #[test]
    fn num_qpus_is_validated_per_target() {
        let mut k = compile::<(), _>(Target::V3d, |_| {}).unwrap();
        assert!(k.set_num_qpus(8).is_ok());
        assert!(k.set_num_qpus(9).is_err());
        assert!(k.set_num_qpus(0).is_err());

        let mut k = compile::<(), _>(Target::Vc4, |_| {}).unwrap();
        assert!(k.set_num_qpus(12).is_ok());
        assert!(k.set_num_qpus(13).is_err());
    }

    #[test]
    fn uniform_stream_layout() {
        let mut k = compile::<(Int, Int), _>(Target::V3d, |(a, b)| {
            a.set(b + 1);
        })
        .unwrap();
        k.set_num_qpus(4).unwrap();
        k.load((7, 9));
        assert_eq!(k.uniforms(), vec![0, 4, 7, 9]);
        let bytes = k.uniform_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[4..8], &4i32.to_le_bytes());
    }

    #[test]
    fn call_falls_back_to_the_emulator() {
        let array = crate::driver::SharedArray::<i32>::new(16);
        array.fill(0);
        let mut k = compile::<(Ptr<Int>,), _>(Target::V3d, |(p,)| {
            p.deref().set(index());
        })
        .unwrap();
        k.load((&array,)).call().unwrap();
        assert_eq!(array.get(5), 5);
    }
}
