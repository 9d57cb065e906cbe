//! Specification-based differential testing.
//!
//! Generates random kernels, runs them through the source interpreter and
//! through the full compile pipeline plus target emulator, and requires
//! byte-identical output streams. Failures print the offending program and
//! its seed so they reproduce directly.

use qpukit::source::gen::{generate, GenOptions};
use qpukit::source::pretty;
use qpukit::target::emu::emulate;
use qpukit::{compile_program, Target};

const NUM_TESTS: u64 = 2000;

fn uniforms_for(params: &[i32]) -> Vec<i32> {
    let mut u = vec![0, 1];
    u.extend_from_slice(params);
    u
}

#[test]
fn interpreter_and_emulator_agree() {
    let opts = GenOptions::default();

    for seed in 0..NUM_TESTS {
        let (prog, params) = generate(&opts, seed);
        let uniforms = uniforms_for(&params);

        let interp_out =
            qpukit::source::interp::interpret(1, &prog, &uniforms).expect("interpreter");

        for target in [Target::Vc4, Target::V3d] {
            let compiled = compile_program(&prog, target).expect("compile");
            let emu_out = emulate(1, &compiled.instrs, &uniforms).expect("emulate");
            if emu_out != interp_out {
                eprintln!("failed seed {seed} on {target:?}");
                eprintln!("params: {params:?}");
                eprintln!("program:\n{}", pretty::pretty(&prog));
                eprintln!(
                    "interpreter says:\n{}",
                    String::from_utf8_lossy(&interp_out)
                );
                eprintln!("emulator says:\n{}", String::from_utf8_lossy(&emu_out));
                panic!("divergence at seed {seed}");
            }
        }
    }
}

#[test]
fn deeper_programs_agree_too() {
    let opts = GenOptions {
        depth: 4,
        length: 3,
        num_int_args: 2,
        num_int_vars: 3,
        loop_bound: 4,
    };
    for seed in 0..200 {
        let (prog, params) = generate(&opts, 0x8000_0000 + seed);
        let uniforms = uniforms_for(&params);
        let interp_out =
            qpukit::source::interp::interpret(1, &prog, &uniforms).expect("interpreter");
        let compiled = compile_program(&prog, Target::Vc4).expect("compile");
        let emu_out = emulate(1, &compiled.instrs, &uniforms).expect("emulate");
        assert_eq!(
            emu_out,
            interp_out,
            "divergence at deep seed {seed}:\n{}",
            pretty::pretty(&prog)
        );
    }
}
