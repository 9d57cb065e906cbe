//! Demo driver for the sample kernels.
//!
//! Runs `hello`, `tri` or `rot3d` on the selected target (through the
//! emulator when no QPU hardware is present) and optionally shows the
//! results or the encoded machine code.

use clap::Parser;
use qpukit::source::{all, any, end, for_, for_body, where_, while_, Float, Int, Ptr};
use qpukit::{compile, QpuError, SharedArray, Target};

#[derive(Parser)]
#[command(name = "qpukit")]
#[command(about = "Run qpukit sample kernels", long_about = None)]
struct Cli {
    /// Kernel to run: hello, tri or rot3d
    #[arg(short = 'k', long = "kernel", default_value = "hello")]
    kernel: String,

    /// Number of QPUs to use
    #[arg(short = 'n', long = "num-qpus", default_value_t = 1)]
    num_qpus: u32,

    /// Display the results of the calculation
    #[arg(short = 'd', long = "display")]
    display: bool,

    /// Suppress informational output
    #[arg(long)]
    silent: bool,

    /// Compile the kernel but do not run it
    #[arg(long = "compile-only")]
    compile_only: bool,

    /// Dump the encoded machine code as hex words
    #[arg(long = "output-code")]
    output_code: bool,

    /// Target dialect: vc4 or v3d
    #[arg(long, default_value = "v3d")]
    target: String,
}

fn hello_kernel(p: Ptr<Int>) {
    p.deref().set(1);
}

/// Triangular numbers: every lane sums 1..=n for its own n.
fn tri_kernel(p: Ptr<Int>) {
    let mut n = Int::from(p.deref().get());
    let mut sum = Int::from(0);
    while_(any(n.gt(0)));
    where_(n.gt(0));
    sum += n;
    n -= 1;
    end();
    end();
    p.deref().set(sum);
}

fn rot3d_kernel(n: Int, cos_theta: Float, sin_theta: Float, x: Ptr<Float>, y: Ptr<Float>) {
    let i = Int::from(0);
    for_(all(i.lt(n)));
    i.set(i + 16);
    for_body();
    let x_old = Float::from(x.at(i).get());
    let y_old = Float::from(y.at(i).get());
    x.at(i).set(x_old * cos_theta - y_old * sin_theta);
    y.at(i).set(y_old * cos_theta + x_old * sin_theta);
    end();
}

fn run(cli: &Cli, target: Target) -> Result<(), QpuError> {
    match cli.kernel.as_str() {
        "hello" => {
            let array = SharedArray::<i32>::new(16 * cli.num_qpus);
            array.fill(100);
            let mut k = compile::<(Ptr<Int>,), _>(target, |(p,)| hello_kernel(p))?;
            k.set_num_qpus(cli.num_qpus)?;
            if cli.output_code {
                dump_code(&k.encode()?);
            }
            if cli.compile_only {
                return Ok(());
            }
            k.load((&array,)).call()?;
            if cli.display {
                println!("{:?}", array.to_vec());
            }
        }
        "tri" => {
            let array = SharedArray::<i32>::new(16);
            for i in 0..16 {
                array.set(i, i as i32);
            }
            let mut k = compile::<(Ptr<Int>,), _>(target, |(p,)| tri_kernel(p))?;
            k.set_num_qpus(cli.num_qpus)?;
            if cli.output_code {
                dump_code(&k.encode()?);
            }
            if cli.compile_only {
                return Ok(());
            }
            k.load((&array,)).call()?;
            if cli.display {
                println!("{:?}", array.to_vec());
            }
        }
        "rot3d" => {
            const N: u32 = 192;
            let theta = std::f32::consts::PI / 6.0;
            let x = SharedArray::<f32>::new(N);
            let y = SharedArray::<f32>::new(N);
            for i in 0..N {
                x.set(i, i as f32);
                y.set(i, i as f32);
            }
            let mut k = compile::<(Int, Float, Float, Ptr<Float>, Ptr<Float>), _>(
                target,
                |(n, c, s, px, py)| rot3d_kernel(n, c, s, px, py),
            )?;
            k.set_num_qpus(cli.num_qpus)?;
            if cli.output_code {
                dump_code(&k.encode()?);
            }
            if cli.compile_only {
                return Ok(());
            }
            k.load((N as i32, theta.cos(), theta.sin(), &x, &y)).call()?;
            if cli.display {
                println!("x: {:?}", &x.to_vec()[..16]);
                println!("y: {:?}", &y.to_vec()[..16]);
            }
        }
        other => {
            return Err(QpuError::usage(format!(
                "unknown kernel {other:?}; expected hello, tri or rot3d"
            )))
        }
    }
    Ok(())
}

fn dump_code(bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(8).enumerate() {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        println!("{i:4}: {:016x}", u64::from_le_bytes(word));
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let target = match cli.target.as_str() {
        "vc4" => Target::Vc4,
        "v3d" => Target::V3d,
        other => {
            eprintln!("qpukit: UsageError: unknown target {other:?}");
            std::process::exit(1);
        }
    };
    if !cli.silent {
        eprintln!(
            "running kernel {:?} on {:?} with {} QPU(s)",
            cli.kernel, target, cli.num_qpus
        );
    }
    if let Err(e) = run(&cli, target) {
        eprintln!("qpukit: {e}");
        std::process::exit(1);
    }
}
