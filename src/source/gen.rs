//! Random kernel generation for differential testing.
//!
//! Builds programs through the ordinary DSL surface so everything the
//! builder does (reserved variables, parameter uniforms, scope bookkeeping)
//! is exercised too. The generated grammar is deliberately narrow: integer
//! arithmetic, comparisons, `Where`/`If` nesting and bounded loops, with
//! prints as the observable output. Randomness is a seeded xorshift so
//! every failure reproduces from its iteration number.

use super::build::{
    self, all, any, begin_compile, end, finish_compile, for_, for_body, if_, print_int,
    print_str, record_param_kinds, where_, BoolExpr, Int, IntExpr, ParamKind, Program,
};

/// Program-shape knobs, mirroring the original autotest options.
#[derive(Debug, Clone)]
pub struct GenOptions {
    /// Maximum nesting depth of conditional and loop statements.
    pub depth: u32,
    /// Statements per block.
    pub length: u32,
    pub num_int_args: u32,
    pub num_int_vars: u32,
    /// Upper bound for generated loop counters.
    pub loop_bound: i32,
}

impl Default for GenOptions {
    fn default() -> Self {
        GenOptions {
            depth: 3,
            length: 4,
            num_int_args: 4,
            num_int_vars: 4,
            loop_bound: 5,
        }
    }
}

/// 64-bit xorshift; the corpus carries no external RNG crate.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Rng {
        Rng(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u32) -> u32 {
        (self.next() % n as u64) as u32
    }

    fn int_lit(&mut self) -> i32 {
        self.below(101) as i32 - 50
    }
}

/// Generate a program and the host-side values for its integer arguments.
pub fn generate(opts: &GenOptions, seed: u64) -> (Program, Vec<i32>) {
    let mut rng = Rng::new(seed);
    begin_compile();

    let args: Vec<Int> = (0..opts.num_int_args)
        .map(|_| <Int as build::KernelParam>::fresh_param())
        .collect();
    let mut vars: Vec<Int> = (0..opts.num_int_vars).map(|_| Int::from(0)).collect();

    let mut gen = Gen {
        rng: &mut rng,
        opts,
        args,
    };
    gen.block(&mut vars, opts.depth);

    // Observe every variable so divergence anywhere surfaces in the output.
    for (i, v) in vars.iter().enumerate() {
        print_str(&format!("v{i}="));
        print_int(*v);
    }

    record_param_kinds(vec![ParamKind::Int; opts.num_int_args as usize]);
    let prog = finish_compile();
    let params = (0..opts.num_int_args).map(|_| rng.int_lit()).collect();
    (prog, params)
}

struct Gen<'a> {
    rng: &'a mut Rng,
    opts: &'a GenOptions,
    args: Vec<Int>,
}

impl<'a> Gen<'a> {
    fn expr(&mut self, vars: &[Int], depth: u32) -> IntExpr {
        if depth == 0 || self.rng.below(3) == 0 {
            return match self.rng.below(3) {
                0 => IntExpr::from(self.rng.int_lit()),
                1 => vars[self.rng.below(vars.len() as u32) as usize].to_expr(),
                _ => self.args[self.rng.below(self.args.len() as u32) as usize].to_expr(),
            };
        }
        let a = self.expr(vars, depth - 1);
        let b = self.expr(vars, depth - 1);
        match self.rng.below(10) {
            0 => a + b,
            1 => a - b,
            2 => a * b,
            3 => a.min(b),
            4 => a.max(b),
            5 => a << b,
            6 => a >> b,
            7 => a & b,
            8 => a | b,
            _ => a ^ b,
        }
    }

    fn bexpr(&mut self, vars: &[Int], depth: u32) -> BoolExpr {
        if depth == 0 || self.rng.below(2) == 0 {
            let a = self.expr(vars, depth.saturating_sub(1));
            let b = self.expr(vars, depth.saturating_sub(1));
            return match self.rng.below(6) {
                0 => a.eq(b),
                1 => a.ne(b),
                2 => a.lt(b),
                3 => a.le(b),
                4 => a.gt(b),
                _ => a.ge(b),
            };
        }
        match self.rng.below(3) {
            0 => !self.bexpr(vars, depth - 1),
            1 => self.bexpr(vars, depth - 1) & self.bexpr(vars, depth - 1),
            _ => self.bexpr(vars, depth - 1) | self.bexpr(vars, depth - 1),
        }
    }

    fn assignment(&mut self, vars: &mut [Int], depth: u32) {
        let target = self.rng.below(vars.len() as u32) as usize;
        let value = self.expr(vars, depth);
        vars[target].set(value);
    }

    fn block(&mut self, vars: &mut Vec<Int>, depth: u32) {
        for _ in 0..self.opts.length {
            self.statement(vars, depth);
        }
    }

    fn statement(&mut self, vars: &mut Vec<Int>, depth: u32) {
        if depth == 0 {
            self.assignment(vars, 1);
            return;
        }
        match self.rng.below(6) {
            0 | 1 => self.assignment(vars, depth),
            2 => {
                where_(self.bexpr(vars, depth - 1));
                self.assignment(vars, depth - 1);
                if self.rng.below(2) == 0 {
                    build::else_();
                    self.assignment(vars, depth - 1);
                }
                end();
            }
            3 => {
                let cond = self.bexpr(vars, depth - 1);
                if self.rng.below(2) == 0 {
                    if_(any(cond));
                } else {
                    if_(all(cond));
                }
                self.block(vars, depth - 1);
                if self.rng.below(2) == 0 {
                    build::else_();
                    self.block(vars, depth - 1);
                }
                end();
            }
            4 => {
                // A dedicated counter keeps the loop bounded; body
                // assignments never touch it.
                let counter = Int::from(0);
                for_(any(counter.lt(self.opts.loop_bound)));
                counter.set(counter + 1);
                for_body();
                self.block(vars, depth - 1);
                end();
            }
            _ => {
                let v = vars[self.rng.below(vars.len() as u32) as usize];
                print_int(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let opts = GenOptions::default();
        let (p1, a1) = generate(&opts, 7);
        let (p2, a2) = generate(&opts, 7);
        assert_eq!(a1, a2);
        assert_eq!(p1.stmts.len(), p2.stmts.len());
        assert_eq!(p1.num_vars, p2.num_vars);
    }

    #[test]
    fn distinct_seeds_give_distinct_programs() {
        let opts = GenOptions::default();
        let (p1, _) = generate(&opts, 1);
        let (p2, _) = generate(&opts, 2);
        assert!(p1.stmts.len() != p2.stmts.len() || p1.exprs != p2.exprs);
    }

    #[test]
    fn generated_programs_declare_their_args() {
        let opts = GenOptions::default();
        let (prog, params) = generate(&opts, 3);
        assert_eq!(prog.param_kinds.len(), 4);
        assert_eq!(params.len(), 4);
        assert!(prog.param_kinds.iter().all(|k| *k == ParamKind::Int));
    }
}
