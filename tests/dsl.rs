//! DSL end-to-end tests over the compile pipeline and all three sinks.

use qpukit::source::{all, any, else_, end, for_, for_body, if_, index, where_, while_};
use qpukit::source::{BoolExpr, Cond, Float, Int, Ptr};
use qpukit::{compile, Kernel, QpuError, SharedArray, Target};

fn check_vector(result: &SharedArray<i32>, index: u32, expected: &[i32]) {
    assert_eq!(expected.len(), 16);
    let got: Vec<i32> = (0..16).map(|j| result.get(16 * index + j)).collect();
    assert_eq!(got, expected, "result vector {index}");
}

/// Write `res` out and bump the cursor one vector forward.
fn out(res: Int, result: Ptr<Int>) {
    result.deref().set(res);
    result.set(result + 16);
}

fn test_cond(cond: Cond, result: Ptr<Int>) {
    let res = Int::from(-1);
    if_(cond);
    res.set(1);
    else_();
    res.set(0);
    end();
    out(res, result);
}

fn test_where(cond: BoolExpr, result: Ptr<Int>) {
    let res = Int::from(-1);
    where_(cond);
    res.set(1);
    else_();
    res.set(0);
    end();
    out(res, result);
}

/// The conditional battery: every `any`/`all`/bare-`if`/`where` variant.
fn kernel_if_when(result: Ptr<Int>) {
    let a = Int::from(index());

    test_cond(any(a.lt(0)), result);
    test_cond(any(a.lt(8)), result);
    test_cond(any(a.le(0)), result);
    test_cond(any(a.ge(15)), result);
    test_cond(any(a.lt(32)), result);
    test_cond(any(a.gt(32)), result);

    test_cond(all(a.lt(0)), result);
    test_cond(all(a.lt(8)), result);
    test_cond(all(a.le(0)), result);
    test_cond(all(a.ge(15)), result);
    test_cond(all(a.lt(32)), result);
    test_cond(all(a.gt(32)), result);

    // A bare boolean behaves as `any`.
    test_cond(a.lt(0).into(), result);
    test_cond(a.lt(8).into(), result);
    test_cond(a.le(0).into(), result);
    test_cond(a.ge(15).into(), result);
    test_cond(a.lt(32).into(), result);
    test_cond(a.gt(32).into(), result);

    test_where(a.lt(0), result);
    test_where(a.le(0), result);
    test_where(a.ge(15), result);
    test_where(a.lt(8), result);
    test_where(a.ge(8), result);
    test_where(a.lt(32), result);
    test_where(a.gt(32), result);
}

fn check_conditionals(result: &SharedArray<i32>) {
    let zeroes = [0; 16];
    let ones = [1; 16];

    // any
    check_vector(result, 0, &zeroes);
    check_vector(result, 1, &ones);
    check_vector(result, 2, &ones);
    check_vector(result, 3, &ones);
    check_vector(result, 4, &ones);
    check_vector(result, 5, &zeroes);
    // all
    check_vector(result, 6, &zeroes);
    check_vector(result, 7, &zeroes);
    check_vector(result, 8, &zeroes);
    check_vector(result, 9, &zeroes);
    check_vector(result, 10, &ones);
    check_vector(result, 11, &zeroes);
    // bare if, same as any
    check_vector(result, 12, &zeroes);
    check_vector(result, 13, &ones);
    check_vector(result, 14, &ones);
    check_vector(result, 15, &ones);
    check_vector(result, 16, &ones);
    check_vector(result, 17, &zeroes);
    // where
    check_vector(result, 18, &zeroes);
    check_vector(result, 19, &[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    check_vector(result, 20, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    check_vector(result, 21, &[1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
    check_vector(result, 22, &[0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1]);
    check_vector(result, 23, &ones);
    check_vector(result, 24, &zeroes);
}

const COND_VECTORS: u32 = 25;

fn compile_if_when(target: Target) -> Kernel<(Ptr<Int>,)> {
    compile::<(Ptr<Int>,), _>(target, |(p,)| kernel_if_when(p)).unwrap()
}

#[test]
fn conditionals_on_v3d_emulator() {
    let mut k = compile_if_when(Target::V3d);
    let result = SharedArray::<i32>::new(16 * COND_VECTORS);
    result.fill(-2);
    k.load((&result,)).emu_captured().unwrap();
    check_conditionals(&result);
}

#[test]
fn conditionals_on_vc4_emulator() {
    let mut k = compile_if_when(Target::Vc4);
    let result = SharedArray::<i32>::new(16 * COND_VECTORS);
    result.fill(-2);
    k.load((&result,)).emu_captured().unwrap();
    check_conditionals(&result);
}

#[test]
fn conditionals_on_the_interpreter() {
    let mut k = compile_if_when(Target::V3d);
    let result = SharedArray::<i32>::new(16 * COND_VECTORS);
    result.fill(-2);
    k.load((&result,)).interpret_captured().unwrap();
    check_conditionals(&result);
}

#[test]
fn specific_instructions_kernel() {
    // b = index() ^ 1 swaps neighbouring lanes.
    let expected = [1, 0, 3, 2, 5, 4, 7, 6, 9, 8, 11, 10, 13, 12, 15, 14];
    for target in [Target::V3d, Target::Vc4] {
        let mut k = compile::<(Ptr<Int>,), _>(target, |(p,)| {
            let a = Int::from(index());
            let b = Int::from(a ^ 1);
            out(b, p);
        })
        .unwrap();
        let result = SharedArray::<i32>::new(16);
        result.fill(-2);
        k.load((&result,)).emu_captured().unwrap();
        check_vector(&result, 0, &expected);

        result.fill(-2);
        k.load((&result,)).interpret_captured().unwrap();
        check_vector(&result, 0, &expected);

        result.fill(-2);
        k.load((&result,)).call().unwrap();
        check_vector(&result, 0, &expected);
    }
}

#[test]
fn int_ops_kernel() {
    let mut k = compile::<(Ptr<Int>,), _>(Target::V3d, |(p,)| {
        let mut a = Int::from(index());
        a += 3;
        p.deref().set(a);
    })
    .unwrap();
    let result = SharedArray::<i32>::new(16);
    k.load((&result,)).call().unwrap();
    let expected = [3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18];
    check_vector(&result, 0, &expected);
}

#[test]
fn float_ops_kernel() {
    let mut k = compile::<(Ptr<Float>,), _>(Target::V3d, |(p,)| {
        let mut a = Float::from(qpukit::source::to_float(index()));
        a += 3.0;
        a += 0.25;
        p.deref().set(a);
    })
    .unwrap();
    let result = SharedArray::<f32>::new(16);
    k.load((&result,)).call().unwrap();
    for j in 0..16 {
        assert_eq!(result.get(j), j as f32 + 3.25);
    }
}

#[test]
fn nested_for_kernel() {
    const COUNT: i32 = 3;
    let mut k = compile::<(Ptr<Int>,), _>(Target::V3d, |(p,)| {
        let mut x = Int::from(0);

        let n = Int::from(0);
        for_(any(n.lt(COUNT)));
        n.set(n + 1);
        for_body();
        {
            let m = Int::from(0);
            for_(any(m.lt(COUNT)));
            m.set(m + 1);
            for_body();
            x += 1;

            where_((index() & 1).eq(1));
            x += 1;
            end();

            if_(any((m & 1).eq(1)));
            x += 1;
            end();
            end();
        }
        x += 2;
        end();

        p.deref().set(x);
    })
    .unwrap();
    let result = SharedArray::<i32>::new(16);
    k.load((&result,)).emu_captured().unwrap();
    let expected = [18, 27, 18, 27, 18, 27, 18, 27, 18, 27, 18, 27, 18, 27, 18, 27];
    check_vector(&result, 0, &expected);

    result.fill(-2);
    k.load((&result,)).interpret_captured().unwrap();
    check_vector(&result, 0, &expected);
}

#[test]
fn hello_writes_every_qpu_slice() {
    for (target, qpus) in [(Target::V3d, 8u32), (Target::Vc4, 8)] {
        let array = SharedArray::<i32>::new(16 * 8);
        array.fill(100);
        let mut k = compile::<(Ptr<Int>,), _>(target, |(p,)| {
            p.deref().set(1);
        })
        .unwrap();
        k.set_num_qpus(qpus).unwrap();
        k.load((&array,)).emu_captured().unwrap();
        for i in 0..16 * 8 {
            assert_eq!(array.get(i), 1, "word {i} on {target:?}");
        }
    }
}

#[test]
fn tri_kernel_sums_lane_index() {
    for target in [Target::V3d, Target::Vc4] {
        let array = SharedArray::<i32>::new(16);
        for i in 0..16 {
            array.set(i, i as i32);
        }
        let mut k = compile::<(Ptr<Int>,), _>(target, |(p,)| {
            let mut n = Int::from(p.deref().get());
            let mut sum = Int::from(0);
            while_(any(n.gt(0)));
            where_(n.gt(0));
            sum += n;
            n -= 1;
            end();
            end();
            p.deref().set(sum);
        })
        .unwrap();
        k.load((&array,)).emu_captured().unwrap();
        let expected = [0, 1, 3, 6, 10, 15, 21, 28, 36, 45, 55, 66, 78, 91, 105, 120];
        check_vector(&array, 0, &expected);
    }
}

#[test]
fn rot3d_identity_rotation_leaves_vectors_unchanged() {
    let x = SharedArray::<f32>::new(16);
    let y = SharedArray::<f32>::new(16);
    for i in 0..16 {
        x.set(i, i as f32);
        y.set(i, i as f32);
    }
    let mut k = compile::<(Int, Float, Float, Ptr<Float>, Ptr<Float>), _>(
        Target::V3d,
        |(n, cos_t, sin_t, px, py)| {
            let i = Int::from(0);
            for_(all(i.lt(n)));
            i.set(i + 16);
            for_body();
            let x_old = Float::from(px.at(i).get());
            let y_old = Float::from(py.at(i).get());
            px.at(i).set(x_old * cos_t - y_old * sin_t);
            py.at(i).set(y_old * cos_t + x_old * sin_t);
            end();
        },
    )
    .unwrap();
    k.load((16, 1.0f32, 0.0f32, &x, &y)).emu_captured().unwrap();
    for i in 0..16 {
        assert_eq!(x.get(i), i as f32);
        assert_eq!(y.get(i), i as f32);
    }
}

#[test]
fn qpu_ids_are_distinct_for_one_and_eight() {
    for target in [Target::Vc4, Target::V3d] {
        for qpus in [1u32, 8] {
            let array = SharedArray::<i32>::new(16 * qpus);
            array.fill(-1);
            let mut k = compile::<(Ptr<Int>,), _>(target, |(p,)| {
                p.deref().set(qpukit::source::me());
            })
            .unwrap();
            k.set_num_qpus(qpus).unwrap();
            k.load((&array,)).emu_captured().unwrap();
            let mut seen: Vec<i32> = (0..qpus).map(|q| array.get(q * 16)).collect();
            seen.sort_unstable();
            let expected: Vec<i32> = (0..qpus as i32).collect();
            assert_eq!(seen, expected, "{target:?} x{qpus}");
        }
    }
}

#[test]
fn out_of_range_qpu_counts_are_rejected() {
    let mut k = compile::<(), _>(Target::V3d, |_| {}).unwrap();
    assert!(matches!(k.set_num_qpus(9), Err(QpuError::Usage { .. })));
    let mut k = compile::<(), _>(Target::Vc4, |_| {}).unwrap();
    assert!(matches!(k.set_num_qpus(0), Err(QpuError::Usage { .. })));
    assert!(matches!(k.set_num_qpus(13), Err(QpuError::Usage { .. })));
}

#[test]
fn gather_receive_round_trip() {
    let input = SharedArray::<i32>::new(16);
    for i in 0..16 {
        input.set(i, (i * 10) as i32);
    }
    let output = SharedArray::<i32>::new(16);
    output.fill(0);
    let mut k = compile::<(Ptr<Int>, Ptr<Int>), _>(Target::V3d, |(src, dst)| {
        let v = Int::new();
        qpukit::source::gather(src);
        qpukit::source::receive_int(v);
        dst.deref().set(v);
    })
    .unwrap();
    k.load((&input, &output)).emu_captured().unwrap();
    for i in 0..16 {
        assert_eq!(output.get(i), (i * 10) as i32);
    }
}
