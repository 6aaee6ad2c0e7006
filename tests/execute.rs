//! Compile kernels and run every thread of every group in the reference
//! evaluator, then compare the output tensor with a scalar oracle.

use tilejit::ir::eval::Evaluator;
use tilejit::kernel::{BinaryAlg, PostOp, ScaleDesc, Scales};
use tilejit::ir::ScalarType;
use tilejit::{compile, CompileOptions, CompiledKernel, HwConfig, KernelDesc};

/// Small integers, so every sum is exact in f32.
fn data(len: usize, seed: usize) -> Vec<f32> {
    (0..len).map(|i| ((i * 7 + seed * 3) % 5) as f32 - 2.0).collect()
}

fn matmul(a: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut c = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            c[i * n + j] = (0..k).map(|kk| a[i * k + kk] * b[kk * n + j]).sum();
        }
    }
    c
}

/// Run every thread of every group of `kernel` on the given memory.
fn run(kernel: &CompiledKernel, mem: &[(&str, Vec<f32>)]) -> Evaluator {
    run_with(kernel, Evaluator::new().with_step_limit(100_000_000), mem)
}

/// Like `run`, on an evaluator that may already hold non-f32 tensors.
fn run_with(kernel: &CompiledKernel, mut ev: Evaluator, mem: &[(&str, Vec<f32>)]) -> Evaluator {
    for (name, data) in mem {
        ev.bind_f32s(name, data);
    }
    for (name, v) in &kernel.scalars {
        ev.bind_int(name, *v);
    }
    let simd = kernel.desc.simd;
    let threads = kernel.local_size[0] / simd;
    for g2 in 0..kernel.groups[2] {
        for g1 in 0..kernel.groups[1] {
            for g0 in 0..kernel.groups[0] {
                for t in 0..threads {
                    ev.reset_thread();
                    ev.bind_int("group_id0", i64::from(g0));
                    ev.bind_int("group_id1", i64::from(g1));
                    ev.bind_int("group_id2", i64::from(g2));
                    ev.bind_int("local_id0", i64::from(t * simd));
                    ev.bind_int("local_id1", 0);
                    ev.bind_int("local_id2", 0);
                    ev.run(&kernel.body).unwrap_or_else(|e| {
                        panic!("group ({}, {}, {}) thread {}: {}\n{}", g0, g1, g2, t, e, kernel.listing())
                    });
                }
            }
        }
    }
    ev
}

fn gemm_case(desc: KernelDesc, m: usize, n: usize, k: usize) -> (Evaluator, Vec<f32>) {
    let kernel = compile(&desc, &CompileOptions::default()).unwrap();
    assert!(kernel.missing_scalars().is_empty(), "{:?}", kernel.missing_scalars());
    let a = data(m * k, 1);
    let b = data(k * n, 2);
    let ev = run(
        &kernel,
        &[("src", a.clone()), ("wei", b.clone()), ("dst", vec![0.0; m * n])],
    );
    (ev, matmul(&a, &b, m, n, k))
}

// ─── Plain GEMM ───────────────────────────────────────────────────

#[test]
fn test_gemm_matches_reference() {
    let (ev, expected) = gemm_case(KernelDesc::gemm(8, 32, 16), 8, 32, 16);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}

#[test]
fn test_gemm_single_k_step() {
    let (ev, expected) = gemm_case(KernelDesc::gemm(4, 16, 8), 4, 16, 8);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}

#[test]
fn test_gemm_simd8_on_xe_lp() {
    let desc = KernelDesc::gemm(8, 16, 24).with_simd(8);
    let kernel = compile(&desc, &CompileOptions::new(HwConfig::xe_lp())).unwrap();
    let a = data(8 * 24, 3);
    let b = data(24 * 16, 4);
    let ev = run(&kernel, &[("src", a.clone()), ("wei", b.clone()), ("dst", vec![0.0; 8 * 16])]);
    assert_eq!(ev.read_f32s("dst").unwrap(), matmul(&a, &b, 8, 16, 24));
}

#[test]
fn test_prefetch_does_not_change_result() {
    let (ev, expected) = gemm_case(KernelDesc::gemm(8, 16, 64).with_prefetch(3), 8, 16, 64);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
    assert!(ev.stats().prefetches > 0);
}

#[test]
fn test_prefetch_distance_beyond_trip_count() {
    // 2 k steps, 4 prefetches ahead: the late ones must be skipped.
    let (ev, expected) = gemm_case(KernelDesc::gemm(4, 16, 16).with_prefetch(4), 4, 16, 16);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}

// ─── Stream-K ─────────────────────────────────────────────────────

#[test]
fn test_stream_k_split_tiles() {
    // 4 tiles x 8 iterations over 3 groups: tiles straddle groups.
    let (ev, expected) = gemm_case(KernelDesc::gemm(8, 32, 64).with_stream_k(3, 1), 8, 32, 64);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
    assert!(ev.stats().atomics > 0);
}

#[test]
fn test_stream_k_batches() {
    let (ev, expected) = gemm_case(KernelDesc::gemm(8, 32, 64).with_stream_k(2, 3), 8, 32, 64);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}

#[test]
fn test_stream_k_more_batches_than_iterations() {
    // 9 k steps split 8 ways: only 5 batches have work.
    let desc = KernelDesc::gemm(4, 16, 72).with_stream_k(1, 8);
    let kernel = compile(&desc, &CompileOptions::default()).unwrap();
    assert_eq!(kernel.groups, [1, 5, 1]);
    assert_eq!(kernel.scalar("sk_k_batches"), Some(5));
    let (ev, expected) = gemm_case(desc, 4, 16, 72);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}

#[test]
fn test_stream_k_one_group_per_tile_stores_plainly() {
    let (ev, expected) = gemm_case(KernelDesc::gemm(8, 32, 32).with_stream_k(0, 1), 8, 32, 32);
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
    assert_eq!(ev.stats().atomics, 0);
}

// ─── Post-ops ─────────────────────────────────────────────────────

#[test]
fn test_post_ops_match_oracle() {
    let (m, n, k) = (8usize, 16usize, 8usize);
    let per_n = ScaleDesc {
        mask: 0b10,
        dt: ScalarType::F32,
    };
    let common = ScaleDesc {
        mask: 0,
        dt: ScalarType::F32,
    };
    let desc = KernelDesc::gemm(m as i64, n as i64, k as i64)
        .with_scales(Scales {
            src: Some(common),
            wei: Some(per_n),
            dst: Some(common),
        })
        .with_bias(ScalarType::F32)
        .with_post_op(PostOp::relu())
        .with_post_op(PostOp::Sum {
            scale: 0.5,
            zero_point: 1,
            dt: ScalarType::F32,
        })
        .with_post_op(PostOp::Binary {
            alg: BinaryAlg::Add,
            src1_dt: ScalarType::F32,
            // Broadcast along m: one value per column.
            broadcast_mask: 0b01,
        });
    let kernel = compile(&desc, &CompileOptions::default()).unwrap();
    let names = kernel.ptr_args();
    for name in ["bias", "src_scales", "wei_scales", "dst_scales", "binary_2"] {
        assert!(names.contains(&name), "missing {}", name);
    }

    let a = data(m * k, 5);
    let b = data(k * n, 6);
    let dst_old = data(m * n, 7);
    let bias = data(n, 8);
    let wei_scales: Vec<f32> = (0..n).map(|j| (j % 3) as f32 + 1.0).collect();
    let binary: Vec<f32> = (0..n).map(|j| j as f32 * 0.25).collect();
    let ev = run(
        &kernel,
        &[
            ("src", a.clone()),
            ("wei", b.clone()),
            ("dst", dst_old.clone()),
            ("bias", bias.clone()),
            ("src_scales", vec![2.0]),
            ("wei_scales", wei_scales.clone()),
            ("dst_scales", vec![4.0]),
            ("binary_2", binary.clone()),
        ],
    );

    let acc = matmul(&a, &b, m, n, k);
    let expected: Vec<f32> = (0..m * n)
        .map(|idx| {
            let j = idx % n;
            let mut v = acc[idx] * 2.0 * wei_scales[j] + bias[j];
            v = v.max(0.0);
            v += 0.5 * (dst_old[idx] - 1.0);
            v += binary[j];
            v / 4.0
        })
        .collect();
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}

#[test]
fn test_binary_mul_per_row() {
    let (m, n, k) = (4usize, 16usize, 8usize);
    let desc = KernelDesc::gemm(m as i64, n as i64, k as i64).with_post_op(PostOp::Binary {
        alg: BinaryAlg::Mul,
        src1_dt: ScalarType::F32,
        // Broadcast along n: one value per row.
        broadcast_mask: 0b10,
    });
    let kernel = compile(&desc, &CompileOptions::default()).unwrap();
    let a = data(m * k, 9);
    let b = data(k * n, 10);
    let rows: Vec<f32> = (0..m).map(|i| i as f32 + 1.0).collect();
    let ev = run(
        &kernel,
        &[
            ("src", a.clone()),
            ("wei", b.clone()),
            ("dst", vec![0.0; m * n]),
            ("binary_0", rows.clone()),
        ],
    );
    let expected: Vec<f32> = matmul(&a, &b, m, n, k)
        .iter()
        .enumerate()
        .map(|(idx, v)| v * rows[idx / n])
        .collect();
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}

#[test]
fn test_integer_binary_operand_is_converted() {
    let (m, n, k) = (4usize, 16usize, 8usize);
    let desc = KernelDesc::gemm(m as i64, n as i64, k as i64).with_post_op(PostOp::Binary {
        alg: BinaryAlg::Add,
        src1_dt: ScalarType::S32,
        broadcast_mask: 0b01,
    });
    let kernel = compile(&desc, &CompileOptions::default()).unwrap();
    let a = data(m * k, 11);
    let b = data(k * n, 12);
    let cols: Vec<i32> = (0..n as i32).map(|j| j * 3 - 20).collect();

    let mut ev = Evaluator::new().with_step_limit(100_000_000);
    ev.bind_memory("binary_0", cols.iter().flat_map(|v| v.to_le_bytes()).collect());
    let ev = run_with(&kernel, ev, &[("src", a.clone()), ("wei", b.clone()), ("dst", vec![0.0; m * n])]);

    let expected: Vec<f32> = matmul(&a, &b, m, n, k)
        .iter()
        .enumerate()
        .map(|(idx, v)| v + cols[idx % n] as f32)
        .collect();
    assert_eq!(ev.read_f32s("dst").unwrap(), expected);
}
