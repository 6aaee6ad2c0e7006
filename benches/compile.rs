//! Compilation latency benchmark.
//!
//! Measures each stage of a compile request:
//! 1. Planning (static GEMM planner)
//! 2. Kernel construction + pass pipeline
//! 3. Batch compilation (parallel)

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tilejit::kernel::{KernelBuilder, PostOp};
use tilejit::{compile, compile_batch, CompileOptions, HwConfig, KernelDesc, Planner, StaticGemmPlanner};

fn bench_plan(c: &mut Criterion) {
    let hw = HwConfig::xe_hpc();
    let planner = StaticGemmPlanner::default();
    let desc = KernelDesc::gemm(64, 64, 64);
    c.bench_function("plan_gemm_64", |b| {
        b.iter(|| planner.plan(black_box(&desc), &hw))
    });
}

fn bench_build(c: &mut Criterion) {
    let opts = CompileOptions::default();
    let planner = StaticGemmPlanner::default();

    let mut group = c.benchmark_group("build");
    for (name, desc) in [
        ("plain", KernelDesc::gemm(64, 64, 64)),
        ("prefetch", KernelDesc::gemm(64, 64, 64).with_prefetch(3)),
        ("relu", KernelDesc::gemm(64, 64, 64).with_post_op(PostOp::relu())),
        ("stream_k", KernelDesc::gemm(64, 64, 256).with_stream_k(8, 2)),
    ] {
        let Some(plan) = planner.plan(&desc, &opts.hw) else {
            continue;
        };
        group.bench_function(name, |b| {
            b.iter(|| KernelBuilder::new(&opts, black_box(&desc), &plan).build())
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let opts = CompileOptions::default();
    let desc = KernelDesc::gemm(128, 128, 128);
    c.bench_function("compile_gemm_128", |b| {
        b.iter(|| compile(black_box(&desc), &opts))
    });

    let descs: Vec<KernelDesc> = (1..=16)
        .map(|i| KernelDesc::gemm(4 * i, 64, 32))
        .collect();
    let planner = StaticGemmPlanner::default();
    c.bench_function("compile_batch_16", |b| {
        b.iter(|| compile_batch(black_box(&descs), &opts, &planner))
    });
}

criterion_group!(benches, bench_plan, bench_build, bench_compile);
criterion_main!(benches);
