use super::*;
use crate::config::HwConfig;
use crate::diagnostic::Phase;
use crate::kernel::PostOp;

fn opts() -> CompileOptions {
    CompileOptions::new(HwConfig::xe_hpc())
}

#[test]
fn test_compile_default_gemm() {
    let desc = KernelDesc::gemm(8, 32, 16);
    let kernel = compile(&desc, &opts()).unwrap();
    assert_eq!(kernel.ptr_args(), ["src", "wei", "dst"]);
    assert!(kernel.missing_scalars().is_empty());
    assert_eq!(kernel.local_size, [16, 1, 1]);
    // 8 / 4 row tiles x 32 / 16 column tiles.
    assert_eq!(kernel.groups, [4, 1, 1]);
    assert_eq!(kernel.scalar("m_grid_size"), Some(2));
    assert_eq!(kernel.scalar("n_grid_size"), Some(2));
    assert!(kernel.stream_k.is_none());
    assert!(!kernel.listing().is_empty());
}

#[test]
fn test_non_divisible_shape_has_no_plan() {
    let desc = KernelDesc::gemm(7, 32, 16);
    let err = compile(&desc, &opts()).unwrap_err();
    assert!(matches!(err, CompileError::PlanUnavailable { .. }));
    assert_eq!(err.phase(), Phase::Plan);
}

#[test]
fn test_invalid_hardware_is_rejected() {
    let mut hw = HwConfig::xe_hpc();
    hw.simd = 0;
    let err = compile(&KernelDesc::gemm(8, 32, 16), &CompileOptions::new(hw)).unwrap_err();
    assert_eq!(err.phase(), Phase::Config);
}

#[test]
fn test_fingerprint_is_deterministic() {
    let desc = KernelDesc::gemm(8, 32, 16).with_post_op(PostOp::relu());
    let a = compile(&desc, &opts()).unwrap();
    let b = compile(&desc, &opts()).unwrap();
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(a.fingerprint.len(), 64);

    let other = compile(&KernelDesc::gemm(8, 32, 16), &opts()).unwrap();
    assert_ne!(a.fingerprint, other.fingerprint);
}

#[test]
fn test_batch_keeps_request_order() {
    let descs = vec![
        KernelDesc::gemm(8, 32, 16),
        KernelDesc::gemm(7, 32, 16),
        KernelDesc::gemm(4, 16, 8).with_prefetch(2),
    ];
    let results = compile_batch(&descs, &opts(), &StaticGemmPlanner::default());
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().desc, descs[0]);
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().unwrap().desc, descs[2]);
}

#[test]
fn test_stream_k_launch_carries_schedule() {
    let desc = KernelDesc::gemm(8, 32, 64).with_stream_k(3, 2);
    let kernel = compile(&desc, &opts()).unwrap();
    let sched = kernel.stream_k.as_ref().unwrap();
    assert_eq!(sched.tiles, 4);
    assert_eq!(sched.iters_per_tile, 8);
    assert_eq!(kernel.groups, [3, 2, 1]);
    assert_eq!(kernel.scalar("sk_k_batches"), Some(2));
    assert!(kernel.missing_scalars().is_empty());
}

#[test]
fn test_magic_values_follow_divisors() {
    let args = vec![
        KernelArg {
            name: "n_grid_size".into(),
            ty: crate::ir::Type::s32(),
            kind: ArgKind::Scalar,
        },
        KernelArg {
            name: "n_grid_size_magic".into(),
            ty: crate::ir::Type::u64(),
            kind: ArgKind::Scalar,
        },
        KernelArg {
            name: "m_grid_size_magic".into(),
            ty: crate::ir::Type::u64(),
            kind: ArgKind::Scalar,
        },
    ];
    let mut scalars = BTreeMap::from([("n_grid_size".to_string(), 3)]);
    fill_magics(&args, &mut scalars);
    assert_eq!(scalars["n_grid_size_magic"], idiv_magic(3) as i64);
    assert!(!scalars.contains_key("m_grid_size_magic"));
}

struct NoPlanner;

impl Planner for NoPlanner {
    fn name(&self) -> &str {
        "none"
    }

    fn plan(&self, _desc: &KernelDesc, _hw: &HwConfig) -> Option<Plan> {
        None
    }

    fn launch(&self, _desc: &KernelDesc, _plan: &Plan) -> Result<Launch> {
        Ok(Launch::default())
    }
}

#[test]
fn test_custom_planner_failure_names_planner() {
    let err = compile_with_planner(&KernelDesc::gemm(8, 32, 16), &opts(), &NoPlanner).unwrap_err();
    assert!(err.to_string().contains("none"));
}
