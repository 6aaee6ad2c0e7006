use super::*;
use crate::diagnostic::Phase;

#[test]
fn test_presets() {
    let hw = HwConfig::xe_hpc();
    assert_eq!(hw.grf_size, 64);
    assert_eq!(hw.simd, 16);
    assert_eq!(hw.grf_bytes(), 64 * 128);
    assert!(hw.validate().is_ok());
    assert_eq!(HwConfig::xe_lp().systolic_depth, 0);
    assert!(HwConfig::xe_hp().validate().is_ok());
}

#[test]
fn test_resolve_by_name() {
    assert_eq!(HwConfig::resolve("xe_hp").unwrap().name, "xe_hp");
    let err = HwConfig::resolve("gen9").unwrap_err();
    assert_eq!(err.phase(), Phase::Config);
    assert!(err.to_string().contains("available"));
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hw.json");
    std::fs::write(
        &path,
        r#"{
            "name": "test_hw",
            "grf_size": 32,
            "regs": 256,
            "simd": 16,
            "max_send_bytes": 128,
            "slm_size": 65536,
            "systolic_depth": 0
        }"#,
    )
    .unwrap();
    let hw = HwConfig::load(&path).unwrap();
    assert_eq!(hw.name, "test_hw");
    assert_eq!(hw.regs, 256);
    assert_eq!(hw.max_send_bytes, 128);
}

#[test]
fn test_load_rejects_bad_grf_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hw.json");
    let mut hw = HwConfig::xe_lp();
    hw.grf_size = 48;
    std::fs::write(&path, serde_json::to_string(&hw).unwrap()).unwrap();
    let err = HwConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("grf_size"));
}

#[test]
fn test_load_missing_file_and_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    assert!(HwConfig::load(&dir.path().join("nope.json")).is_err());
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = HwConfig::load(&path).unwrap_err();
    assert_eq!(err.phase(), Phase::Config);
}

#[test]
fn test_compile_options_defaults() {
    let opts = CompileOptions::default();
    assert_eq!(opts.cse_window, 16);
    assert_eq!(opts.store_split_regs, 2);
    assert_eq!(opts.max_store_bytes(), 128);
    let opts = CompileOptions::new(HwConfig::xe_lp())
        .with_cse_window(0)
        .with_store_split_regs(4);
    assert_eq!(opts.cse_window, 1);
    assert_eq!(opts.max_store_bytes(), 128);
}
