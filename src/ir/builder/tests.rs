use super::*;
use crate::ir::{AllocKind, Dim, Type};

#[test]
fn test_buffer_reuse_grows_to_max() {
    let mut bufs = BufferManager::new();
    let a = bufs.get("a", 64);
    let a2 = bufs.get("a", 128);
    assert_eq!(a, a2);
    bufs.get("a", 32);
    assert_eq!(bufs.size("a"), Some(128));
    assert_eq!(bufs.decls().len(), 1);
}

#[test]
fn test_slm_and_tmp_buffers() {
    let mut bufs = BufferManager::new();
    bufs.get_slm("slm", 1024);
    let t0 = bufs.tmp("tmp", 16);
    let t1 = bufs.tmp("tmp", 16);
    assert_ne!(t0, t1);
    assert_eq!(bufs.find("slm").map(|d| d.kind), Some(AllocKind::Slm));
    assert_eq!(bufs.find("tmp_1").map(|d| d.size), Some(16));
    assert_eq!(bufs.grf_bytes(), 32);
}

#[test]
fn test_name_gen_counts_per_prefix() {
    let mut names = NameGen::default();
    assert_eq!(names.fresh("cse"), "cse_0");
    assert_eq!(names.fresh("tmp"), "tmp_0");
    assert_eq!(names.fresh("cse"), "cse_1");
}

#[test]
fn test_var_manager_slots_are_stable() {
    let mut vars = VarManager::new();
    vars.add_ptr_arg("src");
    vars.add_ptr_arg("wei");
    vars.add_ptr_arg("src");
    assert_eq!(vars.slot("src"), Some(0));
    assert_eq!(vars.slot("wei"), Some(1));
    assert_eq!(vars.args().len(), 2);
    assert!(vars.get_arg("wei").is_some());
    assert!(vars.get_arg("dst").is_none());
}

#[test]
fn test_idiv_magic_registers_divisor_and_magic() {
    let mut vars = VarManager::new();
    let size = vars.get_grid_size(&Dim::new("m"));
    let magic = vars.get_idiv_magic(&size);
    assert_eq!(
        magic,
        Some(Expr::const_var("m_grid_size_magic", Type::u64()))
    );
    assert_eq!(vars.slot("m_grid_size"), Some(0));
    assert_eq!(vars.slot("m_grid_size_magic"), Some(1));
    assert!(vars.get_idiv_magic(&Expr::int(7)).is_none());
}

#[test]
fn test_ir_builder_flattens_and_skips_empty() {
    let mut b = IrBuilder::new();
    let buf = Var::ptr("c").expr();
    b.emit(Stmt::empty());
    b.zero_out(&buf, 64);
    b.emit(Stmt::seq(vec![Stmt::empty(), Stmt::call(Func::Barrier, vec![])]));
    b.if_(Expr::Bool(true), Stmt::empty());
    let s = b.finish();
    assert_eq!(s.count(), 2);
}

#[test]
fn test_reorder_same_layout_same_buffer_is_noop() {
    let mut b = IrBuilder::new();
    let l = Layout::dense(ScalarType::F32, &[("n", 8)]);
    let buf = Var::ptr("c").expr();
    b.reorder(&l, &buf, &l, &buf);
    assert!(b.is_empty());
    b.reorder(&l, &buf, &l, &Var::ptr("d").expr());
    assert!(!b.is_empty());
}

#[test]
fn test_let_returns_var_of_value_type() {
    let mut b = IrBuilder::new();
    let v = b.let_("x", Expr::i64(3));
    assert_eq!(v.ty(), Type::s64());
    assert!(matches!(b.finish().into_items()[0], Stmt::Let { body: None, .. }));
}
