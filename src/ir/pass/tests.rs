use super::*;
use crate::config::CompileOptions;
use crate::ir::eval::Evaluator;
use crate::ir::magic::idiv_magic;
use crate::ir::{Access, AccessOp, AllocKind, Attr, BinOp, Func, ScalarType, TernOp, Type};

fn ctx_with(bufs: BufferManager, vars: VarManager) -> PassCtx {
    PassCtx::new(CompileOptions::default(), bufs, vars)
}

fn ctx() -> PassCtx {
    ctx_with(BufferManager::new(), VarManager::new())
}

fn reg_i32(ev: &Evaluator, name: &str, idx: usize) -> i32 {
    let bytes = ev.register(name).unwrap();
    let b = &bytes[idx * 4..idx * 4 + 4];
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn barrier() -> Stmt {
    Stmt::call(Func::Barrier, Vec::new())
}

// ─── Allocation placement ─────────────────────────────────────────

#[test]
fn test_alloc_wraps_use_range() {
    let mut bufs = BufferManager::new();
    let a = bufs.get("a", 64);
    let s = Stmt::seq(vec![
        barrier(),
        Stmt::store(a.clone(), 0, Expr::f32(1.0)),
        Stmt::call(Func::ZeroOut { bytes: 64 }, vec![a.clone()]),
        barrier(),
    ]);
    let mut ctx = ctx_with(bufs, VarManager::new());
    let out = inject_alloc_stmts(s, &mut ctx);
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence: {}", out);
    };
    assert_eq!(items.len(), 3);
    match &items[1] {
        Stmt::Alloc {
            buf,
            size,
            kind,
            body,
        } => {
            assert_eq!(buf.name, "a");
            assert_eq!(*size, 64);
            assert_eq!(*kind, AllocKind::Grf);
            assert_eq!(body.count(), 2);
        }
        other => panic!("expected alloc, got {}", other),
    }
}

#[test]
fn test_alloc_descends_into_loop_body() {
    let mut bufs = BufferManager::new();
    let a = bufs.get("a", 16);
    let s = Stmt::seq(vec![
        barrier(),
        Stmt::For {
            var: Var::s32("i"),
            init: Expr::int(0),
            bound: Expr::int(4),
            body: Box::new(Stmt::store(a, 0, Expr::f32(2.0))),
        },
    ]);
    let mut ctx = ctx_with(bufs, VarManager::new());
    let out = inject_alloc_stmts(s, &mut ctx);
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence");
    };
    match &items[1] {
        Stmt::For { body, .. } => assert!(matches!(body.as_ref(), Stmt::Alloc { .. })),
        other => panic!("expected loop, got {}", other),
    }
}

#[test]
fn test_alloc_extends_over_escaping_let() {
    let mut bufs = BufferManager::new();
    let a = bufs.get("a", 4);
    let out_reg = bufs.get("out", 4);
    let t = Var::new("t", Type::f32());
    let s = Stmt::seq(vec![
        Stmt::Let {
            var: t.clone(),
            value: Expr::load(Type::f32(), a, 0),
            body: None,
        },
        Stmt::store(out_reg, 0, t.expr()),
    ]);
    let mut ctx = ctx_with(bufs, VarManager::new());
    let out = inject_alloc_stmts(s, &mut ctx);
    let sizes = super::alloc::alloc_sizes(&out);
    assert_eq!(sizes.len(), 2);
    // `a` must cover the store that reads `t`.
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence");
    };
    assert_eq!(items.len(), 1);
    match &items[0] {
        Stmt::Alloc { buf, body, .. } => {
            assert_eq!(buf.name, "a");
            assert!(uses_var_in(body, "t"));
        }
        other => panic!("expected alloc, got {}", other),
    }
}

fn uses_var_in(s: &Stmt, name: &str) -> bool {
    crate::ir::uses_var(s, name)
}

#[test]
fn test_unused_buffer_gets_no_alloc() {
    let mut bufs = BufferManager::new();
    bufs.get("unused", 128);
    let mut ctx = ctx_with(bufs, VarManager::new());
    let out = inject_alloc_stmts(Stmt::seq(vec![barrier()]), &mut ctx);
    assert!(super::alloc::alloc_sizes(&out).is_empty());
}

#[test]
fn test_global_alloc_for_used_pointers() {
    let mut vars = VarManager::new();
    let src = vars.add_ptr_arg("src");
    let dst = vars.add_ptr_arg("dst");
    vars.add_ptr_arg("bias");
    let s = Stmt::seq(vec![
        Stmt::call(Func::ZeroOut { bytes: 4 }, vec![src]),
        Stmt::call(Func::ZeroOut { bytes: 4 }, vec![dst]),
    ]);
    let mut ctx = ctx_with(BufferManager::new(), vars);
    let out = inject_global_alloc(s, &mut ctx);
    match &out {
        Stmt::Alloc {
            buf, kind, body, ..
        } => {
            assert_eq!(buf.name, "src");
            assert_eq!(*kind, AllocKind::Global);
            assert!(matches!(body.as_ref(), Stmt::Alloc { buf, .. } if buf.name == "dst"));
        }
        other => panic!("expected alloc, got {}", other),
    }
    assert!(!super::alloc::alloc_sizes(&out).contains_key("bias"));
}

#[test]
fn test_merge_slm_buffers() {
    let s = Stmt::seq(vec![
        Stmt::alloc(
            Var::ptr("slm_a"),
            64,
            AllocKind::Slm,
            Stmt::call(Func::ZeroOut { bytes: 64 }, vec![Var::ptr("slm_a").expr()]),
        ),
        Stmt::alloc(
            Var::ptr("slm_b"),
            256,
            AllocKind::Slm,
            Stmt::call(Func::ZeroOut { bytes: 256 }, vec![Var::ptr("slm_b").expr()]),
        ),
    ]);
    let out = merge_slm_buffers(s, &mut ctx());
    let sizes = super::alloc::alloc_sizes(&out);
    assert_eq!(sizes.len(), 1);
    assert_eq!(sizes["slm_a"], (256, AllocKind::Slm));
    assert!(!crate::ir::uses_var(&out, "slm_b"));
}

// ─── Lets ─────────────────────────────────────────────────────────

#[test]
fn test_dangling_lets_scope_rest_of_sequence() {
    let mut bufs = BufferManager::new();
    let a = bufs.get("a", 4);
    let x = Var::s32("x");
    let s = Stmt::seq(vec![
        Stmt::Let {
            var: x.clone(),
            value: Expr::int(5),
            body: None,
        },
        Stmt::Let {
            var: Var::s32("y"),
            value: Expr::int(7),
            body: None,
        },
        Stmt::store(a, 0, x.expr()),
    ]);
    let out = inject_dangling_lets(s, &mut ctx());
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence");
    };
    assert_eq!(items.len(), 1);
    match &items[0] {
        Stmt::Let {
            var,
            body: Some(body),
            ..
        } => {
            assert_eq!(var.name, "x");
            assert!(matches!(body.as_ref(), Stmt::Seq(v) if v.len() == 1));
        }
        other => panic!("expected scoped let, got {}", other),
    }
    assert!(!crate::ir::collect_vars(&out).contains("y"));
}

#[test]
fn test_external_lets_only_when_used() {
    let mut bufs = BufferManager::new();
    let a = bufs.get("a", 4);
    let used = Var::s32("used");
    let s = Stmt::store(a, 0, used.expr());
    let mut ctx = ctx().with_external_lets(vec![
        (used.clone(), Expr::int(3)),
        (Var::s32("dead"), Expr::int(4)),
    ]);
    let out = inject_external_lets(s, &mut ctx);
    match &out {
        Stmt::Let { var, body, .. } => {
            assert_eq!(var.name, "used");
            assert!(matches!(body.as_deref(), Some(Stmt::Store { .. })));
        }
        other => panic!("expected let, got {}", other),
    }
}

// ─── Variables ────────────────────────────────────────────────────

#[test]
fn test_fixup_idiv_uses_magic() {
    let mut bufs = BufferManager::new();
    let a = bufs.get("a", 8);
    let tid = Var::s32("tid");
    let n = Expr::const_var("n", Type::s32());
    let s = Stmt::seq(vec![
        Stmt::store(a.clone(), 0, tid.expr() / n.clone()),
        Stmt::store(a.clone(), 4, tid.expr() % n),
    ]);
    let mut ctx = ctx_with(bufs, VarManager::new());
    let out = fixup_idiv(s, &mut ctx);
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence");
    };
    assert!(matches!(
        &items[0],
        Stmt::Store {
            value: Expr::Ternary { op: TernOp::IDiv, .. },
            ..
        }
    ));
    assert!(ctx.vars.is_arg("n"));
    assert!(ctx.vars.is_arg("n_magic"));

    let out = finalize_vars(out, &mut ctx);
    let mut ev = Evaluator::new();
    ev.bind_int("tid", 23);
    ev.bind_int("n", 5);
    ev.bind_int("n_magic", idiv_magic(5) as i64);
    ev.run(&out).unwrap();
    assert_eq!(reg_i32(&ev, "a", 0), 4);
    assert_eq!(reg_i32(&ev, "a", 1), 3);
}

#[test]
fn test_constant_division_is_left_alone() {
    let tid = Var::s32("tid");
    let s = Stmt::store(Var::ptr("a").expr(), 0, tid.expr() / 4);
    let mut ctx = ctx();
    let out = fixup_idiv(s, &mut ctx);
    assert!(matches!(
        out,
        Stmt::Store {
            value: Expr::Binary { op: BinOp::Div, .. },
            ..
        }
    ));
    assert!(ctx.vars.args().is_empty());
}

#[test]
fn test_finalize_vars_resolves_args_and_div_up() {
    let mut vars = VarManager::new();
    vars.add_ptr_arg("src");
    let k = vars.add_scalar_arg("k_size", Type::s32());
    let s = Stmt::store(Var::ptr("a").expr(), 0, k.div_up(Expr::int(4)));
    let mut ctx = ctx_with(BufferManager::new(), vars);
    let out = finalize_vars(s, &mut ctx);
    let vars = crate::ir::collect_vars(&out);
    assert!(vars.contains("k_size"));
    let Stmt::Store { value, .. } = &out else {
        panic!("expected store");
    };
    let mut found_arg = false;
    fn find_arg(e: &Expr, found: &mut bool) {
        match e {
            Expr::Arg { name, slot, .. } => {
                assert_eq!(name, "k_size");
                assert_eq!(*slot, 1);
                *found = true;
            }
            Expr::Binary { op, a, b } => {
                assert_ne!(*op, BinOp::DivUp);
                find_arg(a, found);
                find_arg(b, found);
            }
            _ => {}
        }
    }
    find_arg(value, &mut found_arg);
    assert!(found_arg);

    let mut ev = Evaluator::new();
    ev.bind_int("k_size", 10);
    ev.run(&out).unwrap();
    assert_eq!(reg_i32(&ev, "a", 0), 3);
}

// ─── Memory lowering ──────────────────────────────────────────────

fn load_access(reg: Expr, bytes: u32) -> Stmt {
    Stmt::Access(Access {
        op: AccessOp::Load,
        ty: ScalarType::F32,
        mem_buf: Var::ptr("src").expr(),
        mem_off: Expr::i64(0),
        reg_buf: Some(reg),
        reg_off: 0,
        bytes,
    })
}

#[test]
fn test_inject_send_chunks_by_message_size() {
    let a = Var::ptr("a").expr();
    let out = inject_send(load_access(a.clone(), 1024), &mut ctx());
    let calls = out.calls();
    assert_eq!(calls.len(), 2);
    for c in &calls {
        assert!(matches!(c.func, Func::Send { bytes: 512, .. }));
    }
    assert_eq!(calls[1].args[2], a.offset(512));

    let data: Vec<f32> = (0..256).map(|i| i as f32).collect();
    let mut ev = Evaluator::new();
    ev.bind_f32s("src", &data);
    ev.run(&out).unwrap();
    assert_eq!(ev.register_f32s("a").unwrap(), data);
    assert_eq!(ev.stats().sends, 2);
}

#[test]
fn test_prefetch_send_has_no_register() {
    let s = Stmt::Access(Access {
        op: AccessOp::Prefetch,
        ty: ScalarType::F32,
        mem_buf: Var::ptr("src").expr(),
        mem_off: Expr::i64(64),
        reg_buf: None,
        reg_off: 0,
        bytes: 64,
    });
    let out = inject_send(s, &mut ctx());
    let calls = out.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args.len(), 2);
}

#[test]
fn test_split_wide_stores() {
    let a = Var::ptr("a").expr();
    let b = Var::ptr("b").expr();
    let wide = Type::f32().with_elems(64);
    let s = Stmt::store(a.clone(), 0, Expr::load(wide, b.clone(), 0));
    let out = split_wide_stores(s, &mut ctx());
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence");
    };
    assert_eq!(items.len(), 2);
    match &items[1] {
        Stmt::Store { off, value, .. } => {
            assert_eq!(*off, 128);
            assert_eq!(value.ty().elems, 32);
        }
        other => panic!("expected store, got {}", other),
    }

    let data: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();
    let mut ev = Evaluator::new();
    ev.write_register_f32s("b", &data);
    ev.run(&out).unwrap();
    assert_eq!(ev.register_f32s("a").unwrap(), data);
}

#[test]
fn test_narrow_store_is_untouched() {
    let s = Stmt::store(Var::ptr("a").expr(), 0, Expr::f32(1.0).broadcast(16));
    let out = split_wide_stores(s.clone(), &mut ctx());
    assert_eq!(out, s);
}

// ─── Simplification ───────────────────────────────────────────────

#[test]
fn test_simplify_folds_constants() {
    let a = Var::ptr("a").expr();
    let x = Var::s32("x");
    let s = Stmt::seq(vec![
        Stmt::store(a.clone(), 0, (Expr::int(2) + Expr::int(3)) * Expr::int(4)),
        Stmt::store(a.clone(), 4, x.expr() + 0),
        Stmt::store(a.clone(), 8, x.expr() * 1),
        Stmt::if_then(Expr::Bool(false), barrier()),
        Stmt::For {
            var: Var::s32("i"),
            init: Expr::int(4),
            bound: Expr::int(4),
            body: Box::new(barrier()),
        },
    ]);
    let out = simplify(s, &mut ctx());
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence");
    };
    assert_eq!(items.len(), 3);
    assert!(matches!(&items[0], Stmt::Store { value: Expr::Int(20, _), .. }));
    assert!(matches!(&items[1], Stmt::Store { value: Expr::Var(v), .. } if v.name == "x"));
    assert!(matches!(&items[2], Stmt::Store { value: Expr::Var(_), .. }));
}

#[test]
fn test_simplify_picks_constant_branches() {
    let s = Stmt::If {
        cond: Expr::int(1).cmp_lt(Expr::int(2)),
        then: Box::new(barrier()),
        otherwise: Some(Box::new(Stmt::call(
            Func::ZeroOut { bytes: 4 },
            vec![Var::ptr("a").expr()],
        ))),
    };
    let out = simplify(s, &mut ctx());
    assert!(matches!(out, Stmt::Call(c) if c.func == Func::Barrier));
}

#[test]
fn test_optimize_alloc_let() {
    let a = Var::ptr("a");
    let y = Var::s32("y");
    let s = Stmt::alloc(
        Var::ptr("dead"),
        64,
        AllocKind::Grf,
        Stmt::alloc(
            a.clone(),
            4,
            AllocKind::Grf,
            Stmt::let_in(y.clone(), Expr::int(9), Stmt::store(a.expr(), 0, y.expr())),
        ),
    );
    let out = optimize_alloc_let(s, &mut ctx());
    match &out {
        Stmt::Alloc { buf, body, .. } => {
            assert_eq!(buf.name, "a");
            assert!(matches!(
                body.as_ref(),
                Stmt::Store {
                    value: Expr::Int(9, _),
                    ..
                }
            ));
        }
        other => panic!("expected alloc, got {}", other),
    }
}

#[test]
fn test_fixup_if_conditions() {
    let flag = Var::s32("flag");
    let s = Stmt::if_then(flag.expr(), barrier());
    let out = fixup_if_conditions(s, &mut ctx());
    match &out {
        Stmt::If { cond, .. } => {
            assert!(cond.ty().is_bool());
            assert!(matches!(cond, Expr::Binary { op: BinOp::Ne, .. }));
        }
        other => panic!("expected if, got {}", other),
    }
}

// ─── CSE ──────────────────────────────────────────────────────────

#[test]
fn test_cse_binds_repeated_expressions() {
    let acc = Var::ptr("acc").expr();
    let n = Var::s32("n");
    let e = n.expr() * 4 + 7;
    let s = Stmt::seq(vec![
        Stmt::store(acc.clone(), 0, e.clone()),
        Stmt::store(acc.clone(), 4, e),
        Stmt::store(acc.clone(), 8, n.expr() * 4),
    ]);
    let mut ev = Evaluator::new();
    ev.bind_int("n", 3);
    ev.run(&s).unwrap();
    let expected: Vec<i32> = (0..3).map(|i| reg_i32(&ev, "acc", i)).collect();

    let out = eliminate_common_subexprs(s, &mut ctx());
    let Stmt::Seq(items) = &out else {
        panic!("expected a sequence");
    };
    assert_eq!(items.len(), 1);
    match &items[0] {
        Stmt::Let {
            var,
            body: Some(inner),
            ..
        } => {
            assert_eq!(var.name, "cse_1");
            assert!(matches!(inner.as_ref(), Stmt::Let { var, .. } if var.name == "cse_0"));
        }
        other => panic!("expected let, got {}", other),
    }

    let mut ev = Evaluator::new();
    ev.bind_int("n", 3);
    ev.run(&out).unwrap();
    let got: Vec<i32> = (0..3).map(|i| reg_i32(&ev, "acc", i)).collect();
    assert_eq!(got, expected);
    assert_eq!(got, vec![19, 19, 12]);
}

#[test]
fn test_cse_ignores_register_loads() {
    let acc = Var::ptr("acc").expr();
    let e = Expr::load(Type::s32(), acc.clone(), 0) * 4 + 1;
    let s = Stmt::seq(vec![
        Stmt::store(acc.clone(), 0, e.clone()),
        Stmt::store(acc.clone(), 4, e),
    ]);
    let out = eliminate_common_subexprs(s.clone(), &mut ctx());
    assert_eq!(out, s);
}

// ─── Bank conflicts ───────────────────────────────────────────────

fn mad(src2_off: i64) -> Stmt {
    let c = Var::ptr("c").expr();
    Stmt::call(
        Func::Mad {
            simd: 16,
            dst: ScalarType::F32,
            a: ScalarType::F32,
            a_stride: 0,
            b: ScalarType::F32,
            b_stride: 1,
        },
        vec![
            c.clone(),
            c,
            Var::ptr("a").expr(),
            Var::ptr("b").expr().offset(src2_off),
        ],
    )
}

#[test]
fn test_bank_conflict_attrs() {
    let s = Stmt::seq(vec![mad(128), mad(64)]);
    let out = inject_bank_conflict_attrs(s, &mut ctx());
    let calls = out.calls();
    assert!(calls[0].has_attr(Attr::BankConflict));
    assert!(!calls[1].has_attr(Attr::BankConflict));
}

// ─── Whole pipeline ───────────────────────────────────────────────

#[test]
fn test_pipeline_order() {
    let names: Vec<&str> = PIPELINE.iter().map(|(n, _)| *n).collect();
    assert_eq!(names.len(), 14);
    assert_eq!(names[0], "inject_alloc_stmts");
    let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
    assert!(pos("fixup_idiv") < pos("finalize_vars"));
    assert!(pos("finalize_vars") < pos("inject_send"));
    assert_eq!(names[13], "inject_bank_conflict_attrs");
}

#[test]
fn test_run_pipeline_preserves_semantics() {
    let mut bufs = BufferManager::new();
    let acc = bufs.get("acc", 8);
    let mut vars = VarManager::new();
    let dst = vars.add_ptr_arg("dst");
    let n = vars.add_scalar_arg("n", Type::s32());
    let tid = Var::s32("tid");
    let q = Var::s32("q");
    let s = Stmt::seq(vec![
        Stmt::Let {
            var: q.clone(),
            value: tid.expr() / n.clone(),
            body: None,
        },
        Stmt::store(acc.clone(), 0, q.expr().cast(Type::f32())),
        Stmt::store(acc.clone(), 4, (tid.expr() % n).cast(Type::f32())),
        Stmt::Access(Access {
            op: AccessOp::Store,
            ty: ScalarType::F32,
            mem_buf: dst,
            mem_off: Expr::i64(0),
            reg_buf: Some(acc),
            reg_off: 0,
            bytes: 8,
        }),
    ]);
    let mut ctx = ctx_with(bufs, vars);
    let out = run_pipeline(s, &mut ctx);

    assert!(super::alloc::alloc_sizes(&out).contains_key("dst"));
    assert_eq!(out.calls().len(), 1);
    assert!(ctx.vars.is_arg("n_magic"));

    let mut ev = Evaluator::new();
    ev.bind_int("tid", 23);
    ev.bind_int("n", 5);
    ev.bind_int("n_magic", idiv_magic(5) as i64);
    ev.bind_f32s("dst", &[0.0, 0.0]);
    ev.run(&out).unwrap();
    assert_eq!(ev.read_f32s("dst").unwrap(), vec![4.0, 3.0]);
}
