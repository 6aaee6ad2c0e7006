use super::eval::{EvalError, Evaluator};
use super::*;

fn mad_call(simd: u32, a_stride: i64, b_stride: i64) -> Stmt {
    let c = Var::ptr("c").expr();
    Stmt::call(
        Func::Mad {
            simd,
            dst: ScalarType::F32,
            a: ScalarType::F32,
            a_stride,
            b: ScalarType::F32,
            b_stride,
        },
        vec![c.clone(), c, Var::ptr("a").expr(), Var::ptr("b").expr()],
    )
}

// ─── Expressions ──────────────────────────────────────────────────

#[test]
fn test_expr_types() {
    let x = Var::s32("x");
    assert_eq!((x.expr() + 1).ty(), Type::s32());
    assert_eq!(x.expr().cmp_lt(Expr::int(3)).ty(), Type::bool());
    assert_eq!(Expr::f32(1.0).broadcast(16).ty(), Type::f32().with_elems(16));
    assert_eq!(Expr::int(4).cast(Type::s32()), Expr::int(4));
    // Integer literal on the left takes the type of the right operand.
    assert_eq!((Expr::int(1) + Var::new("w", Type::s64()).expr()).ty(), Type::s64());
}

#[test]
fn test_offsets_fold() {
    let buf = Var::ptr("a").expr();
    assert_eq!(buf.clone().offset(0), buf);
    assert_eq!(buf.clone().offset(8).offset(8), buf.offset(16));
}

#[test]
fn test_display() {
    let x = Var::s32("x");
    let n = Expr::const_var("n", Type::s32());
    assert_eq!((x.expr() * 4 + n.clone()).to_string(), "((x * 4) + $n)");
    assert_eq!(Expr::min_of(x.expr(), n).to_string(), "min(x, $n)");
    let s = Stmt::let_in(
        x.clone(),
        Expr::int(3),
        Stmt::store(Var::ptr("a").expr(), 4, x.expr()),
    );
    assert_eq!(s.to_string(), "let x: s32 = 3\n  a.s32[4] = x\n");
    assert_eq!(mad_call(16, 0, 1).to_string(), "mad.16<0,1>(c, c, a, b)\n");
}

#[test]
fn test_collect_vars() {
    let s = Stmt::seq(vec![
        Stmt::store(Var::ptr("a").expr(), 0, Var::s32("i").expr() + 1),
        Stmt::if_then(
            Expr::const_var("n", Type::s32()).cmp_gt(Expr::int(0)),
            Stmt::call(Func::Barrier, Vec::new()),
        ),
    ]);
    let names: Vec<String> = collect_vars(&s).into_iter().collect();
    assert_eq!(names, vec!["a", "i", "n"]);
    assert!(uses_var(&s, "n"));
    assert!(!uses_var(&s, "m"));
}

#[test]
fn test_stmt_helpers() {
    let b = || Stmt::call(Func::Barrier, Vec::new());
    let s = Stmt::seq(vec![b(), Stmt::seq(vec![b(), b()]), Stmt::empty()]);
    assert_eq!(s.count(), 3);
    assert_eq!(s.calls().len(), 3);
    assert!(Stmt::seq(vec![Stmt::empty(), Stmt::empty()]).is_empty());
    let appended = b().append(b());
    assert!(matches!(appended, Stmt::Seq(ref v) if v.len() == 2));
}

// ─── Evaluator ────────────────────────────────────────────────────

#[test]
fn test_eval_mad_broadcast() {
    let mut ev = Evaluator::new();
    ev.write_register_f32s("a", &[2.0]);
    ev.write_register_f32s("b", &[1.0, 2.0, 3.0, 4.0]);
    ev.write_register_f32s("c", &[10.0; 4]);
    ev.run(&mad_call(4, 0, 1)).unwrap();
    assert_eq!(ev.register_f32s("c").unwrap(), vec![12.0, 14.0, 16.0, 18.0]);
}

#[test]
fn test_eval_reorder_transposes() {
    let src = Layout::dense(ScalarType::F32, &[("n", 2), ("m", 2)]);
    let dst = Layout::dense(ScalarType::F32, &[("m", 2), ("n", 2)]);
    let s = Stmt::call(
        Func::Reorder { src, dst },
        vec![Var::ptr("x").expr(), Var::ptr("y").expr()],
    );
    let mut ev = Evaluator::new();
    ev.write_register_f32s("x", &[1.0, 2.0, 3.0, 4.0]);
    ev.run(&s).unwrap();
    assert_eq!(ev.register_f32s("y").unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
}

#[test]
fn test_eval_reduce_sums_missing_dims() {
    let src = Layout::dense(ScalarType::F32, &[("n", 2), ("k", 3)]);
    let dst = Layout::dense(ScalarType::F32, &[("n", 2)]);
    let s = Stmt::call(
        Func::Reduce { src, dst },
        vec![Var::ptr("x").expr(), Var::ptr("y").expr()],
    );
    let mut ev = Evaluator::new();
    ev.write_register_f32s("x", &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
    ev.write_register_f32s("y", &[0.0, 0.0]);
    ev.run(&s).unwrap();
    assert_eq!(ev.register_f32s("y").unwrap(), vec![6.0, 60.0]);
}

#[test]
fn test_eval_memory_bounds_checked() {
    let s = Stmt::Access(Access {
        op: AccessOp::Load,
        ty: ScalarType::F32,
        mem_buf: Var::ptr("src").expr(),
        mem_off: Expr::i64(8),
        reg_buf: Some(Var::ptr("a").expr()),
        reg_off: 0,
        bytes: 16,
    });
    let mut ev = Evaluator::new();
    ev.bind_f32s("src", &[0.0; 4]);
    let err = ev.run(&s).unwrap_err();
    assert!(matches!(err, EvalError::OutOfBounds { .. }));
}

#[test]
fn test_eval_loop_and_while() {
    let i = Var::s32("i");
    let counter = Var::ptr("cnt").expr();
    let count = Expr::load(Type::s32(), counter.clone(), 0);
    let s = Stmt::seq(vec![
        Stmt::store(counter.clone(), 0, Expr::int(0)),
        Stmt::For {
            var: i.clone(),
            init: Expr::int(0),
            bound: Expr::int(5),
            body: Box::new(Stmt::store(counter.clone(), 0, count.clone() + i.expr())),
        },
        Stmt::While {
            cond: count.clone().cmp_lt(Expr::int(20)),
            body: Box::new(Stmt::store(counter.clone(), 0, count + 3)),
        },
    ]);
    let mut ev = Evaluator::new();
    ev.run(&s).unwrap();
    let bytes = ev.register("cnt").unwrap();
    assert_eq!(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 22);
}

#[test]
fn test_eval_step_limit() {
    let s = Stmt::While {
        cond: Expr::Bool(true),
        body: Box::new(Stmt::empty()),
    };
    let mut ev = Evaluator::new().with_step_limit(100);
    assert!(matches!(ev.run(&s), Err(EvalError::StepLimit)));
}

#[test]
fn test_eval_rejects_bad_magic() {
    let e = Expr::ternary(
        TernOp::IDiv,
        Expr::int(100),
        Expr::Int(7, ScalarType::U32),
        Expr::Int(magic::idiv_magic(5) as i64, ScalarType::U64),
    );
    let mut ev = Evaluator::new();
    assert!(matches!(ev.eval(&e), Err(EvalError::InvalidMagic { .. })));
}
