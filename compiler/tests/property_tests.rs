// Property-based tests for the congruence analysis and scope environment.
//
// Four categories:
// 1. Combinator soundness: every derived fact contains the concrete result
//    computed by the reference evaluator, for sampled operand values.
// 2. Join correctness and the unconstrained fact.
// 3. Scope shadow/restore and chaining.
// 4. Classification idempotence.
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use valign::align::{AlignmentAnalyzer, MemoryAccess};
use valign::eval::{eval_int, Env};
use valign::ir::{BinOp, BufferParam, Expr, ExprKind, Ident, Load, ScalarType};
use valign::modulus::{modulus_remainder, ModulusRemainder};
use valign::scope::Scope;

// ── Generators ──────────────────────────────────────────────────────────────

/// A fact together with a sampled value that satisfies it.
fn arb_fact_and_value() -> impl Strategy<Value = (ModulusRemainder, i64)> {
    (0i64..=64, -1000i64..=1000, -1000i64..=1000).prop_map(|(m, r, q)| {
        let fact = ModulusRemainder::new(m, r);
        let value = if fact.modulus == 0 {
            fact.remainder
        } else {
            fact.modulus * q + fact.remainder
        };
        (fact, value)
    })
}

fn arb_binop() -> impl Strategy<Value = BinOp> {
    prop_oneof![
        Just(BinOp::Add),
        Just(BinOp::Sub),
        Just(BinOp::Mul),
        Just(BinOp::Div),
        Just(BinOp::Mod),
        Just(BinOp::Shl),
        Just(BinOp::Shr),
        Just(BinOp::And),
        Just(BinOp::Lt),
        Just(BinOp::Eq),
    ]
}

fn bin(op: BinOp, a: Expr, b: Expr) -> Expr {
    Expr::binary(op, a, b)
}

/// Integer index arithmetic over the free names `a` and `b`.
fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        Just(Expr::var("a")),
        Just(Expr::var("b")),
        (-64i64..=64).prop_map(Expr::int),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (arb_binop(), inner.clone(), inner.clone()).prop_map(|(op, x, y)| bin(op, x, y)),
            (inner.clone(), 0i64..=6).prop_map(|(x, k)| bin(BinOp::Shl, x, Expr::int(k))),
            (inner.clone(), 1i64..=6)
                .prop_map(|(x, k)| bin(BinOp::And, x, Expr::int((1 << k) - 1))),
            inner
                .clone()
                .prop_map(|x| Expr::synthetic(ExprKind::Neg(Box::new(x)))),
            (inner.clone(), inner.clone())
                .prop_map(|(x, y)| Expr::synthetic(ExprKind::Min(Box::new(x), Box::new(y)))),
            (inner.clone(), inner.clone())
                .prop_map(|(x, y)| Expr::synthetic(ExprKind::Max(Box::new(x), Box::new(y)))),
            (inner.clone(), inner.clone(), inner.clone()).prop_map(|(c, x, y)| {
                Expr::synthetic(ExprKind::Select {
                    cond: Box::new(c),
                    true_value: Box::new(x),
                    false_value: Box::new(y),
                })
            }),
            (inner.clone(), inner.clone()).prop_map(|(v, body)| {
                Expr::synthetic(ExprKind::Let {
                    name: Ident::new("a"),
                    value: Box::new(v),
                    body: Box::new(body),
                })
            }),
            inner.prop_map(|x| Expr::synthetic(ExprKind::Cast(ScalarType::Int(32), Box::new(x)))),
        ]
    })
}

fn facts(fa: ModulusRemainder, fb: ModulusRemainder) -> Scope<'static, ModulusRemainder> {
    let mut scope = Scope::new();
    scope.push("a", fa);
    scope.push("b", fb);
    scope
}

fn env(a: i64, b: i64) -> Env {
    [("a".to_string(), a), ("b".to_string(), b)].into_iter().collect()
}

// ── 1. Combinator soundness ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 512,
        max_shrink_iters: 500,
        .. ProptestConfig::default()
    })]

    #[test]
    fn binary_combinators_are_sound(
        op in arb_binop(),
        (fa, a) in arb_fact_and_value(),
        (fb, b) in arb_fact_and_value(),
    ) {
        let expr = bin(op, Expr::var("a"), Expr::var("b"));
        let fact = modulus_remainder(&expr, &facts(fa, fb));
        if let Some(v) = eval_int(&expr, &env(a, b)) {
            prop_assert!(
                fact.contains(v),
                "{} with a={} ({}) b={} ({}) gave {} but fact is {}",
                expr, a, fa, b, fb, v, fact
            );
        }
    }

    #[test]
    fn constant_shift_and_mask_are_sound(
        (fa, a) in arb_fact_and_value(),
        k in 0i64..=10,
    ) {
        let scope = facts(fa, ModulusRemainder::unknown());
        for expr in [
            bin(BinOp::Shl, Expr::var("a"), Expr::int(k)),
            bin(BinOp::Shr, Expr::var("a"), Expr::int(k)),
            bin(BinOp::And, Expr::var("a"), Expr::int((1 << k) - 1)),
        ] {
            let fact = modulus_remainder(&expr, &scope);
            let v = eval_int(&expr, &env(a, 0)).expect("in range");
            prop_assert!(fact.contains(v), "{} with a={} gave {} but fact is {}", expr, a, v, fact);
        }
    }

    #[test]
    fn expression_trees_are_sound(
        expr in arb_expr(),
        (fa, a) in arb_fact_and_value(),
        (fb, b) in arb_fact_and_value(),
    ) {
        let fact = modulus_remainder(&expr, &facts(fa, fb));
        if let Some(v) = eval_int(&expr, &env(a, b)) {
            prop_assert!(
                fact.contains(v),
                "{} with a={} ({}) b={} ({}) gave {} but fact is {}",
                expr, a, fa, b, fb, v, fact
            );
        }
    }
}

// ── 2. Join and the unconstrained fact ──────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn join_contains_both_sides(
        (fa, a) in arb_fact_and_value(),
        (fb, b) in arb_fact_and_value(),
    ) {
        let joined = ModulusRemainder::unify(fa, fb);
        prop_assert!(joined.contains(a), "join {} of {} and {} misses {}", joined, fa, fb, a);
        prop_assert!(joined.contains(b), "join {} of {} and {} misses {}", joined, fa, fb, b);
        prop_assert!(fa.implies(&joined));
        prop_assert!(fb.implies(&joined));
    }

    #[test]
    fn unknown_is_absorbing(
        (fa, a) in arb_fact_and_value(),
        other in -100_000i64..=100_000,
    ) {
        let unknown = ModulusRemainder::unknown();
        prop_assert!((fa + unknown).is_unknown());
        prop_assert!((unknown - fa).is_unknown());
        prop_assert!(ModulusRemainder::unify(fa, unknown).is_unknown());
        // Multiplication may keep a common factor, but only a sound one.
        let product = fa * unknown;
        prop_assert!(product.contains(a * other));
    }
}

// ── 3. Scope environment ────────────────────────────────────────────────────

fn arb_bindings() -> impl Strategy<Value = Vec<(String, ModulusRemainder)>> {
    prop::collection::vec(
        (
            prop_oneof![Just("x"), Just("y"), Just("z")].prop_map(str::to_string),
            (0i64..=64, -64i64..=64).prop_map(|(m, r)| ModulusRemainder::new(m, r)),
        ),
        0..8,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn push_then_pop_restores_lookup(
        prior in arb_bindings(),
        name in prop_oneof![Just("x"), Just("y"), Just("z"), Just("w")],
        m in 0i64..=64,
        r in -64i64..=64,
    ) {
        let mut scope = Scope::new();
        for (n, f) in &prior {
            scope.push(n.as_str(), *f);
        }
        let before = scope.get(name).copied();
        scope.push(name, ModulusRemainder::new(m, r));
        prop_assert_eq!(scope.get(name).copied(), Some(ModulusRemainder::new(m, r)));
        scope.pop(name);
        prop_assert_eq!(scope.get(name).copied(), before);
    }

    #[test]
    fn enclosing_binding_is_visible_unchanged(
        outer_bindings in arb_bindings(),
        inner_bindings in arb_bindings(),
        name in prop_oneof![Just("x"), Just("y"), Just("z")],
    ) {
        let mut outer = Scope::new();
        for (n, f) in &outer_bindings {
            outer.push(n.as_str(), *f);
        }
        let mut inner = Scope::with_containing(&outer);
        for (n, f) in inner_bindings.iter().filter(|(n, _)| n != name) {
            inner.push(n.as_str(), *f);
        }
        prop_assert_eq!(inner.get(name), outer.get(name));
    }
}

// ── 4. Classification idempotence ───────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn classification_is_idempotent(
        base in arb_expr(),
        stride in 0i64..=4,
        host_alignment in prop_oneof![Just(0u32), Just(4), Just(64), Just(128), Just(256)],
        (fa, _a) in arb_fact_and_value(),
        external in any::<bool>(),
    ) {
        let mut analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
        analyzer.push_fact("a", fa);
        let load = Load {
            buffer: Ident::new("buf"),
            ty: ScalarType::Int(32),
            index: Box::new(Expr::ramp(base, Expr::int(stride), 32)),
            param: external.then(|| BufferParam::new("buf", host_alignment)),
        };
        let snapshot = load.clone();
        let first = analyzer.classify(&load).expect("valid access");
        let second = analyzer.classify(&load).expect("valid access");
        prop_assert_eq!(first, second);
        prop_assert_eq!(&load, &snapshot);
        prop_assert_eq!(analyzer.fact("a"), fa);
        if let Some(offset) = first.aligned_offset() {
            prop_assert!((0..32).contains(&offset));
        }
        prop_assert_eq!(load.index().as_ramp().map(|(_, _, lanes)| lanes), Some(32));
    }
}
