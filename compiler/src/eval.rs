// eval.rs: Reference evaluator for scalar index arithmetic
//
// Computes the concrete value of a scalar integer expression under an
// assignment of its free variables, using the same integer semantics the
// congruence analysis reasons about. Serves as the ground truth that
// derived facts are checked against.
//
// Preconditions: every free variable of `expr` is bound in `env`.
// Postconditions: `Some(v)` is the value of `expr`; `None` if the value is
//                 undefined (overflow) or not a scalar integer (vectors,
//                 memory reads, float casts).
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;

use crate::ir::{Expr, ExprKind, ScalarType};

/// Values of free variables.
pub type Env = HashMap<String, i64>;

/// Evaluate `expr` under `env`.
pub fn eval_int(expr: &Expr, env: &Env) -> Option<i64> {
    let mut env = env.clone();
    eval_in(expr, &mut env)
}

fn eval_in(expr: &Expr, env: &mut Env) -> Option<i64> {
    match &expr.kind {
        ExprKind::IntImm(v) => Some(*v),
        ExprKind::Var(name) => env.get(name).copied(),
        ExprKind::Binary(op, a, b) => {
            let a = eval_in(a, env)?;
            let b = eval_in(b, env)?;
            op.apply(a, b)
        }
        ExprKind::Neg(a) => eval_in(a, env)?.checked_neg(),
        ExprKind::Min(a, b) => Some(eval_in(a, env)?.min(eval_in(b, env)?)),
        ExprKind::Max(a, b) => Some(eval_in(a, env)?.max(eval_in(b, env)?)),
        ExprKind::Select {
            cond,
            true_value,
            false_value,
        } => {
            if eval_in(cond, env)? != 0 {
                eval_in(true_value, env)
            } else {
                eval_in(false_value, env)
            }
        }
        ExprKind::Cast(ty, a) => cast_int(*ty, eval_in(a, env)?),
        ExprKind::Let { name, value, body } => {
            let value = eval_in(value, env)?;
            let shadowed = env.insert(name.name.clone(), value);
            let result = eval_in(body, env);
            match shadowed {
                Some(old) => env.insert(name.name.clone(), old),
                None => env.remove(&name.name),
            };
            result
        }
        ExprKind::Ramp { .. } | ExprKind::Broadcast { .. } | ExprKind::Load(_) => None,
    }
}

/// Cast semantics: signed targets of 32 bits or more are undefined when the
/// value does not fit; narrower and unsigned targets wrap.
fn cast_int(ty: ScalarType, v: i64) -> Option<i64> {
    match ty {
        ScalarType::Int(64) => Some(v),
        ScalarType::UInt(64) => (v >= 0).then_some(v),
        ScalarType::Int(32) => i32::try_from(v).ok().map(i64::from),
        ScalarType::Int(16) => Some(i64::from(v as i16)),
        ScalarType::Int(8) => Some(i64::from(v as i8)),
        ScalarType::UInt(32) => Some(i64::from(v as u32)),
        ScalarType::UInt(16) => Some(i64::from(v as u16)),
        ScalarType::UInt(8) => Some(i64::from(v as u8)),
        _ => None,
    }
}
