// modulus.rs: Congruence facts over integer index arithmetic
//
// A `ModulusRemainder` asserts that an expression's value `v` satisfies
// `v ≡ remainder (mod modulus)` on every execution. Facts for compound
// expressions are derived bottom-up from their operands; names resolve
// through a `Scope` of previously derived facts.
//
// Preconditions: the integer semantics of `ir::BinOp::apply` (Euclidean
//                division, `x / 0 == 0`, `x % 0 == 0`) describe the program.
// Postconditions: every derived fact holds for all values consistent with
//                 the operand facts. When in doubt the result is `unknown()`.
// Failure modes: none; overflow while deriving a fact yields `unknown()`.
// Side effects: none.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

use crate::ir::{pow2, BinOp, Expr, ExprKind, ScalarType};
use crate::scope::Scope;

/// `v ≡ remainder (mod modulus)`.
///
/// Representation:
/// - `modulus == 0`: `v` is exactly `remainder`.
/// - `modulus == 1`: no information (every integer is `0 mod 1`).
/// - otherwise `0 <= remainder < modulus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModulusRemainder {
    pub modulus: i64,
    pub remainder: i64,
}

impl Default for ModulusRemainder {
    fn default() -> Self {
        ModulusRemainder::unknown()
    }
}

impl ModulusRemainder {
    /// Build a normalized fact. The sign of `modulus` is irrelevant; the
    /// remainder is reduced into `[0, |modulus|)`.
    pub fn new(modulus: i64, remainder: i64) -> Self {
        let Some(modulus) = modulus.checked_abs() else {
            return ModulusRemainder::unknown();
        };
        if modulus == 0 {
            return ModulusRemainder {
                modulus: 0,
                remainder,
            };
        }
        ModulusRemainder {
            modulus,
            remainder: remainder.rem_euclid(modulus),
        }
    }

    /// The fact that is true of every integer.
    pub const fn unknown() -> Self {
        ModulusRemainder {
            modulus: 1,
            remainder: 0,
        }
    }

    /// The exact value `v`.
    pub const fn constant(v: i64) -> Self {
        ModulusRemainder {
            modulus: 0,
            remainder: v,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.modulus == 1
    }

    pub fn as_constant(&self) -> Option<i64> {
        (self.modulus == 0).then_some(self.remainder)
    }

    /// True if the concrete value `v` is consistent with this fact.
    pub fn contains(&self, v: i64) -> bool {
        if self.modulus == 0 {
            v == self.remainder
        } else {
            v.rem_euclid(self.modulus) == self.remainder
        }
    }

    /// True if every value satisfying `self` also satisfies `other`.
    pub fn implies(&self, other: &ModulusRemainder) -> bool {
        if other.modulus == 0 {
            return self.modulus == 0 && self.remainder == other.remainder;
        }
        self.modulus % other.modulus == 0 && other.contains(self.remainder)
    }

    /// The most precise fact true of every value satisfying `a` or `b`.
    /// Used where control flow may produce either operand (min, max, select).
    pub fn unify(a: ModulusRemainder, b: ModulusRemainder) -> ModulusRemainder {
        let Some(diff) = a.remainder.checked_sub(b.remainder) else {
            return ModulusRemainder::unknown();
        };
        let modulus = gcd(gcd(a.modulus, b.modulus), diff);
        ModulusRemainder::new(modulus, a.remainder)
    }

    /// `a << k` for a constant shift `k`, as multiplication by `2^k`.
    pub fn shift_left(a: ModulusRemainder, k: ModulusRemainder) -> ModulusRemainder {
        match k.as_constant().and_then(pow2) {
            Some(factor) => a * ModulusRemainder::constant(factor),
            None => ModulusRemainder::unknown(),
        }
    }

    /// `a >> k` for a constant shift `k`, as floor division by `2^k`.
    pub fn shift_right(a: ModulusRemainder, k: ModulusRemainder) -> ModulusRemainder {
        match k.as_constant().and_then(pow2) {
            Some(divisor) => a / ModulusRemainder::constant(divisor),
            None => ModulusRemainder::unknown(),
        }
    }

    /// `a & b`. Only a constant low-bit mask `2^k - 1` is understood, as
    /// `a mod 2^k`.
    pub fn bitwise_and(a: ModulusRemainder, b: ModulusRemainder) -> ModulusRemainder {
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return ModulusRemainder::constant(x & y);
        }
        let mask = match (a.as_constant(), b.as_constant()) {
            (Some(m), None) => Some((m, b)),
            (None, Some(m)) => Some((m, a)),
            _ => None,
        };
        match mask {
            Some((m, other)) if m >= 0 && (m & m.wrapping_add(1)) == 0 => {
                match m.checked_add(1) {
                    Some(p) => other % ModulusRemainder::constant(p),
                    None => ModulusRemainder::unknown(),
                }
            }
            _ => ModulusRemainder::unknown(),
        }
    }

    /// A cast of a value with this fact to `ty`. Signed casts of 32 bits or
    /// more assume the value fits; anything narrower or unsigned may wrap.
    pub fn cast(self, ty: ScalarType) -> ModulusRemainder {
        match ty {
            ScalarType::Int(bits) if bits >= 32 => self,
            _ => ModulusRemainder::unknown(),
        }
    }

    /// Fact for the values of a ramp `base + i * stride`, `0 <= i < lanes`.
    pub fn ramp(base: ModulusRemainder, stride: ModulusRemainder, lanes: u32) -> ModulusRemainder {
        if lanes <= 1 {
            return base;
        }
        base + stride * ModulusRemainder::unknown()
    }
}

impl fmt::Display for ModulusRemainder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modulus {
            0 => write!(f, "{}", self.remainder),
            1 => write!(f, "?"),
            m => write!(f, "{}*k + {}", m, self.remainder),
        }
    }
}

/// Greatest common divisor of `|a|` and `|b|`; `gcd(0, 0) == 0`.
///
/// The result is used as a modulus, so when it does not fit in `i64` (only
/// `gcd(i64::MIN, 0)`) it degrades to 1, the weakest modulus.
pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut x, mut y) = (a.unsigned_abs(), b.unsigned_abs());
    while y != 0 {
        let t = x % y;
        x = y;
        y = t;
    }
    i64::try_from(x).unwrap_or(1)
}

/// Build a fact from overflow-checked parts.
fn checked(modulus: Option<i64>, remainder: Option<i64>) -> ModulusRemainder {
    match (modulus, remainder) {
        (Some(m), Some(r)) => ModulusRemainder::new(m, r),
        _ => ModulusRemainder::unknown(),
    }
}

// ── Arithmetic combinators ─────────────────────────────────────────────────

impl Add for ModulusRemainder {
    type Output = ModulusRemainder;

    fn add(self, b: ModulusRemainder) -> ModulusRemainder {
        checked(
            Some(gcd(self.modulus, b.modulus)),
            self.remainder.checked_add(b.remainder),
        )
    }
}

impl Sub for ModulusRemainder {
    type Output = ModulusRemainder;

    fn sub(self, b: ModulusRemainder) -> ModulusRemainder {
        checked(
            Some(gcd(self.modulus, b.modulus)),
            self.remainder.checked_sub(b.remainder),
        )
    }
}

impl Neg for ModulusRemainder {
    type Output = ModulusRemainder;

    fn neg(self) -> ModulusRemainder {
        checked(Some(self.modulus), self.remainder.checked_neg())
    }
}

impl Mul for ModulusRemainder {
    type Output = ModulusRemainder;

    fn mul(self, b: ModulusRemainder) -> ModulusRemainder {
        let a = self;
        if a.modulus == 0 && b.modulus == 0 {
            return match a.remainder.checked_mul(b.remainder) {
                Some(v) => ModulusRemainder::constant(v),
                None => ModulusRemainder::unknown(),
            };
        }
        if a.modulus == 0 {
            // k * (m*q + r) == (k*m)*q + k*r
            return checked(
                a.remainder.checked_mul(b.modulus),
                a.remainder.checked_mul(b.remainder),
            );
        }
        if b.modulus == 0 {
            return checked(
                b.remainder.checked_mul(a.modulus),
                b.remainder.checked_mul(a.remainder),
            );
        }
        if a.remainder == 0 && b.remainder == 0 {
            return checked(a.modulus.checked_mul(b.modulus), Some(0));
        }
        if a.remainder == 0 {
            // m1*q * (m2*p + r2): the second factor is a multiple of gcd(m2, r2)
            return checked(
                a.modulus.checked_mul(gcd(b.modulus, b.remainder)),
                Some(0),
            );
        }
        if b.remainder == 0 {
            return checked(
                b.modulus.checked_mul(gcd(a.modulus, a.remainder)),
                Some(0),
            );
        }
        checked(
            Some(gcd(a.modulus, b.modulus)),
            a.remainder.checked_mul(b.remainder),
        )
    }
}

impl Div for ModulusRemainder {
    type Output = ModulusRemainder;

    /// Euclidean division. Only a nonzero constant divisor that divides the
    /// dividend's modulus gives a useful fact:
    /// `(m*q + r) / k == (m/k)*q + r/k` when `k | m`.
    fn div(self, b: ModulusRemainder) -> ModulusRemainder {
        match b.as_constant() {
            Some(0) => ModulusRemainder::constant(0),
            Some(k) if self.modulus % k == 0 => {
                checked(self.modulus.checked_div(k), self.remainder.checked_div_euclid(k))
            }
            _ => ModulusRemainder::unknown(),
        }
    }
}

impl Rem for ModulusRemainder {
    type Output = ModulusRemainder;

    /// Euclidean remainder. `x mod y == x + z*y` for some integer `z`, so
    /// with `x = m1*q + r1` and `y = m2*p + r2` the result is congruent to
    /// `r1` modulo `gcd(m1, m2, r2)`. A divisor that may be zero adds the
    /// possible result 0.
    fn rem(self, b: ModulusRemainder) -> ModulusRemainder {
        let a = self;
        if let Some(k) = b.as_constant() {
            if k == 0 {
                return ModulusRemainder::constant(0);
            }
            if a.modulus % k == 0 {
                return checked(Some(0), a.remainder.checked_rem_euclid(k));
            }
        }
        let modulus = gcd(gcd(a.modulus, b.modulus), b.remainder);
        let result = ModulusRemainder::new(modulus, a.remainder);
        if b.remainder == 0 {
            ModulusRemainder::unify(result, ModulusRemainder::constant(0))
        } else {
            result
        }
    }
}

// ── Expression analysis ────────────────────────────────────────────────────

/// Derive the congruence fact of `expr`. Free names are looked up in
/// `scope`; names it does not bind carry no information.
pub fn modulus_remainder(expr: &Expr, scope: &Scope<'_, ModulusRemainder>) -> ModulusRemainder {
    let mut visitor = ComputeModulusRemainder {
        scope: Scope::with_containing(scope),
    };
    visitor.visit(expr)
}

/// Try to determine `expr mod modulus` statically.
///
/// For example, if the analysis says `expr == 16*k + 13` and we ask for
/// `expr mod 8`, then because `16 mod 8 == 0` the answer is `13 mod 8 == 5`.
/// If instead `expr == 6*k + 3`, `expr mod 8` could be 1, 3, 5, or 7 and
/// there is no answer.
pub fn reduce_expr_modulo(
    expr: &Expr,
    modulus: i64,
    scope: &Scope<'_, ModulusRemainder>,
) -> Option<i64> {
    if modulus <= 0 {
        return None;
    }
    let result = modulus_remainder(expr, scope);
    log::trace!("modulus_remainder({expr}) = {result}");
    if result.modulus % modulus == 0 {
        Some(result.remainder.rem_euclid(modulus))
    } else {
        None
    }
}

struct ComputeModulusRemainder<'a> {
    /// Bindings introduced by `let` expressions inside the analyzed tree.
    scope: Scope<'a, ModulusRemainder>,
}

impl ComputeModulusRemainder<'_> {
    fn visit(&mut self, expr: &Expr) -> ModulusRemainder {
        match &expr.kind {
            ExprKind::IntImm(v) => ModulusRemainder::constant(*v),
            ExprKind::Var(name) => self.scope.get(name).copied().unwrap_or_default(),
            ExprKind::Binary(op, a, b) => {
                let a = self.visit(a);
                let b = self.visit(b);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Mod => a % b,
                    BinOp::Shl => ModulusRemainder::shift_left(a, b),
                    BinOp::Shr => ModulusRemainder::shift_right(a, b),
                    BinOp::And => ModulusRemainder::bitwise_and(a, b),
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                        ModulusRemainder::unify(
                            ModulusRemainder::constant(0),
                            ModulusRemainder::constant(1),
                        )
                    }
                }
            }
            ExprKind::Neg(a) => -self.visit(a),
            ExprKind::Min(a, b) | ExprKind::Max(a, b) => {
                let a = self.visit(a);
                let b = self.visit(b);
                ModulusRemainder::unify(a, b)
            }
            ExprKind::Select {
                true_value,
                false_value,
                ..
            } => {
                let a = self.visit(true_value);
                let b = self.visit(false_value);
                ModulusRemainder::unify(a, b)
            }
            ExprKind::Cast(ty, a) => self.visit(a).cast(*ty),
            ExprKind::Let { name, value, body } => {
                let value = self.visit(value);
                self.scope.push(name.name.as_str(), value);
                let result = self.visit(body);
                self.scope.pop(&name.name);
                result
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => {
                let base = self.visit(base);
                let stride = self.visit(stride);
                ModulusRemainder::ramp(base, stride, *lanes)
            }
            ExprKind::Broadcast { value, .. } => self.visit(value),
            ExprKind::Load(_) => ModulusRemainder::unknown(),
        }
    }
}
