//! Linear expressions over SSA values.
//!
//! A [`LinearExpr`] is `c0 + c1*v1 + ... + cn*vn` where every `vi` is an
//! SSA value treated as an opaque integer. Expressions are recovered from
//! chains of `add`, `sub`, `mul` by a constant and foldable constants; any
//! other value is an atom.
//!
//! [`prove_nonneg`] decides `e >= 0` from a set of facts `f >= 0` by
//! looking for `e - k1*f1 - k2*f2 = c` with `k1, k2 > 0` and `c >= 0`.

use crate::analysis::bounds::constant_value;
use crate::ir::function::{IrFunction, ValueId};
use crate::ir::ops::{BinaryOp, OpKind};
use std::collections::BTreeMap;
use std::fmt;

/// An affine combination of SSA values with integer coefficients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearExpr {
    /// Non-zero coefficient per value
    pub terms: BTreeMap<ValueId, i64>,
    pub constant: i64,
}

impl LinearExpr {
    pub fn constant(value: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: value }
    }

    /// The expression `1 * value`.
    pub fn atom(value: ValueId) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(value, 1);
        Self { terms, constant: 0 }
    }

    /// Decompose `value` into a linear expression.
    pub fn from_value(func: &IrFunction, value: ValueId) -> Self {
        Self::decompose(func, value).unwrap_or_else(|| Self::atom(value))
    }

    fn decompose(func: &IrFunction, value: ValueId) -> Option<Self> {
        if let Some(c) = constant_value(func, value) {
            return Some(Self::constant(c));
        }
        let op = func.try_op(func.defining_op(value)?)?;
        match op.kind {
            OpKind::Binary(BinaryOp::Add) => {
                let lhs = Self::from_value(func, op.operands[0]);
                let rhs = Self::from_value(func, op.operands[1]);
                lhs.checked_add(&rhs)
            }
            OpKind::Binary(BinaryOp::Sub) => {
                let lhs = Self::from_value(func, op.operands[0]);
                let rhs = Self::from_value(func, op.operands[1]);
                lhs.checked_sub(&rhs)
            }
            OpKind::Binary(BinaryOp::Mul) => {
                let lhs = Self::from_value(func, op.operands[0]);
                let rhs = Self::from_value(func, op.operands[1]);
                match (lhs.as_constant(), rhs.as_constant()) {
                    (Some(k), _) => rhs.checked_scale(k),
                    (_, Some(k)) => lhs.checked_scale(k),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// The value of a term-free expression.
    pub fn as_constant(&self) -> Option<i64> {
        if self.terms.is_empty() {
            Some(self.constant)
        } else {
            None
        }
    }

    pub fn coefficient(&self, value: ValueId) -> i64 {
        self.terms.get(&value).copied().unwrap_or(0)
    }

    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        let mut result = self.clone();
        result.constant = result.constant.checked_add(other.constant)?;
        for (&v, &c) in &other.terms {
            let sum = result.coefficient(v).checked_add(c)?;
            if sum == 0 {
                result.terms.remove(&v);
            } else {
                result.terms.insert(v, sum);
            }
        }
        Some(result)
    }

    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.checked_add(&other.checked_scale(-1)?)
    }

    pub fn checked_scale(&self, factor: i64) -> Option<Self> {
        if factor == 0 {
            return Some(Self::constant(0));
        }
        let mut terms = BTreeMap::new();
        for (&v, &c) in &self.terms {
            terms.insert(v, c.checked_mul(factor)?);
        }
        Some(Self { terms, constant: self.constant.checked_mul(factor)? })
    }

    /// `self + delta`.
    pub fn offset(&self, delta: i64) -> Option<Self> {
        self.checked_add(&Self::constant(delta))
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (v, c) in &self.terms {
            if first {
                match *c {
                    1 => write!(f, "{}", v)?,
                    -1 => write!(f, "-{}", v)?,
                    c => write!(f, "{}*{}", c, v)?,
                }
            } else if *c < 0 {
                match *c {
                    -1 => write!(f, " - {}", v)?,
                    c => write!(f, " - {}*{}", -(c as i128), v)?,
                }
            } else {
                match *c {
                    1 => write!(f, " + {}", v)?,
                    c => write!(f, " + {}*{}", c, v)?,
                }
            }
            first = false;
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant > 0 {
            write!(f, " + {}", self.constant)
        } else if self.constant < 0 {
            write!(f, " - {}", -(self.constant as i128))
        } else {
            Ok(())
        }
    }
}

/// Positive multipliers `k` for which `expr - k*fact` cancels at least one
/// term of `fact`.
fn multipliers(expr: &LinearExpr, fact: &LinearExpr) -> Vec<i64> {
    let mut out = Vec::new();
    for (&v, &c) in &fact.terms {
        let e = expr.coefficient(v);
        if e != 0 && e % c == 0 {
            let k = e / c;
            if k > 0 && !out.contains(&k) {
                out.push(k);
            }
        }
    }
    out
}

fn is_nonneg_constant(expr: &LinearExpr) -> bool {
    matches!(expr.as_constant(), Some(c) if c >= 0)
}

/// Prove `expr >= 0` given that every fact is `>= 0`. Combines at most two
/// facts; returns `false` when no proof is found.
pub fn prove_nonneg(expr: &LinearExpr, facts: &[LinearExpr]) -> bool {
    if is_nonneg_constant(expr) {
        return true;
    }
    for first in facts {
        for k1 in multipliers(expr, first) {
            let rest = match first.checked_scale(k1).and_then(|s| expr.checked_sub(&s)) {
                Some(rest) => rest,
                None => continue,
            };
            if is_nonneg_constant(&rest) {
                return true;
            }
            for second in facts {
                for k2 in multipliers(&rest, second) {
                    let last = second.checked_scale(k2).and_then(|s| rest.checked_sub(&s));
                    if last.as_ref().map(is_nonneg_constant).unwrap_or(false) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Prove `lhs >= rhs`.
pub fn prove_ge(lhs: &LinearExpr, rhs: &LinearExpr, facts: &[LinearExpr]) -> bool {
    match lhs.checked_sub(rhs) {
        Some(diff) => prove_nonneg(&diff, facts),
        None => false,
    }
}
