//! Constant folding of bound expressions and the peeling decision.

use crate::ir::function::{IrFunction, OpId, ValueId};
use crate::ir::loops::StructuredLoop;
use crate::ir::ops::OpKind;

/// Fold `value` to a compile-time constant, if possible.
///
/// Follows `constant` ops, arithmetic and `min`/`max` over constants, and
/// `dim` of a statically shaped tensor.
pub fn constant_value(func: &IrFunction, value: ValueId) -> Option<i64> {
    let op = func.try_op(func.defining_op(value)?)?;
    match &op.kind {
        OpKind::Constant(v) => Some(*v),
        OpKind::Binary(bin) => {
            let lhs = constant_value(func, op.operands[0])?;
            let rhs = constant_value(func, op.operands[1])?;
            bin.fold(lhs, rhs)
        }
        OpKind::Min | OpKind::Max => {
            let values = op
                .operands
                .iter()
                .map(|&v| constant_value(func, v))
                .collect::<Option<Vec<_>>>()?;
            if matches!(op.kind, OpKind::Min) {
                values.into_iter().min()
            } else {
                values.into_iter().max()
            }
        }
        OpKind::Dim { axis } => func.value_type(op.operands[0]).as_tensor()?.extent(*axis),
        _ => None,
    }
}

/// Check whether `value` is the constant zero.
pub fn is_zero(func: &IrFunction, value: ValueId) -> bool {
    constant_value(func, value) == Some(0)
}

/// Number of iterations of `[lb, ub)` with a positive `step`.
pub fn trip_count(lb: i64, ub: i64, step: i64) -> Option<u64> {
    if step <= 0 {
        return None;
    }
    if ub <= lb {
        return Some(0);
    }
    let span = (ub as i128) - (lb as i128);
    let count = (span + step as i128 - 1) / step as i128;
    u64::try_from(count).ok()
}

/// Constant view of one loop dimension; `None` entries are symbolic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimBounds {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl DimBounds {
    /// All three values are known.
    pub fn as_constants(&self) -> Option<(i64, i64, i64)> {
        Some((self.lower?, self.upper?, self.step?))
    }

    /// `lb + step * floor((ub - lb) / step)` when everything is constant.
    pub fn split_point(&self) -> Option<i64> {
        let (lb, ub, step) = self.as_constants()?;
        if step <= 0 {
            return None;
        }
        let span = (ub as i128) - (lb as i128);
        let aligned = (span.div_euclid(step as i128)) * step as i128;
        i64::try_from(lb as i128 + aligned).ok()
    }
}

/// Answers bound questions about the loops of one function.
pub struct BoundsAnalyzer<'a> {
    func: &'a IrFunction,
}

impl<'a> BoundsAnalyzer<'a> {
    pub fn new(func: &'a IrFunction) -> Self {
        Self { func }
    }

    /// Constant view of dimension `dim` of `loop_op`.
    pub fn dim_bounds(&self, loop_op: OpId, dim: usize) -> Option<DimBounds> {
        let lp = StructuredLoop::get(self.func, loop_op)?;
        if dim >= lp.num_dims() {
            return None;
        }
        Some(DimBounds {
            lower: constant_value(self.func, lp.lower_bound(dim)),
            upper: constant_value(self.func, lp.upper_bound(dim)),
            step: constant_value(self.func, lp.step(dim)),
        })
    }

    /// Decide whether dimension `dim` of `loop_op` has a partial last
    /// iteration that peeling would separate.
    ///
    /// No peeling is needed when the step is the constant 1, or when all of
    /// lower bound, upper bound and step are constants and either the range
    /// divides evenly or the loop is statically empty. Any symbolic value
    /// makes the answer `true`.
    pub fn needs_peeling(&self, loop_op: OpId, dim: usize) -> bool {
        let bounds = match self.dim_bounds(loop_op, dim) {
            Some(bounds) => bounds,
            None => return false,
        };
        if bounds.step == Some(1) {
            return false;
        }
        match bounds.as_constants() {
            Some((lb, ub, step)) => {
                if ub <= lb || step <= 0 {
                    return false;
                }
                let span = (ub as i128) - (lb as i128);
                span % step as i128 != 0
            }
            None => true,
        }
    }

    /// Static trip count of one dimension.
    pub fn trip_count(&self, loop_op: OpId, dim: usize) -> Option<u64> {
        let (lb, ub, step) = self.dim_bounds(loop_op, dim)?.as_constants()?;
        trip_count(lb, ub, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{BinaryOp, LoopInfo, LoopKind};
    use crate::ir::rewriter::Rewriter;
    use crate::ir::types::Type;

    /// Build `for (lb, ub, step)` where `None` bounds come from arguments.
    fn single_loop(lb: Option<i64>, ub: Option<i64>, step: Option<i64>) -> (IrFunction, OpId) {
        let mut func = IrFunction::new("f", vec![Type::Int, Type::Int, Type::Int]);
        let body = func.body();
        let args = func.args().to_vec();
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let mut pick = |c: Option<i64>, arg: ValueId| match c {
            Some(v) => rw.constant(v),
            None => arg,
        };
        let lbv = pick(lb, args[0]);
        let ubv = pick(ub, args[1]);
        let stepv = pick(step, args[2]);
        let lp = rw.create_loop(LoopInfo::new(LoopKind::For, 1), &[lbv], &[ubv], &[stepv], &[]);
        let lp_body = rw.func().op(lp).regions[0];
        rw.set_insertion_point_to_end(lp_body);
        rw.yield_values(vec![]);
        (func, lp)
    }

    #[test]
    fn test_constant_folding() {
        let mut func = IrFunction::new("f", vec![Type::static_tensor(&[7, 3])]);
        let body = func.body();
        let t = func.args()[0];
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let a = rw.constant(10);
        let b = rw.constant(3);
        let q = rw.binary(BinaryOp::FloorDiv, a, b);
        let d = rw.dim(t, 0);
        let m = rw.min(vec![q, d]);
        let func = rw.func();
        assert_eq!(constant_value(func, q), Some(3));
        assert_eq!(constant_value(func, d), Some(7));
        assert_eq!(constant_value(func, m), Some(3));
        assert!(!is_zero(func, m));
        assert_eq!(constant_value(func, t), None);
    }

    #[test]
    fn test_needs_peeling() {
        let (func, lp) = single_loop(Some(0), Some(10), Some(3));
        assert!(BoundsAnalyzer::new(&func).needs_peeling(lp, 0));

        let (func, lp) = single_loop(Some(0), Some(12), Some(4));
        assert!(!BoundsAnalyzer::new(&func).needs_peeling(lp, 0));

        let (func, lp) = single_loop(None, None, Some(1));
        assert!(!BoundsAnalyzer::new(&func).needs_peeling(lp, 0));

        let (func, lp) = single_loop(Some(0), None, Some(4));
        assert!(BoundsAnalyzer::new(&func).needs_peeling(lp, 0));

        let (func, lp) = single_loop(Some(0), Some(10), None);
        assert!(BoundsAnalyzer::new(&func).needs_peeling(lp, 0));

        let (func, lp) = single_loop(Some(8), Some(5), Some(3));
        assert!(!BoundsAnalyzer::new(&func).needs_peeling(lp, 0));
    }

    #[test]
    fn test_trip_count_and_split() {
        assert_eq!(trip_count(0, 10, 3), Some(4));
        assert_eq!(trip_count(0, 9, 3), Some(3));
        assert_eq!(trip_count(5, 5, 2), Some(0));
        assert_eq!(trip_count(0, 5, 0), None);

        let bounds = DimBounds { lower: Some(2), upper: Some(13), step: Some(4) };
        assert_eq!(bounds.split_point(), Some(10));
        let symbolic = DimBounds { lower: Some(0), upper: None, step: Some(4) };
        assert_eq!(symbolic.split_point(), None);
    }

    #[test]
    fn test_analyzer_trip_count() {
        let (func, lp) = single_loop(Some(0), Some(10), Some(3));
        let analyzer = BoundsAnalyzer::new(&func);
        assert_eq!(analyzer.trip_count(lp, 0), Some(4));
        assert_eq!(analyzer.dim_bounds(lp, 1), None);
    }
}
