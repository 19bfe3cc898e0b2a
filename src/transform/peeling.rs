//! Loop peeling.
//!
//! Peeling splits one dimension of a loop whose step may not divide its
//! range into a main loop over the largest step-aligned sub-range and a
//! remainder loop for the last partial iteration:
//!
//! ```text
//! for i = lb to ub step s:        for i = lb to split step s:  // main
//!   body(i)                  =>     body(i)
//!                                 for i = split to ub step s:  // remainder
//!                                   body(i)
//! ```
//!
//! with `split = lb + s * floor((ub - lb) / s)`. Loop-carried values flow
//! from the main loop into the remainder. Afterwards `min`/`max` clamps in
//! both bodies are simplified with the new range facts, and both loops are
//! tagged so they are not peeled again.

use crate::analysis::affine::LinearExpr;
use crate::analysis::bounds::{is_zero, BoundsAnalyzer};
use crate::ir::function::{IrFunction, OpId, ValueId};
use crate::ir::loops::{collect_loops, StructuredLoop};
use crate::ir::ops::BinaryOp;
use crate::ir::rewriter::{Rewriter, ValueMap};
use crate::transform::canonicalize::{loop_range_facts, BoundSimplifier, MinMaxSimplifier};
use crate::transform::marker::{
    has_matching_label, has_transformation_attr, is_dim_peeled, mark_dim_peeled,
    set_transformation_attr, PEELED_MARKER,
};
use crate::transform::Transform;
use crate::utils::errors::{TransformError, TransformErrorKind};
use anyhow::Result;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PEELING: &str = "peeling";

/// Outcome of peeling one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeelResult {
    /// The original loop, now ending at the split point
    pub main: OpId,
    /// The new loop covering the partial last iteration
    pub remainder: OpId,
    /// The split point value
    pub split: ValueId,
}

/// Peel dimension `dim` of `loop_op` and simplify both resulting bodies
/// with the default [`MinMaxSimplifier`].
pub fn peel_and_canonicalize_loop(
    rewriter: &mut Rewriter<'_>,
    loop_op: OpId,
    dim: usize,
) -> Result<PeelResult, TransformError> {
    peel_and_canonicalize_loop_with(rewriter, loop_op, dim, &MinMaxSimplifier::new())
}

/// Peel dimension `dim` of `loop_op` using `simplifier` for the cleanup.
///
/// Fails without touching the IR when `loop_op` is not a placed loop, when
/// `dim` is out of range (`UnsupportedOperationShape`) or when the
/// dimension has no partial iteration or was already split by an earlier
/// peel (`NoOpRequired`).
pub fn peel_and_canonicalize_loop_with(
    rewriter: &mut Rewriter<'_>,
    loop_op: OpId,
    dim: usize,
    simplifier: &dyn BoundSimplifier,
) -> Result<PeelResult, TransformError> {
    let func = rewriter.func();
    let lp = StructuredLoop::get(func, loop_op).ok_or_else(|| {
        TransformError::new(
            TransformErrorKind::UnsupportedOperationShape,
            PEELING,
            format!("{} is not a structured loop", loop_op),
        )
    })?;
    if dim >= lp.num_dims() {
        return Err(TransformError::new(
            TransformErrorKind::UnsupportedOperationShape,
            PEELING,
            format!("dimension {} out of range for {}-d loop {}", dim, lp.num_dims(), loop_op),
        ));
    }
    if func.position(loop_op).is_none() {
        return Err(TransformError::new(
            TransformErrorKind::UnsupportedOperationShape,
            PEELING,
            format!("{} is not placed in a block", loop_op),
        ));
    }
    if is_dim_peeled(func, loop_op, dim) {
        return Err(TransformError::no_op(
            PEELING,
            format!("dimension {} of {} was already peeled", dim, loop_op),
        ));
    }
    let analyzer = BoundsAnalyzer::new(func);
    if !analyzer.needs_peeling(loop_op, dim) {
        return Err(TransformError::no_op(
            PEELING,
            format!("dimension {} of {} has no partial iteration", dim, loop_op),
        ));
    }
    let info = lp.info();
    let (lb, ub, step) = (lp.lower_bound(dim), lp.upper_bound(dim), lp.step(dim));
    let constant_split = analyzer.dim_bounds(loop_op, dim).and_then(|b| b.split_point());

    // Split point, computed right before the loop.
    rewriter.set_insertion_point_before(loop_op);
    let split = match constant_split {
        Some(value) => rewriter.constant(value),
        None => {
            let span = rewriter.binary(BinaryOp::Sub, ub, lb);
            let trips = rewriter.binary(BinaryOp::FloorDiv, span, step);
            let aligned = rewriter.binary(BinaryOp::Mul, trips, step);
            let split = if is_zero(rewriter.func(), lb) {
                aligned
            } else {
                rewriter.binary(BinaryOp::Add, lb, aligned)
            };
            // An empty range must stay empty on both sides.
            rewriter.max(vec![lb, split])
        }
    };

    rewriter.set_insertion_point_after(loop_op);
    let mut mapping = ValueMap::new();
    let remainder = rewriter.clone_op(loop_op, &mut mapping);
    rewriter.set_operand(remainder, info.lower_bound_index(dim), split);
    rewriter.set_operand(loop_op, info.upper_bound_index(dim), split);

    let main_results = rewriter.func().op(loop_op).results.clone();
    let remainder_results = rewriter.func().op(remainder).results.clone();
    for (i, (&main_result, &remainder_result)) in main_results.iter().zip(&remainder_results).enumerate() {
        rewriter.set_operand(remainder, info.init_index(i), main_result);
        rewriter.replace_all_uses_except(main_result, remainder_result, remainder);
    }

    let (main_facts, remainder_facts) = peel_facts(rewriter.func(), loop_op, remainder, dim, ub, step, split);
    let main_body = rewriter.func().op(loop_op).regions[0];
    let remainder_body = rewriter.func().op(remainder).regions[0];
    let simplified = simplifier.simplify(rewriter, main_body, &main_facts)
        + simplifier.simplify(rewriter, remainder_body, &remainder_facts);

    for op in [loop_op, remainder] {
        set_transformation_attr(rewriter, op, PEELED_MARKER);
        mark_dim_peeled(rewriter, op, dim);
    }

    debug!(
        "peeled dimension {} of {}: remainder {}, {} clamp(s) simplified",
        dim, loop_op, remainder, simplified
    );
    Ok(PeelResult { main: loop_op, remainder, split })
}

/// Range facts for both sides of a peeled dimension, each `>= 0`.
///
/// Main loop: `ub - iv - step` and `split - iv - step`.
/// Remainder: `step - (ub - iv) - 1` and `iv - split`.
/// Both also get the generic per-loop facts.
fn peel_facts(
    func: &IrFunction,
    main: OpId,
    remainder: OpId,
    dim: usize,
    ub: ValueId,
    step: ValueId,
    split: ValueId,
) -> (Vec<LinearExpr>, Vec<LinearExpr>) {
    let u = LinearExpr::from_value(func, ub);
    let s = LinearExpr::from_value(func, step);
    let p = LinearExpr::from_value(func, split);
    let iv_of = |op: OpId| {
        StructuredLoop::get(func, op).map(|lp| LinearExpr::atom(lp.induction_var(dim)))
    };

    let mut main_facts = loop_range_facts(func, main);
    if let Some(iv) = iv_of(main) {
        main_facts.extend(u.checked_sub(&iv).and_then(|e| e.checked_sub(&s)));
        main_facts.extend(p.checked_sub(&iv).and_then(|e| e.checked_sub(&s)));
    }

    let mut remainder_facts = loop_range_facts(func, remainder);
    if let Some(iv) = iv_of(remainder) {
        remainder_facts.extend(
            s.checked_sub(&u)
                .and_then(|e| e.checked_add(&iv))
                .and_then(|e| e.offset(-1)),
        );
        remainder_facts.extend(iv.checked_sub(&p));
    }
    (main_facts, remainder_facts)
}

/// Peel every dimension of `loop_op` in increasing order, using the
/// default simplifier. Returns the remainder loops.
pub fn peel_all_loops(rewriter: &mut Rewriter<'_>, loop_op: OpId) -> Vec<OpId> {
    peel_all_loops_with(rewriter, loop_op, &MinMaxSimplifier::new())
}

/// Tag `loop_op` as peeled, then peel each of its dimensions on the
/// evolving main loop. Remainders are not peeled further; dimensions that
/// need no peeling contribute no remainder.
pub fn peel_all_loops_with(
    rewriter: &mut Rewriter<'_>,
    loop_op: OpId,
    simplifier: &dyn BoundSimplifier,
) -> Vec<OpId> {
    let num_dims = match StructuredLoop::get(rewriter.func(), loop_op) {
        Some(lp) => lp.num_dims(),
        None => {
            warn!("{} is not a structured loop; nothing to peel", loop_op);
            return Vec::new();
        }
    };
    set_transformation_attr(rewriter, loop_op, PEELED_MARKER);

    let mut remainders = Vec::new();
    for dim in 0..num_dims {
        match peel_and_canonicalize_loop_with(rewriter, loop_op, dim, simplifier) {
            Ok(result) => remainders.push(result.remainder),
            Err(err) if err.is_no_op() => trace!("{}", err),
            Err(err) => warn!("skipping dimension {} of {}: {}", dim, loop_op, err),
        }
    }
    remainders
}

/// Which dimensions the peeling pass handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeelMode {
    /// Peeling disabled
    None,
    /// Every dimension of every loop
    All,
    /// One dimension of every loop
    Dim(usize),
}

impl Default for PeelMode {
    fn default() -> Self {
        PeelMode::All
    }
}

impl fmt::Display for PeelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeelMode::None => write!(f, "none"),
            PeelMode::All => write!(f, "all"),
            PeelMode::Dim(d) => write!(f, "{}", d),
        }
    }
}

impl FromStr for PeelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PeelMode::None),
            "all" => Ok(PeelMode::All),
            other => other
                .parse::<usize>()
                .map(PeelMode::Dim)
                .map_err(|_| format!("invalid peel mode '{}': expected 'all', 'none' or a dimension", other)),
        }
    }
}

/// Statistics of one peeling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeelStats {
    /// Loops the pass visited and tagged
    pub loops_visited: usize,
    /// Remainder loops created
    pub remainders_created: usize,
    /// Full scans over the function
    pub iterations: usize,
    /// Attempts that failed for a reason other than "nothing to do"
    pub failures: Vec<String>,
}

/// Function-wide peeling pass.
#[derive(Debug, Clone)]
pub struct Peeling {
    pub mode: PeelMode,
    /// Only peel loops carrying this label
    pub label: Option<String>,
    /// Upper bound on the number of scans
    pub max_iterations: usize,
}

impl Peeling {
    pub fn new(mode: PeelMode) -> Self {
        Self { mode, label: None, max_iterations: 16 }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn is_candidate(&self, func: &IrFunction, op: OpId) -> bool {
        if !func.is_live(op) || has_transformation_attr(func, op, PEELED_MARKER) {
            return false;
        }
        match &self.label {
            Some(label) => has_matching_label(func, op, label),
            None => true,
        }
    }

    /// Peel loops until a scan changes nothing. Clones of inner loops made
    /// while peeling an outer loop are picked up by the following scan.
    pub fn run(&self, func: &mut IrFunction) -> PeelStats {
        let mut stats = PeelStats::default();
        if self.mode == PeelMode::None {
            return stats;
        }
        while stats.iterations < self.max_iterations {
            stats.iterations += 1;
            let mut changed = false;
            for op in collect_loops(func) {
                if !self.is_candidate(func, op) {
                    continue;
                }
                let mut rewriter = Rewriter::new(func);
                stats.loops_visited += 1;
                match self.mode {
                    PeelMode::All => {
                        stats.remainders_created += peel_all_loops(&mut rewriter, op).len();
                    }
                    PeelMode::Dim(dim) => {
                        set_transformation_attr(&mut rewriter, op, PEELED_MARKER);
                        match peel_and_canonicalize_loop(&mut rewriter, op, dim) {
                            Ok(_) => stats.remainders_created += 1,
                            Err(err) if err.is_no_op() => trace!("{}", err),
                            Err(err) => {
                                warn!("skipping {}: {}", op, err);
                                stats.failures.push(err.to_string());
                            }
                        }
                    }
                    PeelMode::None => {}
                }
                changed |= rewriter.mutations() > 0;
            }
            if !changed {
                break;
            }
        }
        stats
    }
}

impl Transform for Peeling {
    fn apply(&self, func: &mut IrFunction) -> Result<bool> {
        let stats = self.run(func);
        Ok(stats.loops_visited > 0)
    }

    fn name(&self) -> &str {
        PEELING
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{LoopInfo, LoopKind, OpKind};
    use crate::ir::types::Type;
    use crate::ir::verify;

    /// `return(for i in [lb, ub) step s: acc + i)` with constant bounds.
    fn sum_loop(lb: i64, ub: i64, step: i64) -> (IrFunction, OpId) {
        let mut func = IrFunction::new("f", vec![]);
        let body = func.body();
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let lbv = rw.constant(lb);
        let ubv = rw.constant(ub);
        let stepv = rw.constant(step);
        let init = rw.constant(0);
        let lp = rw.create_loop(LoopInfo::new(LoopKind::For, 1), &[lbv], &[ubv], &[stepv], &[init]);
        let lp_body = rw.func().op(lp).regions[0];
        let args = rw.func().block(lp_body).args.clone();
        rw.set_insertion_point_to_end(lp_body);
        let sum = rw.binary(BinaryOp::Add, args[1], args[0]);
        rw.yield_values(vec![sum]);
        let result = rw.func().op(lp).results[0];
        rw.set_insertion_point_to_end(body);
        rw.create(crate::ir::ops::OpKind::Return, vec![result], vec![], vec![]);
        (func, lp)
    }

    #[test]
    fn test_peel_constant_bounds() {
        let (mut func, lp) = sum_loop(0, 10, 3);
        let mut rw = Rewriter::new(&mut func);
        let result = peel_and_canonicalize_loop(&mut rw, lp, 0).unwrap();
        let func = rw.func();

        assert_eq!(result.main, lp);
        assert_eq!(crate::analysis::constant_value(func, result.split), Some(9));
        let main = StructuredLoop::get(func, lp).unwrap();
        let rem = StructuredLoop::get(func, result.remainder).unwrap();
        assert_eq!(main.upper_bound(0), result.split);
        assert_eq!(rem.lower_bound(0), result.split);
        // Main results feed the remainder; the return reads the remainder.
        assert_eq!(rem.inits(), main.results());
        let ret = func.terminator(func.body()).unwrap();
        assert_eq!(func.op(ret).operands, rem.results().to_vec());
        assert!(has_transformation_attr(func, lp, PEELED_MARKER));
        assert!(has_transformation_attr(func, result.remainder, PEELED_MARKER));
        assert!(verify(func).is_ok());
    }

    #[test]
    fn test_peel_twice_is_no_op() {
        let (mut func, lp) = sum_loop(0, 10, 3);
        let mut rw = Rewriter::new(&mut func);
        peel_and_canonicalize_loop(&mut rw, lp, 0).unwrap();
        let before = rw.mutations();
        let err = peel_and_canonicalize_loop(&mut rw, lp, 0).unwrap_err();
        assert!(err.is_no_op());
        assert_eq!(rw.mutations(), before);
    }

    #[test]
    fn test_peel_twice_is_no_op_symbolic() {
        let mut func = IrFunction::new("sum", vec![Type::Int, Type::Int]);
        let body = func.body();
        let (lb, ub) = (func.args()[0], func.args()[1]);
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let c0 = rw.constant(0);
        let c4 = rw.constant(4);
        let lp = rw.create_loop(LoopInfo::new(LoopKind::For, 1), &[lb], &[ub], &[c4], &[c0]);
        let lp_body = rw.func().op(lp).regions[0];
        let (iv, acc) = (rw.func().block(lp_body).args[0], rw.func().block(lp_body).args[1]);
        rw.set_insertion_point_to_end(lp_body);
        let next = rw.binary(BinaryOp::Add, acc, iv);
        rw.yield_values(vec![next]);
        let result = rw.func().op(lp).results[0];
        rw.set_insertion_point_to_end(body);
        rw.create(OpKind::Return, vec![result], vec![], vec![]);

        let first = peel_and_canonicalize_loop(&mut rw, lp, 0).unwrap();
        let before = rw.mutations();
        for op in [first.main, first.remainder] {
            let err = peel_and_canonicalize_loop(&mut rw, op, 0).unwrap_err();
            assert!(err.is_no_op());
        }
        assert_eq!(rw.mutations(), before);
        assert!(peel_all_loops(&mut rw, first.main).is_empty());
        assert_eq!(collect_loops(rw.func()).len(), 2);
        assert!(verify(rw.func()).is_ok());
    }

    #[test]
    fn test_aligned_and_unit_step_are_no_ops() {
        for (lb, ub, step) in [(0, 12, 4), (0, 7, 1), (5, 5, 2)] {
            let (mut func, lp) = sum_loop(lb, ub, step);
            let mut rw = Rewriter::new(&mut func);
            let err = peel_and_canonicalize_loop(&mut rw, lp, 0).unwrap_err();
            assert_eq!(err.kind, TransformErrorKind::NoOpRequired);
            assert_eq!(rw.mutations(), 0);
        }
    }

    #[test]
    fn test_bad_dimension() {
        let (mut func, lp) = sum_loop(0, 10, 3);
        let mut rw = Rewriter::new(&mut func);
        let err = peel_and_canonicalize_loop(&mut rw, lp, 1).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::UnsupportedOperationShape);
        assert_eq!(rw.mutations(), 0);
    }

    #[test]
    fn test_peel_all_loops_marks_even_when_aligned() {
        let (mut func, lp) = sum_loop(0, 12, 4);
        let mut rw = Rewriter::new(&mut func);
        assert!(peel_all_loops(&mut rw, lp).is_empty());
        assert!(has_transformation_attr(rw.func(), lp, PEELED_MARKER));
    }

    #[test]
    fn test_peel_mode_from_str() {
        assert_eq!("all".parse::<PeelMode>(), Ok(PeelMode::All));
        assert_eq!("none".parse::<PeelMode>(), Ok(PeelMode::None));
        assert_eq!("1".parse::<PeelMode>(), Ok(PeelMode::Dim(1)));
        assert!("sideways".parse::<PeelMode>().is_err());
        assert_eq!(PeelMode::Dim(2).to_string(), "2");
    }

    #[test]
    fn test_pass_converges() {
        let (mut func, _) = sum_loop(0, 10, 3);
        let pass = Peeling::new(PeelMode::All);
        let stats = pass.run(&mut func);
        assert_eq!(stats.remainders_created, 1);
        assert_eq!(stats.loops_visited, 1);
        assert!(stats.failures.is_empty());

        let again = pass.run(&mut func);
        assert_eq!(again.loops_visited, 0);
        assert!(!pass.apply(&mut func).unwrap());
    }
}
