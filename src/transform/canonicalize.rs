//! Simplification of `min`/`max` clamps under known range facts.
//!
//! Tiling produces clamps like `min(tile, ub - iv)` for the partial last
//! tile. Once peeling has proven that `ub - iv >= step` in the main loop
//! (and `ub - iv < step` in the remainder), one side of the clamp is
//! redundant and the clamp can be folded away.

use crate::analysis::affine::{prove_ge, LinearExpr};
use crate::ir::function::{BlockId, IrFunction, OpId};
use crate::ir::loops::StructuredLoop;
use crate::ir::ops::OpKind;
use crate::ir::rewriter::Rewriter;
use log::trace;

/// Oracle invoked after peeling to clean up bound arithmetic.
pub trait BoundSimplifier {
    /// Simplify the ops nested in `block`, assuming every fact is `>= 0`.
    /// Returns the number of ops changed.
    fn simplify(&self, rewriter: &mut Rewriter<'_>, block: BlockId, facts: &[LinearExpr]) -> usize;
}

/// Facts that hold inside the body of `loop_op` for every dimension:
/// `iv - lb >= 0` and `ub - iv - 1 >= 0`.
pub fn loop_range_facts(func: &IrFunction, loop_op: OpId) -> Vec<LinearExpr> {
    let lp = match StructuredLoop::get(func, loop_op) {
        Some(lp) => lp,
        None => return Vec::new(),
    };
    let mut facts = Vec::with_capacity(2 * lp.num_dims());
    for dim in 0..lp.num_dims() {
        let iv = LinearExpr::atom(lp.induction_var(dim));
        let lb = LinearExpr::from_value(func, lp.lower_bound(dim));
        let ub = LinearExpr::from_value(func, lp.upper_bound(dim));
        facts.extend(iv.checked_sub(&lb));
        facts.extend(ub.checked_sub(&iv).and_then(|e| e.offset(-1)));
    }
    facts
}

/// Drops clamp operands that are provably redundant.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMaxSimplifier;

impl MinMaxSimplifier {
    pub fn new() -> Self {
        Self
    }

    fn simplify_block(&self, rewriter: &mut Rewriter<'_>, block: BlockId, facts: &mut Vec<LinearExpr>) -> usize {
        let mut changed = 0;
        for op in rewriter.func().block(block).ops.clone() {
            if !rewriter.func().is_live(op) {
                continue;
            }
            let kind = rewriter.func().op(op).kind.clone();
            match kind {
                OpKind::Min | OpKind::Max => {
                    if self.simplify_clamp(rewriter, op, facts) {
                        changed += 1;
                    }
                }
                OpKind::Loop(_) => {
                    let loop_facts = loop_range_facts(rewriter.func(), op);
                    let saved = facts.len();
                    facts.extend(loop_facts);
                    let body = rewriter.func().op(op).regions[0];
                    changed += self.simplify_block(rewriter, body, facts);
                    facts.truncate(saved);
                }
                _ => {
                    for region in rewriter.func().op(op).regions.clone() {
                        changed += self.simplify_block(rewriter, region, facts);
                    }
                }
            }
        }
        changed
    }

    /// Remove operands of a `min` (resp. `max`) that are provably `>=`
    /// (resp. `<=`) another remaining operand.
    fn simplify_clamp(&self, rewriter: &mut Rewriter<'_>, op: OpId, facts: &[LinearExpr]) -> bool {
        let func = rewriter.func();
        let is_min = matches!(func.op(op).kind, OpKind::Min);
        let operands = func.op(op).operands.clone();
        let exprs: Vec<LinearExpr> = operands.iter().map(|&v| LinearExpr::from_value(func, v)).collect();

        let mut kept: Vec<usize> = (0..operands.len()).collect();
        let mut i = 0;
        while i < kept.len() {
            let candidate = kept[i];
            let redundant = kept.iter().any(|&other| {
                other != candidate
                    && if is_min {
                        prove_ge(&exprs[candidate], &exprs[other], facts)
                    } else {
                        prove_ge(&exprs[other], &exprs[candidate], facts)
                    }
            });
            if redundant {
                kept.remove(i);
            } else {
                i += 1;
            }
        }

        if kept.len() == operands.len() {
            return false;
        }
        let result = func.op(op).results[0];
        let remaining: Vec<_> = kept.iter().map(|&k| operands[k]).collect();
        trace!(
            "simplified {} of {} operands to {}",
            func.op(op).kind.name(),
            operands.len(),
            remaining.len()
        );
        if let [single] = remaining[..] {
            rewriter.replace_all_uses_with(result, single);
            if let Err(err) = rewriter.erase_op(op) {
                trace!("keeping folded clamp: {}", err);
            }
        } else {
            rewriter.set_operands(op, remaining);
        }
        true
    }
}

impl BoundSimplifier for MinMaxSimplifier {
    fn simplify(&self, rewriter: &mut Rewriter<'_>, block: BlockId, facts: &[LinearExpr]) -> usize {
        let mut facts = facts.to_vec();
        self.simplify_block(rewriter, block, &mut facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{BinaryOp, LoopInfo, LoopKind};
    use crate::ir::types::Type;
    use crate::ir::ValueId;

    /// `for %i in [0, %n) step 4 { yield(min(4, %n - %i)) }`
    fn clamped_loop(func: &mut IrFunction) -> (OpId, OpId) {
        let body = func.body();
        let n = func.args()[0];
        let mut rw = Rewriter::new(func);
        rw.set_insertion_point_to_end(body);
        let c0 = rw.constant(0);
        let c4 = rw.constant(4);
        let lp = rw.create_loop(LoopInfo::new(LoopKind::For, 1), &[c0], &[n], &[c4], &[c0]);
        let lp_body = rw.func().op(lp).regions[0];
        let iv = rw.func().block(lp_body).args[0];
        rw.set_insertion_point_to_end(lp_body);
        let rest = rw.binary(BinaryOp::Sub, n, iv);
        let size = rw.min(vec![c4, rest]);
        rw.yield_values(vec![size]);
        let min_op = rw.func().defining_op(size).unwrap();
        (lp, min_op)
    }

    fn facts_for(func: &IrFunction, lp: OpId, n: ValueId, main: bool) -> Vec<LinearExpr> {
        let iv = LinearExpr::atom(func.block(func.op(lp).regions[0]).args[0]);
        let u = LinearExpr::atom(n);
        let diff = u.checked_sub(&iv).unwrap();
        if main {
            vec![diff.offset(-4).unwrap()]
        } else {
            vec![LinearExpr::constant(3).checked_sub(&diff).unwrap()]
        }
    }

    #[test]
    fn test_main_loop_clamp_folds_to_tile() {
        let mut func = IrFunction::new("f", vec![Type::Int]);
        let (lp, min_op) = clamped_loop(&mut func);
        let n = func.args()[0];
        let facts = facts_for(&func, lp, n, true);
        let body = func.op(lp).regions[0];
        let mut rw = Rewriter::new(&mut func);
        let changed = MinMaxSimplifier::new().simplify(&mut rw, body, &facts);
        assert_eq!(changed, 1);

        let func = rw.func();
        assert!(!func.is_live(min_op));
        let yielded = func.op(func.terminator(body).unwrap()).operands[0];
        assert_eq!(crate::analysis::constant_value(func, yielded), Some(4));
    }

    #[test]
    fn test_remainder_clamp_folds_to_rest() {
        let mut func = IrFunction::new("f", vec![Type::Int]);
        let (lp, _) = clamped_loop(&mut func);
        let n = func.args()[0];
        let facts = facts_for(&func, lp, n, false);
        let body = func.op(lp).regions[0];
        let mut rw = Rewriter::new(&mut func);
        MinMaxSimplifier::new().simplify(&mut rw, body, &facts);

        let func = rw.func();
        let yielded = func.op(func.terminator(body).unwrap()).operands[0];
        let def = func.defining_op(yielded).unwrap();
        assert_eq!(func.op(def).kind, OpKind::Binary(BinaryOp::Sub));
    }

    #[test]
    fn test_unprovable_clamp_is_kept() {
        let mut func = IrFunction::new("f", vec![Type::Int]);
        let (lp, min_op) = clamped_loop(&mut func);
        let body = func.op(lp).regions[0];
        let mut rw = Rewriter::new(&mut func);
        let before = rw.mutations();
        assert_eq!(MinMaxSimplifier::new().simplify(&mut rw, body, &[]), 0);
        assert_eq!(rw.mutations(), before);
        assert!(rw.func().is_live(min_op));
    }

    #[test]
    fn test_loop_range_facts() {
        let mut func = IrFunction::new("f", vec![Type::Int]);
        let (lp, _) = clamped_loop(&mut func);
        let facts = loop_range_facts(&func, lp);
        assert_eq!(facts.len(), 2);
        let iv = func.block(func.op(lp).regions[0]).args[0];
        assert_eq!(facts[0], LinearExpr::atom(iv));
        assert_eq!(facts[1].coefficient(iv), -1);
        assert_eq!(facts[1].constant, -1);
    }
}
