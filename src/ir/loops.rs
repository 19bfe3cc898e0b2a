//! Uniform view over `loop`, `for` and `parallel` operations.
//!
//! Peeling and the bound simplifier are written once against
//! [`StructuredLoop`]; the loop kind only matters to later lowering.

use crate::ir::function::{BlockId, IrFunction, OpId, ValueId};
use crate::ir::ops::{LoopInfo, LoopKind};

/// Borrowed accessor for a structured loop operation.
#[derive(Debug, Clone, Copy)]
pub struct StructuredLoop<'a> {
    func: &'a IrFunction,
    op: OpId,
    info: LoopInfo,
}

impl<'a> StructuredLoop<'a> {
    /// View `op` as a structured loop; `None` if it is erased or not a loop.
    pub fn get(func: &'a IrFunction, op: OpId) -> Option<Self> {
        let info = func.try_op(op)?.kind.as_loop()?;
        Some(Self { func, op, info })
    }

    pub fn op(&self) -> OpId {
        self.op
    }

    pub fn info(&self) -> LoopInfo {
        self.info
    }

    pub fn kind(&self) -> LoopKind {
        self.info.kind
    }

    pub fn num_dims(&self) -> usize {
        self.info.num_dims
    }

    fn operands(&self) -> &'a [ValueId] {
        &self.func.op(self.op).operands
    }

    pub fn lower_bounds(&self) -> &'a [ValueId] {
        &self.operands()[..self.info.num_dims]
    }

    pub fn upper_bounds(&self) -> &'a [ValueId] {
        &self.operands()[self.info.num_dims..2 * self.info.num_dims]
    }

    pub fn steps(&self) -> &'a [ValueId] {
        &self.operands()[2 * self.info.num_dims..3 * self.info.num_dims]
    }

    /// Initial values of the loop-carried arguments.
    pub fn inits(&self) -> &'a [ValueId] {
        &self.operands()[self.info.num_control_operands()..]
    }

    pub fn lower_bound(&self, dim: usize) -> ValueId {
        self.lower_bounds()[dim]
    }

    pub fn upper_bound(&self, dim: usize) -> ValueId {
        self.upper_bounds()[dim]
    }

    pub fn step(&self, dim: usize) -> ValueId {
        self.steps()[dim]
    }

    pub fn body(&self) -> BlockId {
        self.func.op(self.op).regions[0]
    }

    pub fn induction_vars(&self) -> &'a [ValueId] {
        &self.func.block(self.body()).args[..self.info.num_dims]
    }

    pub fn induction_var(&self, dim: usize) -> ValueId {
        self.induction_vars()[dim]
    }

    /// Block arguments carrying values across iterations.
    pub fn region_iter_args(&self) -> &'a [ValueId] {
        &self.func.block(self.body()).args[self.info.num_dims..]
    }

    pub fn results(&self) -> &'a [ValueId] {
        &self.func.op(self.op).results
    }

    /// The `yield` terminating the body, if present.
    pub fn yield_op(&self) -> Option<OpId> {
        self.func.terminator(self.body())
    }
}

/// All live loops in program order.
pub fn collect_loops(func: &IrFunction) -> Vec<OpId> {
    func.walk()
        .into_iter()
        .filter(|&op| func.op(op).kind.as_loop().is_some())
        .collect()
}
