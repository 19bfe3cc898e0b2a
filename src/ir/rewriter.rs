//! The rewriter: the only way transformations mutate the IR.
//!
//! A [`Rewriter`] exclusively borrows an [`IrFunction`] and exposes the
//! primitive edits (create, clone, replace uses, erase, move) together
//! with an insertion point and a mutation counter. Transformations check
//! all of their preconditions before their first edit, so a failed
//! transformation leaves the counter untouched.

use crate::ir::function::{BlockId, IrFunction, OpId, ValueId};
use crate::ir::ops::{Attribute, BinaryOp, LoopInfo, OpKind};
use crate::ir::types::Type;
use crate::utils::errors::{StructLoopError, StructLoopResult};
use crate::utils::location::Span;
use std::collections::{BTreeMap, HashMap};

/// Mapping from original values to their clones.
pub type ValueMap = HashMap<ValueId, ValueId>;

/// Mutating access to a function, with an insertion point.
pub struct Rewriter<'f> {
    func: &'f mut IrFunction,
    insertion: Option<(BlockId, usize)>,
    span: Span,
    mutations: usize,
}

impl<'f> Rewriter<'f> {
    pub fn new(func: &'f mut IrFunction) -> Self {
        Self {
            func,
            insertion: None,
            span: Span::dummy(),
            mutations: 0,
        }
    }

    /// Read-only view of the function being rewritten.
    pub fn func(&self) -> &IrFunction {
        self.func
    }

    /// Number of edits performed so far.
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    /// Span attached to ops created from now on.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn set_insertion_point_before(&mut self, op: OpId) {
        self.insertion = self.func.position(op);
    }

    pub fn set_insertion_point_after(&mut self, op: OpId) {
        self.insertion = self.func.position(op).map(|(block, pos)| (block, pos + 1));
    }

    pub fn set_insertion_point_to_end(&mut self, block: BlockId) {
        self.insertion = Some((block, self.func.block(block).ops.len()));
    }

    /// Insert a detached op at the insertion point and advance past it.
    fn place(&mut self, op: OpId) {
        if let Some((block, pos)) = self.insertion {
            self.func.insert_op(block, pos, op);
            self.insertion = Some((block, pos + 1));
        }
    }

    /// Create a detached block; used for regions of ops built later.
    pub fn create_block(&mut self, arg_types: Vec<Type>) -> BlockId {
        self.mutations += 1;
        self.func.new_block(arg_types)
    }

    /// Create an op at the insertion point.
    pub fn create(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        regions: Vec<BlockId>,
    ) -> OpId {
        self.create_with_attrs(kind, operands, result_types, regions, BTreeMap::new())
    }

    pub fn create_with_attrs(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        regions: Vec<BlockId>,
        attrs: BTreeMap<String, Attribute>,
    ) -> OpId {
        let op = self.func.new_op(kind, operands, result_types, regions, attrs, self.span);
        self.place(op);
        self.mutations += 1;
        op
    }

    fn single_result(&self, op: OpId) -> ValueId {
        self.func.op(op).results[0]
    }

    pub fn constant(&mut self, value: i64) -> ValueId {
        let op = self.create(OpKind::Constant(value), vec![], vec![Type::Int], vec![]);
        self.single_result(op)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let op = self.create(OpKind::Binary(op), vec![lhs, rhs], vec![Type::Int], vec![]);
        self.single_result(op)
    }

    pub fn min(&mut self, operands: Vec<ValueId>) -> ValueId {
        let op = self.create(OpKind::Min, operands, vec![Type::Int], vec![]);
        self.single_result(op)
    }

    pub fn max(&mut self, operands: Vec<ValueId>) -> ValueId {
        let op = self.create(OpKind::Max, operands, vec![Type::Int], vec![]);
        self.single_result(op)
    }

    pub fn dim(&mut self, tensor: ValueId, axis: usize) -> ValueId {
        let op = self.create(OpKind::Dim { axis }, vec![tensor], vec![Type::Int], vec![]);
        self.single_result(op)
    }

    pub fn extract_slice(
        &mut self,
        source: ValueId,
        offsets: &[ValueId],
        sizes: &[ValueId],
        result_type: Type,
    ) -> ValueId {
        let mut operands = vec![source];
        operands.extend_from_slice(offsets);
        operands.extend_from_slice(sizes);
        let op = self.create(
            OpKind::ExtractSlice { rank: offsets.len() },
            operands,
            vec![result_type],
            vec![],
        );
        self.single_result(op)
    }

    pub fn insert_slice(
        &mut self,
        source: ValueId,
        dest: ValueId,
        offsets: &[ValueId],
        sizes: &[ValueId],
    ) -> ValueId {
        let dest_ty = self.func.value_type(dest).clone();
        let mut operands = vec![source, dest];
        operands.extend_from_slice(offsets);
        operands.extend_from_slice(sizes);
        let op = self.create(
            OpKind::InsertSlice { rank: offsets.len() },
            operands,
            vec![dest_ty],
            vec![],
        );
        self.single_result(op)
    }

    /// Create a loop with an empty body taking `num_dims` induction
    /// variables and one iteration argument per init. The caller fills the
    /// body and terminates it with `yield`.
    pub fn create_loop(
        &mut self,
        info: LoopInfo,
        lbs: &[ValueId],
        ubs: &[ValueId],
        steps: &[ValueId],
        inits: &[ValueId],
    ) -> OpId {
        let init_types: Vec<Type> = inits.iter().map(|&v| self.func.value_type(v).clone()).collect();
        let mut arg_types = vec![Type::Int; info.num_dims];
        arg_types.extend(init_types.iter().cloned());
        let body = self.create_block(arg_types);
        let mut operands = Vec::with_capacity(3 * info.num_dims + inits.len());
        operands.extend_from_slice(lbs);
        operands.extend_from_slice(ubs);
        operands.extend_from_slice(steps);
        operands.extend_from_slice(inits);
        self.create(OpKind::Loop(info), operands, init_types, vec![body])
    }

    pub fn yield_values(&mut self, values: Vec<ValueId>) -> OpId {
        self.create(OpKind::Yield, values, vec![], vec![])
    }

    /// Deep-clone `op` (including nested regions) at the insertion point.
    /// Operands found in `mapping` are remapped; the clone's results and
    /// block arguments are recorded in `mapping`.
    pub fn clone_op(&mut self, op: OpId, mapping: &mut ValueMap) -> OpId {
        let operands = self.func.op(op)
            .operands
            .iter()
            .map(|v| *mapping.get(v).unwrap_or(v))
            .collect();
        let result_types = self.func.op(op)
            .results
            .iter()
            .map(|&r| self.func.value_type(r).clone())
            .collect();
        self.clone_op_with(op, operands, result_types, mapping)
    }

    /// Clone `op` with explicit operands and result types, keeping its
    /// kind, attributes and regions.
    pub fn clone_op_with(
        &mut self,
        op: OpId,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        mapping: &mut ValueMap,
    ) -> OpId {
        let source = self.func.op(op).clone();
        let regions = source
            .regions
            .iter()
            .map(|&region| self.clone_block(region, mapping))
            .collect();
        let saved_span = self.span;
        self.span = source.span;
        let new_op = self.create_with_attrs(source.kind, operands, result_types, regions, source.attrs);
        self.span = saved_span;
        let new_results = self.func.op(new_op).results.clone();
        for (old, new) in source.results.iter().zip(new_results) {
            mapping.insert(*old, new);
        }
        new_op
    }

    fn clone_block(&mut self, block: BlockId, mapping: &mut ValueMap) -> BlockId {
        let old_args = self.func.block(block).args.clone();
        let arg_types = old_args.iter().map(|&a| self.func.value_type(a).clone()).collect();
        let new_block = self.create_block(arg_types);
        for (old, new) in old_args.iter().zip(self.func.block(new_block).args.clone()) {
            mapping.insert(*old, new);
        }
        let saved = self.insertion;
        self.insertion = Some((new_block, 0));
        for inner in self.func.block(block).ops.clone() {
            self.clone_op(inner, mapping);
        }
        self.insertion = saved;
        new_block
    }

    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) {
        self.func.op_mut(op).operands[index] = value;
        self.mutations += 1;
    }

    pub fn set_operands(&mut self, op: OpId, operands: Vec<ValueId>) {
        self.func.op_mut(op).operands = operands;
        self.mutations += 1;
    }

    /// Replace every use of `from` with `to`.
    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        for (user, index) in self.func.uses(from) {
            self.set_operand(user, index, to);
        }
    }

    /// Replace every use of `from` with `to`, except uses located in
    /// `except` or nested inside it.
    pub fn replace_all_uses_except(&mut self, from: ValueId, to: ValueId, except: OpId) {
        for (user, index) in self.func.uses(from) {
            if !self.func.is_ancestor(except, user) {
                self.set_operand(user, index, to);
            }
        }
    }

    /// Erase `op` and everything nested in it. Its results must be dead
    /// outside of it.
    pub fn erase_op(&mut self, op: OpId) -> StructLoopResult<()> {
        let results = self.func.op(op).results.clone();
        for result in results {
            if let Some((user, _)) = self.func
                .uses(result)
                .into_iter()
                .find(|&(user, _)| !self.func.is_ancestor(op, user))
            {
                return Err(StructLoopError::Internal(format!(
                    "cannot erase {} ({}): result {} still used by {}",
                    op,
                    self.func.op(op).kind.name(),
                    result,
                    user
                )));
            }
        }
        self.func.destroy_op(op);
        self.mutations += 1;
        Ok(())
    }

    /// Replace the results of `op` with `values`, then erase it.
    pub fn replace_op(&mut self, op: OpId, values: &[ValueId]) -> StructLoopResult<()> {
        let results = self.func.op(op).results.clone();
        if results.len() != values.len() {
            return Err(StructLoopError::Internal(format!(
                "replacing {} results of {} with {} values",
                results.len(),
                op,
                values.len()
            )));
        }
        for (&from, &to) in results.iter().zip(values) {
            self.replace_all_uses_with(from, to);
        }
        self.erase_op(op)
    }

    /// Move `op` so it directly follows `anchor`.
    pub fn move_op_after(&mut self, op: OpId, anchor: OpId) {
        self.func.detach_op(op);
        if let Some((block, pos)) = self.func.position(anchor) {
            self.func.insert_op(block, pos + 1, op);
        }
        self.mutations += 1;
    }

    pub fn set_attr(&mut self, op: OpId, name: &str, value: Attribute) {
        self.func.set_attr(op, name, value);
        self.mutations += 1;
    }

    pub fn remove_attr(&mut self, op: OpId, name: &str) -> Option<Attribute> {
        let removed = self.func.remove_attr(op, name);
        if removed.is_some() {
            self.mutations += 1;
        }
        removed
    }
}
