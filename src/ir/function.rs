//! Arena storage for a function of the structured loop IR.
//!
//! Operations, values and blocks live in flat vectors and refer to each
//! other through copyable handles. Erasing an operation leaves a tombstone,
//! so handles held elsewhere never alias a different operation. All
//! structural mutation is exposed at crate visibility and performed through
//! [`Rewriter`](crate::ir::Rewriter); the public surface is read-only apart
//! from attribute access.

use crate::ir::ops::{Attribute, OpKind};
use crate::ir::types::Type;
use crate::utils::location::Span;
use std::collections::BTreeMap;
use std::fmt;

/// Handle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// Handle of an SSA value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Handle of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    OpResult { op: OpId, index: usize },
    BlockArg { block: BlockId, index: usize },
}

/// A typed SSA value.
#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

/// An operation of the IR.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    /// Owned single-block regions
    pub regions: Vec<BlockId>,
    /// Discardable attributes (markers, labels)
    pub attrs: BTreeMap<String, Attribute>,
    /// Block the op is currently placed in
    pub parent: Option<BlockId>,
    pub span: Span,
}

/// A straight-line sequence of operations with typed arguments.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub args: Vec<ValueId>,
    pub ops: Vec<OpId>,
    /// Operation owning this block as a region; `None` for the function body
    pub parent: Option<OpId>,
}

/// A function: a named top-level block whose arguments are the parameters.
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub name: String,
    ops: Vec<Option<Operation>>,
    values: Vec<ValueData>,
    blocks: Vec<Block>,
    body: BlockId,
}

impl IrFunction {
    /// Create an empty function with the given parameter types.
    pub fn new(name: impl Into<String>, arg_types: Vec<Type>) -> Self {
        let mut func = Self {
            name: name.into(),
            ops: Vec::new(),
            values: Vec::new(),
            blocks: Vec::new(),
            body: BlockId(0),
        };
        func.body = func.new_block(arg_types);
        func
    }

    /// The top-level block.
    pub fn body(&self) -> BlockId {
        self.body
    }

    /// Function parameters.
    pub fn args(&self) -> &[ValueId] {
        &self.blocks[self.body.index()].args
    }

    /// Get a live operation.
    ///
    /// Panics if `id` was erased; use [`IrFunction::try_op`] when that is
    /// not an invariant of the caller.
    pub fn op(&self, id: OpId) -> &Operation {
        match self.try_op(id) {
            Some(op) => op,
            None => panic!("access to erased operation {}", id),
        }
    }

    pub fn try_op(&self, id: OpId) -> Option<&Operation> {
        self.ops.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn op_mut(&mut self, id: OpId) -> &mut Operation {
        match self.ops.get_mut(id.index()).and_then(Option::as_mut) {
            Some(op) => op,
            None => panic!("access to erased operation {}", id),
        }
    }

    pub fn is_live(&self, id: OpId) -> bool {
        self.try_op(id).is_some()
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn value_type(&self, id: ValueId) -> &Type {
        &self.values[id.index()].ty
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Operation producing `value`, or `None` for block arguments.
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.value(value).def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// Operation owning the block that contains `op`.
    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        self.op(op).parent.and_then(|b| self.block(b).parent)
    }

    /// Check whether `ancestor` is `op` itself or encloses it.
    pub fn is_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        let mut current = Some(op);
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = self.parent_op(cur);
        }
        false
    }

    /// Block and position of a placed operation.
    pub fn position(&self, op: OpId) -> Option<(BlockId, usize)> {
        let block = self.op(op).parent?;
        let pos = self.block(block).ops.iter().position(|&o| o == op)?;
        Some((block, pos))
    }

    /// Last operation of a block, if it is a terminator.
    pub fn terminator(&self, block: BlockId) -> Option<OpId> {
        self.block(block)
            .ops
            .last()
            .copied()
            .filter(|&op| self.op(op).kind.is_terminator())
    }

    /// All live, placed operations in program order (pre-order).
    pub fn walk(&self) -> Vec<OpId> {
        let mut out = Vec::new();
        self.walk_block(self.body, &mut out);
        out
    }

    /// Operations nested in `block` in program order (pre-order).
    pub fn walk_block(&self, block: BlockId, out: &mut Vec<OpId>) {
        for &op in &self.block(block).ops {
            out.push(op);
            for &region in &self.op(op).regions {
                self.walk_block(region, out);
            }
        }
    }

    /// Number of live operations reachable from the body.
    pub fn num_ops(&self) -> usize {
        self.walk().len()
    }

    /// Every `(user, operand index)` pair that reads `value`.
    pub fn uses(&self, value: ValueId) -> Vec<(OpId, usize)> {
        let mut uses = Vec::new();
        for op in self.walk() {
            for (i, &operand) in self.op(op).operands.iter().enumerate() {
                if operand == value {
                    uses.push((op, i));
                }
            }
        }
        uses
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        !self.uses(value).is_empty()
    }

    /// Look up a discardable attribute.
    pub fn attr(&self, op: OpId, name: &str) -> Option<&Attribute> {
        self.op(op).attrs.get(name)
    }

    pub fn has_attr(&self, op: OpId, name: &str) -> bool {
        self.op(op).attrs.contains_key(name)
    }

    pub(crate) fn set_attr(&mut self, op: OpId, name: &str, value: Attribute) {
        self.op_mut(op).attrs.insert(name.to_string(), value);
    }

    pub(crate) fn remove_attr(&mut self, op: OpId, name: &str) -> Option<Attribute> {
        self.op_mut(op).attrs.remove(name)
    }

    pub(crate) fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { ty, def });
        id
    }

    /// Create a detached block with fresh arguments.
    pub(crate) fn new_block(&mut self, arg_types: Vec<Type>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        let args = arg_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.new_value(ty, ValueDef::BlockArg { block: id, index }))
            .collect();
        self.blocks[id.index()].args = args;
        id
    }

    /// Create a detached operation; `regions` become owned by it.
    pub(crate) fn new_op(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueId>,
        result_types: Vec<Type>,
        regions: Vec<BlockId>,
        attrs: BTreeMap<String, Attribute>,
        span: Span,
    ) -> OpId {
        let id = OpId(self.ops.len() as u32);
        let results = result_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.new_value(ty, ValueDef::OpResult { op: id, index }))
            .collect();
        for &region in &regions {
            self.blocks[region.index()].parent = Some(id);
        }
        self.ops.push(Some(Operation {
            kind,
            operands,
            results,
            regions,
            attrs,
            parent: None,
            span,
        }));
        id
    }

    /// Place a detached op into `block` at `index`.
    pub(crate) fn insert_op(&mut self, block: BlockId, index: usize, op: OpId) {
        self.blocks[block.index()].ops.insert(index, op);
        self.op_mut(op).parent = Some(block);
    }

    /// Detach an op from its block without destroying it.
    pub(crate) fn detach_op(&mut self, op: OpId) {
        if let Some((block, pos)) = self.position(op) {
            self.blocks[block.index()].ops.remove(pos);
        }
        self.op_mut(op).parent = None;
    }

    /// Destroy an op and everything nested in it.
    pub(crate) fn destroy_op(&mut self, op: OpId) {
        self.detach_op(op);
        let regions = self.op(op).regions.clone();
        for region in regions {
            let nested = self.blocks[region.index()].ops.clone();
            for inner in nested {
                self.destroy_op(inner);
            }
        }
        self.ops[op.index()] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_function_args() {
        let func = IrFunction::new("f", vec![Type::Int, Type::static_tensor(&[4])]);
        assert_eq!(func.args().len(), 2);
        assert_eq!(func.value_type(func.args()[0]), &Type::Int);
        assert!(func.defining_op(func.args()[1]).is_none());
        assert_eq!(func.num_ops(), 0);
    }

    #[test]
    fn test_ops_and_uses() {
        let mut func = IrFunction::new("f", vec![Type::Int]);
        let body = func.body();
        let arg = func.args()[0];
        let c = func.new_op(OpKind::Constant(2), vec![], vec![Type::Int], vec![], BTreeMap::new(), Span::dummy());
        func.insert_op(body, 0, c);
        let cv = func.op(c).results[0];
        let add = func.new_op(
            OpKind::Binary(crate::ir::ops::BinaryOp::Add),
            vec![arg, cv],
            vec![Type::Int],
            vec![],
            BTreeMap::new(),
            Span::dummy(),
        );
        func.insert_op(body, 1, add);

        assert_eq!(func.walk(), vec![c, add]);
        assert_eq!(func.uses(cv), vec![(add, 1)]);
        assert_eq!(func.defining_op(cv), Some(c));
        assert_eq!(func.position(add), Some((body, 1)));

        func.destroy_op(add);
        assert!(!func.is_live(add));
        assert!(!func.has_uses(cv));
        assert_eq!(func.walk(), vec![c]);
    }
}
