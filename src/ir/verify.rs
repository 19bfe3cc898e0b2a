//! Structural verifier for the IR.
//!
//! Checks dominance of operand definitions, terminator placement and the
//! per-kind operand/result/region contracts. Every transformation leaves
//! the function in a state this verifier accepts.

use crate::ir::function::{BlockId, IrFunction, OpId, ValueId};
use crate::ir::ops::{GenericInfo, LoopInfo, OpKind};
use crate::ir::types::Type;
use crate::utils::errors::VerifyError;
use std::collections::HashSet;

/// Verify the whole function.
pub fn verify(func: &IrFunction) -> Result<(), VerifyError> {
    let mut verifier = Verifier { func, scopes: Vec::new() };
    verifier.verify_block(func.body(), None)
}

struct Verifier<'a> {
    func: &'a IrFunction,
    /// Values visible in each enclosing block, innermost last
    scopes: Vec<HashSet<ValueId>>,
}

impl<'a> Verifier<'a> {
    fn is_visible(&self, value: ValueId) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(&value))
    }

    fn define(&mut self, value: ValueId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(value);
        }
    }

    fn verify_block(&mut self, block: BlockId, owner: Option<OpId>) -> Result<(), VerifyError> {
        let func = self.func;
        let data = func.block(block);
        if data.parent != owner {
            return Err(VerifyError::new(format!(
                "block ^{} is attached to the wrong operation",
                block.index()
            )));
        }

        self.scopes.push(data.args.iter().copied().collect());
        let count = data.ops.len();
        for (i, &op) in data.ops.iter().enumerate() {
            if !func.is_live(op) {
                return Err(VerifyError::new(format!("block ^{} lists erased {}", block.index(), op)));
            }
            let operation = func.op(op);
            if operation.parent != Some(block) {
                return Err(VerifyError::at(op, "operation parent does not match its block"));
            }
            for &operand in &operation.operands {
                if !self.is_visible(operand) {
                    return Err(VerifyError::at(
                        op,
                        format!("operand {} of '{}' does not dominate its use", operand, operation.kind.name()),
                    ));
                }
            }
            let is_last = i + 1 == count;
            if operation.kind.is_terminator() && !is_last {
                return Err(VerifyError::at(op, format!("'{}' must terminate its block", operation.kind.name())));
            }
            self.verify_op(op, owner)?;
            for &region in &operation.regions {
                self.verify_block(region, Some(op))?;
            }
            for &result in &operation.results {
                self.define(result);
            }
        }
        self.scopes.pop();

        let expected = match owner {
            None => "return",
            Some(_) => "yield",
        };
        match func.terminator(block) {
            Some(term) if func.op(term).kind.name() == expected => Ok(()),
            _ => match owner {
                Some(op) => Err(VerifyError::at(op, format!("region must end with '{}'", expected))),
                None => Err(VerifyError::new(format!("function body must end with '{}'", expected))),
            },
        }
    }

    fn types(&self, values: &[ValueId]) -> Vec<Type> {
        values.iter().map(|&v| self.func.value_type(v).clone()).collect()
    }

    fn expect_ints(&self, op: OpId, values: &[ValueId], what: &str) -> Result<(), VerifyError> {
        match values.iter().find(|&&v| !self.func.value_type(v).is_int()) {
            Some(v) => Err(VerifyError::at(op, format!("{} {} must be i64", what, v))),
            None => Ok(()),
        }
    }

    fn expect_tensor(&self, op: OpId, value: ValueId, rank: usize) -> Result<(), VerifyError> {
        match self.func.value_type(value).as_tensor() {
            Some(t) if t.rank() == rank => Ok(()),
            Some(t) => Err(VerifyError::at(op, format!("expected rank {} tensor, got {}", rank, t))),
            None => Err(VerifyError::at(op, format!("{} must be a tensor", value))),
        }
    }

    fn expect_counts(&self, op: OpId, operands: Option<usize>, results: usize) -> Result<(), VerifyError> {
        let operation = self.func.op(op);
        if let Some(n) = operands {
            if operation.operands.len() != n {
                return Err(VerifyError::at(
                    op,
                    format!("'{}' expects {} operands, got {}", operation.kind.name(), n, operation.operands.len()),
                ));
            }
        }
        if operation.results.len() != results {
            return Err(VerifyError::at(
                op,
                format!("'{}' expects {} results, got {}", operation.kind.name(), results, operation.results.len()),
            ));
        }
        if operation.regions.len() != operation.kind.num_regions() {
            return Err(VerifyError::at(
                op,
                format!("'{}' expects {} regions", operation.kind.name(), operation.kind.num_regions()),
            ));
        }
        Ok(())
    }

    fn verify_op(&self, op: OpId, owner: Option<OpId>) -> Result<(), VerifyError> {
        let operation = self.func.op(op);
        let operands = &operation.operands;
        let results = &operation.results;
        match &operation.kind {
            OpKind::Constant(_) => {
                self.expect_counts(op, Some(0), 1)?;
                self.expect_ints(op, results, "result")
            }
            OpKind::Binary(_) => {
                self.expect_counts(op, Some(2), 1)?;
                self.expect_ints(op, operands, "operand")?;
                self.expect_ints(op, results, "result")
            }
            OpKind::Min | OpKind::Max => {
                self.expect_counts(op, None, 1)?;
                if operands.is_empty() {
                    return Err(VerifyError::at(op, format!("'{}' needs at least one operand", operation.kind.name())));
                }
                self.expect_ints(op, operands, "operand")?;
                self.expect_ints(op, results, "result")
            }
            OpKind::Dim { axis } => {
                self.expect_counts(op, Some(1), 1)?;
                self.expect_ints(op, results, "result")?;
                match self.func.value_type(operands[0]).as_tensor() {
                    Some(t) if *axis < t.rank() => Ok(()),
                    Some(t) => Err(VerifyError::at(op, format!("axis {} out of range for {}", axis, t))),
                    None => Err(VerifyError::at(op, "'dim' operand must be a tensor")),
                }
            }
            OpKind::Extract => {
                self.expect_counts(op, None, 1)?;
                let rank = operands.len().saturating_sub(1);
                match operands.first() {
                    Some(&tensor) => self.expect_tensor(op, tensor, rank)?,
                    None => return Err(VerifyError::at(op, "'extract' needs a tensor operand")),
                }
                self.expect_ints(op, &operands[1..], "index")?;
                self.expect_ints(op, results, "result")
            }
            OpKind::Insert => {
                self.expect_counts(op, None, 1)?;
                if operands.len() < 2 {
                    return Err(VerifyError::at(op, "'insert' needs a scalar and a tensor"));
                }
                self.expect_ints(op, &operands[..1], "scalar")?;
                self.expect_tensor(op, operands[1], operands.len() - 2)?;
                self.expect_ints(op, &operands[2..], "index")?;
                self.expect_same_type(op, results[0], operands[1])
            }
            OpKind::ExtractSlice { rank } => {
                self.expect_counts(op, Some(1 + 2 * rank), 1)?;
                self.expect_tensor(op, operands[0], *rank)?;
                self.expect_ints(op, &operands[1..], "offset/size")?;
                self.expect_tensor(op, results[0], *rank)
            }
            OpKind::InsertSlice { rank } => {
                self.expect_counts(op, Some(2 + 2 * rank), 1)?;
                self.expect_tensor(op, operands[0], *rank)?;
                self.expect_tensor(op, operands[1], *rank)?;
                self.expect_ints(op, &operands[2..], "offset/size")?;
                self.expect_same_type(op, results[0], operands[1])
            }
            OpKind::Loop(info) => self.verify_loop(op, *info),
            OpKind::Generic(info) => self.verify_generic(op, info),
            OpKind::Yield => {
                self.expect_counts(op, None, 0)?;
                let parent = owner.ok_or_else(|| VerifyError::at(op, "'yield' outside of a region"))?;
                let parent_op = self.func.op(parent);
                // Generic bodies yield scalars; checked in verify_generic.
                if parent_op.kind.as_loop().is_some() && self.types(operands) != self.types(&parent_op.results) {
                    return Err(VerifyError::at(op, "yielded values do not match the parent's results"));
                }
                Ok(())
            }
            OpKind::Return => {
                self.expect_counts(op, None, 0)?;
                if owner.is_some() {
                    return Err(VerifyError::at(op, "'return' inside a region"));
                }
                Ok(())
            }
        }
    }

    fn expect_same_type(&self, op: OpId, a: ValueId, b: ValueId) -> Result<(), VerifyError> {
        if self.func.value_type(a) != self.func.value_type(b) {
            return Err(VerifyError::at(
                op,
                format!("type {} does not match {}", self.func.value_type(a), self.func.value_type(b)),
            ));
        }
        Ok(())
    }

    fn verify_loop(&self, op: OpId, info: LoopInfo) -> Result<(), VerifyError> {
        let operation = self.func.op(op);
        if info.num_dims == 0 {
            return Err(VerifyError::at(op, "loop must have at least one dimension"));
        }
        let control = info.num_control_operands();
        if operation.operands.len() < control {
            return Err(VerifyError::at(
                op,
                format!("loop expects {} bound/step operands, got {}", control, operation.operands.len()),
            ));
        }
        let num_inits = operation.operands.len() - control;
        self.expect_counts(op, None, num_inits)?;
        self.expect_ints(op, &operation.operands[..control], "bound/step")?;

        for dim in 0..info.num_dims {
            let step = operation.operands[info.step_index(dim)];
            if let Some(def) = self.func.defining_op(step) {
                if let OpKind::Constant(v) = self.func.op(def).kind {
                    if v <= 0 {
                        return Err(VerifyError::at(op, format!("step of dimension {} must be positive, got {}", dim, v)));
                    }
                }
            }
        }

        let init_types = self.types(&operation.operands[control..]);
        if self.types(&operation.results) != init_types {
            return Err(VerifyError::at(op, "loop result types do not match its init values"));
        }
        let args = &self.func.block(operation.regions[0]).args;
        let mut expected = vec![Type::Int; info.num_dims];
        expected.extend(init_types);
        if self.types(args) != expected {
            return Err(VerifyError::at(
                op,
                "loop body must take one i64 per dimension followed by one argument per init",
            ));
        }
        Ok(())
    }

    fn verify_generic(&self, op: OpId, info: &GenericInfo) -> Result<(), VerifyError> {
        let operation = self.func.op(op);
        self.expect_counts(op, Some(info.num_operands()), info.num_outputs())?;
        if info.num_inputs > info.num_operands() {
            return Err(VerifyError::at(op, "more inputs than indexing maps"));
        }
        for (i, (map, &operand)) in info.indexing_maps.iter().zip(&operation.operands).enumerate() {
            self.expect_tensor(op, operand, map.dims.len())?;
            if let Some(&d) = map.dims.iter().find(|&&d| d >= info.num_loops()) {
                return Err(VerifyError::at(
                    op,
                    format!("map {} refers to dimension {} of a {}-d iteration space", i, d, info.num_loops()),
                ));
            }
        }
        let outputs = &operation.operands[info.num_inputs..];
        if self.types(&operation.results) != self.types(outputs) {
            return Err(VerifyError::at(op, "generic result types do not match its outputs"));
        }
        let args = &self.func.block(operation.regions[0]).args;
        if args.len() != info.num_operands() {
            return Err(VerifyError::at(op, "generic body must take one scalar per operand"));
        }
        self.expect_ints(op, args, "body argument")?;
        if let Some(term) = self.func.terminator(operation.regions[0]) {
            let yielded = &self.func.op(term).operands;
            if yielded.len() != info.num_outputs() {
                return Err(VerifyError::at(term, "generic body must yield one scalar per output"));
            }
            self.expect_ints(term, yielded, "yielded value")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{BinaryOp, LoopKind};
    use crate::ir::rewriter::Rewriter;

    fn counting_loop(step: i64) -> IrFunction {
        let mut func = IrFunction::new("f", vec![Type::Int]);
        let body = func.body();
        let n = func.args()[0];
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let c0 = rw.constant(0);
        let cs = rw.constant(step);
        let lp = rw.create_loop(LoopInfo::new(LoopKind::For, 1), &[c0], &[n], &[cs], &[c0]);
        let lp_body = rw.func().op(lp).regions[0];
        let args = rw.func().block(lp_body).args.clone();
        rw.set_insertion_point_to_end(lp_body);
        let sum = rw.binary(BinaryOp::Add, args[1], args[0]);
        rw.yield_values(vec![sum]);
        let result = rw.func().op(lp).results[0];
        rw.set_insertion_point_to_end(body);
        rw.create(OpKind::Return, vec![result], vec![], vec![]);
        func
    }

    #[test]
    fn test_valid_loop() {
        assert!(verify(&counting_loop(2)).is_ok());
    }

    #[test]
    fn test_non_positive_step() {
        let err = verify(&counting_loop(0)).unwrap_err();
        assert!(err.message.contains("must be positive"));
    }

    #[test]
    fn test_missing_terminator() {
        let func = IrFunction::new("f", vec![]);
        assert!(verify(&func).is_err());
    }

    #[test]
    fn test_use_before_definition() {
        let mut func = IrFunction::new("f", vec![]);
        let body = func.body();
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let a = rw.constant(1);
        let b = rw.constant(2);
        let sum = rw.binary(BinaryOp::Add, a, b);
        rw.create(OpKind::Return, vec![sum], vec![], vec![]);
        let add = rw.func().defining_op(sum).unwrap();
        let first = rw.func().defining_op(a).unwrap();
        rw.move_op_after(first, add);

        let err = verify(&func).unwrap_err();
        assert!(err.message.contains("does not dominate"));
    }
}
