//! Reference evaluator for the structured loop IR.
//!
//! Executes a function on concrete values so that a transformed function
//! can be compared against the original. Loops run their dimensions in
//! row-major order and thread iteration arguments through `yield`; a
//! `generic` runs its body once per point of its iteration domain.

pub mod value;

pub use value::{RtValue, Tensor};

use crate::ir::function::{BlockId, IrFunction, OpId, ValueId};
use crate::ir::ops::{BinaryOp, GenericInfo, LoopInfo, OpKind};
use crate::utils::errors::EvalError;
use log::trace;
use std::collections::HashMap;

type EvalResult<T> = Result<T, EvalError>;

/// Evaluate `func` once on `args`.
pub fn evaluate(func: &IrFunction, args: Vec<RtValue>) -> EvalResult<Vec<RtValue>> {
    Interpreter::new().run(func, args)
}

/// Tree-walking evaluator. Records how many times each loop body ran.
#[derive(Debug, Default)]
pub struct Interpreter {
    trip_counts: HashMap<OpId, u64>,
    env: HashMap<ValueId, RtValue>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `func` on `args` and return the operands of its `return`.
    pub fn run(&mut self, func: &IrFunction, args: Vec<RtValue>) -> EvalResult<Vec<RtValue>> {
        let params = func.args();
        if params.len() != args.len() {
            return Err(EvalError::ArgumentCount { expected: params.len(), found: args.len() });
        }
        self.trip_counts.clear();
        self.env.clear();
        for (&param, arg) in params.iter().zip(args) {
            let ty = func.value_type(param);
            if !arg.matches(ty) {
                return Err(EvalError::TypeMismatch(format!("argument {} is not of type {}", arg, ty)));
            }
            self.env.insert(param, arg);
        }
        self.exec_block(func, func.body())
    }

    /// Total body executions of `loop_op` during the last run.
    pub fn trip_count(&self, loop_op: OpId) -> u64 {
        self.trip_counts.get(&loop_op).copied().unwrap_or(0)
    }

    /// Total body executions of every loop during the last run.
    pub fn total_iterations(&self) -> u64 {
        self.trip_counts.values().sum()
    }

    fn lookup(&self, value: ValueId) -> EvalResult<&RtValue> {
        self.env
            .get(&value)
            .ok_or_else(|| EvalError::Unsupported(format!("{} read before it was defined", value)))
    }

    fn int(&self, value: ValueId) -> EvalResult<i64> {
        self.lookup(value)?
            .as_int()
            .ok_or_else(|| EvalError::TypeMismatch(format!("{} is not an integer", value)))
    }

    fn ints(&self, values: &[ValueId]) -> EvalResult<Vec<i64>> {
        values.iter().map(|&v| self.int(v)).collect()
    }

    fn tensor(&self, value: ValueId) -> EvalResult<&Tensor> {
        self.lookup(value)?
            .as_tensor()
            .ok_or_else(|| EvalError::TypeMismatch(format!("{} is not a tensor", value)))
    }

    /// Execute the ops of `block` and return the terminator's operands.
    fn exec_block(&mut self, func: &IrFunction, block: BlockId) -> EvalResult<Vec<RtValue>> {
        for &op in &func.block(block).ops {
            let operation = func.op(op);
            if operation.kind.is_terminator() {
                return operation
                    .operands
                    .iter()
                    .map(|&v| self.lookup(v).cloned())
                    .collect();
            }
            let results = self.exec_op(func, op)?;
            for (&result, value) in operation.results.iter().zip(results) {
                self.env.insert(result, value);
            }
        }
        Ok(Vec::new())
    }

    fn exec_op(&mut self, func: &IrFunction, op: OpId) -> EvalResult<Vec<RtValue>> {
        let operation = func.op(op);
        let operands = &operation.operands;
        let value = match &operation.kind {
            OpKind::Constant(v) => RtValue::Int(*v),
            OpKind::Binary(bin) => RtValue::Int(self.binary(*bin, operands[0], operands[1])?),
            OpKind::Min | OpKind::Max => {
                let values = self.ints(operands)?;
                let folded = if matches!(operation.kind, OpKind::Min) {
                    values.into_iter().min()
                } else {
                    values.into_iter().max()
                };
                RtValue::Int(folded.ok_or_else(|| EvalError::Unsupported("empty clamp".to_string()))?)
            }
            OpKind::Dim { axis } => {
                let tensor = self.tensor(operands[0])?;
                let extent = tensor.shape.get(*axis).copied().ok_or_else(|| {
                    EvalError::OutOfBounds(format!("axis {} of a rank-{} tensor", axis, tensor.rank()))
                })?;
                RtValue::Int(extent as i64)
            }
            OpKind::Extract => {
                let index = self.ints(&operands[1..])?;
                RtValue::Int(self.tensor(operands[0])?.get(&index)?)
            }
            OpKind::Insert => {
                let scalar = self.int(operands[0])?;
                let index = self.ints(&operands[2..])?;
                let mut tensor = self.tensor(operands[1])?.clone();
                tensor.set(&index, scalar)?;
                RtValue::Tensor(tensor)
            }
            OpKind::ExtractSlice { rank } => {
                let offsets = self.ints(&operands[1..1 + rank])?;
                let sizes = self.ints(&operands[1 + rank..1 + 2 * rank])?;
                RtValue::Tensor(self.tensor(operands[0])?.extract_slice(&offsets, &sizes)?)
            }
            OpKind::InsertSlice { rank } => {
                let offsets = self.ints(&operands[2..2 + rank])?;
                let sizes = self.ints(&operands[2 + rank..2 + 2 * rank])?;
                let source = self.tensor(operands[0])?.clone();
                let source_sizes: Vec<i64> = source.shape.iter().map(|&s| s as i64).collect();
                if source_sizes != sizes {
                    return Err(EvalError::TypeMismatch(format!(
                        "inserting a slice of shape {:?} into a window of {:?}",
                        source.shape, sizes
                    )));
                }
                let mut dest = self.tensor(operands[1])?.clone();
                dest.insert_slice(&source, &offsets)?;
                RtValue::Tensor(dest)
            }
            OpKind::Loop(info) => return self.exec_loop(func, op, *info),
            OpKind::Generic(info) => return self.exec_generic(func, op, info),
            OpKind::Yield | OpKind::Return => {
                return Err(EvalError::Unsupported(format!("{} outside of block end", operation.kind.name())))
            }
        };
        Ok(vec![value])
    }

    fn binary(&self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> EvalResult<i64> {
        let (lhs, rhs) = (self.int(lhs)?, self.int(rhs)?);
        if rhs == 0 && matches!(op, BinaryOp::FloorDiv | BinaryOp::CeilDiv | BinaryOp::Rem) {
            return Err(EvalError::DivisionByZero);
        }
        op.fold(lhs, rhs)
            .ok_or_else(|| EvalError::Unsupported(format!("overflow in {} {} {}", lhs, op.name(), rhs)))
    }

    fn exec_loop(&mut self, func: &IrFunction, op: OpId, info: LoopInfo) -> EvalResult<Vec<RtValue>> {
        let operation = func.op(op);
        let n = info.num_dims;
        let lbs = self.ints(&operation.operands[..n])?;
        let ubs = self.ints(&operation.operands[n..2 * n])?;
        let steps = self.ints(&operation.operands[2 * n..3 * n])?;
        if let Some(&step) = steps.iter().find(|&&s| s <= 0) {
            return Err(EvalError::NonPositiveStep(step));
        }
        let mut carried: Vec<RtValue> = operation.operands[3 * n..]
            .iter()
            .map(|&v| self.lookup(v).cloned())
            .collect::<EvalResult<_>>()?;

        let body = operation.regions[0];
        let args = func.block(body).args.clone();
        let mut trips = 0u64;
        for_each_point(&lbs, &ubs, &steps, &mut |ivs| {
            for (&arg, &iv) in args.iter().zip(ivs) {
                self.env.insert(arg, RtValue::Int(iv));
            }
            for (&arg, value) in args[n..].iter().zip(carried.drain(..)) {
                self.env.insert(arg, value);
            }
            carried = self.exec_block(func, body)?;
            trips += 1;
            Ok(())
        })?;

        trace!("{} ran {} iteration(s)", op, trips);
        *self.trip_counts.entry(op).or_insert(0) += trips;
        Ok(carried)
    }

    fn exec_generic(&mut self, func: &IrFunction, op: OpId, info: &GenericInfo) -> EvalResult<Vec<RtValue>> {
        let operation = func.op(op);
        let tensors: Vec<Tensor> = operation
            .operands
            .iter()
            .map(|&v| self.tensor(v).cloned())
            .collect::<EvalResult<_>>()?;

        // Each loop dimension takes its extent from the first operand axis it indexes.
        let mut extents: Vec<Option<i64>> = vec![None; info.num_loops()];
        for (tensor, map) in tensors.iter().zip(&info.indexing_maps) {
            for (axis, &dim) in map.dims.iter().enumerate() {
                let extent = tensor.shape[axis] as i64;
                match extents[dim] {
                    None => extents[dim] = Some(extent),
                    Some(e) if e != extent => {
                        return Err(EvalError::TypeMismatch(format!(
                            "loop dimension {} has extents {} and {}",
                            dim, e, extent
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        let ubs = extents
            .iter()
            .enumerate()
            .map(|(dim, e)| e.ok_or_else(|| EvalError::Unsupported(format!("loop dimension {} is unbounded", dim))))
            .collect::<EvalResult<Vec<_>>>()?;
        let lbs = vec![0; ubs.len()];
        let steps = vec![1; ubs.len()];

        let body = operation.regions[0];
        let args = func.block(body).args.clone();
        let mut outputs: Vec<Tensor> = tensors[info.num_inputs..].to_vec();
        let inputs = &tensors[..info.num_inputs];
        let maps = &info.indexing_maps;
        for_each_point(&lbs, &ubs, &steps, &mut |point| {
            let index_of = |m: usize| -> Vec<i64> { maps[m].dims.iter().map(|&d| point[d]).collect() };
            for (k, tensor) in inputs.iter().chain(outputs.iter()).enumerate() {
                self.env.insert(args[k], RtValue::Int(tensor.get(&index_of(k))?));
            }
            let yielded = self.exec_block(func, body)?;
            for (j, value) in yielded.into_iter().enumerate() {
                let scalar = value
                    .as_int()
                    .ok_or_else(|| EvalError::TypeMismatch("generic body must yield integers".to_string()))?;
                outputs[j].set(&index_of(info.num_inputs + j), scalar)?;
            }
            Ok(())
        })?;
        Ok(outputs.into_iter().map(RtValue::Tensor).collect())
    }
}

/// Visit every point of the box `[lbs, ubs)` with the given steps in
/// row-major order.
fn for_each_point(
    lbs: &[i64],
    ubs: &[i64],
    steps: &[i64],
    f: &mut dyn FnMut(&[i64]) -> EvalResult<()>,
) -> EvalResult<()> {
    fn visit(
        lbs: &[i64],
        ubs: &[i64],
        steps: &[i64],
        current: &mut Vec<i64>,
        f: &mut dyn FnMut(&[i64]) -> EvalResult<()>,
    ) -> EvalResult<()> {
        let dim = current.len();
        if dim == lbs.len() {
            return f(current);
        }
        let mut iv = lbs[dim];
        while iv < ubs[dim] {
            current.push(iv);
            visit(lbs, ubs, steps, current, f)?;
            current.pop();
            iv = match iv.checked_add(steps[dim]) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }
    let mut current = Vec::with_capacity(lbs.len());
    visit(lbs, ubs, steps, &mut current, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse;

    const SUM: &str = r#"
        func @sum(%n: i64) {
          %c0 = constant() {value = 0} : i64
          %c3 = constant() {value = 3} : i64
          %r = for(%c0, %n, %c3, %c0) {dims = 1} ({
          ^bb0(%i: i64, %acc: i64):
            %s = add(%acc, %i) : i64
            yield(%s)
          }) : i64
          return(%r)
        }
    "#;

    #[test]
    fn test_loop_threads_iter_args() {
        let func = parse(SUM).unwrap();
        let mut interp = Interpreter::new();
        let out = interp.run(&func, vec![RtValue::Int(10)]).unwrap();
        assert_eq!(out, vec![RtValue::Int(18)]);
        let lp = crate::ir::collect_loops(&func)[0];
        assert_eq!(interp.trip_count(lp), 4);
    }

    #[test]
    fn test_empty_loop_returns_inits() {
        let func = parse(SUM).unwrap();
        assert_eq!(evaluate(&func, vec![RtValue::Int(0)]).unwrap(), vec![RtValue::Int(0)]);
    }

    #[test]
    fn test_argument_checks() {
        let func = parse(SUM).unwrap();
        assert_eq!(
            evaluate(&func, vec![]),
            Err(EvalError::ArgumentCount { expected: 1, found: 0 })
        );
        let t = RtValue::Tensor(Tensor::zeros(vec![2]));
        assert!(matches!(evaluate(&func, vec![t]), Err(EvalError::TypeMismatch(_))));
    }

    #[test]
    fn test_division_by_zero() {
        let func = parse(
            r#"
            func @f(%a: i64, %b: i64) {
              %q = floordiv(%a, %b) : i64
              return(%q)
            }
        "#,
        )
        .unwrap();
        assert_eq!(evaluate(&func, vec![RtValue::Int(7), RtValue::Int(-2)]).unwrap(), vec![RtValue::Int(-4)]);
        assert_eq!(evaluate(&func, vec![RtValue::Int(7), RtValue::Int(0)]), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_non_positive_step() {
        let func = parse(
            r#"
            func @f(%s: i64) {
              %c0 = constant() {value = 0} : i64
              %c8 = constant() {value = 8} : i64
              %r = for(%c0, %c8, %s, %c0) {dims = 1} ({
              ^bb0(%i: i64, %acc: i64):
                yield(%acc)
              }) : i64
              return(%r)
            }
        "#,
        )
        .unwrap();
        assert_eq!(evaluate(&func, vec![RtValue::Int(0)]), Err(EvalError::NonPositiveStep(0)));
    }

    #[test]
    fn test_generic_elementwise() {
        let func = parse(
            r#"
            func @f(%a: tensor<2x3xi64>, %b: tensor<2x3xi64>) {
              %r = generic(%a, %b) {inputs = 1, iterators = ["parallel", "parallel"], maps = [[0, 1], [0, 1]]} ({
              ^bb0(%x: i64, %y: i64):
                %s = add(%x, %y) : i64
                yield(%s)
              }) : tensor<2x3xi64>
              return(%r)
            }
        "#,
        )
        .unwrap();
        let a = Tensor::from_fn(vec![2, 3], |i| (i[0] * 3 + i[1]) as i64);
        let b = Tensor::from_fn(vec![2, 3], |_| 100);
        let out = evaluate(&func, vec![a.into(), b.into()]).unwrap();
        let expected = Tensor::new(vec![2, 3], vec![100, 101, 102, 103, 104, 105]).unwrap();
        assert_eq!(out, vec![RtValue::Tensor(expected)]);
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let func = parse(
            r#"
            func @f(%a: tensor<4xi64>, %o: i64) {
              %c2 = constant() {value = 2} : i64
              %s = extract_slice(%a, %o, %c2) {rank = 1} : tensor<2xi64>
              return(%s)
            }
        "#,
        )
        .unwrap();
        let a = Tensor::from_fn(vec![4], |i| i[0] as i64);
        let ok = evaluate(&func, vec![a.clone().into(), RtValue::Int(2)]).unwrap();
        assert_eq!(ok[0].as_tensor().map(|t| t.data.clone()), Some(vec![2, 3]));
        assert!(matches!(
            evaluate(&func, vec![a.into(), RtValue::Int(3)]),
            Err(EvalError::OutOfBounds(_))
        ));
    }
}
