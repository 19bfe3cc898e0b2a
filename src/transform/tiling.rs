//! Standalone tiling of `generic` operations.
//!
//! Tiling decomposes the iteration space of one op into a nest of `for`
//! loops over fixed-size tiles, applying a clone of the op to one tile per
//! innermost iteration:
//!
//! ```text
//! %r = generic(%a, %out)          %r = for i = 0 to N step T iter(%acc = %out):
//!                           =>      %sz = min(T, N - i)
//!                                   %as = extract_slice %a[i][%sz]
//!                                   %os = extract_slice %acc[i][%sz]
//!                                   %t = generic(%as, %os)
//!                                   yield insert_slice %t into %acc[i][%sz]
//! ```
//!
//! A tile size of 0 leaves that dimension untiled.

use crate::analysis::bounds::constant_value;
use crate::ir::function::{IrFunction, OpId, ValueId};
use crate::ir::ops::{BinaryOp, GenericInfo, LoopInfo, LoopKind, OpKind};
use crate::ir::rewriter::{Rewriter, ValueMap};
use crate::ir::types::Type;
use crate::transform::marker::{
    has_matching_label, has_transformation_attr, label_of, set_label, set_transformation_attr,
    TRANSFORMED_MARKER,
};
use crate::transform::Transform;
use crate::utils::errors::{TransformError, TransformErrorKind};
use anyhow::Result;
use log::{debug, warn};
use serde::Serialize;

const TILING: &str = "tiling";

/// Result of tiling one op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledOp {
    /// The tiled clone (or the original op when nothing was tiled)
    pub op: OpId,
    /// Generated loops, outermost first
    pub loops: Vec<OpId>,
    /// Values replacing the original op's results
    pub results: Vec<ValueId>,
}

fn unsupported(message: String) -> TransformError {
    TransformError::new(TransformErrorKind::UnsupportedOperationShape, TILING, message)
}

fn invalid(message: String) -> TransformError {
    TransformError::new(TransformErrorKind::InvalidTileSpecification, TILING, message)
}

/// Where the extent of each loop dimension is read from: `(operand, axis)`.
fn extent_sources(func: &IrFunction, op: OpId, info: &GenericInfo) -> Result<Vec<(ValueId, usize)>, TransformError> {
    let operands = &func.op(op).operands;
    for (i, (map, &operand)) in info.indexing_maps.iter().zip(operands).enumerate() {
        match func.value_type(operand).as_tensor() {
            Some(t) if t.rank() == map.dims.len() => {}
            _ => {
                return Err(unsupported(format!(
                    "operand {} of {} is not a rank-{} tensor",
                    i,
                    op,
                    map.dims.len()
                )))
            }
        }
    }
    (0..info.num_loops())
        .map(|dim| {
            info.indexing_maps
                .iter()
                .zip(operands)
                .find_map(|(map, &operand)| map.axis_of(dim).map(|axis| (operand, axis)))
                .ok_or_else(|| unsupported(format!("extent of dimension {} of {} is not derivable", dim, op)))
        })
        .collect()
}

/// Tile the `generic` op `op` by `tile_sizes`, one entry per loop
/// dimension.
///
/// An empty vector, or an all-zero one of the right length, is the
/// identity and returns `op` unchanged. Size and shape checks run before
/// the first edit, so a rejected request leaves the IR untouched.
pub fn tile_generic_op(
    rewriter: &mut Rewriter<'_>,
    op: OpId,
    tile_sizes: &[i64],
) -> Result<TiledOp, TransformError> {
    let func = rewriter.func();
    let operation = func
        .try_op(op)
        .ok_or_else(|| unsupported(format!("{} was erased", op)))?;
    let info = operation
        .kind
        .as_generic()
        .ok_or_else(|| unsupported(format!("'{}' is not a generic op", operation.kind.name())))?
        .clone();

    if tile_sizes.is_empty() {
        return Ok(TiledOp { op, loops: Vec::new(), results: operation.results.clone() });
    }
    if tile_sizes.len() != info.num_loops() {
        return Err(invalid(format!(
            "expected {} tile sizes for {}, got {}",
            info.num_loops(),
            op,
            tile_sizes.len()
        )));
    }
    if let Some(&t) = tile_sizes.iter().find(|&&t| t < 0) {
        return Err(invalid(format!("negative tile size {}", t)));
    }
    if tile_sizes.iter().all(|&t| t == 0) {
        return Ok(TiledOp { op, loops: Vec::new(), results: operation.results.clone() });
    }
    if operation.regions.is_empty() {
        return Err(unsupported(format!("{} has no body", op)));
    }
    if info.num_outputs() == 0 {
        return Err(unsupported(format!("{} has no outputs", op)));
    }
    if func.position(op).is_none() {
        return Err(unsupported(format!("{} is not placed in a block", op)));
    }
    let sources = extent_sources(func, op, &info)?;
    let operands = operation.operands.clone();
    let label = label_of(func, op).map(str::to_string);

    // Everything below mutates.
    rewriter.set_insertion_point_before(op);
    let extents: Vec<ValueId> = sources
        .iter()
        .map(|&(tensor, axis)| {
            let static_extent = rewriter.func().value_type(tensor).as_tensor().and_then(|t| t.extent(axis));
            match static_extent {
                Some(n) => rewriter.constant(n),
                None => rewriter.dim(tensor, axis),
            }
        })
        .collect();
    let zero = rewriter.constant(0);
    let steps: Vec<Option<ValueId>> = tile_sizes
        .iter()
        .map(|&t| if t > 0 { Some(rewriter.constant(t)) } else { None })
        .collect();

    let mut loops = Vec::new();
    let mut ivs = vec![None; tile_sizes.len()];
    let mut iter_args: Vec<ValueId> = operands[info.num_inputs..].to_vec();
    for (d, step) in steps.iter().enumerate() {
        let step = match *step {
            Some(step) => step,
            None => continue,
        };
        let lp = rewriter.create_loop(LoopInfo::new(LoopKind::For, 1), &[zero], &[extents[d]], &[step], &iter_args);
        let body = rewriter.func().op(lp).regions[0];
        let args = rewriter.func().block(body).args.clone();
        ivs[d] = Some(args[0]);
        iter_args = args[1..].to_vec();
        loops.push(lp);
        rewriter.set_insertion_point_to_end(body);
    }

    // Per-dimension tile offsets and sizes.
    let mut offsets = Vec::with_capacity(tile_sizes.len());
    let mut sizes = Vec::with_capacity(tile_sizes.len());
    for (d, (iv, step)) in ivs.iter().zip(&steps).enumerate() {
        match (*iv, *step) {
            (Some(iv), Some(tile)) => {
                let rest = rewriter.binary(BinaryOp::Sub, extents[d], iv);
                offsets.push(iv);
                sizes.push(rewriter.min(vec![tile, rest]));
            }
            _ => {
                offsets.push(zero);
                sizes.push(extents[d]);
            }
        }
    }

    let mut slices = Vec::with_capacity(operands.len());
    let mut output_slices = Vec::new();
    for (i, map) in info.indexing_maps.iter().enumerate() {
        let source = if i < info.num_inputs { operands[i] } else { iter_args[i - info.num_inputs] };
        let slice_offsets: Vec<ValueId> = map.dims.iter().map(|&d| offsets[d]).collect();
        let slice_sizes: Vec<ValueId> = map.dims.iter().map(|&d| sizes[d]).collect();
        let shape = slice_sizes.iter().map(|&s| constant_value(rewriter.func(), s)).collect();
        let slice = rewriter.extract_slice(source, &slice_offsets, &slice_sizes, Type::tensor(shape));
        slices.push(slice);
        if i >= info.num_inputs {
            output_slices.push((slice_offsets, slice_sizes));
        }
    }

    let result_types: Vec<Type> = slices[info.num_inputs..]
        .iter()
        .map(|&s| rewriter.func().value_type(s).clone())
        .collect();
    let mut mapping = ValueMap::new();
    let tiled = rewriter.clone_op_with(op, slices, result_types, &mut mapping);
    set_transformation_attr(rewriter, tiled, TRANSFORMED_MARKER);

    let tiled_results = rewriter.func().op(tiled).results.clone();
    let mut yielded = Vec::with_capacity(tiled_results.len());
    for ((&result, &dest), (slice_offsets, slice_sizes)) in tiled_results.iter().zip(&iter_args).zip(&output_slices) {
        yielded.push(rewriter.insert_slice(result, dest, slice_offsets, slice_sizes));
    }
    rewriter.yield_values(yielded);

    for pair in loops.windows(2).rev() {
        let (outer, inner) = (pair[0], pair[1]);
        let outer_body = rewriter.func().op(outer).regions[0];
        let inner_results = rewriter.func().op(inner).results.clone();
        rewriter.set_insertion_point_to_end(outer_body);
        rewriter.yield_values(inner_results);
    }

    let results = rewriter.func().op(loops[0]).results.clone();
    debug_assert_eq!(results.len(), rewriter.func().op(op).results.len());
    rewriter
        .replace_op(op, &results)
        .map_err(|err| unsupported(err.to_string()))?;

    if let Some(label) = label {
        for &lp in &loops {
            set_label(rewriter, lp, &label);
        }
    }
    debug!("tiled {} into {} loop(s), tiled op {}", op, loops.len(), tiled);
    Ok(TiledOp { op: tiled, loops, results })
}

/// Statistics of one tiling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TileStats {
    pub ops_tiled: usize,
    pub loops_created: usize,
    /// Ops that could not be tiled
    pub failures: Vec<String>,
}

/// Function-wide tiling pass.
#[derive(Debug, Clone)]
pub struct Tiling {
    /// Tile sizes, one per loop dimension (0 = untiled)
    pub tile_sizes: Vec<i64>,
    /// Only tile ops carrying this label
    pub label: Option<String>,
}

impl Tiling {
    pub fn new(tile_sizes: Vec<i64>) -> Self {
        Self { tile_sizes, label: None }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Tile every untransformed `generic` op.
    pub fn run(&self, func: &mut IrFunction) -> TileStats {
        let mut stats = TileStats::default();
        let candidates: Vec<OpId> = func
            .walk()
            .into_iter()
            .filter(|&op| matches!(func.op(op).kind, OpKind::Generic(_)))
            .filter(|&op| !has_transformation_attr(func, op, TRANSFORMED_MARKER))
            .filter(|&op| match &self.label {
                Some(label) => has_matching_label(func, op, label),
                None => true,
            })
            .collect();

        for op in candidates {
            if !func.is_live(op) {
                continue;
            }
            let mut rewriter = Rewriter::new(func);
            match tile_generic_op(&mut rewriter, op, &self.tile_sizes) {
                Ok(tiled) if tiled.loops.is_empty() => {}
                Ok(tiled) => {
                    stats.ops_tiled += 1;
                    stats.loops_created += tiled.loops.len();
                }
                Err(err) => {
                    warn!("skipping {}: {}", op, err);
                    stats.failures.push(err.to_string());
                }
            }
        }
        stats
    }
}

impl Transform for Tiling {
    fn apply(&self, func: &mut IrFunction) -> Result<bool> {
        Ok(self.run(func).ops_tiled > 0)
    }

    fn name(&self) -> &str {
        TILING
    }
}
