//! Transformation markers and labels.
//!
//! A marker is a unit attribute whose presence records that an op was
//! already handled by a transformation, so re-running a pass leaves it
//! alone. A label is a string attribute callers use to restrict a pass to
//! selected ops.

use crate::ir::function::{IrFunction, OpId};
use crate::ir::ops::Attribute;
use crate::ir::rewriter::Rewriter;

/// Set on ops produced or consumed by tiling.
pub const TRANSFORMED_MARKER: &str = "__internal_transformed_marker__";

/// Set on loops that were peeled (both the main and the remainder loop).
pub const PEELED_MARKER: &str = "__internal_peeled_marker__";

/// Array of the loop dimensions already split by peeling.
pub const PEELED_DIMS_ATTR: &str = "__internal_peeled_dims__";

/// String attribute matched by [`has_matching_label`].
pub const LABEL_ATTR: &str = "__internal_linalg_transform__";

/// Tag `op` with the unit marker `name`.
pub fn set_transformation_attr(rewriter: &mut Rewriter<'_>, op: OpId, name: &str) {
    rewriter.set_attr(op, name, Attribute::Unit);
}

/// Drop the marker `name` from `op`, if present.
pub fn remove_transformation_attr(rewriter: &mut Rewriter<'_>, op: OpId, name: &str) {
    rewriter.remove_attr(op, name);
}

/// Check whether `op` carries the marker `name`.
pub fn has_transformation_attr(func: &IrFunction, op: OpId, name: &str) -> bool {
    func.has_attr(op, name)
}

/// Record that dimension `dim` of loop `op` was split by peeling.
pub fn mark_dim_peeled(rewriter: &mut Rewriter<'_>, op: OpId, dim: usize) {
    if is_dim_peeled(rewriter.func(), op, dim) {
        return;
    }
    let mut dims: Vec<Attribute> = rewriter
        .func()
        .attr(op, PEELED_DIMS_ATTR)
        .and_then(Attribute::as_array)
        .map(<[Attribute]>::to_vec)
        .unwrap_or_default();
    dims.push(Attribute::Int(dim as i64));
    rewriter.set_attr(op, PEELED_DIMS_ATTR, Attribute::Array(dims));
}

/// Check whether dimension `dim` of loop `op` was already split by peeling.
pub fn is_dim_peeled(func: &IrFunction, op: OpId, dim: usize) -> bool {
    func.attr(op, PEELED_DIMS_ATTR)
        .and_then(Attribute::as_array)
        .map_or(false, |dims| dims.iter().any(|d| d.as_int() == Some(dim as i64)))
}

/// Check whether `op` carries the label `label`.
pub fn has_matching_label(func: &IrFunction, op: OpId, label: &str) -> bool {
    func.attr(op, LABEL_ATTR).and_then(Attribute::as_str) == Some(label)
}

/// Attach `label` to `op`.
pub fn set_label(rewriter: &mut Rewriter<'_>, op: OpId, label: &str) {
    rewriter.set_attr(op, LABEL_ATTR, Attribute::Str(label.to_string()));
}

/// Label of `op`, if any.
pub fn label_of(func: &IrFunction, op: OpId) -> Option<&str> {
    func.attr(op, LABEL_ATTR).and_then(Attribute::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;

    #[test]
    fn test_marker_round_trip() {
        let mut func = IrFunction::new("f", vec![]);
        let body = func.body();
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let c = rw.constant(1);
        let op = rw.func().defining_op(c).unwrap();

        assert!(!has_transformation_attr(rw.func(), op, PEELED_MARKER));
        set_transformation_attr(&mut rw, op, PEELED_MARKER);
        assert!(has_transformation_attr(rw.func(), op, PEELED_MARKER));
        assert!(!has_transformation_attr(rw.func(), op, TRANSFORMED_MARKER));
        remove_transformation_attr(&mut rw, op, PEELED_MARKER);
        assert!(!has_transformation_attr(rw.func(), op, PEELED_MARKER));

        let before = rw.mutations();
        remove_transformation_attr(&mut rw, op, PEELED_MARKER);
        assert_eq!(rw.mutations(), before);
    }

    #[test]
    fn test_peeled_dims() {
        let mut func = IrFunction::new("f", vec![]);
        let body = func.body();
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let c = rw.constant(1);
        let op = rw.func().defining_op(c).unwrap();

        assert!(!is_dim_peeled(rw.func(), op, 0));
        mark_dim_peeled(&mut rw, op, 1);
        mark_dim_peeled(&mut rw, op, 0);
        let before = rw.mutations();
        mark_dim_peeled(&mut rw, op, 1);
        assert_eq!(rw.mutations(), before);
        assert!(is_dim_peeled(rw.func(), op, 0));
        assert!(is_dim_peeled(rw.func(), op, 1));
        assert!(!is_dim_peeled(rw.func(), op, 2));
        assert_eq!(
            rw.func().attr(op, PEELED_DIMS_ATTR),
            Some(&Attribute::Array(vec![Attribute::Int(1), Attribute::Int(0)]))
        );
    }

    #[test]
    fn test_labels() {
        let mut func = IrFunction::new("f", vec![Type::Int]);
        let body = func.body();
        let mut rw = Rewriter::new(&mut func);
        rw.set_insertion_point_to_end(body);
        let c = rw.constant(1);
        let op = rw.func().defining_op(c).unwrap();

        assert!(!has_matching_label(rw.func(), op, "tile"));
        set_label(&mut rw, op, "tile");
        assert!(has_matching_label(rw.func(), op, "tile"));
        assert!(!has_matching_label(rw.func(), op, "peel"));
        assert_eq!(label_of(rw.func(), op), Some("tile"));

        // A unit attribute under the label key is not a label.
        rw.set_attr(op, LABEL_ATTR, Attribute::Unit);
        assert!(!has_matching_label(rw.func(), op, "tile"));
    }
}
