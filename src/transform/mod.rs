//! Loop transformations on the structured loop IR.

pub mod marker;
pub mod canonicalize;
pub mod peeling;
pub mod tiling;
pub mod pipeline;

pub use canonicalize::{BoundSimplifier, MinMaxSimplifier};
pub use peeling::{
    peel_all_loops, peel_and_canonicalize_loop, PeelMode, PeelResult, Peeling, PeelStats,
};
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use tiling::{tile_generic_op, TileStats, TiledOp, Tiling};

use crate::ir::IrFunction;
use anyhow::Result;

/// Transformation pass trait.
pub trait Transform {
    /// Apply the transformation; returns whether the function changed.
    fn apply(&self, func: &mut IrFunction) -> Result<bool>;

    /// Get transformation name.
    fn name(&self) -> &str;
}
