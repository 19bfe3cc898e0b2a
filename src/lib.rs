//! # structloop - Structured Loop Peeling and Standalone Tiling
//!
//! A small loop-transformation framework over a structured-loop IR:
//! - Arena IR with explicit multi-dimensional loops and `generic` ops
//! - Bounds analysis deciding when a loop dimension needs peeling
//! - Loop peeling into a step-aligned main loop and a remainder loop
//! - Standalone tiling of `generic` ops into loop nests over slices
//! - Marker attributes making every transformation idempotent
//! - A reference evaluator to check that results are preserved
//!
//! ## Architecture
//!
//! ```text
//! Text → Frontend → IR → Tiling → Peeling → Simplify → Verify → Printer
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use structloop::prelude::*;
//!
//! let source = r#"
//!     func @sum(%n: i64) {
//!       %c0 = constant() {value = 0} : i64
//!       %c4 = constant() {value = 4} : i64
//!       %r = for(%c0, %n, %c4, %c0) {dims = 1} ({
//!       ^bb0(%i: i64, %acc: i64):
//!         %s = add(%acc, %i) : i64
//!         yield(%s)
//!       }) : i64
//!       return(%r)
//!     }
//! "#;
//!
//! let mut func = structloop::parse(source)?;
//! let report = structloop::transform(&mut func, PipelineConfig::default())?;
//! println!("{}", print_function(&func));
//! ```

#![warn(clippy::all)]

pub mod analysis;
pub mod frontend;
pub mod interp;
pub mod ir;
pub mod transform;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{constant_value, BoundsAnalyzer, DimBounds, LinearExpr};
    pub use crate::frontend::parse;
    pub use crate::interp::{evaluate, Interpreter, RtValue, Tensor};
    pub use crate::ir::{
        print_function, verify, IrFunction, LoopKind, OpId, OpKind, Rewriter, StructuredLoop, Type, ValueId,
    };
    pub use crate::transform::marker::{PEELED_MARKER, TRANSFORMED_MARKER};
    pub use crate::transform::{
        peel_all_loops, peel_and_canonicalize_loop, tile_generic_op, BoundSimplifier, MinMaxSimplifier,
        PeelMode, Pipeline, PipelineConfig, PipelineReport, Transform,
    };
    pub use crate::utils::errors::*;
}

use anyhow::Result;

/// Main entry point for parsing and verifying textual IR.
pub fn parse(source: &str) -> Result<ir::IrFunction> {
    frontend::parse(source)
}

/// Run the transformation pipeline on `func`.
pub fn transform(func: &mut ir::IrFunction, config: transform::PipelineConfig) -> Result<transform::PipelineReport> {
    transform::Pipeline::new(config).run(func)
}

/// Parse `source`, transform it and print the result.
pub fn transform_source(source: &str, config: transform::PipelineConfig) -> Result<(String, transform::PipelineReport)> {
    let mut func = parse(source)?;
    let report = transform(&mut func, config)?;
    Ok((ir::print_function(&func), report))
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
