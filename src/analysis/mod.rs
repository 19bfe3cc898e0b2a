//! Analyses over loop bounds.
//!
//! - `bounds`: constant folding and the peeling decision
//! - `affine`: linear expressions and a small non-negativity prover

pub mod bounds;
pub mod affine;

pub use bounds::{constant_value, is_zero, trip_count, BoundsAnalyzer, DimBounds};
pub use affine::{prove_ge, prove_nonneg, LinearExpr};
