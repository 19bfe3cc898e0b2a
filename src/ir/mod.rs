//! The structured loop IR.
//!
//! - `types`: scalar and tensor types
//! - `ops`: operation kinds and attributes
//! - `function`: arena storage of a function
//! - `loops`: uniform view over structured loops
//! - `rewriter`: the mutation API used by every transformation
//! - `printer` / `verify`: textual form and structural checks

pub mod types;
pub mod ops;
pub mod function;
pub mod loops;
pub mod rewriter;
pub mod printer;
pub mod verify;

pub use types::{TensorType, Type};
pub use ops::{
    Attribute, BinaryOp, GenericInfo, IndexingMap, IteratorType, LoopInfo, LoopKind, OpKind,
};
pub use function::{Block, BlockId, IrFunction, OpId, Operation, ValueData, ValueDef, ValueId};
pub use loops::{collect_loops, StructuredLoop};
pub use rewriter::{Rewriter, ValueMap};
pub use printer::print_function;
pub use verify::verify;
