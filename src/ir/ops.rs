//! Operation kinds and attributes.
//!
//! Every operation stores its kind-specific data (constant value, loop
//! arity, indexing maps, ...) in its [`OpKind`]. In the textual form that
//! data is spelled as *inherent* attributes, next to the free-form
//! *discardable* attributes such as transformation markers.

use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt;

/// A discardable or inherent attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    /// Presence-only tag
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<Attribute>),
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Unit => write!(f, "unit"),
            Attribute::Bool(b) => write!(f, "{}", b),
            Attribute::Int(v) => write!(f, "{}", v),
            Attribute::Str(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Attribute::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Integer binary operations. `floordiv` and `rem` round toward negative
/// infinity, `ceildiv` toward positive infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    CeilDiv,
    Rem,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 6] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::FloorDiv,
        BinaryOp::CeilDiv,
        BinaryOp::Rem,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::FloorDiv => "floordiv",
            BinaryOp::CeilDiv => "ceildiv",
            BinaryOp::Rem => "rem",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Evaluate on constants. Returns `None` on overflow or division by zero.
    pub fn fold(self, lhs: i64, rhs: i64) -> Option<i64> {
        if matches!(self, BinaryOp::FloorDiv | BinaryOp::CeilDiv | BinaryOp::Rem) {
            // Catches division by zero and i64::MIN / -1.
            lhs.checked_rem(rhs)?;
        }
        match self {
            BinaryOp::Add => lhs.checked_add(rhs),
            BinaryOp::Sub => lhs.checked_sub(rhs),
            BinaryOp::Mul => lhs.checked_mul(rhs),
            BinaryOp::FloorDiv if rhs != 0 => Some(Integer::div_floor(&lhs, &rhs)),
            BinaryOp::CeilDiv if rhs != 0 => {
                let neg = lhs.checked_neg()?;
                Integer::div_floor(&neg, &rhs).checked_neg()
            }
            BinaryOp::Rem if rhs != 0 => Some(Integer::mod_floor(&lhs, &rhs)),
            _ => None,
        }
    }
}

/// The three structured loop flavours. They share one representation and
/// differ only in how later lowering treats them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopKind {
    /// Tiled loop over tensor outputs
    Loop,
    /// Sequential loop
    For,
    /// Loop whose iterations may run in parallel
    Parallel,
}

impl LoopKind {
    pub fn name(self) -> &'static str {
        match self {
            LoopKind::Loop => "loop",
            LoopKind::For => "for",
            LoopKind::Parallel => "parallel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "loop" => Some(LoopKind::Loop),
            "for" => Some(LoopKind::For),
            "parallel" => Some(LoopKind::Parallel),
            _ => None,
        }
    }

    pub fn is_parallel(self) -> bool {
        matches!(self, LoopKind::Parallel)
    }
}

/// Loop-specific data. Operands are laid out as
/// `[lbs.., ubs.., steps.., inits..]`; the body block takes one induction
/// variable per dimension followed by one iteration argument per init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopInfo {
    pub kind: LoopKind,
    pub num_dims: usize,
}

impl LoopInfo {
    pub fn new(kind: LoopKind, num_dims: usize) -> Self {
        Self { kind, num_dims }
    }

    pub fn lower_bound_index(&self, dim: usize) -> usize {
        dim
    }

    pub fn upper_bound_index(&self, dim: usize) -> usize {
        self.num_dims + dim
    }

    pub fn step_index(&self, dim: usize) -> usize {
        2 * self.num_dims + dim
    }

    pub fn init_index(&self, arg: usize) -> usize {
        3 * self.num_dims + arg
    }

    /// Number of operands that are not loop-carried inits.
    pub fn num_control_operands(&self) -> usize {
        3 * self.num_dims
    }
}

/// Iteration semantics of one dimension of a `generic` op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IteratorType {
    Parallel,
    Reduction,
}

impl IteratorType {
    pub fn name(self) -> &'static str {
        match self {
            IteratorType::Parallel => "parallel",
            IteratorType::Reduction => "reduction",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "parallel" => Some(IteratorType::Parallel),
            "reduction" => Some(IteratorType::Reduction),
            _ => None,
        }
    }
}

/// Projected permutation from the iteration space of a `generic` op to
/// the axes of one operand: axis `a` of the operand is indexed by loop
/// dimension `dims[a]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexingMap {
    pub dims: Vec<usize>,
}

impl IndexingMap {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn identity(rank: usize) -> Self {
        Self { dims: (0..rank).collect() }
    }

    /// Which operand axis is indexed by `dim`, if any.
    pub fn axis_of(&self, dim: usize) -> Option<usize> {
        self.dims.iter().position(|&d| d == dim)
    }
}

/// Data of a `generic` computation: operands are `inputs ++ outputs`, each
/// with one indexing map; the body takes one scalar per operand and yields
/// one scalar per output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericInfo {
    pub num_inputs: usize,
    pub indexing_maps: Vec<IndexingMap>,
    pub iterator_types: Vec<IteratorType>,
}

impl GenericInfo {
    pub fn num_loops(&self) -> usize {
        self.iterator_types.len()
    }

    pub fn num_operands(&self) -> usize {
        self.indexing_maps.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.num_operands().saturating_sub(self.num_inputs)
    }
}

/// The kind of an operation together with its kind-specific data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Constant(i64),
    Binary(BinaryOp),
    /// Variadic minimum
    Min,
    /// Variadic maximum
    Max,
    /// Extent of a tensor axis
    Dim { axis: usize },
    /// Read one element: `tensor, indices..`
    Extract,
    /// Write one element: `scalar, tensor, indices..`
    Insert,
    /// `tensor, offsets.., sizes..` with unit strides
    ExtractSlice { rank: usize },
    /// `source, dest, offsets.., sizes..` with unit strides
    InsertSlice { rank: usize },
    Loop(LoopInfo),
    Generic(GenericInfo),
    Yield,
    Return,
}

const VALUE_ATTR: &str = "value";
const AXIS_ATTR: &str = "axis";
const RANK_ATTR: &str = "rank";
const DIMS_ATTR: &str = "dims";
const INPUTS_ATTR: &str = "inputs";
const MAPS_ATTR: &str = "maps";
const ITERATORS_ATTR: &str = "iterators";

impl OpKind {
    /// The textual operation name.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Constant(_) => "constant",
            OpKind::Binary(op) => op.name(),
            OpKind::Min => "min",
            OpKind::Max => "max",
            OpKind::Dim { .. } => "dim",
            OpKind::Extract => "extract",
            OpKind::Insert => "insert",
            OpKind::ExtractSlice { .. } => "extract_slice",
            OpKind::InsertSlice { .. } => "insert_slice",
            OpKind::Loop(info) => info.kind.name(),
            OpKind::Generic(_) => "generic",
            OpKind::Yield => "yield",
            OpKind::Return => "return",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, OpKind::Yield | OpKind::Return)
    }

    /// Number of single-block regions the op owns.
    pub fn num_regions(&self) -> usize {
        match self {
            OpKind::Loop(_) | OpKind::Generic(_) => 1,
            _ => 0,
        }
    }

    pub fn as_loop(&self) -> Option<LoopInfo> {
        match self {
            OpKind::Loop(info) => Some(*info),
            _ => None,
        }
    }

    pub fn as_generic(&self) -> Option<&GenericInfo> {
        match self {
            OpKind::Generic(info) => Some(info),
            _ => None,
        }
    }

    /// Kind-specific data spelled as attributes, in printing order.
    pub fn inherent_attrs(&self) -> Vec<(&'static str, Attribute)> {
        match self {
            OpKind::Constant(v) => vec![(VALUE_ATTR, Attribute::Int(*v))],
            OpKind::Dim { axis } => vec![(AXIS_ATTR, Attribute::Int(*axis as i64))],
            OpKind::ExtractSlice { rank } | OpKind::InsertSlice { rank } => {
                vec![(RANK_ATTR, Attribute::Int(*rank as i64))]
            }
            OpKind::Loop(info) => vec![(DIMS_ATTR, Attribute::Int(info.num_dims as i64))],
            OpKind::Generic(info) => vec![
                (INPUTS_ATTR, Attribute::Int(info.num_inputs as i64)),
                (
                    ITERATORS_ATTR,
                    Attribute::Array(
                        info.iterator_types
                            .iter()
                            .map(|it| Attribute::Str(it.name().to_string()))
                            .collect(),
                    ),
                ),
                (
                    MAPS_ATTR,
                    Attribute::Array(
                        info.indexing_maps
                            .iter()
                            .map(|m| {
                                Attribute::Array(m.dims.iter().map(|&d| Attribute::Int(d as i64)).collect())
                            })
                            .collect(),
                    ),
                ),
            ],
            _ => Vec::new(),
        }
    }

    /// Rebuild an op kind from its name and attribute dictionary. The
    /// inherent attributes are removed from `attrs`; what remains is
    /// discardable.
    pub fn from_parts(name: &str, attrs: &mut BTreeMap<String, Attribute>) -> Result<OpKind, String> {
        if let Some(op) = BinaryOp::from_name(name) {
            return Ok(OpKind::Binary(op));
        }
        if let Some(kind) = LoopKind::from_name(name) {
            let num_dims = take_usize(attrs, DIMS_ATTR)?;
            return Ok(OpKind::Loop(LoopInfo::new(kind, num_dims)));
        }
        match name {
            "constant" => {
                let value = take(attrs, VALUE_ATTR)?
                    .as_int()
                    .ok_or_else(|| "'value' must be an integer".to_string())?;
                Ok(OpKind::Constant(value))
            }
            "min" => Ok(OpKind::Min),
            "max" => Ok(OpKind::Max),
            "dim" => Ok(OpKind::Dim { axis: take_usize(attrs, AXIS_ATTR)? }),
            "extract" => Ok(OpKind::Extract),
            "insert" => Ok(OpKind::Insert),
            "extract_slice" => Ok(OpKind::ExtractSlice { rank: take_usize(attrs, RANK_ATTR)? }),
            "insert_slice" => Ok(OpKind::InsertSlice { rank: take_usize(attrs, RANK_ATTR)? }),
            "generic" => {
                let num_inputs = take_usize(attrs, INPUTS_ATTR)?;
                let iterator_types = take(attrs, ITERATORS_ATTR)?
                    .as_array()
                    .ok_or_else(|| "'iterators' must be an array".to_string())?
                    .iter()
                    .map(|a| {
                        a.as_str()
                            .and_then(IteratorType::from_name)
                            .ok_or_else(|| format!("invalid iterator type {}", a))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let indexing_maps = take(attrs, MAPS_ATTR)?
                    .as_array()
                    .ok_or_else(|| "'maps' must be an array".to_string())?
                    .iter()
                    .map(|m| {
                        let dims = m
                            .as_array()
                            .ok_or_else(|| format!("invalid indexing map {}", m))?
                            .iter()
                            .map(|d| {
                                d.as_int()
                                    .filter(|v| *v >= 0)
                                    .map(|v| v as usize)
                                    .ok_or_else(|| format!("invalid map entry {}", d))
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(IndexingMap::new(dims))
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                Ok(OpKind::Generic(GenericInfo { num_inputs, indexing_maps, iterator_types }))
            }
            "yield" => Ok(OpKind::Yield),
            "return" => Ok(OpKind::Return),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

fn take(attrs: &mut BTreeMap<String, Attribute>, key: &str) -> Result<Attribute, String> {
    attrs.remove(key).ok_or_else(|| format!("missing attribute '{}'", key))
}

fn take_usize(attrs: &mut BTreeMap<String, Attribute>, key: &str) -> Result<usize, String> {
    take(attrs, key)?
        .as_int()
        .filter(|v| *v >= 0)
        .map(|v| v as usize)
        .ok_or_else(|| format!("'{}' must be a non-negative integer", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_fold_rounding() {
        assert_eq!(BinaryOp::FloorDiv.fold(7, 3), Some(2));
        assert_eq!(BinaryOp::FloorDiv.fold(-7, 3), Some(-3));
        assert_eq!(BinaryOp::CeilDiv.fold(7, 3), Some(3));
        assert_eq!(BinaryOp::CeilDiv.fold(-7, 3), Some(-2));
        assert_eq!(BinaryOp::Rem.fold(-7, 3), Some(2));
        assert_eq!(BinaryOp::Rem.fold(7, 0), None);
        assert_eq!(BinaryOp::Add.fold(i64::MAX, 1), None);
    }

    #[test]
    fn test_loop_operand_layout() {
        let info = LoopInfo::new(LoopKind::For, 2);
        assert_eq!(info.lower_bound_index(1), 1);
        assert_eq!(info.upper_bound_index(0), 2);
        assert_eq!(info.step_index(1), 5);
        assert_eq!(info.init_index(0), 6);
    }

    #[test]
    fn test_generic_attrs_round_trip() {
        let kind = OpKind::Generic(GenericInfo {
            num_inputs: 1,
            indexing_maps: vec![IndexingMap::identity(2), IndexingMap::new(vec![0])],
            iterator_types: vec![IteratorType::Parallel, IteratorType::Reduction],
        });
        let mut attrs: BTreeMap<String, Attribute> = kind
            .inherent_attrs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        attrs.insert("label".to_string(), Attribute::Str("x".to_string()));

        let rebuilt = OpKind::from_parts("generic", &mut attrs).unwrap();
        assert_eq!(rebuilt, kind);
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_unknown_op() {
        let mut attrs = BTreeMap::new();
        assert!(OpKind::from_parts("frobnicate", &mut attrs).is_err());
        assert!(OpKind::from_parts("for", &mut attrs).is_err());
    }
}
