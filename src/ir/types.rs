//! Value types of the structured loop IR.
//!
//! The IR has exactly one scalar type, a signed 64-bit integer used for
//! loop bounds, indices and tensor elements alike, plus ranked tensors of
//! that scalar with static or dynamic extents.

use serde::{Serialize, Deserialize};
use std::fmt;

/// The type of an SSA value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Signed 64-bit integer
    Int,
    /// Ranked tensor of `i64`
    Tensor(TensorType),
}

impl Type {
    /// Shorthand for a tensor type with the given extents.
    pub fn tensor(shape: Vec<Option<i64>>) -> Self {
        Type::Tensor(TensorType { shape })
    }

    /// Shorthand for a fully static tensor type.
    pub fn static_tensor(shape: &[i64]) -> Self {
        Type::Tensor(TensorType::from_static(shape))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int)
    }

    /// Get the tensor type, if this is one.
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            Type::Int => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "i64"),
            Type::Tensor(t) => write!(f, "{}", t),
        }
    }
}

/// A ranked tensor type; `None` marks a dynamic extent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub shape: Vec<Option<i64>>,
}

impl TensorType {
    /// Create a tensor type where every extent is known.
    pub fn from_static(shape: &[i64]) -> Self {
        Self { shape: shape.iter().map(|&d| Some(d)).collect() }
    }

    /// Create a tensor type of the given rank with all extents dynamic.
    pub fn dynamic(rank: usize) -> Self {
        Self { shape: vec![None; rank] }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Static extent of an axis, if known.
    pub fn extent(&self, axis: usize) -> Option<i64> {
        self.shape.get(axis).copied().flatten()
    }

    pub fn is_static(&self) -> bool {
        self.shape.iter().all(Option::is_some)
    }

    /// Parse the textual form `tensor<4x?xi64>`.
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.strip_prefix("tensor<")?.strip_suffix('>')?;
        let mut parts: Vec<&str> = inner.split('x').collect();
        if parts.pop()? != "i64" {
            return None;
        }
        let shape = parts
            .into_iter()
            .map(|p| match p {
                "?" => Some(None),
                n => n.parse::<i64>().ok().filter(|v| *v >= 0).map(Some),
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { shape })
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<")?;
        for dim in &self.shape {
            match dim {
                Some(n) => write!(f, "{}x", n)?,
                None => write!(f, "?x")?,
            }
        }
        write!(f, "i64>")
    }
}
