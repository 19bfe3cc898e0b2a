//! Runtime values of the reference evaluator.

use crate::ir::types::Type;
use crate::utils::errors::EvalError;
use std::fmt;

/// Dense row-major tensor of `i64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<i64>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<i64>) -> Result<Self, EvalError> {
        let len: usize = shape.iter().product();
        if len != data.len() {
            return Err(EvalError::TypeMismatch(format!(
                "shape {:?} holds {} elements, got {}",
                shape,
                len,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self { shape, data: vec![0; len] }
    }

    /// Build a tensor whose element at each index is `f(index)`.
    pub fn from_fn(shape: Vec<usize>, mut f: impl FnMut(&[usize]) -> i64) -> Self {
        let mut tensor = Self::zeros(shape);
        let mut index = vec![0; tensor.rank()];
        for slot in 0..tensor.data.len() {
            tensor.data[slot] = f(&index);
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < tensor.shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        tensor
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset(&self, index: &[i64]) -> Result<usize, EvalError> {
        if index.len() != self.rank() {
            return Err(EvalError::TypeMismatch(format!(
                "{} indices for a rank-{} tensor",
                index.len(),
                self.rank()
            )));
        }
        let mut offset = 0usize;
        for (&i, &extent) in index.iter().zip(&self.shape) {
            let i = usize::try_from(i)
                .ok()
                .filter(|&i| i < extent)
                .ok_or_else(|| EvalError::OutOfBounds(format!("index {:?} in shape {:?}", index, self.shape)))?;
            offset = offset * extent + i;
        }
        Ok(offset)
    }

    pub fn get(&self, index: &[i64]) -> Result<i64, EvalError> {
        Ok(self.data[self.offset(index)?])
    }

    pub fn set(&mut self, index: &[i64], value: i64) -> Result<(), EvalError> {
        let offset = self.offset(index)?;
        self.data[offset] = value;
        Ok(())
    }

    fn check_window(&self, offsets: &[i64], sizes: &[i64]) -> Result<Vec<usize>, EvalError> {
        if offsets.len() != self.rank() || sizes.len() != self.rank() {
            return Err(EvalError::TypeMismatch(format!(
                "slice of rank {} on a rank-{} tensor",
                offsets.len(),
                self.rank()
            )));
        }
        let mut extents = Vec::with_capacity(sizes.len());
        for axis in 0..self.rank() {
            let (offset, size) = (offsets[axis], sizes[axis]);
            let in_bounds = offset >= 0
                && size >= 0
                && offset
                    .checked_add(size)
                    .map_or(false, |end| end <= self.shape[axis] as i64);
            if !in_bounds {
                return Err(EvalError::OutOfBounds(format!(
                    "slice [{}, {}+{}) on axis {} of shape {:?}",
                    offset, offset, size, axis, self.shape
                )));
            }
            extents.push(size as usize);
        }
        Ok(extents)
    }

    /// Copy out the window at `offsets` with extents `sizes`.
    pub fn extract_slice(&self, offsets: &[i64], sizes: &[i64]) -> Result<Tensor, EvalError> {
        let extents = self.check_window(offsets, sizes)?;
        let mut failure = None;
        let slice = Tensor::from_fn(extents, |index| {
            let source: Vec<i64> = index.iter().zip(offsets).map(|(&i, &o)| i as i64 + o).collect();
            match self.get(&source) {
                Ok(v) => v,
                Err(err) => {
                    failure.get_or_insert(err);
                    0
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(slice),
        }
    }

    /// Overwrite the window at `offsets` with `source`.
    pub fn insert_slice(&mut self, source: &Tensor, offsets: &[i64]) -> Result<(), EvalError> {
        let sizes: Vec<i64> = source.shape.iter().map(|&s| s as i64).collect();
        self.check_window(offsets, &sizes)?;
        let mut index = vec![0i64; source.rank()];
        for &value in &source.data {
            let target: Vec<i64> = index.iter().zip(offsets).map(|(&i, &o)| i + o).collect();
            self.set(&target, value)?;
            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < sizes[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor{:?}{:?}", self.shape, self.data)
    }
}

/// A runtime value: a scalar or a tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtValue {
    Int(i64),
    Tensor(Tensor),
}

impl RtValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RtValue::Int(v) => Some(*v),
            RtValue::Tensor(_) => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            RtValue::Tensor(t) => Some(t),
            RtValue::Int(_) => None,
        }
    }

    pub fn into_tensor(self) -> Option<Tensor> {
        match self {
            RtValue::Tensor(t) => Some(t),
            RtValue::Int(_) => None,
        }
    }

    /// Whether this value inhabits `ty`.
    pub fn matches(&self, ty: &Type) -> bool {
        match (self, ty) {
            (RtValue::Int(_), Type::Int) => true,
            (RtValue::Tensor(t), Type::Tensor(tt)) => {
                t.rank() == tt.rank()
                    && t.shape
                        .iter()
                        .zip(&tt.shape)
                        .all(|(&actual, expected)| expected.map_or(true, |e| e == actual as i64))
            }
            _ => false,
        }
    }
}

impl From<i64> for RtValue {
    fn from(v: i64) -> Self {
        RtValue::Int(v)
    }
}

impl From<Tensor> for RtValue {
    fn from(t: Tensor) -> Self {
        RtValue::Tensor(t)
    }
}

impl fmt::Display for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtValue::Int(v) => write!(f, "{}", v),
            RtValue::Tensor(t) => write!(f, "{}", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fn_row_major() {
        let t = Tensor::from_fn(vec![2, 3], |i| (i[0] * 10 + i[1]) as i64);
        assert_eq!(t.data, vec![0, 1, 2, 10, 11, 12]);
        assert_eq!(t.get(&[1, 2]).unwrap(), 12);
    }

    #[test]
    fn test_out_of_bounds() {
        let t = Tensor::zeros(vec![4]);
        assert!(matches!(t.get(&[4]), Err(EvalError::OutOfBounds(_))));
        assert!(matches!(t.get(&[-1]), Err(EvalError::OutOfBounds(_))));
        assert!(matches!(t.extract_slice(&[2], &[3]), Err(EvalError::OutOfBounds(_))));
    }

    #[test]
    fn test_slice_round_trip() {
        let t = Tensor::from_fn(vec![3, 4], |i| (i[0] * 4 + i[1]) as i64);
        let s = t.extract_slice(&[1, 1], &[2, 2]).unwrap();
        assert_eq!(s.shape, vec![2, 2]);
        assert_eq!(s.data, vec![5, 6, 9, 10]);

        let mut dest = Tensor::zeros(vec![3, 4]);
        dest.insert_slice(&s, &[1, 1]).unwrap();
        assert_eq!(dest.get(&[2, 2]).unwrap(), 10);
        assert_eq!(dest.get(&[0, 0]).unwrap(), 0);
    }

    #[test]
    fn test_matches_type() {
        let t = RtValue::Tensor(Tensor::zeros(vec![4, 2]));
        assert!(t.matches(&Type::tensor(vec![Some(4), None])));
        assert!(!t.matches(&Type::tensor(vec![Some(3), None])));
        assert!(!t.matches(&Type::Int));
        assert!(RtValue::Int(1).matches(&Type::Int));
    }
}
