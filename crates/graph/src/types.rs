//! Handles and tensor descriptions.

use graphrt_kernels::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable index of a value inside its graph. Never reused or renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueRef(u32);

impl ValueRef {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub shape: Vec<usize>,
    pub dtype: DataType,
}

impl TensorSpec {
    pub fn new(shape: &[usize], dtype: DataType) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Element count, or `None` if the shape overflows `usize`. A rank-0
    /// tensor holds one element.
    pub fn checked_numel(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |count, &dim| count.checked_mul(dim))
    }

    pub fn checked_nbytes(&self) -> Option<usize> {
        self.checked_numel()?
            .checked_mul(self.dtype.element_size_bytes())
    }

    /// Saturates at `usize::MAX`. The value store rejects such specs, so
    /// every tensor in a graph has an exact size.
    pub fn numel(&self) -> usize {
        self.checked_numel().unwrap_or(usize::MAX)
    }

    /// Saturates like [`numel`](TensorSpec::numel).
    pub fn nbytes(&self) -> usize {
        self.checked_nbytes().unwrap_or(usize::MAX)
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self
            .shape
            .iter()
            .map(|dim| dim.to_string())
            .collect::<Vec<_>>()
            .join("x");
        write!(f, "{}[{}]", self.dtype, dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_follows_dtype() {
        let spec = TensorSpec::new(&[2, 3], DataType::F32);
        assert_eq!(spec.numel(), 6);
        assert_eq!(spec.nbytes(), 24);
        assert_eq!(spec.to_string(), "f32[2x3]");
        assert_eq!(TensorSpec::new(&[5], DataType::U8).nbytes(), 5);
    }

    #[test]
    fn rank_zero_has_one_element() {
        let spec = TensorSpec::new(&[], DataType::I32);
        assert_eq!(spec.rank(), 0);
        assert_eq!(spec.numel(), 1);
        assert_eq!(spec.nbytes(), 4);
    }

    #[test]
    fn oversized_shapes_do_not_wrap() {
        let spec = TensorSpec::new(&[usize::MAX / 2, 4], DataType::F32);
        assert_eq!(spec.checked_numel(), None);
        assert_eq!(spec.nbytes(), usize::MAX);

        let spec = TensorSpec::new(&[usize::MAX / 2], DataType::F32);
        assert_eq!(spec.checked_numel(), Some(usize::MAX / 2));
        assert_eq!(spec.checked_nbytes(), None);
        assert_eq!(TensorSpec::new(&[0, usize::MAX], DataType::U8).checked_nbytes(), Some(0));
    }

    #[test]
    fn handle_display_and_order() {
        assert_eq!(ValueRef::new(3).to_string(), "%3");
        assert!(ValueRef::new(1) < ValueRef::new(2));
        assert_eq!(serde_json::to_string(&ValueRef::new(7)).unwrap(), "7");
    }
}
