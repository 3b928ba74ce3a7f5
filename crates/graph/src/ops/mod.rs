//! Concrete operation nodes.

mod copy;
mod elementwise;

pub use copy::CopyNode;
pub use elementwise::{BinaryNode, ScalarNode, UnaryNode};

use crate::error::{GraphError, Result};
use crate::types::TensorSpec;

/// Both operands must agree on dtype and shape.
pub(crate) fn ensure_same_spec(expected: &TensorSpec, found: &TensorSpec) -> Result<()> {
    if expected.dtype != found.dtype {
        return Err(GraphError::DTypeMismatch {
            expected: expected.dtype,
            found: found.dtype,
        });
    }
    if expected.shape != found.shape {
        return Err(GraphError::ShapeMismatch {
            expected: expected.shape.clone(),
            found: found.shape.clone(),
        });
    }
    Ok(())
}
