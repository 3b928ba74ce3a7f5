//! Compute graph representation for graphrt.
//!
//! A [`ComputeGraph`] owns a [`ValueStore`] of tensors and scalars, an
//! ordered list of [`OpNode`]s that reference those values by [`ValueRef`],
//! and one [`ExecutionContext`] that owns the device.

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod node;
pub mod ops;
pub mod summary;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

pub use config::*;
pub use context::*;
pub use error::{GraphError, Result};
pub use graph::ComputeGraph;
pub use node::*;
pub use ops::*;
pub use summary::*;
pub use types::*;
pub use value::*;
