//! GPU backend for graphrt, built on wgpu.

pub mod pipelines;
pub mod runtime;
pub mod shaders;

pub use pipelines::*;
pub use runtime::*;
pub use shaders::*;
