//! Host (CPU) backend for graphrt.

pub mod runtime;

pub use runtime::*;
