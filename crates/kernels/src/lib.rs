//! Element types and host reference kernels for graphrt.

pub mod config;
pub mod elementwise;
pub mod registry;
pub mod utils;

pub use config::*;
pub use elementwise::*;
pub use registry::*;
pub use utils::*;
