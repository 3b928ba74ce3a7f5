//! Context selection, sample graphs, benchmarking and CLI wiring on top of
//! `graphrt-graph`.

pub mod bench;
#[cfg(feature = "cli")]
pub mod cli;
pub mod samples;
pub mod session;

pub use bench::*;
#[cfg(feature = "cli")]
pub use cli::*;
pub use samples::*;
pub use session::*;
