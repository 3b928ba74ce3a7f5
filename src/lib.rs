//! graphrt: build a graph of device operations, encode it once, execute it
//! many times.
//!
//! The crates behind this facade are re-exported whole under short names;
//! the items most programs need are also lifted to the root.

pub use graphrt_backend_cpu as backend_cpu;
pub use graphrt_graph as graph;
pub use graphrt_kernels as kernels;
pub use graphrt_runtime as runtime;

pub use graphrt_backend_cpu::HostContext;
pub use graphrt_graph::{
    BinaryNode, ComputeGraph, ContextLimits, CopyNode, DeviceKind, ExecutionContext, GraphConfig,
    GraphError, GraphState, GraphSummary, OpNode, Result, ScalarNode, TensorSpec, UnaryNode,
    ValueRef,
};
pub use graphrt_kernels::{BinaryOp, DataType, Element, ScalarValue, UnaryOp};
pub use graphrt_runtime::{create_context, create_graph};
