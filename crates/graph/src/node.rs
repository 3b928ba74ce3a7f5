//! Operation nodes and the encode-time view of the graph.

use crate::context::{Command, ExecutionContext};
use crate::error::{GraphError, Result};
use crate::types::ValueRef;
use crate::value::{DeviceTensor, Value, ValueStore};
use graphrt_kernels::ScalarValue;
use tracing::error;

/// One computation in a graph.
///
/// A node references its operands by handle and lowers itself into context
/// commands in [`OpNode::encode`]. Nodes hold no execution state; the graph
/// calls `encode` exactly once, in insertion order.
pub trait OpNode: Send {
    fn name(&self) -> &str;

    fn inputs(&self) -> &[ValueRef];

    fn outputs(&self) -> &[ValueRef];

    /// Checks operand types and shapes when the node is added. Every handle
    /// is already known to exist.
    fn validate(&self, _values: &ValueStore) -> Result<()> {
        Ok(())
    }

    /// Records the node's commands. Nodes that never override this cannot be
    /// encoded.
    fn encode(&self, _encoder: &mut Encoder<'_>) -> Result<()> {
        error!(node = self.name(), "reached a node without an encode routine");
        Err(GraphError::UnimplementedEncode {
            node: self.name().to_string(),
        })
    }
}

/// Ordered input and output handles shared by the concrete nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIo {
    pub inputs: Vec<ValueRef>,
    pub outputs: Vec<ValueRef>,
}

impl NodeIo {
    pub fn new(inputs: Vec<ValueRef>, outputs: Vec<ValueRef>) -> Self {
        Self { inputs, outputs }
    }
}

/// Node that reserves handles but has no encode routine.
#[derive(Debug, Clone)]
pub struct PlaceholderNode {
    name: String,
    io: NodeIo,
}

impl PlaceholderNode {
    pub fn new(name: impl Into<String>, inputs: Vec<ValueRef>, outputs: Vec<ValueRef>) -> Self {
        Self {
            name: name.into(),
            io: NodeIo::new(inputs, outputs),
        }
    }
}

impl OpNode for PlaceholderNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[ValueRef] {
        &self.io.inputs
    }

    fn outputs(&self) -> &[ValueRef] {
        &self.io.outputs
    }
}

/// Read access to the values plus command recording into the graph context.
pub struct Encoder<'a> {
    values: &'a ValueStore,
    context: &'a mut dyn ExecutionContext,
    recorded: usize,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(values: &'a ValueStore, context: &'a mut dyn ExecutionContext) -> Self {
        Self {
            values,
            context,
            recorded: 0,
        }
    }

    pub fn value(&self, handle: ValueRef) -> Result<&'a Value> {
        self.values.get(handle)
    }

    pub fn tensor(&self, handle: ValueRef) -> Result<&'a DeviceTensor> {
        self.values.tensor(handle)
    }

    pub fn scalar(&self, handle: ValueRef) -> Result<ScalarValue> {
        self.values.scalar(handle)
    }

    pub fn record(&mut self, command: Command) -> Result<()> {
        self.context.record(command)?;
        self.recorded += 1;
        Ok(())
    }

    /// Commands recorded through this encoder so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        self.context.begin_recording()?;
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<usize> {
        self.context.end_recording()?;
        Ok(self.recorded)
    }
}
