//! The compute graph and its build, encode and execute lifecycle.

use crate::config::GraphConfig;
use crate::context::{Command, ExecutionContext};
use crate::error::{GraphError, Result};
use crate::node::{Encoder, OpNode};
use crate::summary::{ExecutionStats, GraphState, GraphSummary, NodeSummary, ValueSummary};
use crate::types::{TensorSpec, ValueRef};
use crate::value::{TensorStaging, Value, ValueRole, ValueStore};
use graphrt_kernels::{read_elements, DataType, Element, ScalarValue};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A graph of device operations, encoded once and executed many times.
///
/// Values are added first, then nodes that reference them. [`encode`] lowers
/// the whole graph into the context's command list; afterwards the graph is
/// frozen. Each [`execute`] replays that list, reading the current contents
/// of the input staging buffers.
///
/// [`encode`]: ComputeGraph::encode
/// [`execute`]: ComputeGraph::execute
pub struct ComputeGraph {
    config: GraphConfig,
    values: ValueStore,
    nodes: Vec<Box<dyn OpNode>>,
    inputs: Vec<ValueRef>,
    outputs: Vec<ValueRef>,
    context: Box<dyn ExecutionContext>,
    state: GraphState,
    recorded_commands: usize,
    stats: ExecutionStats,
}

impl ComputeGraph {
    pub fn new(config: GraphConfig, context: Box<dyn ExecutionContext>) -> Self {
        debug!(label = %config.label, context = context.name(), "created compute graph");
        Self {
            config,
            values: ValueStore::new(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            context,
            state: GraphState::Building,
            recorded_commands: 0,
            stats: ExecutionStats::default(),
        }
    }

    fn ensure_building(&self) -> Result<()> {
        match self.state {
            GraphState::Building => Ok(()),
            GraphState::Poisoned => Err(GraphError::GraphPoisoned),
            GraphState::Encoded | GraphState::Executed => Err(GraphError::GraphFrozen),
        }
    }

    fn ensure_not_poisoned(&self) -> Result<()> {
        if self.state == GraphState::Poisoned {
            return Err(GraphError::GraphPoisoned);
        }
        Ok(())
    }

    fn add_tensor_with_role(
        &mut self,
        shape: &[usize],
        dtype: DataType,
        role: ValueRole,
    ) -> Result<ValueRef> {
        self.ensure_building()?;
        let spec = TensorSpec::new(shape, dtype);
        let handle = self
            .values
            .add_tensor_value(self.context.as_mut(), spec, role)?;
        match role {
            ValueRole::Input => self.inputs.push(handle),
            ValueRole::Output => self.outputs.push(handle),
            ValueRole::Intermediate => {}
        }
        Ok(handle)
    }

    /// Declares a graph input backed by an upload staging buffer.
    pub fn add_input_tensor(&mut self, shape: &[usize], dtype: DataType) -> Result<ValueRef> {
        self.add_tensor_with_role(shape, dtype, ValueRole::Input)
    }

    /// Declares a graph output backed by a download staging buffer.
    pub fn add_output_tensor(&mut self, shape: &[usize], dtype: DataType) -> Result<ValueRef> {
        self.add_tensor_with_role(shape, dtype, ValueRole::Output)
    }

    /// Adds a device-only intermediate tensor.
    pub fn add_tensor(&mut self, shape: &[usize], dtype: DataType) -> Result<ValueRef> {
        self.add_tensor_with_role(shape, dtype, ValueRole::Intermediate)
    }

    pub fn add_scalar(&mut self, value: ScalarValue) -> Result<ValueRef> {
        self.ensure_building()?;
        Ok(self.values.add_scalar_value(value))
    }

    /// Replaces a scalar's value. Nodes read scalars when the graph is
    /// encoded, so this is only allowed while building.
    pub fn set_scalar(&mut self, handle: ValueRef, value: ScalarValue) -> Result<()> {
        self.ensure_building()?;
        *self.values.get_mut(handle)?.as_scalar_mut()? = value;
        Ok(())
    }

    /// Validates and appends a node, returning its position. A rejected node
    /// leaves the graph unchanged.
    pub fn add_node<N: OpNode + 'static>(&mut self, node: N) -> Result<usize> {
        self.add_boxed_node(Box::new(node))
    }

    pub fn add_boxed_node(&mut self, node: Box<dyn OpNode>) -> Result<usize> {
        self.ensure_building()?;
        for &handle in node.inputs().iter().chain(node.outputs()) {
            if !self.values.contains(handle) {
                return Err(GraphError::invalid_handle(
                    handle,
                    format!(
                        "node `{}` references a value that does not exist",
                        node.name()
                    ),
                ));
            }
        }
        for &handle in node.outputs() {
            if self.inputs.contains(&handle) {
                return Err(GraphError::invalid_handle(
                    handle,
                    format!("node `{}` writes to a graph input", node.name()),
                ));
            }
        }
        node.validate(&self.values)?;

        let index = self.nodes.len();
        debug!(index, node = node.name(), "added node");
        self.nodes.push(node);
        Ok(index)
    }

    /// Lowers the graph into the context's command list.
    ///
    /// Records, in order: a staging-to-device copy for every input, every
    /// node's commands in insertion order, and a device-to-staging copy for
    /// every output. A graph can be encoded once; a failure poisons it.
    pub fn encode(&mut self) -> Result<()> {
        match self.state {
            GraphState::Building => {}
            GraphState::Poisoned => return Err(GraphError::GraphPoisoned),
            GraphState::Encoded | GraphState::Executed => return Err(GraphError::AlreadyEncoded),
        }

        match self.record_commands() {
            Ok(recorded) => {
                self.recorded_commands = recorded;
                self.state = GraphState::Encoded;
                info!(
                    label = %self.config.label,
                    nodes = self.nodes.len(),
                    commands = recorded,
                    "encoded compute graph"
                );
                Ok(())
            }
            Err(err) => {
                self.state = GraphState::Poisoned;
                error!(label = %self.config.label, error = %err, "encode failed; graph poisoned");
                Err(err)
            }
        }
    }

    fn record_commands(&mut self) -> Result<usize> {
        let Self {
            values,
            nodes,
            inputs,
            outputs,
            context,
            ..
        } = self;
        let values = &*values;
        let mut encoder = Encoder::new(values, context.as_mut());
        encoder.begin()?;

        for &handle in inputs.iter() {
            let staging = values.staging(handle)?;
            encoder.record(Command::Copy {
                src: staging.staging().id(),
                dst: staging.tensor().buffer().id(),
                size: staging.spec().nbytes() as u64,
            })?;
        }

        for (index, node) in nodes.iter().enumerate() {
            let before = encoder.recorded();
            node.encode(&mut encoder)?;
            debug!(
                index,
                node = node.name(),
                commands = encoder.recorded() - before,
                "encoded node"
            );
        }

        for &handle in outputs.iter() {
            let staging = values.staging(handle)?;
            encoder.record(Command::Copy {
                src: staging.tensor().buffer().id(),
                dst: staging.staging().id(),
                size: staging.spec().nbytes() as u64,
            })?;
        }

        encoder.finish()
    }

    /// Submits the encoded commands and blocks until the device finishes.
    pub fn execute(&mut self) -> Result<()> {
        match self.state {
            GraphState::Encoded | GraphState::Executed => {}
            GraphState::Building => return Err(GraphError::EncodingRequired),
            GraphState::Poisoned => return Err(GraphError::GraphPoisoned),
        }

        let started = Instant::now();
        let submitted = self.context.submit().and_then(|()| self.context.wait());
        if let Err(err) = submitted {
            self.state = GraphState::Poisoned;
            error!(label = %self.config.label, error = %err, "execution failed; graph poisoned");
            return Err(GraphError::Device(err));
        }

        let elapsed = started.elapsed();
        self.stats.record(elapsed);
        self.state = GraphState::Executed;
        debug!(
            label = %self.config.label,
            run = self.stats.runs,
            elapsed_us = elapsed.as_micros() as u64,
            "executed compute graph"
        );
        Ok(())
    }

    /// Fills an input's staging buffer. Takes effect at the next
    /// [`execute`](ComputeGraph::execute).
    pub fn copy_into_input(&mut self, handle: ValueRef, bytes: &[u8]) -> Result<()> {
        self.ensure_not_poisoned()?;
        let staging = declared_staging(&self.values, &self.inputs, handle, ValueRole::Input)?;
        let expected = staging.spec().nbytes();
        if bytes.len() != expected {
            return Err(GraphError::HostSizeMismatch {
                expected,
                found: bytes.len(),
            });
        }
        self.context.write_buffer(staging.staging(), bytes)?;
        Ok(())
    }

    /// Reads an output's staging buffer as left by the last execute.
    pub fn copy_from_output(&mut self, handle: ValueRef, bytes: &mut [u8]) -> Result<()> {
        self.ensure_not_poisoned()?;
        if self.state != GraphState::Executed {
            return Err(GraphError::NotExecutedYet);
        }
        let staging = declared_staging(&self.values, &self.outputs, handle, ValueRole::Output)?;
        let expected = staging.spec().nbytes();
        if bytes.len() != expected {
            return Err(GraphError::HostSizeMismatch {
                expected,
                found: bytes.len(),
            });
        }
        self.context.read_buffer(staging.staging(), bytes)?;
        Ok(())
    }

    pub fn copy_into_input_typed<T: Element>(&mut self, handle: ValueRef, data: &[T]) -> Result<()> {
        self.ensure_not_poisoned()?;
        let dtype = declared_staging(&self.values, &self.inputs, handle, ValueRole::Input)?
            .spec()
            .dtype;
        ensure_dtype::<T>(dtype)?;
        self.copy_into_input(handle, bytemuck::cast_slice(data))
    }

    pub fn copy_from_output_typed<T: Element>(&mut self, handle: ValueRef) -> Result<Vec<T>> {
        self.ensure_not_poisoned()?;
        if self.state != GraphState::Executed {
            return Err(GraphError::NotExecutedYet);
        }
        let spec = declared_staging(&self.values, &self.outputs, handle, ValueRole::Output)?.spec();
        ensure_dtype::<T>(spec.dtype)?;
        let mut bytes = vec![0u8; spec.nbytes()];
        self.copy_from_output(handle, &mut bytes)?;
        Ok(read_elements::<T>(&bytes)?)
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn context_name(&self) -> &str {
        self.context.name()
    }

    pub fn value(&self, handle: ValueRef) -> Result<&Value> {
        self.values.get(handle)
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn inputs(&self) -> &[ValueRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueRef] {
        &self.outputs
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn recorded_commands(&self) -> usize {
        self.recorded_commands
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn summary(&self) -> GraphSummary {
        let values = self
            .values
            .iter()
            .map(|(handle, value)| {
                let role = match value {
                    Value::Scalar(_) => None,
                    Value::Tensor(_) => Some(ValueRole::Intermediate),
                    Value::Staging(_) if self.inputs.contains(&handle) => Some(ValueRole::Input),
                    Value::Staging(_) => Some(ValueRole::Output),
                };
                ValueSummary {
                    handle,
                    kind: value.kind_name(),
                    role,
                    spec: value.spec().cloned(),
                    scalar: value.as_scalar().ok(),
                }
            })
            .collect();
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| NodeSummary {
                index,
                name: node.name().to_string(),
                inputs: node.inputs().to_vec(),
                outputs: node.outputs().to_vec(),
            })
            .collect();

        GraphSummary {
            label: self.config.label.clone(),
            context: self.context.name().to_string(),
            state: self.state,
            values,
            nodes,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            recorded_commands: self.recorded_commands,
            allocated_bytes: self.context.allocated_bytes(),
            stats: self.stats.clone(),
        }
    }
}

/// Looks up the staging half of a declared input or output.
fn declared_staging<'v>(
    values: &'v ValueStore,
    declared: &[ValueRef],
    handle: ValueRef,
    role: ValueRole,
) -> Result<&'v TensorStaging> {
    // Out-of-range handles get the store's own error.
    values.get(handle)?;
    if !declared.contains(&handle) {
        let reason = match role {
            ValueRole::Input => "not a declared graph input",
            ValueRole::Output => "not a declared graph output",
            ValueRole::Intermediate => "not a staged value",
        };
        return Err(GraphError::invalid_handle(handle, reason));
    }
    values.staging(handle)
}

fn ensure_dtype<T: Element>(dtype: DataType) -> Result<()> {
    if T::DTYPE != dtype {
        return Err(GraphError::DTypeMismatch {
            expected: dtype,
            found: T::DTYPE,
        });
    }
    Ok(())
}

impl Drop for ComputeGraph {
    fn drop(&mut self) {
        let failures = self.values.release_all(self.context.as_mut());
        if failures > 0 {
            warn!(label = %self.config.label, failures, "some buffers were not released");
        }
    }
}
