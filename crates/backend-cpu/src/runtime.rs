//! Execution context that keeps every buffer in host memory.

use anyhow::{bail, ensure, Context, Result};
use graphrt_graph::{
    BufferId, Command, ContextLimits, DeviceBuffer, Dispatch, ExecutionContext, MemoryKind,
    TensorSpec,
};
use graphrt_kernels::{KernelArgs, KernelRegistry};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug)]
struct HostBuffer {
    kind: MemoryKind,
    data: Vec<u8>,
}

/// Interprets recorded commands on the CPU.
///
/// Copies move bytes between buffers; dispatches run the host reference
/// kernels from the registry. Submission is synchronous, so `wait` only
/// checks that something was submitted.
pub struct HostContext {
    limits: ContextLimits,
    registry: KernelRegistry,
    buffers: HashMap<BufferId, HostBuffer>,
    next_id: u64,
    allocated: u64,
    commands: Vec<Command>,
    recording: bool,
    pending: bool,
    submissions: u64,
}

impl HostContext {
    pub fn new(limits: ContextLimits) -> Self {
        Self::with_registry(limits, KernelRegistry::with_default_kernels())
    }

    pub fn with_registry(limits: ContextLimits, registry: KernelRegistry) -> Self {
        info!(
            max_commands = limits.max_commands,
            max_memory_bytes = limits.max_memory_bytes,
            kernels = registry.kernels().len(),
            "created host context"
        );
        Self {
            limits,
            registry,
            buffers: HashMap::new(),
            next_id: 0,
            allocated: 0,
            commands: Vec::new(),
            recording: false,
            pending: false,
            submissions: 0,
        }
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    fn buffer(&self, id: BufferId) -> Result<&HostBuffer> {
        self.buffers
            .get(&id)
            .with_context(|| format!("unknown buffer {id}"))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut HostBuffer> {
        self.buffers
            .get_mut(&id)
            .with_context(|| format!("unknown buffer {id}"))
    }

    fn host_visible(&self, buffer: &DeviceBuffer, len: usize) -> Result<&HostBuffer> {
        ensure!(
            buffer.kind().is_host_visible(),
            "buffer {} is device-local and cannot be mapped",
            buffer.id()
        );
        let host = self.buffer(buffer.id())?;
        ensure!(
            len <= host.data.len(),
            "access of {len} bytes overruns buffer {} of {} bytes",
            buffer.id(),
            host.data.len()
        );
        Ok(host)
    }

    fn check_command(&self, command: &Command) -> Result<()> {
        match command {
            Command::Copy { src, dst, size } => {
                let size = *size as usize;
                ensure!(
                    self.buffer(*src)?.data.len() >= size && self.buffer(*dst)?.data.len() >= size,
                    "copy of {size} bytes overruns {src} or {dst}"
                );
            }
            Command::Dispatch(dispatch) => {
                let kernel = self
                    .registry
                    .find(dispatch.kernel)
                    .with_context(|| format!("no kernel registered for {}", dispatch.kernel))?;
                ensure!(
                    kernel.supports(dispatch.dtype),
                    "{} does not support {}",
                    kernel.name(),
                    dispatch.dtype
                );
                let bytes = dispatch_bytes(dispatch);
                for id in dispatch.inputs.iter().chain(std::iter::once(&dispatch.output)) {
                    ensure!(
                        self.buffer(*id)?.data.len() >= bytes,
                        "{} needs {bytes} bytes from {id}",
                        kernel.name()
                    );
                }
            }
        }
        Ok(())
    }

    fn run_copy(&mut self, src: BufferId, dst: BufferId, size: usize) -> Result<()> {
        let data = self.buffer(src)?.data[..size].to_vec();
        self.buffer_mut(dst)?.data[..size].copy_from_slice(&data);
        Ok(())
    }

    fn run_dispatch(&mut self, dispatch: &Dispatch) -> Result<()> {
        let kernel = self
            .registry
            .find(dispatch.kernel)
            .with_context(|| format!("no kernel registered for {}", dispatch.kernel))?;
        let bytes = dispatch_bytes(dispatch);
        // Inputs are copied out first so an input may share the output buffer.
        let inputs = dispatch
            .inputs
            .iter()
            .map(|id| Ok(self.buffer(*id)?.data[..bytes].to_vec()))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<&[u8]> = inputs.iter().map(Vec::as_slice).collect();
        let args = KernelArgs {
            dtype: dispatch.dtype,
            inputs: &views,
            scalar: dispatch.scalar,
        };
        let output = &mut self.buffer_mut(dispatch.output)?.data[..bytes];
        kernel
            .run_host(&args, output)
            .with_context(|| format!("host kernel {} failed", kernel.name()))
    }
}

fn dispatch_bytes(dispatch: &Dispatch) -> usize {
    dispatch.elements as usize * dispatch.dtype.element_size_bytes()
}

impl ExecutionContext for HostContext {
    fn name(&self) -> &str {
        "host"
    }

    fn allocate(&mut self, spec: &TensorSpec, kind: MemoryKind) -> Result<DeviceBuffer> {
        let size = spec.nbytes() as u64;
        if self.allocated + size > self.limits.max_memory_bytes {
            bail!(
                "allocating {size} bytes would exceed the {} byte memory limit ({} in use)",
                self.limits.max_memory_bytes,
                self.allocated
            );
        }
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.allocated += size;
        self.buffers.insert(
            id,
            HostBuffer {
                kind,
                data: vec![0; spec.nbytes()],
            },
        );
        debug!(buffer = %id, size, ?kind, "allocated host buffer");
        Ok(DeviceBuffer::new(id, size, kind))
    }

    fn release(&mut self, buffer: DeviceBuffer) -> Result<()> {
        let host = self
            .buffers
            .remove(&buffer.id())
            .with_context(|| format!("release of unknown buffer {}", buffer.id()))?;
        self.allocated -= host.data.len() as u64;
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()> {
        self.host_visible(buffer, bytes.len())?;
        self.buffer_mut(buffer.id())?.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &DeviceBuffer, bytes: &mut [u8]) -> Result<()> {
        let host = self.host_visible(buffer, bytes.len())?;
        bytes.copy_from_slice(&host.data[..bytes.len()]);
        Ok(())
    }

    fn begin_recording(&mut self) -> Result<()> {
        ensure!(!self.recording, "recording already in progress");
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    fn record(&mut self, command: Command) -> Result<()> {
        ensure!(self.recording, "record called outside begin/end recording");
        ensure!(
            self.commands.len() < self.limits.max_commands,
            "command limit of {} reached",
            self.limits.max_commands
        );
        self.check_command(&command)?;
        self.commands.push(command);
        Ok(())
    }

    fn end_recording(&mut self) -> Result<()> {
        ensure!(self.recording, "no recording in progress");
        self.recording = false;
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        ensure!(!self.recording, "cannot submit while recording");
        let commands = std::mem::take(&mut self.commands);
        let replayed = commands.iter().try_for_each(|command| match command {
            Command::Copy { src, dst, size } => self.run_copy(*src, *dst, *size as usize),
            Command::Dispatch(dispatch) => self.run_dispatch(dispatch),
        });
        self.commands = commands;
        replayed?;
        self.pending = true;
        self.submissions += 1;
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        ensure!(self.pending, "wait called with no submitted work");
        self.pending = false;
        Ok(())
    }

    fn recorded_commands(&self) -> usize {
        self.commands.len()
    }

    fn allocated_bytes(&self) -> u64 {
        self.allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use graphrt_graph::{
        BinaryNode, ComputeGraph, CopyNode, GraphConfig, GraphError, ScalarNode, UnaryNode,
    };
    use graphrt_kernels::{BinaryOp, DataType, KernelKind, ScalarValue, UnaryOp};

    fn host_graph(limits: ContextLimits) -> ComputeGraph {
        ComputeGraph::new(
            GraphConfig::default().with_limits(limits),
            Box::new(HostContext::new(limits)),
        )
    }

    #[test]
    fn doubling_graph_doubles_input() {
        let mut graph = host_graph(ContextLimits::default());
        let input = graph.add_input_tensor(&[4], DataType::F32).unwrap();
        let output = graph.add_output_tensor(&[4], DataType::F32).unwrap();
        graph.add_node(BinaryNode::add(input, input, output)).unwrap();
        graph.encode().unwrap();

        graph
            .copy_into_input_typed(input, &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        graph.execute().unwrap();
        let result = graph.copy_from_output_typed::<f32>(output).unwrap();
        for (got, want) in result.iter().zip([2.0f32, 4.0, 6.0, 8.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn chained_integer_ops() {
        let mut graph = host_graph(ContextLimits::default());
        let input = graph.add_input_tensor(&[3], DataType::I32).unwrap();
        let scaled = graph.add_tensor(&[3], DataType::I32).unwrap();
        let output = graph.add_output_tensor(&[3], DataType::I32).unwrap();
        let three = graph.add_scalar(ScalarValue::Int(3)).unwrap();
        graph
            .add_node(ScalarNode::new(BinaryOp::Mul, input, three, scaled))
            .unwrap();
        graph
            .add_node(UnaryNode::new(UnaryOp::Relu, scaled, output))
            .unwrap();
        graph.encode().unwrap();

        graph.copy_into_input_typed(input, &[-2i32, 0, 5]).unwrap();
        graph.execute().unwrap();
        assert_eq!(graph.copy_from_output_typed::<i32>(output).unwrap(), vec![0, 0, 15]);
    }

    #[test]
    fn memory_limit_rejects_allocation() {
        let limits = ContextLimits {
            max_memory_bytes: 24,
            ..ContextLimits::default()
        };
        let mut graph = host_graph(limits);
        // 16 device bytes plus 16 staging bytes exceeds 24.
        let err = graph.add_input_tensor(&[4], DataType::F32).unwrap_err();
        assert!(matches!(err, GraphError::Allocation { bytes: 16, .. }));
        assert_eq!(graph.value_count(), 0);
        graph.add_tensor(&[4], DataType::F32).unwrap();
    }

    #[test]
    fn command_limit_fails_encode() {
        let limits = ContextLimits {
            max_commands: 2,
            ..ContextLimits::default()
        };
        let mut graph = host_graph(limits);
        let a = graph.add_input_tensor(&[1], DataType::F32).unwrap();
        let b = graph.add_tensor(&[1], DataType::F32).unwrap();
        let c = graph.add_output_tensor(&[1], DataType::F32).unwrap();
        graph.add_node(CopyNode::new(a, b)).unwrap();
        graph.add_node(CopyNode::new(b, c)).unwrap();
        assert!(matches!(graph.encode(), Err(GraphError::Device(_))));
    }

    #[test]
    fn wait_without_submit_fails() {
        let mut context = HostContext::new(ContextLimits::default());
        assert!(context.wait().is_err());
        context.begin_recording().unwrap();
        context.end_recording().unwrap();
        context.submit().unwrap();
        context.wait().unwrap();
        assert!(context.wait().is_err());
        assert_eq!(context.submissions(), 1);
    }

    #[test]
    fn device_buffers_are_not_host_visible() {
        let mut context = HostContext::new(ContextLimits::default());
        let spec = TensorSpec::new(&[2], DataType::U32);
        let device = context.allocate(&spec, MemoryKind::Device).unwrap();
        assert!(context.write_buffer(&device, &[0u8; 8]).is_err());
        let upload = context.allocate(&spec, MemoryKind::Upload).unwrap();
        context.write_buffer(&upload, &[1u8; 8]).unwrap();
        assert_eq!(context.allocated_bytes(), 16);
        context.release(device).unwrap();
        context.release(upload).unwrap();
        assert_eq!(context.allocated_bytes(), 0);
    }

    #[test]
    fn record_rejects_unsupported_dtype() {
        let mut context = HostContext::new(ContextLimits::default());
        let spec = TensorSpec::new(&[4], DataType::U8);
        let a = context.allocate(&spec, MemoryKind::Device).unwrap();
        let b = context.allocate(&spec, MemoryKind::Device).unwrap();
        context.begin_recording().unwrap();
        let command = Command::Dispatch(Dispatch {
            kernel: KernelKind::Unary(UnaryOp::Neg),
            dtype: DataType::U8,
            inputs: vec![a.id()],
            output: b.id(),
            elements: 4,
            scalar: None,
        });
        assert!(context.record(command).is_err());
        assert!(context.record(Command::Copy {
            src: a.id(),
            dst: b.id(),
            size: 4
        })
        .is_ok());
    }
}
