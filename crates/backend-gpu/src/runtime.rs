//! GPU execution context on wgpu.
//!
//! wgpu maps to Vulkan, Metal or DX12 depending on the platform. Commands are
//! lowered to wgpu objects when they are recorded, so each execute only
//! replays them into a fresh command encoder.

use crate::pipelines::{DispatchParams, PipelineCache};
use crate::shaders::{dispatch_grid, WORKGROUP_SIZE};
use anyhow::{anyhow, bail, ensure, Context, Result};
use bytemuck::cast_slice;
use graphrt_graph::{
    BufferId, Command, ContextLimits, DeviceBuffer, Dispatch, ExecutionContext, MemoryKind,
    TensorSpec,
};
use graphrt_kernels::{align_up, DataType, KernelKind, Lane, ScalarValue};
use pollster::block_on;
use std::collections::HashMap;
use std::sync::mpsc;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// Copy offsets and sizes must be multiples of this.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Information about the GPU device.
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    pub name: String,
    pub backend: String,
    pub device_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct GpuContextOptions {
    /// Substring the adapter name must contain.
    pub adapter: Option<String>,
    pub limits: ContextLimits,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    kind: MemoryKind,
    size: u64,
}

enum LoweredCommand {
    Copy {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
    Dispatch {
        key: (KernelKind, DataType),
        bind_group: wgpu::BindGroup,
        _params: wgpu::Buffer,
        grid: (u32, u32),
    },
}

pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    device_info: GpuDeviceInfo,
    limits: ContextLimits,
    buffers: HashMap<BufferId, GpuBuffer>,
    next_id: u64,
    allocated: u64,
    pipelines: PipelineCache,
    commands: Vec<LoweredCommand>,
    recording: bool,
    pending: bool,
}

impl WgpuContext {
    pub fn new(options: GpuContextOptions) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = match &options.adapter {
            Some(filter) => instance
                .enumerate_adapters(wgpu::Backends::all())
                .into_iter()
                .find(|adapter| adapter.get_info().name.contains(filter.as_str()))
                .ok_or_else(|| anyhow!("no GPU adapter matches `{filter}`"))?,
            None => block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            }))
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?,
        };

        let adapter_info = adapter.get_info();
        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("graphrt device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .context("failed to open GPU device")?;

        let device_info = GpuDeviceInfo {
            name: adapter_info.name.clone(),
            backend: format!("{:?}", adapter_info.backend),
            device_type: format!("{:?}", adapter_info.device_type),
        };
        info!(
            adapter = %device_info.name,
            backend = %device_info.backend,
            "created wgpu context"
        );

        Ok(Self {
            device,
            queue,
            device_info,
            limits: options.limits,
            buffers: HashMap::new(),
            next_id: 0,
            allocated: 0,
            pipelines: PipelineCache::new(),
            commands: Vec::new(),
            recording: false,
            pending: false,
        })
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.device_info
    }

    pub fn cached_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    fn buffer(&self, id: BufferId) -> Result<&GpuBuffer> {
        self.buffers
            .get(&id)
            .with_context(|| format!("unknown buffer {id}"))
    }

    /// Runs `f` inside a validation error scope and surfaces what it caught.
    fn validated<T>(&self, filter: wgpu::ErrorFilter, f: impl FnOnce(&Self) -> T) -> Result<T> {
        self.device.push_error_scope(filter);
        let value = f(self);
        if let Some(err) = block_on(self.device.pop_error_scope()) {
            bail!("wgpu error: {err}");
        }
        Ok(value)
    }

    fn lower_copy(&self, src: BufferId, dst: BufferId, size: u64) -> Result<LoweredCommand> {
        let size = align_up(size, COPY_ALIGNMENT);
        let (src_buf, dst_buf) = (self.buffer(src)?, self.buffer(dst)?);
        ensure!(
            size <= src_buf.size && size <= dst_buf.size,
            "copy of {size} bytes overruns {src} or {dst}"
        );
        Ok(LoweredCommand::Copy { src, dst, size })
    }

    fn lower_dispatch(&mut self, dispatch: Dispatch) -> Result<LoweredCommand> {
        let key = (dispatch.kernel, dispatch.dtype);
        ensure!(
            dispatch.inputs.len() == dispatch.kernel.arity(),
            "{} expects {} inputs",
            dispatch.kernel,
            dispatch.kernel.arity()
        );
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let ensured = self.pipelines.ensure(&self.device, dispatch.kernel, dispatch.dtype);
        if let Some(err) = block_on(self.device.pop_error_scope()) {
            bail!("failed to build pipeline for {}: {err}", dispatch.kernel);
        }
        ensured?;

        let grid = dispatch_grid(dispatch.elements);
        let params = DispatchParams {
            elements: dispatch.elements,
            row_stride: grid.0 * WORKGROUP_SIZE,
            scalar: scalar_bits(dispatch.dtype, dispatch.scalar)?,
            _pad: 0,
        };

        self.validated(wgpu::ErrorFilter::Validation, |ctx| -> Result<LoweredCommand> {
            let layout = ctx
                .pipelines
                .layout(dispatch.kernel.arity())
                .context("bind group layout missing after pipeline creation")?;
            let params_buffer = ctx
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("dispatch_params"),
                    contents: cast_slice(&[params]),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

            let bind_group = {
                let mut entries = Vec::with_capacity(dispatch.inputs.len() + 2);
                for (binding, id) in dispatch
                    .inputs
                    .iter()
                    .chain(std::iter::once(&dispatch.output))
                    .enumerate()
                {
                    entries.push(wgpu::BindGroupEntry {
                        binding: binding as u32,
                        resource: ctx.buffer(*id)?.buffer.as_entire_binding(),
                    });
                }
                entries.push(wgpu::BindGroupEntry {
                    binding: entries.len() as u32,
                    resource: params_buffer.as_entire_binding(),
                });
                ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&dispatch.kernel.name()),
                    layout,
                    entries: &entries,
                })
            };
            Ok(LoweredCommand::Dispatch {
                key,
                bind_group,
                _params: params_buffer,
                grid,
            })
        })?
    }
}

fn scalar_bits(dtype: DataType, scalar: Option<ScalarValue>) -> Result<u32> {
    let Some(scalar) = scalar else {
        return Ok(0);
    };
    Ok(match dtype {
        DataType::F32 => f32::from_scalar(scalar).to_bits(),
        DataType::I32 => i32::from_scalar(scalar) as u32,
        DataType::U32 => u32::from_scalar(scalar),
        other => bail!("no GPU kernels for {other}"),
    })
}

fn buffer_usage(kind: MemoryKind) -> wgpu::BufferUsages {
    match kind {
        MemoryKind::Device => {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
        }
        MemoryKind::Upload => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        MemoryKind::Download => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
    }
}

impl ExecutionContext for WgpuContext {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn allocate(&mut self, spec: &TensorSpec, kind: MemoryKind) -> Result<DeviceBuffer> {
        // Zero-sized buffers cannot be bound, so every buffer holds at least
        // one aligned word.
        let size = align_up(spec.nbytes() as u64, COPY_ALIGNMENT).max(COPY_ALIGNMENT);
        if self.allocated + size > self.limits.max_memory_bytes {
            bail!(
                "allocating {size} bytes would exceed the {} byte memory limit ({} in use)",
                self.limits.max_memory_bytes,
                self.allocated
            );
        }
        let id = BufferId(self.next_id);
        let buffer = self.validated(wgpu::ErrorFilter::OutOfMemory, |ctx| {
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{kind:?} {spec}")),
                size,
                usage: buffer_usage(kind),
                mapped_at_creation: false,
            })
        })?;
        self.next_id += 1;
        self.allocated += size;
        self.buffers.insert(id, GpuBuffer { buffer, kind, size });
        debug!(buffer = %id, size, ?kind, "allocated gpu buffer");
        Ok(DeviceBuffer::new(id, size, kind))
    }

    fn release(&mut self, buffer: DeviceBuffer) -> Result<()> {
        let gpu = self
            .buffers
            .remove(&buffer.id())
            .with_context(|| format!("release of unknown buffer {}", buffer.id()))?;
        self.allocated -= gpu.size;
        gpu.buffer.destroy();
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()> {
        let gpu = self.buffer(buffer.id())?;
        ensure!(
            gpu.kind == MemoryKind::Upload,
            "buffer {} is not an upload buffer",
            buffer.id()
        );
        let padded = align_up(bytes.len() as u64, COPY_ALIGNMENT) as usize;
        ensure!(
            padded as u64 <= gpu.size,
            "write of {} bytes overruns buffer {}",
            bytes.len(),
            buffer.id()
        );
        if padded == bytes.len() {
            self.queue.write_buffer(&gpu.buffer, 0, bytes);
        } else {
            let mut data = bytes.to_vec();
            data.resize(padded, 0);
            self.queue.write_buffer(&gpu.buffer, 0, &data);
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &DeviceBuffer, bytes: &mut [u8]) -> Result<()> {
        let gpu = self.buffer(buffer.id())?;
        ensure!(
            gpu.kind == MemoryKind::Download,
            "buffer {} is not a download buffer",
            buffer.id()
        );
        let mapped = align_up(bytes.len() as u64, COPY_ALIGNMENT).max(COPY_ALIGNMENT);
        ensure!(
            mapped <= gpu.size,
            "read of {} bytes overruns buffer {}",
            bytes.len(),
            buffer.id()
        );

        let buffer_slice = gpu.buffer.slice(..mapped);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| anyhow!("failed to receive GPU map signal"))??;
        let data = buffer_slice.get_mapped_range();
        bytes.copy_from_slice(&data[..bytes.len()]);
        drop(data);
        gpu.buffer.unmap();
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
        let lowered = match command {
            Command::Copy { src, dst, size } => self.lower_copy(src, dst, size)?,
            Command::Dispatch(dispatch) => self.lower_dispatch(dispatch)?,
        };
        self.commands.push(lowered);
        Ok(())
    }

    fn end_recording(&mut self) -> Result<()> {
        ensure!(self.recording, "no recording in progress");
        self.recording = false;
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        ensure!(!self.recording, "cannot submit while recording");
        let command_buffer = self.validated(wgpu::ErrorFilter::Validation, |ctx| -> Result<_> {
            let mut encoder = ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("graph_encoder"),
                });
            for command in &ctx.commands {
                match command {
                    LoweredCommand::Copy { src, dst, size } => {
                        encoder.copy_buffer_to_buffer(
                            &ctx.buffer(*src)?.buffer,
                            0,
                            &ctx.buffer(*dst)?.buffer,
                            0,
                            *size,
                        );
                    }
                    LoweredCommand::Dispatch {
                        key,
                        bind_group,
                        grid,
                        ..
                    } => {
                        let pipeline = ctx
                            .pipelines
                            .pipeline(key.0, key.1)
                            .with_context(|| format!("pipeline for {} evicted", key.0))?;
                        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: Some("elementwise_pass"),
                            timestamp_writes: None,
                        });
                        pass.set_pipeline(pipeline);
                        pass.set_bind_group(0, bind_group, &[]);
                        pass.dispatch_workgroups(grid.0, grid.1, 1);
                    }
                }
            }
            Ok(encoder.finish())
        })??;
        self.queue.submit(Some(command_buffer));
        self.pending = true;
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        ensure!(self.pending, "wait called with no submitted work");
        self.device.poll(wgpu::Maintain::Wait);
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
    use graphrt_graph::{BinaryNode, ComputeGraph, GraphConfig, ScalarNode, UnaryNode};
    use graphrt_kernels::{BinaryOp, UnaryOp};

    #[test]
    fn scalar_bits_follow_dtype() {
        assert_eq!(
            scalar_bits(DataType::F32, Some(ScalarValue::Int(2))).unwrap(),
            2.0f32.to_bits()
        );
        assert_eq!(
            scalar_bits(DataType::I32, Some(ScalarValue::Int(-1))).unwrap(),
            u32::MAX
        );
        assert_eq!(scalar_bits(DataType::U32, None).unwrap(), 0);
        assert!(scalar_bits(DataType::U8, Some(ScalarValue::Int(1))).is_err());
    }

    #[test]
    fn staging_buffers_are_host_mappable() {
        assert!(buffer_usage(MemoryKind::Download).contains(wgpu::BufferUsages::MAP_READ));
        assert!(!buffer_usage(MemoryKind::Upload).contains(wgpu::BufferUsages::STORAGE));
        assert!(buffer_usage(MemoryKind::Device).contains(wgpu::BufferUsages::STORAGE));
    }

    fn gpu_graph() -> ComputeGraph {
        let context = WgpuContext::new(GpuContextOptions::default()).expect("gpu context");
        ComputeGraph::new(GraphConfig::default(), Box::new(context))
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn doubling_graph_on_gpu() {
        let mut graph = gpu_graph();
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
    #[ignore = "requires a GPU adapter"]
    fn integer_chain_matches_host_semantics() {
        let mut graph = gpu_graph();
        let input = graph.add_input_tensor(&[4], DataType::I32).unwrap();
        let divided = graph.add_tensor(&[4], DataType::I32).unwrap();
        let output = graph.add_output_tensor(&[4], DataType::I32).unwrap();
        let zero = graph.add_scalar(ScalarValue::Int(0)).unwrap();
        graph
            .add_node(ScalarNode::new(BinaryOp::Div, input, zero, divided))
            .unwrap();
        graph
            .add_node(UnaryNode::new(UnaryOp::Abs, divided, output))
            .unwrap();
        graph.encode().unwrap();

        graph.copy_into_input_typed(input, &[-3i32, 7, 0, -1]).unwrap();
        graph.execute().unwrap();
        assert_eq!(
            graph.copy_from_output_typed::<i32>(output).unwrap(),
            vec![3, 7, 0, 1]
        );
    }
}
