//! Compute pipeline cache keyed by kernel and dtype.

use crate::shaders::elementwise_shader_source;
use anyhow::Result;
use graphrt_kernels::{DataType, KernelKind};
use std::collections::HashMap;
use std::num::NonZeroU64;
use tracing::debug;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DispatchParams {
    pub elements: u32,
    pub row_stride: u32,
    /// Scalar operand, bit-cast to the kernel's element type.
    pub scalar: u32,
    pub _pad: u32,
}

#[derive(Default)]
pub struct PipelineCache {
    layouts: HashMap<usize, wgpu::BindGroupLayout>,
    pipelines: HashMap<(KernelKind, DataType), wgpu::ComputePipeline>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn layout(&self, arity: usize) -> Option<&wgpu::BindGroupLayout> {
        self.layouts.get(&arity)
    }

    pub fn pipeline(&self, kind: KernelKind, dtype: DataType) -> Option<&wgpu::ComputePipeline> {
        self.pipelines.get(&(kind, dtype))
    }

    /// Builds the pipeline for `(kind, dtype)` unless it is already cached.
    pub fn ensure(&mut self, device: &wgpu::Device, kind: KernelKind, dtype: DataType) -> Result<()> {
        if self.pipelines.contains_key(&(kind, dtype)) {
            return Ok(());
        }
        let source = elementwise_shader_source(kind, dtype)?;
        let arity = kind.arity();
        let layout: &wgpu::BindGroupLayout = self
            .layouts
            .entry(arity)
            .or_insert_with(|| bind_group_layout(device, arity));

        let label = format!("{}_{}", kind.name(), dtype);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&label),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&label),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: "main",
        });
        debug!(pipeline = %label, "compiled compute pipeline");
        self.pipelines.insert((kind, dtype), pipeline);
        Ok(())
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// `arity` read-only inputs, one read-write output, then the uniform.
fn bind_group_layout(device: &wgpu::Device, arity: usize) -> wgpu::BindGroupLayout {
    let mut entries: Vec<_> = (0..arity as u32)
        .map(|binding| storage_entry(binding, true))
        .collect();
    entries.push(storage_entry(arity as u32, false));
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: arity as u32 + 1,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(std::mem::size_of::<DispatchParams>() as u64),
        },
        count: None,
    });
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("elementwise_layout_{arity}")),
        entries: &entries,
    })
}
