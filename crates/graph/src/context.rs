//! The execution-context seam.
//!
//! A context owns device memory, records commands and submits them. The graph
//! talks to it only through [`ExecutionContext`], so host and GPU backends are
//! interchangeable.

use crate::types::TensorSpec;
use anyhow::Result;
use graphrt_kernels::{DataType, KernelKind, ScalarValue};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Device-local storage used by kernels.
    Device,
    /// Host writes, device reads.
    Upload,
    /// Device writes, host reads.
    Download,
}

impl MemoryKind {
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryKind::Device)
    }
}

/// Owning handle to context memory. Deliberately not `Clone`: whoever holds
/// it is the only party that may release it.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    id: BufferId,
    size: u64,
    kind: MemoryKind,
}

impl DeviceBuffer {
    pub fn new(id: BufferId, size: u64, kind: MemoryKind) -> Self {
        Self { id, size, kind }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub kernel: KernelKind,
    pub dtype: DataType,
    pub inputs: Vec<BufferId>,
    pub output: BufferId,
    pub elements: u32,
    pub scalar: Option<ScalarValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Copy {
        src: BufferId,
        dst: BufferId,
        size: u64,
    },
    Dispatch(Dispatch),
}

impl Command {
    pub fn label(&self) -> String {
        match self {
            Command::Copy { .. } => "copy".to_string(),
            Command::Dispatch(dispatch) => dispatch.kernel.name(),
        }
    }
}

pub trait ExecutionContext: Send {
    fn name(&self) -> &str;

    /// Acquires a buffer large enough for `spec`.
    fn allocate(&mut self, spec: &TensorSpec, kind: MemoryKind) -> Result<DeviceBuffer>;

    fn release(&mut self, buffer: DeviceBuffer) -> Result<()>;

    /// Fills a host-visible buffer from `bytes`.
    fn write_buffer(&mut self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()>;

    /// Copies the first `bytes.len()` bytes of a host-visible buffer out.
    fn read_buffer(&mut self, buffer: &DeviceBuffer, bytes: &mut [u8]) -> Result<()>;

    fn begin_recording(&mut self) -> Result<()>;

    fn record(&mut self, command: Command) -> Result<()>;

    fn end_recording(&mut self) -> Result<()>;

    /// Hands the recorded commands to the device.
    fn submit(&mut self) -> Result<()>;

    /// Blocks until the last submission completes.
    fn wait(&mut self) -> Result<()>;

    fn recorded_commands(&self) -> usize;

    fn allocated_bytes(&self) -> u64;
}
