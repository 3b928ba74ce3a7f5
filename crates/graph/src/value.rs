//! Values and the store that owns them.

use crate::context::{DeviceBuffer, ExecutionContext, MemoryKind};
use crate::error::{GraphError, Result};
use crate::types::{TensorSpec, ValueRef};
use anyhow::anyhow;
use graphrt_kernels::ScalarValue;
use serde::Serialize;
use tracing::{debug, warn};

/// Where a tensor value sits in the graph's data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueRole {
    Intermediate,
    Input,
    Output,
}

#[derive(Debug)]
pub struct DeviceTensor {
    spec: TensorSpec,
    buffer: DeviceBuffer,
}

impl DeviceTensor {
    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }
}

/// Device tensor paired with the host-visible buffer used to move data in or
/// out of it.
#[derive(Debug)]
pub struct TensorStaging {
    tensor: DeviceTensor,
    staging: DeviceBuffer,
}

impl TensorStaging {
    pub fn tensor(&self) -> &DeviceTensor {
        &self.tensor
    }

    pub fn staging(&self) -> &DeviceBuffer {
        &self.staging
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.tensor.spec
    }
}

#[derive(Debug)]
pub enum Value {
    Tensor(DeviceTensor),
    Staging(TensorStaging),
    Scalar(ScalarValue),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Staging(_) => "staging",
            Value::Scalar(_) => "scalar",
        }
    }

    /// The device tensor behind a plain or staged tensor value.
    pub fn as_tensor(&self) -> Result<&DeviceTensor> {
        match self {
            Value::Tensor(tensor) => Ok(tensor),
            Value::Staging(staging) => Ok(&staging.tensor),
            Value::Scalar(_) => Err(self.mismatch("tensor")),
        }
    }

    pub fn as_staging(&self) -> Result<&TensorStaging> {
        match self {
            Value::Staging(staging) => Ok(staging),
            _ => Err(self.mismatch("staging")),
        }
    }

    pub fn as_scalar(&self) -> Result<ScalarValue> {
        match self {
            Value::Scalar(value) => Ok(*value),
            _ => Err(self.mismatch("scalar")),
        }
    }

    pub fn as_scalar_mut(&mut self) -> Result<&mut ScalarValue> {
        match self {
            Value::Scalar(value) => Ok(value),
            _ => Err(self.mismatch("scalar")),
        }
    }

    pub fn spec(&self) -> Option<&TensorSpec> {
        self.as_tensor().ok().map(DeviceTensor::spec)
    }

    fn mismatch(&self, expected: &'static str) -> GraphError {
        GraphError::TypeMismatch {
            expected,
            found: self.kind_name(),
        }
    }
}

/// Arena of graph values, addressed by [`ValueRef`].
#[derive(Debug, Default)]
pub struct ValueStore {
    values: Vec<Value>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Allocates device memory for `spec` and appends the value. Input and
    /// output roles also get a staging buffer. On failure nothing is appended
    /// and any partially acquired memory is returned to the context.
    pub fn add_tensor_value(
        &mut self,
        context: &mut dyn ExecutionContext,
        spec: TensorSpec,
        role: ValueRole,
    ) -> Result<ValueRef> {
        let Some(bytes) = spec.checked_nbytes() else {
            return Err(GraphError::Allocation {
                bytes: u64::MAX,
                source: anyhow!("{spec} does not fit in addressable memory"),
            });
        };
        let bytes = bytes as u64;
        let buffer = context
            .allocate(&spec, MemoryKind::Device)
            .map_err(|source| GraphError::Allocation { bytes, source })?;
        let tensor = DeviceTensor { spec, buffer };

        let staging_kind = match role {
            ValueRole::Intermediate => None,
            ValueRole::Input => Some(MemoryKind::Upload),
            ValueRole::Output => Some(MemoryKind::Download),
        };

        let value = match staging_kind {
            None => Value::Tensor(tensor),
            Some(kind) => match context.allocate(&tensor.spec, kind) {
                Ok(staging) => Value::Staging(TensorStaging { tensor, staging }),
                Err(source) => {
                    if let Err(err) = context.release(tensor.buffer) {
                        warn!(error = %err, "failed to release device buffer after staging allocation failed");
                    }
                    return Err(GraphError::Allocation { bytes, source });
                }
            },
        };

        let handle = self.push(value);
        debug!(%handle, kind = self.values[handle.index()].kind_name(), bytes, "added tensor value");
        Ok(handle)
    }

    pub fn add_scalar_value(&mut self, value: ScalarValue) -> ValueRef {
        self.push(Value::Scalar(value))
    }

    fn push(&mut self, value: Value) -> ValueRef {
        let handle = ValueRef::new(self.values.len() as u32);
        self.values.push(value);
        handle
    }

    pub fn get(&self, handle: ValueRef) -> Result<&Value> {
        let len = self.values.len();
        self.values
            .get(handle.index())
            .ok_or_else(|| out_of_range(handle, len))
    }

    pub fn get_mut(&mut self, handle: ValueRef) -> Result<&mut Value> {
        let len = self.values.len();
        self.values
            .get_mut(handle.index())
            .ok_or_else(|| out_of_range(handle, len))
    }

    pub fn tensor(&self, handle: ValueRef) -> Result<&DeviceTensor> {
        self.get(handle)?.as_tensor()
    }

    pub fn staging(&self, handle: ValueRef) -> Result<&TensorStaging> {
        self.get(handle)?.as_staging()
    }

    pub fn scalar(&self, handle: ValueRef) -> Result<ScalarValue> {
        self.get(handle)?.as_scalar()
    }

    pub fn contains(&self, handle: ValueRef) -> bool {
        handle.index() < self.values.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueRef, &Value)> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| (ValueRef::new(index as u32), value))
    }

    /// Returns every buffer to `context`. Failures are logged and counted;
    /// the store is empty afterwards either way.
    pub fn release_all(&mut self, context: &mut dyn ExecutionContext) -> usize {
        let mut failures = 0;
        for value in self.values.drain(..) {
            let buffers = match value {
                Value::Tensor(tensor) => vec![tensor.buffer],
                Value::Staging(staging) => vec![staging.tensor.buffer, staging.staging],
                Value::Scalar(_) => Vec::new(),
            };
            for buffer in buffers {
                let id = buffer.id();
                if let Err(err) = context.release(buffer) {
                    warn!(buffer = %id, error = %err, "failed to release buffer");
                    failures += 1;
                }
            }
        }
        failures
    }
}

fn out_of_range(handle: ValueRef, len: usize) -> GraphError {
    GraphError::invalid_handle(handle, format!("out of range for a store of {len} values"))
}
