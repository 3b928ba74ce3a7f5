//! Elementwise compute nodes lowered to kernel dispatches.

use super::ensure_same_spec;
use crate::context::{Command, Dispatch};
use crate::error::{GraphError, Result};
use crate::node::{Encoder, NodeIo, OpNode};
use crate::types::{TensorSpec, ValueRef};
use crate::value::{DeviceTensor, ValueStore};
use graphrt_kernels::{BinaryOp, KernelKind, ScalarValue, UnaryOp};

fn ensure_compute(node: &str, spec: &TensorSpec) -> Result<u32> {
    if !spec.dtype.is_compute() {
        return Err(GraphError::invalid_node(
            node,
            format!("kernels do not support {}", spec.dtype),
        ));
    }
    u32::try_from(spec.numel())
        .map_err(|_| GraphError::invalid_node(node, format!("{spec} exceeds the dispatch range")))
}

fn ensure_distinct(node: &str, io: &NodeIo) -> Result<()> {
    let out = io.outputs[0];
    if io.inputs.contains(&out) {
        return Err(GraphError::invalid_node(
            node,
            format!("output {out} aliases an input"),
        ));
    }
    Ok(())
}

fn dispatch(
    kernel: KernelKind,
    inputs: &[&DeviceTensor],
    output: &DeviceTensor,
    elements: u32,
    scalar: Option<ScalarValue>,
) -> Command {
    Command::Dispatch(Dispatch {
        kernel,
        dtype: output.spec().dtype,
        inputs: inputs.iter().map(|tensor| tensor.buffer().id()).collect(),
        output: output.buffer().id(),
        elements,
        scalar,
    })
}

/// `out = lhs op rhs`, elementwise over tensors of identical spec.
#[derive(Debug, Clone)]
pub struct BinaryNode {
    op: BinaryOp,
    io: NodeIo,
}

impl BinaryNode {
    pub fn new(op: BinaryOp, lhs: ValueRef, rhs: ValueRef, out: ValueRef) -> Self {
        Self {
            op,
            io: NodeIo::new(vec![lhs, rhs], vec![out]),
        }
    }

    pub fn add(lhs: ValueRef, rhs: ValueRef, out: ValueRef) -> Self {
        Self::new(BinaryOp::Add, lhs, rhs, out)
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }

    fn check<'v>(
        &self,
        lookup: impl Fn(ValueRef) -> Result<&'v DeviceTensor>,
    ) -> Result<(&'v DeviceTensor, &'v DeviceTensor, &'v DeviceTensor, u32)> {
        ensure_distinct(self.name(), &self.io)?;
        let lhs = lookup(self.io.inputs[0])?;
        let rhs = lookup(self.io.inputs[1])?;
        let out = lookup(self.io.outputs[0])?;
        ensure_same_spec(lhs.spec(), rhs.spec())?;
        ensure_same_spec(lhs.spec(), out.spec())?;
        let elements = ensure_compute(self.name(), out.spec())?;
        Ok((lhs, rhs, out, elements))
    }
}

impl OpNode for BinaryNode {
    fn name(&self) -> &str {
        self.op.as_str()
    }

    fn inputs(&self) -> &[ValueRef] {
        &self.io.inputs
    }

    fn outputs(&self) -> &[ValueRef] {
        &self.io.outputs
    }

    fn validate(&self, values: &ValueStore) -> Result<()> {
        self.check(|handle| values.tensor(handle)).map(|_| ())
    }

    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<()> {
        let (lhs, rhs, out, elements) = self.check(|handle| encoder.tensor(handle))?;
        let command = dispatch(KernelKind::Binary(self.op), &[lhs, rhs], out, elements, None);
        encoder.record(command)
    }
}

/// `out = input op scalar`, with the scalar read from a scalar value when
/// the graph is encoded.
#[derive(Debug, Clone)]
pub struct ScalarNode {
    op: BinaryOp,
    name: String,
    io: NodeIo,
}

impl ScalarNode {
    pub fn new(op: BinaryOp, input: ValueRef, scalar: ValueRef, out: ValueRef) -> Self {
        Self {
            op,
            name: KernelKind::Scalar(op).name(),
            io: NodeIo::new(vec![input, scalar], vec![out]),
        }
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }
}

impl OpNode for ScalarNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[ValueRef] {
        &self.io.inputs
    }

    fn outputs(&self) -> &[ValueRef] {
        &self.io.outputs
    }

    fn validate(&self, values: &ValueStore) -> Result<()> {
        ensure_distinct(self.name(), &self.io)?;
        let input = values.tensor(self.io.inputs[0])?;
        values.scalar(self.io.inputs[1])?;
        let out = values.tensor(self.io.outputs[0])?;
        ensure_same_spec(input.spec(), out.spec())?;
        ensure_compute(self.name(), out.spec()).map(|_| ())
    }

    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<()> {
        ensure_distinct(self.name(), &self.io)?;
        let input = encoder.tensor(self.io.inputs[0])?;
        let scalar = encoder.scalar(self.io.inputs[1])?;
        let out = encoder.tensor(self.io.outputs[0])?;
        ensure_same_spec(input.spec(), out.spec())?;
        let elements = ensure_compute(self.name(), out.spec())?;
        let command = dispatch(
            KernelKind::Scalar(self.op),
            &[input],
            out,
            elements,
            Some(scalar),
        );
        encoder.record(command)
    }
}

/// `out = op(input)`, elementwise.
#[derive(Debug, Clone)]
pub struct UnaryNode {
    op: UnaryOp,
    io: NodeIo,
}

impl UnaryNode {
    pub fn new(op: UnaryOp, input: ValueRef, out: ValueRef) -> Self {
        Self {
            op,
            io: NodeIo::new(vec![input], vec![out]),
        }
    }

    pub fn op(&self) -> UnaryOp {
        self.op
    }
}

impl OpNode for UnaryNode {
    fn name(&self) -> &str {
        self.op.as_str()
    }

    fn inputs(&self) -> &[ValueRef] {
        &self.io.inputs
    }

    fn outputs(&self) -> &[ValueRef] {
        &self.io.outputs
    }

    fn validate(&self, values: &ValueStore) -> Result<()> {
        ensure_distinct(self.name(), &self.io)?;
        let input = values.tensor(self.io.inputs[0])?;
        let out = values.tensor(self.io.outputs[0])?;
        ensure_same_spec(input.spec(), out.spec())?;
        ensure_compute(self.name(), out.spec()).map(|_| ())
    }

    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<()> {
        ensure_distinct(self.name(), &self.io)?;
        let input = encoder.tensor(self.io.inputs[0])?;
        let out = encoder.tensor(self.io.outputs[0])?;
        ensure_same_spec(input.spec(), out.spec())?;
        let elements = ensure_compute(self.name(), out.spec())?;
        let command = dispatch(KernelKind::Unary(self.op), &[input], out, elements, None);
        encoder.record(command)
    }
}
