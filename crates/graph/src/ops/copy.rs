use super::ensure_same_spec;
use crate::context::Command;
use crate::error::Result;
use crate::node::{Encoder, NodeIo, OpNode};
use crate::types::ValueRef;
use crate::value::ValueStore;

/// Copies one tensor into another of identical spec.
#[derive(Debug, Clone)]
pub struct CopyNode {
    io: NodeIo,
}

impl CopyNode {
    pub fn new(from: ValueRef, to: ValueRef) -> Self {
        Self {
            io: NodeIo::new(vec![from], vec![to]),
        }
    }

    fn from(&self) -> ValueRef {
        self.io.inputs[0]
    }

    fn to(&self) -> ValueRef {
        self.io.outputs[0]
    }
}

impl OpNode for CopyNode {
    fn name(&self) -> &str {
        "copy"
    }

    fn inputs(&self) -> &[ValueRef] {
        &self.io.inputs
    }

    fn outputs(&self) -> &[ValueRef] {
        &self.io.outputs
    }

    fn validate(&self, values: &ValueStore) -> Result<()> {
        let src = values.tensor(self.from())?;
        let dst = values.tensor(self.to())?;
        ensure_same_spec(src.spec(), dst.spec())
    }

    fn encode(&self, encoder: &mut Encoder<'_>) -> Result<()> {
        let src = encoder.tensor(self.from())?;
        let dst = encoder.tensor(self.to())?;
        ensure_same_spec(src.spec(), dst.spec())?;
        encoder.record(Command::Copy {
            src: src.buffer().id(),
            dst: dst.buffer().id(),
            size: src.spec().nbytes() as u64,
        })
    }
}
