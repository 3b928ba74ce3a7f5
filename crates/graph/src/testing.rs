//! In-crate test double for [`ExecutionContext`].

use crate::context::{BufferId, Command, DeviceBuffer, ExecutionContext, MemoryKind};
use crate::types::TensorSpec;
use anyhow::{bail, Context as _, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct RecordingState {
    pub buffers: HashMap<BufferId, Vec<u8>>,
    pub commands: Vec<Command>,
    pub recording: bool,
    pub submits: usize,
    pub waits: usize,
    pub fail_kind: Option<MemoryKind>,
    pub fail_submit: bool,
    next_id: u64,
}

/// Context that keeps buffers on the heap, applies copies on submit and only
/// records dispatches. The state is shared so tests can inspect it after the
/// graph has taken ownership of the context.
#[derive(Debug, Clone, Default)]
pub struct RecordingContext {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().expect("recording state poisoned")
    }

    pub fn fail_allocation_of(&self, kind: MemoryKind) {
        self.state().fail_kind = Some(kind);
    }

    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }
}

impl ExecutionContext for RecordingContext {
    fn name(&self) -> &str {
        "recording"
    }

    fn allocate(&mut self, spec: &TensorSpec, kind: MemoryKind) -> Result<DeviceBuffer> {
        let mut state = self.state();
        if state.fail_kind == Some(kind) {
            bail!("{kind:?} memory exhausted");
        }
        let id = BufferId(state.next_id);
        state.next_id += 1;
        state.buffers.insert(id, vec![0; spec.nbytes()]);
        Ok(DeviceBuffer::new(id, spec.nbytes() as u64, kind))
    }

    fn release(&mut self, buffer: DeviceBuffer) -> Result<()> {
        self.state()
            .buffers
            .remove(&buffer.id())
            .map(|_| ())
            .context("unknown buffer")
    }

    fn write_buffer(&mut self, buffer: &DeviceBuffer, bytes: &[u8]) -> Result<()> {
        let mut state = self.state();
        let data = state.buffers.get_mut(&buffer.id()).context("unknown buffer")?;
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &DeviceBuffer, bytes: &mut [u8]) -> Result<()> {
        let state = self.state();
        let data = state.buffers.get(&buffer.id()).context("unknown buffer")?;
        bytes.copy_from_slice(&data[..bytes.len()]);
        Ok(())
    }

    fn begin_recording(&mut self) -> Result<()> {
        let mut state = self.state();
        state.recording = true;
        state.commands.clear();
        Ok(())
    }

    fn record(&mut self, command: Command) -> Result<()> {
        let mut state = self.state();
        if !state.recording {
            bail!("record called outside a recording");
        }
        state.commands.push(command);
        Ok(())
    }

    fn end_recording(&mut self) -> Result<()> {
        self.state().recording = false;
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.fail_submit {
            bail!("device lost");
        }
        let commands = state.commands.clone();
        for command in commands {
            if let Command::Copy { src, dst, size } = command {
                let data = state.buffers.get(&src).context("unknown src")?[..size as usize].to_vec();
                state.buffers.get_mut(&dst).context("unknown dst")?[..size as usize]
                    .copy_from_slice(&data);
            }
        }
        state.submits += 1;
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        self.state().waits += 1;
        Ok(())
    }

    fn recorded_commands(&self) -> usize {
        self.state().commands.len()
    }

    fn allocated_bytes(&self) -> u64 {
        self.state().buffers.values().map(|data| data.len() as u64).sum()
    }
}
