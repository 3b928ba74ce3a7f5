//! Serializable snapshots of a graph for logs, tools and the CLI.

use crate::types::{TensorSpec, ValueRef};
use crate::value::ValueRole;
use graphrt_kernels::ScalarValue;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphState {
    Building,
    Encoded,
    Executed,
    /// An encode or submission failed; the graph must be rebuilt.
    Poisoned,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub runs: u64,
    pub last_duration: Option<Duration>,
    pub total_duration: Duration,
}

impl ExecutionStats {
    pub(crate) fn record(&mut self, elapsed: Duration) {
        self.runs += 1;
        self.last_duration = Some(elapsed);
        self.total_duration += elapsed;
    }

    pub fn mean_duration(&self) -> Option<Duration> {
        if self.runs == 0 {
            return None;
        }
        let runs = u32::try_from(self.runs).unwrap_or(u32::MAX);
        Some(self.total_duration / runs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueSummary {
    pub handle: ValueRef,
    pub kind: &'static str,
    pub role: Option<ValueRole>,
    pub spec: Option<TensorSpec>,
    pub scalar: Option<ScalarValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub index: usize,
    pub name: String,
    pub inputs: Vec<ValueRef>,
    pub outputs: Vec<ValueRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub label: String,
    pub context: String,
    pub state: GraphState,
    pub values: Vec<ValueSummary>,
    pub nodes: Vec<NodeSummary>,
    pub inputs: Vec<ValueRef>,
    pub outputs: Vec<ValueRef>,
    pub recorded_commands: usize,
    pub allocated_bytes: u64,
    pub stats: ExecutionStats,
}
