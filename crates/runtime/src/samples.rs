//! Small reference graphs used by the CLI, the benchmark and the tests.

use graphrt_graph::{BinaryNode, ComputeGraph, Result, ScalarNode, UnaryNode, ValueRef};
use graphrt_kernels::{BinaryOp, DataType, ScalarValue, UnaryOp};
use serde::{Deserialize, Serialize};

/// Scale the chained sample multiplies by.
pub const CHAINED_SCALE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    /// `out = in + in`
    Doubling,
    /// `out = relu(in * scale + in)`
    Chained,
}

impl SampleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Doubling => "doubling",
            SampleKind::Chained => "chained",
        }
    }
}

/// Handles of a sample graph's single input and output.
#[derive(Debug, Clone, Copy)]
pub struct SampleHandles {
    pub input: ValueRef,
    pub output: ValueRef,
    pub scale: Option<ValueRef>,
}

pub fn build_sample(
    graph: &mut ComputeGraph,
    kind: SampleKind,
    elements: usize,
) -> Result<SampleHandles> {
    match kind {
        SampleKind::Doubling => build_doubling(graph, elements),
        SampleKind::Chained => build_chained(graph, elements, f64::from(CHAINED_SCALE)),
    }
}

pub fn build_doubling(graph: &mut ComputeGraph, elements: usize) -> Result<SampleHandles> {
    let input = graph.add_input_tensor(&[elements], DataType::F32)?;
    let output = graph.add_output_tensor(&[elements], DataType::F32)?;
    graph.add_node(BinaryNode::add(input, input, output))?;
    Ok(SampleHandles {
        input,
        output,
        scale: None,
    })
}

/// Three dispatches over two intermediates. The scale stays a graph value,
/// so it can be changed until the graph is encoded.
pub fn build_chained(
    graph: &mut ComputeGraph,
    elements: usize,
    scale: f64,
) -> Result<SampleHandles> {
    let input = graph.add_input_tensor(&[elements], DataType::F32)?;
    let output = graph.add_output_tensor(&[elements], DataType::F32)?;
    let factor = graph.add_scalar(ScalarValue::Double(scale))?;
    let scaled = graph.add_tensor(&[elements], DataType::F32)?;
    let summed = graph.add_tensor(&[elements], DataType::F32)?;

    graph.add_node(ScalarNode::new(BinaryOp::Mul, input, factor, scaled))?;
    graph.add_node(BinaryNode::new(BinaryOp::Add, scaled, input, summed))?;
    graph.add_node(UnaryNode::new(UnaryOp::Relu, summed, output))?;
    Ok(SampleHandles {
        input,
        output,
        scale: Some(factor),
    })
}

/// Host reference for a sample, used to check device results.
pub fn reference_output(kind: SampleKind, input: &[f32]) -> Vec<f32> {
    match kind {
        SampleKind::Doubling => input.iter().map(|x| x + x).collect(),
        SampleKind::Chained => input.iter().map(|x| (x * CHAINED_SCALE + x).max(0.0)).collect(),
    }
}

/// Deterministic inputs spanning negative and positive values.
pub fn sample_input(elements: usize) -> Vec<f32> {
    (0..elements)
        .map(|i| ((i % 17) as f32 - 8.0) * 0.25)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::create_graph;
    use approx::assert_abs_diff_eq;
    use graphrt_graph::GraphConfig;

    #[test]
    fn doubling_matches_reference() {
        let mut graph = create_graph(GraphConfig::default()).unwrap();
        let handles = build_sample(&mut graph, SampleKind::Doubling, 4).unwrap();
        graph.encode().unwrap();
        graph
            .copy_into_input_typed(handles.input, &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        graph.execute().unwrap();
        let out = graph.copy_from_output_typed::<f32>(handles.output).unwrap();
        assert_eq!(out, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn chained_matches_reference() {
        let mut graph = create_graph(GraphConfig::default()).unwrap();
        let handles = build_sample(&mut graph, SampleKind::Chained, 64).unwrap();
        assert_eq!(graph.node_count(), 3);
        graph.encode().unwrap();

        let input = sample_input(64);
        graph.copy_into_input_typed(handles.input, &input).unwrap();
        graph.execute().unwrap();
        let out = graph.copy_from_output_typed::<f32>(handles.output).unwrap();
        let expected = reference_output(SampleKind::Chained, &input);
        for (got, want) in out.iter().zip(&expected) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
        }
        assert!(out.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn sample_input_has_both_signs() {
        let input = sample_input(17);
        assert!(input.iter().any(|v| *v < 0.0));
        assert!(input.iter().any(|v| *v > 0.0));
    }
}
