use anyhow::Result;
use approx::assert_relative_eq;
use half::f16;
use graphrt::{
    create_graph, BinaryNode, BinaryOp, ComputeGraph, CopyNode, DataType, GraphConfig, GraphError,
    GraphState, HostContext, ScalarNode, ScalarValue, UnaryNode, UnaryOp, ValueRef,
};

fn host_graph(label: &str) -> ComputeGraph {
    let config = GraphConfig::default().with_label(label);
    let context = HostContext::new(config.limits);
    ComputeGraph::new(config, Box::new(context))
}

#[test]
fn doubles_four_floats() -> Result<()> {
    let mut graph = create_graph(GraphConfig::default())?;
    let input = graph.add_input_tensor(&[4], DataType::F32)?;
    let output = graph.add_output_tensor(&[4], DataType::F32)?;
    graph.add_node(BinaryNode::add(input, input, output))?;

    graph.encode()?;
    graph.copy_into_input_typed(input, &[1.0f32, 2.0, 3.0, 4.0])?;
    graph.execute()?;

    assert_eq!(graph.copy_from_output_typed::<f32>(output)?, vec![2.0, 4.0, 6.0, 8.0]);
    assert_eq!(graph.state(), GraphState::Executed);
    Ok(())
}

#[test]
fn encode_once_execute_many() -> Result<()> {
    let mut graph = host_graph("many");
    let input = graph.add_input_tensor(&[3], DataType::F32)?;
    let output = graph.add_output_tensor(&[3], DataType::F32)?;
    graph.add_node(BinaryNode::add(input, input, output))?;
    graph.encode()?;
    let commands = graph.recorded_commands();

    for step in 1..=3 {
        let scale = step as f32;
        graph.copy_into_input_typed(input, &[scale, -scale, 0.5 * scale])?;
        graph.execute()?;
        let out = graph.copy_from_output_typed::<f32>(output)?;
        assert_relative_eq!(out[0], 2.0 * scale);
        assert_relative_eq!(out[1], -2.0 * scale);
        assert_relative_eq!(out[2], scale);
    }

    assert_eq!(graph.recorded_commands(), commands);
    assert_eq!(graph.stats().runs, 3);
    Ok(())
}

#[test]
fn copy_node_round_trips_bytes() -> Result<()> {
    let mut graph = host_graph("bytes");
    let input = graph.add_input_tensor(&[2, 5], DataType::U8)?;
    let output = graph.add_output_tensor(&[2, 5], DataType::U8)?;
    graph.add_node(CopyNode::new(input, output))?;
    graph.encode()?;

    let bytes: Vec<u8> = (0u8..10).map(|b| b.wrapping_mul(37)).collect();
    graph.copy_into_input(input, &bytes)?;
    graph.execute()?;

    let mut back = vec![0u8; bytes.len()];
    graph.copy_from_output(output, &mut back)?;
    assert_eq!(back, bytes);
    Ok(())
}

#[test]
fn half_tensors_stage_and_copy() -> Result<()> {
    let mut graph = host_graph("half");
    let input = graph.add_input_tensor(&[4], DataType::F16)?;
    let output = graph.add_output_tensor(&[4], DataType::F16)?;
    graph.add_node(CopyNode::new(input, output))?;
    graph.encode()?;

    let values = [1.0f32, -0.5, 65504.0, 0.1].map(f16::from_f32);
    graph.copy_into_input_typed(input, &values)?;
    graph.execute()?;

    let back = graph.copy_from_output_typed::<f16>(output)?;
    assert_eq!(back, values);
    assert_relative_eq!(back[3].to_f32(), 0.1, epsilon = 1e-3);
    assert!(matches!(
        graph.copy_from_output_typed::<f32>(output),
        Err(GraphError::DTypeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn half_tensors_have_no_kernels() -> Result<()> {
    let mut graph = host_graph("half-kernels");
    let input = graph.add_input_tensor(&[4], DataType::F16)?;
    let output = graph.add_output_tensor(&[4], DataType::F16)?;
    let err = graph
        .add_node(UnaryNode::new(UnaryOp::Relu, input, output))
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidNode { .. }));
    assert_eq!(graph.node_count(), 0);
    Ok(())
}

#[test]
fn integer_chain_with_scalar() -> Result<()> {
    let mut graph = host_graph("ints");
    let input = graph.add_input_tensor(&[5], DataType::I32)?;
    let output = graph.add_output_tensor(&[5], DataType::I32)?;
    let divisor = graph.add_scalar(ScalarValue::Int(2))?;
    let halved = graph.add_tensor(&[5], DataType::I32)?;
    graph.add_node(ScalarNode::new(BinaryOp::Div, input, divisor, halved))?;
    graph.add_node(UnaryNode::new(UnaryOp::Abs, halved, output))?;
    graph.encode()?;

    graph.copy_into_input_typed(input, &[-9i32, -4, 0, 5, 11])?;
    graph.execute()?;
    assert_eq!(graph.copy_from_output_typed::<i32>(output)?, vec![4, 2, 0, 2, 5]);
    Ok(())
}

#[test]
fn lifecycle_errors_surface_synchronously() -> Result<()> {
    let mut graph = host_graph("errors");
    let input = graph.add_input_tensor(&[2], DataType::F32)?;
    let output = graph.add_output_tensor(&[2], DataType::F32)?;

    assert!(matches!(graph.execute(), Err(GraphError::EncodingRequired)));

    let dangling = ValueRef::new(99);
    let err = graph.add_node(BinaryNode::add(input, dangling, output)).unwrap_err();
    assert!(matches!(err, GraphError::InvalidHandle { .. }));
    assert_eq!(graph.node_count(), 0);

    graph.add_node(UnaryNode::new(UnaryOp::Neg, input, output))?;
    graph.encode()?;

    let mut out = [0u8; 8];
    assert!(matches!(
        graph.copy_from_output(output, &mut out),
        Err(GraphError::NotExecutedYet)
    ));
    assert!(matches!(
        graph.add_input_tensor(&[2], DataType::F32),
        Err(GraphError::GraphFrozen)
    ));
    assert!(matches!(graph.encode(), Err(GraphError::AlreadyEncoded)));
    assert_eq!(graph.state(), GraphState::Encoded);
    assert_eq!(graph.node_count(), 1);
    Ok(())
}

#[test]
fn summary_reports_lifecycle() -> Result<()> {
    let mut graph = host_graph("summary");
    let input = graph.add_input_tensor(&[8], DataType::F32)?;
    let output = graph.add_output_tensor(&[8], DataType::F32)?;
    graph.add_node(UnaryNode::new(UnaryOp::Relu, input, output))?;
    graph.encode()?;

    let summary = graph.summary();
    assert_eq!(summary.context, "host");
    assert_eq!(summary.nodes.len(), 1);
    assert_eq!(summary.recorded_commands, 3);

    let json = serde_json::to_value(&summary)?;
    assert_eq!(json["label"], "summary");
    assert_eq!(json["state"], "encoded");
    Ok(())
}
