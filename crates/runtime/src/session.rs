//! Builds execution contexts and graphs from configuration.

use anyhow::{Context, Result};
use graphrt_backend_cpu::HostContext;
use graphrt_graph::{ComputeGraph, DeviceKind, ExecutionContext, GraphConfig, ValueRef};
use ndarray::{ArrayD, IxDyn};
use tracing::info;

/// Creates the context `config.device` asks for.
pub fn create_context(config: &GraphConfig) -> Result<Box<dyn ExecutionContext>> {
    let context: Box<dyn ExecutionContext> = match config.device {
        DeviceKind::Host => Box::new(HostContext::new(config.limits)),
        DeviceKind::Gpu => gpu_context(config)?,
    };
    info!(
        label = %config.label,
        device = %config.device,
        context = context.name(),
        "execution context ready"
    );
    Ok(context)
}

#[cfg(feature = "gpu")]
fn gpu_context(config: &GraphConfig) -> Result<Box<dyn ExecutionContext>> {
    use graphrt_backend_gpu::{GpuContextOptions, WgpuContext};

    let context = WgpuContext::new(GpuContextOptions {
        adapter: config.adapter.clone(),
        limits: config.limits,
    })?;
    Ok(Box::new(context))
}

#[cfg(not(feature = "gpu"))]
fn gpu_context(_config: &GraphConfig) -> Result<Box<dyn ExecutionContext>> {
    anyhow::bail!("graphrt was built without the `gpu` feature")
}

/// Creates an empty graph in the building state, owning a fresh context.
pub fn create_graph(config: GraphConfig) -> Result<ComputeGraph> {
    let context = create_context(&config)?;
    Ok(ComputeGraph::new(config, context))
}

/// Reads an `f32` output into an array shaped like the tensor.
pub fn output_array(graph: &mut ComputeGraph, handle: ValueRef) -> Result<ArrayD<f32>> {
    let shape = graph
        .value(handle)?
        .spec()
        .map(|spec| spec.shape.clone())
        .with_context(|| format!("value {handle} is not a tensor"))?;
    let data = graph.copy_from_output_typed::<f32>(handle)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data).context("failed to shape graph output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrt_graph::{BinaryNode, GraphState};
    use graphrt_kernels::DataType;

    #[test]
    fn host_config_builds_host_graph() {
        let graph = create_graph(GraphConfig::default().with_label("unit")).unwrap();
        assert_eq!(graph.context_name(), "host");
        assert_eq!(graph.state(), GraphState::Building);
        assert_eq!(graph.config().label, "unit");
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn gpu_requires_feature() {
        let config = GraphConfig::default().with_device(DeviceKind::Gpu);
        assert!(create_graph(config).is_err());
    }

    #[test]
    fn output_array_keeps_shape() {
        let mut graph = create_graph(GraphConfig::default()).unwrap();
        let input = graph.add_input_tensor(&[2, 3], DataType::F32).unwrap();
        let output = graph.add_output_tensor(&[2, 3], DataType::F32).unwrap();
        graph.add_node(BinaryNode::add(input, input, output)).unwrap();
        graph.encode().unwrap();
        graph
            .copy_into_input_typed(input, &[0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        graph.execute().unwrap();

        let array = output_array(&mut graph, output).unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array[[1, 2]], 10.0);
    }
}
