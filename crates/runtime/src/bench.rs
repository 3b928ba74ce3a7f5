//! Timed execution of a sample graph, checked against a host reference and
//! reported as reproducible JSON.

use crate::samples::{build_sample, reference_output, sample_input, SampleKind};
use crate::session::create_graph;
use anyhow::{ensure, Result};
use graphrt_graph::GraphConfig;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BenchOptions {
    pub sample: SampleKind,
    pub elements: usize,
    pub warmup: usize,
    pub runs: usize,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            sample: SampleKind::Chained,
            elements: 1 << 20,
            warmup: 2,
            runs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchReport {
    pub label: String,
    pub device: String,
    pub context: String,
    pub options: BenchOptions,
    pub recorded_commands: usize,
    pub encode_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub bandwidth_gbps: f64,
    pub max_abs_error: f64,
    pub mean_abs_error: f64,
    pub generated_at_unix_ms: u128,
}

impl BenchReport {
    /// Compares against an earlier report of the same sample and size.
    pub fn diff(&self, baseline: &BenchReport) -> Option<BenchDelta> {
        if self.options.sample != baseline.options.sample
            || self.options.elements != baseline.options.elements
        {
            return None;
        }
        Some(BenchDelta {
            mean_ms_delta: self.mean_ms - baseline.mean_ms,
            bandwidth_gbps_delta: self.bandwidth_gbps - baseline.bandwidth_gbps,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchDelta {
    pub mean_ms_delta: f64,
    pub bandwidth_gbps_delta: f64,
}

/// Builds the sample once, encodes it once, then executes it
/// `warmup + runs` times. Only the measured runs count towards the timings.
pub fn run_bench(config: GraphConfig, options: BenchOptions) -> Result<BenchReport> {
    ensure!(options.runs > 0, "bench needs at least one measured run");
    ensure!(options.elements > 0, "bench needs at least one element");

    let device = config.device.to_string();
    let label = config.label.clone();
    let mut graph = create_graph(config)?;
    let handles = build_sample(&mut graph, options.sample, options.elements)?;
    let (encode_time, ()) = timed(|| Ok(graph.encode()?))?;

    let input = sample_input(options.elements);
    graph.copy_into_input_typed(handles.input, &input)?;

    for _ in 0..options.warmup {
        graph.execute()?;
    }

    let mut samples = Vec::with_capacity(options.runs);
    for run in 0..options.runs {
        let (elapsed, ()) = timed(|| Ok(graph.execute()?))?;
        debug!(run, elapsed_ms = millis(elapsed), "bench run");
        samples.push(millis(elapsed));
    }

    let output = Array1::from(graph.copy_from_output_typed::<f32>(handles.output)?);
    let expected = Array1::from(reference_output(options.sample, &input));
    let diff = &output - &expected;
    let max_abs_error = diff
        .iter()
        .fold(0.0_f64, |acc, value| acc.max(f64::from(value.abs())));
    let mean_abs_error =
        diff.iter().map(|value| f64::from(value.abs())).sum::<f64>() / diff.len() as f64;

    let mean_ms = samples.iter().sum::<f64>() / samples.len() as f64;
    let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max_ms = samples.iter().copied().fold(0.0, f64::max);

    // Every dispatch reads its inputs and writes its output once.
    let bytes = (options.elements * std::mem::size_of::<f32>()) as f64
        * traffic_factor(options.sample);
    let bandwidth_gbps = if mean_ms > 0.0 {
        (bytes / 1.0e9) / (mean_ms / 1000.0)
    } else {
        0.0
    };

    let generated_at_unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis();

    info!(
        sample = options.sample.as_str(),
        elements = options.elements,
        mean_ms,
        max_abs_error,
        "bench complete"
    );

    Ok(BenchReport {
        label,
        device,
        context: graph.context_name().to_string(),
        options,
        recorded_commands: graph.recorded_commands(),
        encode_ms: millis(encode_time),
        mean_ms,
        min_ms,
        max_ms,
        bandwidth_gbps,
        max_abs_error,
        mean_abs_error,
        generated_at_unix_ms,
    })
}

fn traffic_factor(sample: SampleKind) -> f64 {
    match sample {
        // input copy, add (2 reads + 1 write), output copy
        SampleKind::Doubling => 5.0,
        // input copy, mul_scalar 2, add 3, relu 2, output copy
        SampleKind::Chained => 9.0,
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn timed<F, T>(f: F) -> Result<(Duration, T)>
where
    F: FnOnce() -> Result<T>,
{
    let start = Instant::now();
    let value = f()?;
    Ok((start.elapsed(), value))
}
