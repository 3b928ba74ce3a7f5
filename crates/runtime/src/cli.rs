//! CLI wiring for graphrt.

use crate::bench::{run_bench, BenchOptions, BenchReport};
use crate::samples::{build_sample, SampleKind};
use crate::session::create_graph;
use anyhow::{ensure, Result};
use clap::{Parser, Subcommand};
use graphrt_graph::{DeviceKind, GraphConfig};
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "graphrt", about = "Build, encode and execute compute graphs")]
pub struct Cli {
    /// JSON graph configuration. Missing files fall back to defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Overrides the device named in the configuration.
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DeviceArg {
    Host,
    Gpu,
}

impl From<DeviceArg> for DeviceKind {
    fn from(value: DeviceArg) -> DeviceKind {
        match value {
            DeviceArg::Host => DeviceKind::Host,
            DeviceArg::Gpu => DeviceKind::Gpu,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum SampleArg {
    Doubling,
    Chained,
}

impl From<SampleArg> for SampleKind {
    fn from(value: SampleArg) -> SampleKind {
        match value {
            SampleArg::Doubling => SampleKind::Doubling,
            SampleArg::Chained => SampleKind::Chained,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a sample graph over the given values and print the output.
    Run {
        #[arg(long, value_enum, default_value = "doubling")]
        sample: SampleArg,
        #[arg(long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
        values: Vec<f32>,
    },
    /// Encode a sample graph and print its summary as JSON.
    Describe {
        #[arg(long, value_enum, default_value = "doubling")]
        sample: SampleArg,
        #[arg(long, default_value_t = 1024)]
        elements: usize,
    },
    /// Time repeated executions of an encoded sample graph.
    Bench {
        #[arg(long, value_enum, default_value = "chained")]
        sample: SampleArg,
        #[arg(long, default_value_t = 1 << 20)]
        elements: usize,
        #[arg(long, default_value_t = 2)]
        warmup: usize,
        #[arg(long, default_value_t = 10)]
        runs: usize,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        baseline: Option<PathBuf>,
    },
    /// Write the effective configuration as JSON.
    Config {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let Cli {
        config,
        device,
        command,
    } = cli;
    let config = resolve_config(config, device)?;

    match command {
        Command::Run { sample, values } => {
            let output = run_sample(config, sample.into(), &values)?;
            println!("{}", serde_json::to_string(&output)?);
        }
        Command::Describe { sample, elements } => {
            let mut graph = create_graph(config)?;
            build_sample(&mut graph, sample.into(), elements)?;
            graph.encode()?;
            println!("{}", serde_json::to_string_pretty(&graph.summary())?);
        }
        Command::Bench {
            sample,
            elements,
            warmup,
            runs,
            output,
            baseline,
        } => {
            let options = BenchOptions {
                sample: sample.into(),
                elements,
                warmup,
                runs,
            };
            let report = run_bench(config, options)?;

            println!(
                "device={} context={} sample={} elements={} generated_at={}",
                report.device,
                report.context,
                report.options.sample.as_str(),
                report.options.elements,
                report.generated_at_unix_ms
            );
            println!(
                "encode_ms={:.3} mean_ms={:.3} min_ms={:.3} max_ms={:.3} bandwidth_gbps={:.3} max_abs_error={:.3e}",
                report.encode_ms,
                report.mean_ms,
                report.min_ms,
                report.max_ms,
                report.bandwidth_gbps,
                report.max_abs_error
            );

            if let Some(path) = baseline {
                if path.exists() {
                    let baseline_blob = fs::read_to_string(&path)?;
                    let baseline_report: BenchReport = serde_json::from_str(&baseline_blob)?;
                    match report.diff(&baseline_report) {
                        Some(delta) => println!(
                            "vs baseline: mean_ms {:+.3}, bandwidth_gbps {:+.3}",
                            delta.mean_ms_delta, delta.bandwidth_gbps_delta
                        ),
                        None => println!("baseline measured a different workload; skipping diff"),
                    }
                } else {
                    println!("baseline file {} not found; skipping diff", path.display());
                }
            }

            if let Some(path) = output {
                fs::write(&path, serde_json::to_string_pretty(&report)?)?;
                info!(path = %path.display(), "bench report written");
            }
        }
        Command::Config { output } => {
            match output {
                Some(path) => {
                    config.save_to_file(&path)?;
                    info!(path = %path.display(), "configuration written");
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
    }
    Ok(())
}

fn resolve_config(path: Option<PathBuf>, device: Option<DeviceArg>) -> Result<GraphConfig> {
    let mut config = match path {
        Some(path) => GraphConfig::load_from_file(&path)?,
        None => GraphConfig::default(),
    };
    if let Some(device) = device {
        config.device = device.into();
    }
    Ok(config)
}

/// Builds, encodes and executes a sample once over `values`.
pub fn run_sample(config: GraphConfig, sample: SampleKind, values: &[f32]) -> Result<Vec<f32>> {
    ensure!(!values.is_empty(), "at least one value is required");
    let mut graph = create_graph(config)?;
    let handles = build_sample(&mut graph, sample, values.len())?;
    graph.encode()?;
    graph.copy_into_input_typed(handles.input, values)?;
    graph.execute()?;
    Ok(graph.copy_from_output_typed::<f32>(handles.output)?)
}
