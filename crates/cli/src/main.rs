//! Command-line front end for graphrt.

use anyhow::Result;
use clap::Parser;
use graphrt_runtime::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
