//! slurmq - GPU quota monitoring and enforcement for Slurm.

mod commands;
mod logging;
mod monitor;
mod output;

use clap::Parser;
use miette::Result;
use slurmq_cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, args.quiet);

    commands::run(args).await
}
