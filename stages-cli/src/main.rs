mod cli;
mod config;
mod demo;
mod error;

use crate::{cli::Args, config::AppConfig, error::Result};
use clap::Parser;
use mimalloc::MiMalloc;
use std::process;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::from_args(&args)?;
    let report = demo::run_demo(&config).await?;

    info!(
        items = report.items,
        batches = report.batches,
        "Pipeline completed"
    );
    if report.links.is_some() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
}
