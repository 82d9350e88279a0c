//! kiln - build formulae from source

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln_cli::cmd;
use kiln_cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            formula,
            build_from_source,
            verbose,
            source,
            prefix,
            options,
        } => cmd::build::build(&cmd::build::BuildArgs {
            formula,
            build_from_source,
            verbose,
            source,
            prefix,
            options,
        }),
        Commands::Deps {
            formula,
            runtime,
            options,
        } => cmd::deps::deps(&formula, runtime, &options),
        Commands::Info { formula } => cmd::info::info(&formula),
    }
}
