//! `bulletin` binary.

use anyhow::Result;
use clap::Parser;

use bulletin_cli::{Cli, Commands, commands, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let config = cli.config()?;

    match cli.command {
        Commands::Simulate(args) => commands::simulate::execute(args, &config).await,
        Commands::ConvergeOnce(args) => commands::converge_once::execute(args, &config).await,
    }
}
