//! schemalib CLI: CRM schema extraction and corpus builder.
//!
//! Describes every entity of an org through the platform CLI, builds the
//! relationship graph and usage profile, and emits a token-bounded corpus.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
