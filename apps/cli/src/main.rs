//! Wayback CLI: relay URLs to web archives.
//!
//! Archives URLs given on the command line, or serves the anonymized web
//! front-end and the Matrix bot until stopped.

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
