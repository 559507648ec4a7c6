//! docmerge CLI — batch certificate generation from Word templates.
//!
//! Duplicates a template's marked section once per spreadsheet record and
//! writes the merged (or per-record) documents.

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
