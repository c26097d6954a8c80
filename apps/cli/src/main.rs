//! docmark CLI: convert rich documents and clipboard markup to Markdown.
//!
//! Converts saved markup files and captured clipboard payloads into
//! canonical Markdown with extracted images, and checks Markdown output
//! against the conversion invariants.

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
