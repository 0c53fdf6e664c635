//! ChatDoc CLI — upload PDFs and hold conversations about them.
//!
//! Thin terminal front-end over the session, upload, and conversation
//! layers; all correctness lives in the library crates.

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
