//! retrace CLI - local browsing-history store.
//!
//! Records page visits into an embedded database and exposes search,
//! visit listing, and deletion over it.

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
