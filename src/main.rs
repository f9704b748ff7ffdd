mod cli;
mod engine;
mod error;
mod model;
mod orchestrator;
mod ranking;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = args.is_one_shot() || !cfg!(feature = "tui");

    // Log output would corrupt the TUI's alternate screen.
    if is_non_tui {
        cli::init_logging();
    }

    cli::run(args).await?;

    // Explicitly exit with code 0 on success so lingering blocking tasks cannot hold the process.
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
