//! `cascade` command line interface.

mod commands;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

use commands::demo;

/// Streaming HTML renderer.
#[derive(Parser, Debug)]
#[command(name = "cascade", version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. `debug` or `cascade=trace`. Overrides `RUST_LOG`.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a page with delayed sections to stdout.
    Demo(demo::Args),
}

fn main() -> Result<()> {
    color_eyre::config::HookBuilder::default()
        .display_location_section(false)
        .display_env_section(false)
        .install()?;

    let cli = Cli::parse();
    logging::init(cli.log.as_deref());

    match cli.command {
        Commands::Demo(args) => demo::run(args),
    }
}
