use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod script;

use commands::Commands;

#[derive(Parser)]
#[command(name = "velocache")]
#[command(about = "Block-cache lifecycle management against the simulator engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (e.g. "info", "velocache_mngt=debug")
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli.command.execute()
}
