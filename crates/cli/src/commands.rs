use std::path::PathBuf;

use clap::Subcommand;

use crate::script;

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a JSON management script against a fresh simulator engine
    Run {
        /// Path of the script file (a JSON array of steps)
        script: PathBuf,
    },
    /// Run a canned multi-level caching scenario and print each state change
    Demo,
}

impl Commands {
    pub fn execute(self) -> eyre::Result<()> {
        match self {
            Commands::Run { script } => script::run_file(&script),
            Commands::Demo => script::demo(),
        }
    }
}
