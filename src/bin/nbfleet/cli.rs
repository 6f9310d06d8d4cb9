use clap::{Parser, Subcommand};
use nbfleet::config::DEFAULT_CONFIG_FILE;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nbfleet")]
#[command(version, about = "Provision, launch and tear down per-user notebook sandboxes", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Create accounts, credentials and copy the material
    sudo nbfleet setup course.toml

    # Start one notebook server per student and serve the link page
    sudo nbfleet launch course.toml

    # Stop the servers and collect the students' work
    sudo nbfleet shutdown course.toml

    # Delete every account without asking (work is collected first)
    sudo nbfleet remove --yes course.toml
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Create accounts and the shared group, set credentials, copy material
    Setup {
        /// Configuration file
        #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Copy the material into every existing account again
    Send {
        /// Configuration file
        #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Start every sandbox and serve the link page until interrupted
    Launch {
        /// Configuration file
        #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Stop every sandbox and collect its files
    Shutdown {
        /// Configuration file
        #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Collect files without stopping the sandboxes
    Retrieve {
        /// Configuration file
        #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Delete the accounts and, optionally, the shared group
    Remove {
        /// Configuration file
        #[arg(value_name = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Do not collect files before deleting accounts
        #[arg(long)]
        keep_files: bool,

        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

impl Commands {
    pub fn config_path(&self) -> &Path {
        match self {
            Commands::Setup { config }
            | Commands::Send { config }
            | Commands::Launch { config }
            | Commands::Shutdown { config }
            | Commands::Retrieve { config }
            | Commands::Remove { config, .. } => config,
        }
    }
}
