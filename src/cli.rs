// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Blue/green deployments with health-gated promotion and automatic rollback")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to the configuration file (default: switchyard.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new switchyard.yml configuration file
    Init {
        /// Service name (default: current directory name)
        #[arg(long)]
        service: Option<String>,

        /// Image repository for built releases
        #[arg(long)]
        image: Option<String>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Build, verify and promote a new release to an environment
    Deploy {
        /// Target environment (e.g. production, staging)
        environment: String,

        /// Skip the smoke test step
        #[arg(long)]
        skip_tests: bool,

        /// Health check timeout in seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Continue when the pre-deployment backup cannot be taken
        #[arg(long)]
        allow_missing_backup: bool,

        /// Break an existing deploy lock
        #[arg(long)]
        force: bool,
    },

    /// Show the live slot and last deployment of an environment
    Status {
        environment: String,
    },

    /// List past deployments of an environment
    History {
        environment: String,

        /// Maximum number of records to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List pre-deployment backups of an environment
    Backups {
        environment: String,
    },
}
