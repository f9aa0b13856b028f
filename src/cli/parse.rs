//! CLI parse: clap types for shadowheal. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// shadowheal - shadow-test and auto-heal generated UI components
#[derive(Parser)]
#[command(name = "shadowheal")]
#[command(about = "Validate generated components in a sandbox and heal them before they are shown")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides layered config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable logging (default: off)
    #[arg(long, short)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Strip module syntax from a component file and print the result
    Sanitize {
        file: PathBuf,
    },
    /// Run the pre-execution checks (bracket balance, entry component) without a sandbox
    Check {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Shadow-test a component file once
    Validate {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Shadow-test a component file, heal it if needed and persist the outcome
    Heal {
        file: PathBuf,
        #[arg(long)]
        project: String,
        /// User on whose behalf repairs are requested
        #[arg(long)]
        user: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Generate a component from a prompt, then validate, heal and persist it
    Generate {
        prompt: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show a project's persisted build status
    Status {
        #[arg(long)]
        project: String,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the effective configuration
    Config,
}
