use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "imgtier",
    version,
    about = "A tiered image cache: memory, disk, then network",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum concurrent downloads.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Resolve an image through the cache tiers.
    Fetch {
        /// Image URL.
        url: String,

        /// Target display width in pixels.
        #[arg(long, default_value_t = 256)]
        width: u32,

        /// Target display height in pixels.
        #[arg(long, default_value_t = 256)]
        height: u32,

        /// Write the decoded image to this path as PNG.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Print disk cache usage.
    Stats,
    /// Remove every entry from the disk cache.
    Clear,
}
