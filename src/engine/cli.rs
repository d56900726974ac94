//! Firmhub CLI Module
//! Command-line interface for the firmware distribution service

pub mod formatter;

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::config::CONFIG_FILE_NAME;

#[derive(Parser, Debug)]
#[command(name = "firmhub")]
#[command(version)]
#[command(
    about = "Over-the-air firmware distribution for ESP devices, fed by GitHub releases",
    long_about = None
)]
pub struct Cli {
    /// Config file (defaults to ./firmhub.config.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file
    Init {
        /// GitHub owner of the firmware repository
        #[arg(long)]
        owner: String,

        /// GitHub repository publishing the firmware releases
        #[arg(long)]
        repo: String,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Serve device updates and synchronize releases in the background
    Serve {
        /// Host to bind to (overrides the config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not poll GitHub; serve what is already on disk
        #[arg(long)]
        no_sync: bool,
    },

    /// Run one synchronization now
    Sync,

    /// List local releases and their verification state
    Status,

    /// Verify one local release against its manifest
    Verify {
        /// Release tag, as named on disk
        version: String,
    },

    /// Show what a device running `current_version` would receive
    Check {
        /// Version the device reports
        current_version: String,

        /// Device update mode (`spiffs` selects the filesystem image)
        #[arg(short, long, default_value = "sketch")]
        mode: String,
    },
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }

    /// Default log filter for the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
