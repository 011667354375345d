//! Command-line parsing.

use std::path::PathBuf;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};

/// Default number of concurrent fetches
const DEFAULT_JOBS: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "portalsync")]
#[command(about = "Fetch files from authenticated web portals through one shared login session")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ~/.config/portalsync/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch URLs through the crawler's session
    Fetch {
        crawler: String,
        #[arg(required = true)]
        urls: Vec<String>,
        /// Concurrent fetches
        #[arg(
            short,
            long,
            default_value_t = DEFAULT_JOBS,
            value_parser = RangedU64ValueParser::<usize>::new().range(1..)
        )]
        jobs: usize,
        /// Save each page under this directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Log in and save the session
    Login {
        crawler: String,
        /// Store the password in the OS keychain after a successful login
        #[arg(long)]
        remember: bool,
    },

    /// Delete the saved session
    Logout {
        crawler: String,
        /// Also delete the keychain password
        #[arg(long)]
        forget: bool,
    },
}
