//! Command-line interface for sanad.
//!
//! This module provides the CLI structure for the `sanad` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AvailabilityArg, AvailabilityCommand, ConfigCommand, ContactArg, ContactArgs, FindCommand,
    LoginCommand, OutputFormat, RegisterCommand, UpdateCommand,
};

/// sanad - Blood donor identity on the command line
///
/// Sign in with a phone number, register as a donor, keep your profile
/// current and search for donors. Works offline with a local-only profile.
#[derive(Debug, Parser)]
#[command(name = "sanad")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Treat the directory as unreachable
    #[arg(long, global = true)]
    pub offline: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in with a registered phone number
    Login(LoginCommand),

    /// Register a new donor profile
    Register(RegisterCommand),

    /// Update the signed-in profile
    Update(UpdateCommand),

    /// Sign out on this device
    Logout,

    /// Show the current session
    Whoami {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Browse as a guest, or leave guest mode
    Guest {
        /// Leave guest mode
        #[arg(long)]
        exit: bool,
    },

    /// Upload a profile created while offline
    Sync,

    /// Delete the signed-in profile everywhere and sign out
    Delete {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Mark yourself available or unavailable
    Availability(AvailabilityCommand),

    /// Search for available donors
    Find(FindCommand),

    /// Show donor counts
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Remove all data stored on this device
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
