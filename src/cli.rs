//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Overseer - declarative lifecycle management for supervisord programs
#[derive(Parser, Debug)]
#[command(name = "overseer")]
#[command(version)]
#[command(about = "Converge supervisord programs to a declared state")]
#[command(
    long_about = "Overseer writes supervisord program files from a TOML manifest and drives each program to the requested state with supervisorctl, waiting out in-flight transitions."
)]
pub struct Cli {
    /// Configuration file layered over the global one
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every service in a manifest
    Apply {
        /// Manifest file
        #[arg(short, long, value_name = "FILE")]
        manifest: PathBuf,

        /// Only reconcile these services (repeatable)
        #[arg(long = "service", value_name = "NAME")]
        services: Vec<String>,

        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Write a service's configuration and load it
    Enable(Target),

    /// Remove a service's configuration and unload it
    Disable(Target),

    /// Start a service
    Start(Target),

    /// Stop a service
    Stop(Target),

    /// Restart a service
    Restart(Target),

    /// Show observed state
    Status {
        /// Service name (all services when omitted)
        name: Option<String>,

        /// Output as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the configuration file a service would get
    Render {
        /// Manifest file
        #[arg(short, long, value_name = "FILE")]
        manifest: PathBuf,

        /// Service name
        name: String,
    },

    /// Validate a manifest without touching the supervisor
    Check {
        /// Manifest file
        #[arg(short, long, value_name = "FILE")]
        manifest: PathBuf,
    },
}

/// One service in a manifest.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Manifest file
    #[arg(short, long, value_name = "FILE")]
    pub manifest: PathBuf,

    /// Service name
    pub name: String,
}
