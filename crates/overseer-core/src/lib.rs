//! # Overseer Core
//!
//! Declarative lifecycle management for supervisord programs.
//!
//! Given a [`ServiceSpec`], the [`ConvergenceEngine`] reconciles the
//! supervisor's on-disk configuration and runtime state with it: it reads the
//! current state through the status listing, decides whether a control command
//! is needed, issues it, and waits out in-flight transitions with a bounded
//! poll loop.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` / `expect()` / `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Components
//!
//! - [`spec`]: validated service description
//! - [`prober`]: status listing queries
//! - [`control`]: start/stop/restart/update commands
//! - [`engine`]: the convergence state machine
//! - [`sync`] and [`render`]: per-service configuration files
//! - [`manifest`] and [`reconcile`]: multi-service desired state
//!
//! All operations are blocking. Callers must not run two reconciliations
//! against the same service concurrently.

pub mod config;
pub mod control;
pub mod engine;
mod error;
pub mod manifest;
pub mod prober;
pub mod reconcile;
pub mod render;
pub mod runner;
pub mod spec;
pub mod state;
pub mod sync;

pub use config::{load_config, Config};
pub use engine::{Action, ConvergenceEngine, Outcome, PollPolicy};
pub use error::{Error, ErrorKind, Result};
pub use manifest::Manifest;
pub use reconcile::{reconcile, Report};
pub use runner::{CommandRunner, SystemRunner};
pub use spec::ServiceSpec;
pub use state::ServiceState;

/// Build the production runner described by `config`.
#[must_use]
pub fn system_runner(config: &Config) -> SystemRunner {
    SystemRunner::new()
        .with_timeout(config.supervisor.command_timeout())
        .with_escalation(&config.supervisor.escalate_with)
}
