//! # Overseer
//!
//! Command line front end for [`overseer_core`].

pub mod cli;
pub mod commands;

pub use overseer_core;
