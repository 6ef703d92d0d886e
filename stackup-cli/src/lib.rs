//! Command-line front end for `stackup-core`.
//!
//! Loads the user config and a plan, checks host prerequisites, picks a
//! cluster backend and runs the sequencer.

pub mod commands;
pub mod config;
pub mod detection;
pub mod preflight;
pub mod report;

pub use commands::{Cli, Commands};
