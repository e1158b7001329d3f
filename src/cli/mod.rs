//! Command line interface module
//!
//! Argument parsing, configuration merging and the runner that drives one mirroring run.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::{EXIT_USAGE, Runner};
