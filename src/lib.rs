//! Image Mirror Library
//!
//! Mirrors container images into a private registry. Each run is a dependency graph of
//! provisioning, login, archive extraction and per-image acquire, tag and push steps,
//! executed concurrently with failures isolated per image.

pub mod archive;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod pipeline;
pub mod provision;
pub mod registry;
pub mod release;

pub use config::MirrorConfig;
pub use error::{PipelineError, Result};
pub use logging::Logger;
pub use pipeline::{PipelineExecutor, PipelineGraph, PipelineReport};
