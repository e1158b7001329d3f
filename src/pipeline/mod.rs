//! Mirroring pipeline
//!
//! A run is built once by [`PipelineGraph`], executed once by [`PipelineExecutor`] and
//! summarised in a [`PipelineReport`].

pub mod builder;
pub mod executor;
pub mod graph;
pub mod report;

pub use builder::{
    DESTINATION_LOGIN_NODE, DestinationRegistry, EXTRACT_NODE, PROVISION_NODE, PipelineGraph, SOURCE_LOGIN_NODE,
};
pub use executor::{Collaborators, PipelineExecutor};
pub use graph::{DependencyNode, NodeAction, NodeId, PipelineRun, Stage};
pub use report::{ImageReport, ImageStatus, NodeOutcome, NodeReport, PipelineReport};
