//! Error taxonomy for the mirroring pipeline
//!
//! Provisioning and authentication failures are fatal to a run. Extraction failures are
//! fatal to every staged image. Mirror failures only affect the image they belong to.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures while streaming and unpacking a release archive
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Failed to fetch archive from {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("Archive is not a valid gzip stream: {0}")]
    BadCompression(String),

    #[error("Malformed tar stream: {0}")]
    Archive(String),

    #[error("Unsupported archive entry of kind {kind} at {path}")]
    UnsupportedEntry { kind: String, path: String },

    #[error("Archive entry escapes the destination directory: {0}")]
    UnsafePath(String),

    #[error("IO error at {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ExtractError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Registry login failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credentials for {host} are missing: environment variable {variable} is not set")]
    MissingCredentials { host: String, variable: String },

    #[error("Login to {host} failed: {message}")]
    LoginFailed { host: String, message: String },

    #[error("Login to {host} timed out")]
    TimedOut { host: String },
}

/// Destination registry provisioning failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Failed to create registry {name} in {location}: {message}")]
    CreateFailed {
        name: String,
        location: String,
        message: String,
    },

    #[error("Registry provisioning command failed: {0}")]
    Command(String),
}

/// Per-image failures, isolated to that image's subtree
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Failed to acquire {image}: {message}")]
    AcquireFailed { image: String, message: String },

    #[error("Failed to tag {image}: {message}")]
    TagFailed { image: String, message: String },

    #[error("Failed to push {image} after {attempts} attempt(s): {message}")]
    PushFailed {
        image: String,
        attempts: u32,
        message: String,
    },
}

/// Dependency graph construction errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Node {node} depends on unknown node {dependency}")]
    UnknownDependency { node: String, dependency: String },

    #[error("Dependency cycle involving: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// External command failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{command} timed out after {seconds}s")]
    TimedOut { command: String, seconds: u64 },

    #[error("{command} exited with status {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("IO error while running {command}: {message}")]
    Io { command: String, message: String },
}

impl CommandError {
    /// Timeouts and non-zero exits are worth another attempt, spawn failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CommandError::TimedOut { .. } | CommandError::NonZeroExit { .. } | CommandError::Io { .. }
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("Failed to read config file {path}: {message}")]
    File { path: String, message: String },
}

/// Top-level error for a mirroring run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Mirror error: {0}")]
    Mirror(#[from] MirrorError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Errors that leave nothing downstream able to succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Provision(_) | PipelineError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let auth = PipelineError::from(AuthError::TimedOut {
            host: "example.com".to_string(),
        });
        assert!(auth.is_fatal());

        let mirror = PipelineError::from(MirrorError::TagFailed {
            image: "app:1.0".to_string(),
            message: "missing".to_string(),
        });
        assert!(!mirror.is_fatal());
    }

    #[test]
    fn test_transient_command_errors() {
        let timeout = CommandError::TimedOut {
            command: "docker push".to_string(),
            seconds: 30,
        };
        assert!(timeout.is_transient());

        let spawn = CommandError::Spawn {
            program: "docker".to_string(),
            message: "not found".to_string(),
        };
        assert!(!spawn.is_transient());
    }

    #[test]
    fn test_cycle_message_lists_nodes() {
        let err = GraphError::Cycle(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "Dependency cycle involving: a, b");
    }
}
