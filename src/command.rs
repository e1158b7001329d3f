//! External command execution
//!
//! Every registry and cloud interaction is an invocation of an external CLI. Commands are
//! described by a [`CommandSpec`] and executed through a [`CommandRunner`], which keeps the
//! pipeline testable without docker or gcloud installed.

use crate::error::CommandError;
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Value written to a command's stdin; never displayed
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Secret>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_stdin(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is returned as output, not as an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Run and treat a non-zero exit as [`CommandError::NonZeroExit`]
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let output = self.run(spec).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(CommandError::NonZeroExit {
                command: spec.to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands as child processes of this one
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        debug!(command = %spec, timeout_secs = spec.timeout.as_secs(), "running command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| CommandError::Spawn {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;

        let io_error = |e: std::io::Error| CommandError::Io {
            command: spec.to_string(),
            message: e.to_string(),
        };

        if let (Some(secret), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(secret.expose().as_bytes()).await.map_err(io_error)?;
            stdin.shutdown().await.map_err(io_error)?;
        }

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandError::TimedOut {
                command: spec.to_string(),
                seconds: spec.timeout.as_secs(),
            })?
            .map_err(io_error)?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}
