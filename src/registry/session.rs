//! Registry login sessions
//!
//! Login is delegated to the docker CLI (credentialed registries) or to the gcloud docker
//! credential helper (the destination registry). Both are safe to repeat, so a session can
//! be re-established on every run without checking first. Failed logins are not retried.

use crate::command::{CommandRunner, CommandSpec};
use crate::error::{AuthError, CommandError};
use crate::registry::endpoint::{AuthMode, RegistryEndpoint};
use std::time::Duration;
use tracing::debug;

/// Proof that a login completed for a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub host: String,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct RegistrySession {
    docker_bin: String,
    gcloud_bin: String,
    timeout: Duration,
}

impl RegistrySession {
    pub fn new(docker_bin: impl Into<String>, gcloud_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            gcloud_bin: gcloud_bin.into(),
            timeout,
        }
    }

    /// Command that logs into `endpoint`, or `None` when no login is needed.
    ///
    /// Credentials are resolved here, at login time, and the password only ever travels
    /// on stdin.
    pub fn login_command(&self, endpoint: &RegistryEndpoint) -> Result<Option<CommandSpec>, AuthError> {
        let spec = match &endpoint.auth {
            AuthMode::Anonymous => return Ok(None),
            AuthMode::CloudHelper => CommandSpec::new(
                self.gcloud_bin.clone(),
                ["auth", "configure-docker", endpoint.host.as_str(), "--quiet"],
            ),
            AuthMode::Credentialed(credentials) => {
                let (username, password) = credentials.resolve(&endpoint.host)?;
                CommandSpec::new(
                    self.docker_bin.clone(),
                    [
                        "login".to_string(),
                        endpoint.host.clone(),
                        "-u".to_string(),
                        username,
                        "--password-stdin".to_string(),
                    ],
                )
                .with_stdin(password)
            }
        };
        Ok(Some(spec.with_timeout(self.timeout)))
    }

    pub async fn login(
        &self,
        endpoint: &RegistryEndpoint,
        runner: &dyn CommandRunner,
    ) -> Result<SessionHandle, AuthError> {
        let Some(spec) = self.login_command(endpoint)? else {
            debug!(host = %endpoint.host, "anonymous endpoint, skipping login");
            return Ok(SessionHandle {
                host: endpoint.host.clone(),
                output: String::new(),
            });
        };

        let output = runner.run_checked(&spec).await.map_err(|e| match e {
            CommandError::TimedOut { .. } => AuthError::TimedOut {
                host: endpoint.host.clone(),
            },
            CommandError::NonZeroExit { stderr, .. } => AuthError::LoginFailed {
                host: endpoint.host.clone(),
                message: stderr,
            },
            other => AuthError::LoginFailed {
                host: endpoint.host.clone(),
                message: other.to_string(),
            },
        })?;

        debug!(host = %endpoint.host, "login succeeded");
        Ok(SessionHandle {
            host: endpoint.host.clone(),
            output: output.stdout,
        })
    }
}
