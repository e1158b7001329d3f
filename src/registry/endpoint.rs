//! Registry endpoints and the credentials used to reach them

use crate::command::Secret;
use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Names of the environment variables holding a username and password.
///
/// Only the variable names are stored; values are read at login time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSource {
    pub username_var: String,
    pub password_var: String,
}

impl CredentialSource {
    pub fn new(username_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        Self {
            username_var: username_var.into(),
            password_var: password_var.into(),
        }
    }

    pub fn resolve(&self, host: &str) -> Result<(String, Secret), AuthError> {
        self.resolve_with(host, |variable| env::var(variable).ok())
    }

    /// Resolve through an arbitrary lookup instead of the process environment
    pub fn resolve_with(
        &self,
        host: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(String, Secret), AuthError> {
        let read = |variable: &str| {
            lookup(variable)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AuthError::MissingCredentials {
                    host: host.to_string(),
                    variable: variable.to_string(),
                })
        };

        let username = read(&self.username_var)?;
        let password = read(&self.password_var)?;
        Ok((username, Secret::new(password)))
    }

    /// Both variables are set and non-empty in the process environment
    pub fn is_available(&self) -> bool {
        self.resolve("").is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AuthMode {
    /// Username and password from the environment
    Credentialed(CredentialSource),
    /// Local cloud credentials exchanged by the cloud CLI's docker helper
    CloudHelper,
    Anonymous,
}

/// One side of a mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    pub host: String,
    pub auth: AuthMode,
}

impl RegistryEndpoint {
    pub fn credentialed(host: impl Into<String>, credentials: CredentialSource) -> Self {
        Self {
            host: host.into(),
            auth: AuthMode::Credentialed(credentials),
        }
    }

    pub fn cloud_helper(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            auth: AuthMode::CloudHelper,
        }
    }

    pub fn anonymous(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            auth: AuthMode::Anonymous,
        }
    }

    pub fn requires_login(&self) -> bool {
        !matches!(self.auth, AuthMode::Anonymous)
    }
}

impl fmt::Display for RegistryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.auth {
            AuthMode::Credentialed(_) => "credentialed",
            AuthMode::CloudHelper => "cloud helper",
            AuthMode::Anonymous => "anonymous",
        };
        write!(f, "{} ({})", self.host, mode)
    }
}
