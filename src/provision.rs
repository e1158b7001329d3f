//! Destination registry provisioning

use crate::command::{CommandRunner, CommandSpec};
use crate::error::ProvisionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Parameters for the destination registry resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRequest {
    pub name: String,
    pub project: String,
    pub location: String,
    pub description: String,
    pub format: String,
}

impl RegistryRequest {
    pub fn docker(
        name: impl Into<String>,
        project: impl Into<String>,
        location: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            location: location.into(),
            description: description.into(),
            format: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHandle {
    pub name: String,
    pub created: bool,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the registry, succeeding without changes when it already exists
    async fn create_registry(&self, request: &RegistryRequest) -> Result<RegistryHandle, ProvisionError>;
}

/// Provisions Google Artifact Registry repositories through the gcloud CLI
pub struct ArtifactRegistryProvisioner {
    runner: Arc<dyn CommandRunner>,
    gcloud_bin: String,
    timeout: Duration,
}

impl ArtifactRegistryProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, gcloud_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            gcloud_bin: gcloud_bin.into(),
            timeout,
        }
    }

    pub fn describe_command(&self, request: &RegistryRequest) -> CommandSpec {
        CommandSpec::new(
            self.gcloud_bin.clone(),
            [
                "artifacts".to_string(),
                "repositories".to_string(),
                "describe".to_string(),
                request.name.clone(),
                format!("--location={}", request.location),
                format!("--project={}", request.project),
            ],
        )
        .with_timeout(self.timeout)
    }

    pub fn create_command(&self, request: &RegistryRequest) -> CommandSpec {
        CommandSpec::new(
            self.gcloud_bin.clone(),
            [
                "artifacts".to_string(),
                "repositories".to_string(),
                "create".to_string(),
                request.name.clone(),
                format!("--repository-format={}", request.format),
                format!("--location={}", request.location),
                format!("--description={}", request.description),
                format!("--project={}", request.project),
            ],
        )
        .with_timeout(self.timeout)
    }
}

#[async_trait]
impl Provisioner for ArtifactRegistryProvisioner {
    async fn create_registry(&self, request: &RegistryRequest) -> Result<RegistryHandle, ProvisionError> {
        let describe = self.describe_command(request);
        let existing = self
            .runner
            .run(&describe)
            .await
            .map_err(|e| ProvisionError::Command(e.to_string()))?;

        if existing.is_success() {
            debug!(registry = %request.name, "registry already exists");
            return Ok(RegistryHandle {
                name: request.name.clone(),
                created: false,
            });
        }

        let create = self.create_command(request);
        let output = self
            .runner
            .run(&create)
            .await
            .map_err(|e| ProvisionError::Command(e.to_string()))?;

        if !output.is_success() {
            return Err(ProvisionError::CreateFailed {
                name: request.name.clone(),
                location: request.location.clone(),
                message: output.stderr.trim().to_string(),
            });
        }

        info!(registry = %request.name, location = %request.location, "registry created");
        Ok(RegistryHandle {
            name: request.name.clone(),
            created: true,
        })
    }
}
