//! Wiring a mirroring run into a dependency graph
//!
//! ```text
//! provision-registry ──> login-destination ──┬──> acquire-<image> ──> tag-<image> ──> push-<image>
//!         │                                  │          ^                                ^
//!         └──> extract-archive (staged) ─────┼──────────┘                                │
//! login-source (published) ──────────────────┘          login-destination ───────────────┘
//! ```

use crate::error::GraphError;
use crate::mirror::{ImageRef, MirrorSettings, MirrorTask};
use crate::pipeline::graph::{DependencyNode, NodeAction, PipelineRun, Stage};
use crate::provision::RegistryRequest;
use crate::registry::{AuthMode, RegistryEndpoint};
use crate::release::ReleaseMode;

pub const PROVISION_NODE: &str = "provision-registry";
pub const DESTINATION_LOGIN_NODE: &str = "login-destination";
pub const SOURCE_LOGIN_NODE: &str = "login-source";
pub const EXTRACT_NODE: &str = "extract-archive";

/// The registry images are mirrored into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRegistry {
    pub endpoint: RegistryEndpoint,
    /// `<host>/<project>/<repository>`, the prefix every mirrored image is pushed under
    pub repository_path: String,
    pub request: RegistryRequest,
}

impl DestinationRegistry {
    /// A Google Artifact Registry docker repository, authenticated through gcloud
    pub fn artifact_registry(region: &str, project: &str, repository: &str, description: &str) -> Self {
        let host = format!("{}-docker.pkg.dev", region);
        Self {
            repository_path: format!("{}/{}/{}", host, project, repository),
            endpoint: RegistryEndpoint::cloud_helper(host),
            request: RegistryRequest::docker(repository, project, region, description),
        }
    }
}

pub struct PipelineGraph {
    settings: MirrorSettings,
}

impl PipelineGraph {
    pub fn new(settings: MirrorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.settings
    }

    /// Build the full graph for one run.
    ///
    /// Image order is kept in the resulting tasks and report. Duplicate image names are
    /// rejected as duplicate node ids.
    pub fn build(
        &self,
        images: &[ImageRef],
        mode: &ReleaseMode,
        destination: &DestinationRegistry,
        source: &RegistryEndpoint,
    ) -> Result<PipelineRun, GraphError> {
        let tasks: Vec<MirrorTask> = images
            .iter()
            .map(|image| MirrorTask::new(image.clone(), &destination.repository_path))
            .collect();
        let mut run = PipelineRun::new(mode.clone(), tasks.clone());

        run.add_node(DependencyNode::new(
            PROVISION_NODE,
            Stage::Provision,
            NodeAction::Provision(destination.request.clone()),
        ))?;

        run.add_node(
            DependencyNode::new(
                DESTINATION_LOGIN_NODE,
                Stage::DestinationLogin,
                NodeAction::Login(destination.endpoint.clone()),
            )
            .after(PROVISION_NODE),
        )?;

        let source_login = Self::needs_source_login(mode, source);
        if source_login {
            run.add_node(DependencyNode::new(
                SOURCE_LOGIN_NODE,
                Stage::SourceLogin,
                NodeAction::Login(source.clone()),
            ))?;
        }

        if let ReleaseMode::Staged { archive_url } = mode {
            run.add_node(
                DependencyNode::new(
                    EXTRACT_NODE,
                    Stage::Extract,
                    NodeAction::Extract {
                        url: archive_url.clone(),
                        destination: self.settings.extract_dir.clone(),
                    },
                )
                .after(PROVISION_NODE),
            )?;
        }

        for (position, task) in tasks.iter().enumerate() {
            let mut acquire = DependencyNode::new(
                task.acquire_id(),
                Stage::Acquire,
                NodeAction::Run(task.acquire_command(mode, &self.settings)),
            )
            .after(DESTINATION_LOGIN_NODE)
            .for_task(position);

            acquire = if mode.is_staged() {
                acquire.after(EXTRACT_NODE)
            } else if source_login {
                acquire.after(SOURCE_LOGIN_NODE)
            } else {
                acquire
            };
            run.add_node(acquire)?;

            run.add_node(
                DependencyNode::new(
                    task.tag_id(),
                    Stage::Tag,
                    NodeAction::Run(task.tag_command(mode, &self.settings)),
                )
                .after(task.acquire_id())
                .for_task(position),
            )?;

            run.add_node(
                DependencyNode::new(task.push_id(), Stage::Push, NodeAction::Run(task.push_command(&self.settings)))
                    .after(task.tag_id())
                    .after(DESTINATION_LOGIN_NODE)
                    .for_task(position),
            )?;
        }

        run.topological_order()?;
        Ok(run)
    }

    /// Published releases log into the source unless it is anonymous. Staged releases never
    /// pull from it, so they only log in when the credential variables are actually set.
    fn needs_source_login(mode: &ReleaseMode, source: &RegistryEndpoint) -> bool {
        match mode {
            ReleaseMode::Published => source.requires_login(),
            ReleaseMode::Staged { .. } => match &source.auth {
                AuthMode::Credentialed(credentials) => credentials.is_available(),
                AuthMode::CloudHelper | AuthMode::Anonymous => false,
            },
        }
    }
}
