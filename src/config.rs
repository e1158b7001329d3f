//! Run configuration
//!
//! One [`MirrorConfig`] describes a whole mirroring run. It starts from built-in defaults,
//! can be loaded from a JSON file and is then refined by command-line flags and
//! `IMAGE_MIRROR_*` environment variables (see [`crate::cli::Args`]).

use crate::archive::ArchiveExtractor;
use crate::command::CommandRunner;
use crate::error::ConfigError;
use crate::mirror::{ImageRef, LocalTag, MirrorSettings, RetryPolicy};
use crate::pipeline::DestinationRegistry;
use crate::provision::ArtifactRegistryProvisioner;
use crate::registry::{CredentialSource, RegistryEndpoint, RegistrySession};
use crate::release::{PolicyKind, ReleaseMode, ReleaseRouter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "us-central1";
pub const DEFAULT_REPOSITORY: &str = "private-docker-repo";
pub const DEFAULT_DESCRIPTION: &str = "Private Docker repository";
pub const DEFAULT_SOURCE_HOST: &str = "corda-ent-docker-stable.software.r3.com";
pub const DEFAULT_USERNAME_VAR: &str = "CORDA_ARTIFACTORY_USERNAME";
pub const DEFAULT_PASSWORD_VAR: &str = "CORDA_ARTIFACTORY_PASSWORD";

/// Worker images of a Corda 5 enterprise release
pub const DEFAULT_IMAGES: [&str; 13] = [
    "corda-ent-rest-worker",
    "corda-ent-flow-worker",
    "corda-ent-member-worker",
    "corda-ent-p2p-gateway-worker",
    "corda-ent-p2p-link-manager-worker",
    "corda-ent-db-worker",
    "corda-ent-flow-mapper-worker",
    "corda-ent-verification-worker",
    "corda-ent-persistence-worker",
    "corda-ent-token-selection-worker",
    "corda-ent-crypto-worker",
    "corda-ent-uniqueness-worker",
    "corda-ent-plugins",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub region: String,
    pub project: String,
    pub repository: String,
    pub repository_description: String,
    pub version: String,
    pub images: Vec<String>,

    pub source_host: String,
    pub source_username_var: String,
    pub source_password_var: String,
    pub anonymous_source: bool,

    /// Download location of the staged release bundle
    pub archive_url: Option<String>,
    /// Defaults to `/tmp/docker-images/<repository>/`
    pub extract_dir: Option<PathBuf>,
    pub archive_image_pattern: String,
    pub clean_extract: bool,

    pub local_namespace: String,
    pub tag_from_acquired: bool,
    pub release_mode: PolicyKind,

    pub concurrency: usize,
    /// Login, provisioning and tag commands
    pub command_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub push_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub retry: RetryPolicy,

    pub docker_bin: String,
    pub gcloud_bin: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            project: String::new(),
            repository: DEFAULT_REPOSITORY.to_string(),
            repository_description: DEFAULT_DESCRIPTION.to_string(),
            version: String::new(),
            images: DEFAULT_IMAGES.iter().map(|s| s.to_string()).collect(),
            source_host: DEFAULT_SOURCE_HOST.to_string(),
            source_username_var: DEFAULT_USERNAME_VAR.to_string(),
            source_password_var: DEFAULT_PASSWORD_VAR.to_string(),
            anonymous_source: false,
            archive_url: None,
            extract_dir: None,
            archive_image_pattern: "{name}-{version}.tar".to_string(),
            clean_extract: false,
            local_namespace: "corda".to_string(),
            tag_from_acquired: false,
            release_mode: PolicyKind::Auto,
            concurrency: 4,
            command_timeout_secs: 300,
            pull_timeout_secs: 1800,
            push_timeout_secs: 1800,
            download_timeout_secs: 2 * 60 * 60,
            retry: RetryPolicy::default(),
            docker_bin: "docker".to_string(),
            gcloud_bin: "gcloud".to_string(),
        }
    }
}

impl MirrorConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File {
            path: path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("region", &self.region),
            ("project", &self.project),
            ("repository", &self.repository),
            ("version", &self.version),
            ("source_host", &self.source_host),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }

        if self.images.is_empty() {
            return Err(ConfigError::Missing("images"));
        }
        let mut seen = HashSet::new();
        for image in &self.images {
            if image.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "images",
                    message: "image names must not be empty".to_string(),
                });
            }
            if !seen.insert(image.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "images",
                    message: format!("image '{}' is listed more than once", image),
                });
            }
        }

        let positive = [
            ("concurrency", self.concurrency as u64),
            ("command_timeout_secs", self.command_timeout_secs),
            ("pull_timeout_secs", self.pull_timeout_secs),
            ("push_timeout_secs", self.push_timeout_secs),
            ("download_timeout_secs", self.download_timeout_secs),
            ("retry.max_attempts", self.retry.max_attempts as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if let Some(archive_url) = &self.archive_url {
            let parsed = url::Url::parse(archive_url).map_err(|e| ConfigError::Invalid {
                field: "archive_url",
                message: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    field: "archive_url",
                    message: format!("unsupported scheme '{}', expected http or https", parsed.scheme()),
                });
            }
        }

        if self.release_mode().is_staged() && self.archive_url.is_none() {
            return Err(ConfigError::Missing("archive_url"));
        }

        Ok(())
    }

    pub fn destination_host(&self) -> String {
        format!("{}-docker.pkg.dev", self.region)
    }

    /// `<host>/<project>/<repository>`
    pub fn destination_repository_path(&self) -> String {
        format!("{}/{}/{}", self.destination_host(), self.project, self.repository)
    }

    pub fn destination(&self) -> DestinationRegistry {
        DestinationRegistry::artifact_registry(&self.region, &self.project, &self.repository, &self.repository_description)
    }

    pub fn source_endpoint(&self) -> RegistryEndpoint {
        if self.anonymous_source {
            RegistryEndpoint::anonymous(&self.source_host)
        } else {
            RegistryEndpoint::credentialed(
                &self.source_host,
                CredentialSource::new(&self.source_username_var, &self.source_password_var),
            )
        }
    }

    pub fn router(&self) -> ReleaseRouter {
        ReleaseRouter::new(
            self.release_mode.into_policy(),
            self.archive_url.clone().unwrap_or_default(),
        )
    }

    /// Mode of this run's version, decided once
    pub fn release_mode(&self) -> ReleaseMode {
        self.router().classify(&self.version)
    }

    /// Images in configured order, addressed on the source registry
    pub fn image_refs(&self) -> Vec<ImageRef> {
        self.images
            .iter()
            .map(|name| ImageRef::new(&self.source_host, name.trim(), &self.version))
            .collect()
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.extract_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/tmp/docker-images").join(&self.repository))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn mirror_settings(&self) -> MirrorSettings {
        MirrorSettings {
            docker_bin: self.docker_bin.clone(),
            extract_dir: self.extract_dir(),
            archive_image_pattern: self.archive_image_pattern.clone(),
            local_tag: if self.tag_from_acquired {
                LocalTag::AsAcquired
            } else {
                LocalTag::Namespace(self.local_namespace.clone())
            },
            pull_timeout: Duration::from_secs(self.pull_timeout_secs),
            tag_timeout: self.command_timeout(),
            push_timeout: Duration::from_secs(self.push_timeout_secs),
        }
    }

    pub fn extractor(&self) -> ArchiveExtractor {
        ArchiveExtractor::new()
            .with_download_timeout(Duration::from_secs(self.download_timeout_secs))
            .with_clean_destination(self.clean_extract)
    }

    pub fn session(&self) -> RegistrySession {
        RegistrySession::new(&self.docker_bin, &self.gcloud_bin, self.command_timeout())
    }

    pub fn provisioner(&self, runner: Arc<dyn CommandRunner>) -> ArtifactRegistryProvisioner {
        ArtifactRegistryProvisioner::new(runner, &self.gcloud_bin, self.command_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> MirrorConfig {
        MirrorConfig {
            project: "demo-project".to_string(),
            version: "5.2.1.0-GA".to_string(),
            ..MirrorConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = MirrorConfig::default();
        assert_eq!(config.images.len(), 13);
        assert_eq!(config.extract_dir(), PathBuf::from("/tmp/docker-images/private-docker-repo"));
        assert_eq!(config.validate(), Err(ConfigError::Missing("project")));
    }

    #[test]
    fn test_derived_destination() {
        let config = config();
        assert_eq!(config.destination_host(), "us-central1-docker.pkg.dev");
        assert_eq!(
            config.destination_repository_path(),
            "us-central1-docker.pkg.dev/demo-project/private-docker-repo"
        );
        assert_eq!(config.destination().repository_path, config.destination_repository_path());
    }

    #[test]
    fn test_staged_version_requires_archive_url() {
        let mut config = config();
        config.version = "5.2.1.0".to_string();
        assert_eq!(config.validate(), Err(ConfigError::Missing("archive_url")));

        config.archive_url = Some("https://downloads.example.com/worker-images.tar.gz".to_string());
        assert!(config.validate().is_ok());
        assert!(config.release_mode().is_staged());
    }

    #[test]
    fn test_release_mode_override() {
        let mut config = config();
        config.version = "5.2.1.0-RC02".to_string();
        assert_eq!(config.release_mode(), ReleaseMode::Published);

        config.release_mode = PolicyKind::Staged;
        config.archive_url = Some("https://downloads.example.com/rc02.tar.gz".to_string());
        assert!(config.release_mode().is_staged());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = config();
        config.images.push("corda-ent-db-worker".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "images", .. })));

        let mut config = self::config();
        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "concurrency", .. })));

        let mut config = self::config();
        config.archive_url = Some("ftp://downloads.example.com/images.tar.gz".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "archive_url", .. })));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"project": "file-project", "version": "1.0-GA", "images": ["a", "b"], "retry": {{"max_attempts": 5, "base_delay": 10, "max_delay": 100}}}}"#
        )
        .unwrap();

        let config = MirrorConfig::load(file.path()).unwrap();
        assert_eq!(config.project, "file-project");
        assert_eq!(config.images, vec!["a", "b"]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.region, DEFAULT_REGION);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_retry_block() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"project": "file-project", "version": "1.0-GA", "retry": {{"max_attempts": 5}}}}"#).unwrap();

        let config = MirrorConfig::load(file.path()).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, RetryPolicy::default().base_delay);
    }

    #[test]
    fn test_image_refs_use_source_host() {
        let refs = config().image_refs();
        assert_eq!(refs[0].reference(), format!("{}/corda-ent-rest-worker:5.2.1.0-GA", DEFAULT_SOURCE_HOST));
    }

    #[test]
    fn test_anonymous_source() {
        let mut config = config();
        config.anonymous_source = true;
        assert!(!config.source_endpoint().requires_login());
    }
}
