//! Per-image mirror tasks: acquire, tag, push

use crate::command::CommandSpec;
use crate::mirror::ImageRef;
use crate::release::{ReleaseMode, ReleaseRouter, SourceVerb};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which local reference the tag step reads from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalTag {
    /// `<namespace>/<name>:<version>`, regardless of where the image came from
    Namespace(String),
    /// The reference the acquire step produced
    AsAcquired,
}

/// Knobs shared by every mirror task in a run
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub docker_bin: String,
    pub extract_dir: PathBuf,
    /// File name of an image inside the extracted archive; `{name}` and `{version}` are substituted
    pub archive_image_pattern: String,
    pub local_tag: LocalTag,
    pub pull_timeout: Duration,
    pub tag_timeout: Duration,
    pub push_timeout: Duration,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            extract_dir: PathBuf::from("/tmp/docker-images"),
            archive_image_pattern: "{name}-{version}.tar".to_string(),
            local_tag: LocalTag::Namespace("corda".to_string()),
            pull_timeout: Duration::from_secs(1800),
            tag_timeout: Duration::from_secs(60),
            push_timeout: Duration::from_secs(1800),
        }
    }
}

/// Mirror of one image into the destination repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTask {
    pub source: ImageRef,
    pub destination: ImageRef,
}

impl MirrorTask {
    pub fn new(source: ImageRef, destination_path: &str) -> Self {
        let destination = source.with_repository(destination_path);
        Self { source, destination }
    }

    pub fn acquire_id(&self) -> String {
        format!("acquire-{}", self.source.name)
    }

    pub fn tag_id(&self) -> String {
        format!("tag-{}", self.source.name)
    }

    pub fn push_id(&self) -> String {
        format!("push-{}", self.source.name)
    }

    pub fn archive_path(&self, settings: &MirrorSettings) -> PathBuf {
        let file_name = settings
            .archive_image_pattern
            .replace("{name}", &self.source.name)
            .replace("{version}", &self.source.version);
        settings.extract_dir.join(file_name)
    }

    /// Reference the acquire step leaves in the local image store
    pub fn acquired_reference(&self, mode: &ReleaseMode) -> String {
        let fragment = ReleaseRouter::source_fragment(mode, &self.source.repository_path);
        self.source.with_repository(&fragment.location_prefix).reference()
    }

    pub fn local_reference(&self, mode: &ReleaseMode, settings: &MirrorSettings) -> String {
        match &settings.local_tag {
            LocalTag::Namespace(namespace) => self.source.with_repository(namespace).reference(),
            LocalTag::AsAcquired => self.acquired_reference(mode),
        }
    }

    pub fn acquire_command(&self, mode: &ReleaseMode, settings: &MirrorSettings) -> CommandSpec {
        let fragment = ReleaseRouter::source_fragment(mode, &self.source.repository_path);
        let args = match fragment.verb {
            SourceVerb::Pull => vec![fragment.verb.as_str().to_string(), self.acquired_reference(mode)],
            SourceVerb::Load => vec![
                fragment.verb.as_str().to_string(),
                "-i".to_string(),
                self.archive_path(settings).display().to_string(),
            ],
        };
        CommandSpec::new(settings.docker_bin.clone(), args).with_timeout(settings.pull_timeout)
    }

    pub fn tag_command(&self, mode: &ReleaseMode, settings: &MirrorSettings) -> CommandSpec {
        CommandSpec::new(
            settings.docker_bin.clone(),
            [
                "tag".to_string(),
                self.local_reference(mode, settings),
                self.destination.reference(),
            ],
        )
        .with_timeout(settings.tag_timeout)
    }

    pub fn push_command(&self, settings: &MirrorSettings) -> CommandSpec {
        CommandSpec::new(settings.docker_bin.clone(), ["push".to_string(), self.destination.reference()])
            .with_timeout(settings.push_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "software.example.com";
    const DEST: &str = "us-central1-docker.pkg.dev/demo-project/private-docker-repo";

    fn task(version: &str) -> MirrorTask {
        MirrorTask::new(ImageRef::new(SOURCE, "rest-worker", version), DEST)
    }

    fn staged() -> ReleaseMode {
        ReleaseMode::Staged {
            archive_url: "https://downloads.example.com/images.tar.gz".to_string(),
        }
    }

    #[test]
    fn test_published_commands() {
        let settings = MirrorSettings::default();
        let task = task("5.2.1.0-GA");
        let mode = ReleaseMode::Published;

        assert_eq!(
            task.acquire_command(&mode, &settings).to_string(),
            "docker pull software.example.com/rest-worker:5.2.1.0-GA"
        );
        assert_eq!(
            task.tag_command(&mode, &settings).to_string(),
            format!("docker tag corda/rest-worker:5.2.1.0-GA {}/rest-worker:5.2.1.0-GA", DEST)
        );
        assert_eq!(
            task.push_command(&settings).to_string(),
            format!("docker push {}/rest-worker:5.2.1.0-GA", DEST)
        );
    }

    #[test]
    fn test_staged_acquire_loads_from_extract_dir() {
        let settings = MirrorSettings {
            extract_dir: PathBuf::from("/tmp/docker-images/private-docker-repo"),
            ..MirrorSettings::default()
        };
        let spec = task("5.2.1.0").acquire_command(&staged(), &settings);
        assert_eq!(
            spec.to_string(),
            "docker load -i /tmp/docker-images/private-docker-repo/rest-worker-5.2.1.0.tar"
        );
        assert_eq!(spec.timeout, settings.pull_timeout);
    }

    #[test]
    fn test_tag_from_acquired_reference() {
        let settings = MirrorSettings {
            local_tag: LocalTag::AsAcquired,
            ..MirrorSettings::default()
        };
        let task = task("5.2.1.0");

        assert_eq!(
            task.local_reference(&ReleaseMode::Published, &settings),
            "software.example.com/rest-worker:5.2.1.0"
        );
        assert_eq!(task.local_reference(&staged(), &settings), "rest-worker:5.2.1.0");
    }

    #[test]
    fn test_node_ids_are_per_image() {
        let task = task("1.0");
        assert_eq!(task.acquire_id(), "acquire-rest-worker");
        assert_eq!(task.tag_id(), "tag-rest-worker");
        assert_eq!(task.push_id(), "push-rest-worker");
    }
}
