//! Command-line argument parsing

use crate::config::MirrorConfig;
use crate::error::ConfigError;
use crate::release::PolicyKind;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "image-mirror")]
#[command(about = "Mirror container images into a private Artifact Registry repository")]
#[command(disable_version_flag = true)]
pub struct Args {
    /// Configuration file path
    #[arg(long = "config", short = 'c', help = "Path to a JSON configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long = "region", help = "Cloud region of the destination registry")]
    pub region: Option<String>,

    #[arg(long = "project", short = 'p', help = "Cloud project owning the destination registry")]
    pub project: Option<String>,

    #[arg(long = "repository", short = 'r', help = "Name of the destination repository")]
    pub repository: Option<String>,

    #[arg(long = "version", short = 'V', help = "Release version to mirror")]
    pub version: Option<String>,

    /// Repeatable, or comma separated
    #[arg(
        long = "image",
        short = 'i',
        value_delimiter = ',',
        help = "Image name to mirror (replaces the configured list)"
    )]
    pub images: Vec<String>,

    #[arg(long = "source-host", help = "Registry images are pulled from")]
    pub source_host: Option<String>,

    // Bool settings take an optional value so `--flag=false` can undo a config file
    #[arg(
        long = "anonymous-source",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Pull from the source registry without logging in"
    )]
    pub anonymous_source: Option<bool>,

    #[arg(long = "archive-url", help = "Download URL of the staged release bundle")]
    pub archive_url: Option<String>,

    #[arg(long = "extract-dir", help = "Directory the release bundle is extracted into")]
    pub extract_dir: Option<PathBuf>,

    #[arg(
        long = "clean-extract",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Remove the extraction directory before unpacking"
    )]
    pub clean_extract: Option<bool>,

    #[arg(
        long = "release-mode",
        help = "How to route the version: auto (letters mean published), published, staged"
    )]
    pub release_mode: Option<PolicyKind>,

    #[arg(long = "local-namespace", help = "Local namespace images are tagged from")]
    pub local_namespace: Option<String>,

    #[arg(
        long = "tag-from-acquired",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Tag from the pulled or loaded reference instead of the local namespace"
    )]
    pub tag_from_acquired: Option<bool>,

    #[arg(long = "concurrency", short = 'j', help = "Number of pipeline nodes run at once")]
    pub concurrency: Option<usize>,

    #[arg(long = "timeout", short = 't', help = "Timeout for login, provisioning and tag commands in seconds")]
    pub timeout: Option<u64>,

    #[arg(long = "pull-timeout", help = "Timeout for each pull or load in seconds")]
    pub pull_timeout: Option<u64>,

    #[arg(long = "push-timeout", help = "Timeout for each push attempt in seconds")]
    pub push_timeout: Option<u64>,

    #[arg(long = "retry", help = "Attempts per push, including the first")]
    pub retry: Option<u32>,

    #[arg(long = "output", short = 'o', default_value = "text", help = "Output format: text, json")]
    pub output: String,

    #[arg(long = "dry-run", short = 'n', help = "Print the ordered pipeline without running it")]
    pub dry_run: bool,

    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long = "quiet", short = 'q', conflicts_with = "verbose", help = "Only print the final result")]
    pub quiet: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments that do not depend on the merged configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.output.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::Invalid {
                field: "output",
                message: format!("'{}' is not one of: text, json", other),
            }),
        }
    }

    pub fn json_output(&self) -> bool {
        self.output == "json"
    }

    /// Load configuration from `IMAGE_MIRROR_*` environment variables
    pub fn from_env(self) -> Self {
        self.from_lookup(|name| std::env::var(name).ok())
    }

    /// Environment overrides through an arbitrary lookup
    pub fn from_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("IMAGE_MIRROR_{}", name)).filter(|v| !v.is_empty());

        if let Some(region) = var("REGION") {
            self.region = Some(region);
        }
        if let Some(project) = var("PROJECT") {
            self.project = Some(project);
        }
        if let Some(repository) = var("REPOSITORY") {
            self.repository = Some(repository);
        }
        if let Some(version) = var("VERSION") {
            self.version = Some(version);
        }
        if let Some(images) = var("IMAGES") {
            self.images = images.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(archive_url) = var("ARCHIVE_URL") {
            self.archive_url = Some(archive_url);
        }
        if let Some(mode) = var("RELEASE_MODE").and_then(|m| m.parse().ok()) {
            self.release_mode = Some(mode);
        }
        if let Some(concurrency) = var("CONCURRENCY").and_then(|c| c.parse().ok()) {
            self.concurrency = Some(concurrency);
        }
        if let Some(timeout) = var("TIMEOUT").and_then(|t| t.parse().ok()) {
            self.timeout = Some(timeout);
        }
        if let Some(anonymous) = var("ANONYMOUS_SOURCE").and_then(|v| v.parse().ok()) {
            self.anonymous_source = Some(anonymous);
        }
        if let Some(clean) = var("CLEAN_EXTRACT").and_then(|v| v.parse().ok()) {
            self.clean_extract = Some(clean);
        }
        if var("VERBOSE").is_some() {
            self.verbose = true;
        }

        self
    }

    /// Merge defaults, the optional config file and these arguments into one configuration
    pub fn resolve_config(&self) -> Result<MirrorConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => MirrorConfig::load(path)?,
            None => MirrorConfig::default(),
        };

        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(project) = &self.project {
            config.project = project.clone();
        }
        if let Some(repository) = &self.repository {
            config.repository = repository.clone();
        }
        if let Some(version) = &self.version {
            config.version = version.clone();
        }
        if !self.images.is_empty() {
            config.images = self
                .images
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(source_host) = &self.source_host {
            config.source_host = source_host.clone();
        }
        if let Some(archive_url) = &self.archive_url {
            config.archive_url = Some(archive_url.clone());
        }
        if let Some(extract_dir) = &self.extract_dir {
            config.extract_dir = Some(extract_dir.clone());
        }
        if let Some(mode) = self.release_mode {
            config.release_mode = mode;
        }
        if let Some(namespace) = &self.local_namespace {
            config.local_namespace = namespace.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.command_timeout_secs = timeout;
        }
        if let Some(pull_timeout) = self.pull_timeout {
            config.pull_timeout_secs = pull_timeout;
        }
        if let Some(push_timeout) = self.push_timeout {
            config.push_timeout_secs = push_timeout;
        }
        if let Some(retry) = self.retry {
            config.retry.max_attempts = retry;
        }
        if let Some(anonymous) = self.anonymous_source {
            config.anonymous_source = anonymous;
        }
        if let Some(clean) = self.clean_extract {
            config.clean_extract = clean;
        }
        if let Some(tag_from_acquired) = self.tag_from_acquired {
            config.tag_from_acquired = tag_from_acquired;
        }

        config.validate()?;
        Ok(config)
    }
}
