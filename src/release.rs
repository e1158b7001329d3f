//! Release routing: decide whether a version is pulled live or loaded from an archive

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a release's images come from for this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseMode {
    /// Generally available; pulled by qualified name from the source registry
    Published,
    /// Candidate build; images are loaded from an extracted archive
    Staged { archive_url: String },
}

impl ReleaseMode {
    pub fn is_staged(&self) -> bool {
        matches!(self, ReleaseMode::Staged { .. })
    }

    pub fn archive_url(&self) -> Option<&str> {
        match self {
            ReleaseMode::Published => None,
            ReleaseMode::Staged { archive_url } => Some(archive_url),
        }
    }
}

impl fmt::Display for ReleaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseMode::Published => write!(f, "published"),
            ReleaseMode::Staged { archive_url } => write!(f, "staged ({})", archive_url),
        }
    }
}

/// Caller-supplied rule for telling published versions from staged ones
pub trait ReleasePolicy: Send + Sync {
    fn is_published(&self, version: &str) -> bool;
}

/// Any alphabetic character marks a version as published.
///
/// `5.2.1.0` is staged, `5.2.1.0-GA` is published. Note that `5.2.1.0-RC02` is also
/// classified as published; use [`FixedPolicy`] when that is not what a release intends.
#[derive(Debug, Clone, Copy, Default)]
pub struct LetterHeuristic;

impl ReleasePolicy for LetterHeuristic {
    fn is_published(&self, version: &str) -> bool {
        version.chars().any(char::is_alphabetic)
    }
}

/// Ignores the version and always answers the same way
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy {
    pub published: bool,
}

impl ReleasePolicy for FixedPolicy {
    fn is_published(&self, _version: &str) -> bool {
        self.published
    }
}

/// Policy selector as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Auto,
    Published,
    Staged,
}

impl PolicyKind {
    pub fn into_policy(self) -> Box<dyn ReleasePolicy> {
        match self {
            PolicyKind::Auto => Box::new(LetterHeuristic),
            PolicyKind::Published => Box::new(FixedPolicy { published: true }),
            PolicyKind::Staged => Box::new(FixedPolicy { published: false }),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(PolicyKind::Auto),
            "published" => Ok(PolicyKind::Published),
            "staged" => Ok(PolicyKind::Staged),
            other => Err(format!(
                "unknown release mode '{}', expected one of: auto, published, staged",
                other
            )),
        }
    }
}

/// Verb used by the acquire step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceVerb {
    Pull,
    Load,
}

impl SourceVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceVerb::Pull => "pull",
            SourceVerb::Load => "load",
        }
    }
}

/// Verb and location prefix the acquire command is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFragment {
    pub verb: SourceVerb,
    pub location_prefix: String,
}

pub struct ReleaseRouter {
    policy: Box<dyn ReleasePolicy>,
    archive_url: String,
}

impl ReleaseRouter {
    /// `archive_url` is the download location associated with the version being routed.
    pub fn new(policy: Box<dyn ReleasePolicy>, archive_url: impl Into<String>) -> Self {
        Self {
            policy,
            archive_url: archive_url.into(),
        }
    }

    pub fn with_letter_heuristic(archive_url: impl Into<String>) -> Self {
        Self::new(Box::new(LetterHeuristic), archive_url)
    }

    pub fn classify(&self, version: &str) -> ReleaseMode {
        if self.policy.is_published(version) {
            ReleaseMode::Published
        } else {
            ReleaseMode::Staged {
                archive_url: self.archive_url.clone(),
            }
        }
    }

    pub fn source_fragment(mode: &ReleaseMode, source_host: &str) -> SourceFragment {
        match mode {
            ReleaseMode::Published => SourceFragment {
                verb: SourceVerb::Pull,
                location_prefix: source_host.trim_end_matches('/').to_string(),
            },
            ReleaseMode::Staged { .. } => SourceFragment {
                verb: SourceVerb::Load,
                location_prefix: String::new(),
            },
        }
    }
}
