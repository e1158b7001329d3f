//! Image references and the per-image mirror work

pub mod retry;
pub mod task;

pub use retry::RetryPolicy;
pub use task::{LocalTag, MirrorSettings, MirrorTask};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fully qualified image: `<repository_path>/<name>:<version>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository_path: String,
    pub name: String,
    pub version: String,
}

impl ImageRef {
    pub fn new(repository_path: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            repository_path: repository_path.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Same image under another repository path
    pub fn with_repository(&self, repository_path: &str) -> Self {
        Self {
            repository_path: repository_path.to_string(),
            ..self.clone()
        }
    }

    pub fn reference(&self) -> String {
        let path = self.repository_path.trim_end_matches('/');
        if path.is_empty() {
            format!("{}:{}", self.name, self.version)
        } else {
            format!("{}/{}:{}", path, self.name, self.version)
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_formatting() {
        let image = ImageRef::new("registry.example.com/", "flow-worker", "5.2.1.0");
        assert_eq!(image.reference(), "registry.example.com/flow-worker:5.2.1.0");
        assert_eq!(image.with_repository("").reference(), "flow-worker:5.2.1.0");
    }

    #[test]
    fn test_structural_equality() {
        let a = ImageRef::new("corda", "db-worker", "1.0");
        let b = ImageRef::new("corda".to_string(), "db-worker".to_string(), "1.0".to_string());
        assert_eq!(a, b);
        assert_ne!(a, a.with_repository("other"));
    }
}
