//! Results of a pipeline run

use crate::error::PipelineError;
use crate::mirror::{ImageRef, MirrorTask};
use crate::pipeline::graph::{NodeId, Stage};
use crate::release::ReleaseMode;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Succeeded { output: String },
    Failed { error: PipelineError },
    /// Never ran. `blocked_by` names the failed node upstream, or is `None` when the run
    /// was aborted before the node became ready.
    Skipped { blocked_by: Option<NodeId> },
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, NodeOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, NodeOutcome::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeOutcome::Succeeded { .. } => "succeeded",
            NodeOutcome::Failed { .. } => "failed",
            NodeOutcome::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub id: NodeId,
    pub stage: Stage,
    pub outcome: NodeOutcome,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageStatus {
    Pushed,
    AcquireFailed,
    TagFailed,
    PushFailed,
    Skipped,
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImageStatus::Pushed => "Pushed",
            ImageStatus::AcquireFailed => "AcquireFailed",
            ImageStatus::TagFailed => "TagFailed",
            ImageStatus::PushFailed => "PushFailed",
            ImageStatus::Skipped => "Skipped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReport {
    pub image: ImageRef,
    pub destination: String,
    pub status: ImageStatus,
    pub error: Option<PipelineError>,
}

impl ImageReport {
    /// Status of one image from the outcomes of its three nodes
    pub fn from_outcomes(task: &MirrorTask, acquire: &NodeOutcome, tag: &NodeOutcome, push: &NodeOutcome) -> Self {
        let (status, error) = match (acquire, tag, push) {
            (_, _, NodeOutcome::Succeeded { .. }) => (ImageStatus::Pushed, None),
            (NodeOutcome::Failed { error }, _, _) => (ImageStatus::AcquireFailed, Some(error.clone())),
            (_, NodeOutcome::Failed { error }, _) => (ImageStatus::TagFailed, Some(error.clone())),
            (_, _, NodeOutcome::Failed { error }) => (ImageStatus::PushFailed, Some(error.clone())),
            _ => (ImageStatus::Skipped, None),
        };
        Self {
            image: task.source.clone(),
            destination: task.destination.reference(),
            status,
            error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub mode: ReleaseMode,
    pub nodes: Vec<NodeReport>,
    pub images: Vec<ImageReport>,
    /// Fatal failure that stopped the run early
    pub abort: Option<PipelineError>,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn image(&self, name: &str) -> Option<&ImageReport> {
        self.images.iter().find(|image| image.image.name == name)
    }

    pub fn count(&self, status: ImageStatus) -> usize {
        self.images.iter().filter(|image| image.status == status).count()
    }

    pub fn is_success(&self) -> bool {
        self.abort.is_none() && self.images.iter().all(|image| image.status == ImageStatus::Pushed)
    }

    /// 0 only when every image was pushed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .nodes
            .iter()
            .map(|node| {
                let mut value = json!({
                    "id": node.id,
                    "stage": node.stage,
                    "status": node.outcome.label(),
                    "attempts": node.attempts,
                    "elapsed_ms": node.elapsed.as_millis() as u64,
                });
                match &node.outcome {
                    NodeOutcome::Succeeded { .. } => {}
                    NodeOutcome::Failed { error } => value["error"] = json!(error.to_string()),
                    NodeOutcome::Skipped { blocked_by } => value["blocked_by"] = json!(blocked_by),
                }
                value
            })
            .collect();

        let images: Vec<serde_json::Value> = self
            .images
            .iter()
            .map(|image| {
                json!({
                    "image": image.image.name,
                    "version": image.image.version,
                    "destination": image.destination,
                    "status": image.status,
                    "error": image.error.as_ref().map(|e| e.to_string()),
                })
            })
            .collect();

        json!({
            "run_id": self.run_id.to_string(),
            "mode": self.mode.to_string(),
            "success": self.is_success(),
            "aborted": self.abort.as_ref().map(|e| e.to_string()),
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "images": images,
            "nodes": nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;

    fn task() -> MirrorTask {
        MirrorTask::new(
            ImageRef::new("software.example.com", "crypto-worker", "5.2.1.0"),
            "us-central1-docker.pkg.dev/demo/repo",
        )
    }

    fn ok() -> NodeOutcome {
        NodeOutcome::Succeeded { output: String::new() }
    }

    fn failed() -> NodeOutcome {
        NodeOutcome::Failed {
            error: PipelineError::Mirror(MirrorError::TagFailed {
                image: "crypto-worker:5.2.1.0".to_string(),
                message: "No such image".to_string(),
            }),
        }
    }

    fn skipped() -> NodeOutcome {
        NodeOutcome::Skipped { blocked_by: None }
    }

    #[test]
    fn test_image_status_from_outcomes() {
        let task = task();
        assert_eq!(ImageReport::from_outcomes(&task, &ok(), &ok(), &ok()).status, ImageStatus::Pushed);
        assert_eq!(
            ImageReport::from_outcomes(&task, &failed(), &skipped(), &skipped()).status,
            ImageStatus::AcquireFailed
        );
        assert_eq!(
            ImageReport::from_outcomes(&task, &ok(), &failed(), &skipped()).status,
            ImageStatus::TagFailed
        );
        assert_eq!(
            ImageReport::from_outcomes(&task, &ok(), &ok(), &failed()).status,
            ImageStatus::PushFailed
        );
        assert_eq!(
            ImageReport::from_outcomes(&task, &skipped(), &skipped(), &skipped()).status,
            ImageStatus::Skipped
        );
    }

    #[test]
    fn test_exit_code_and_json() {
        let task = task();
        let report = PipelineReport {
            run_id: Uuid::nil(),
            mode: ReleaseMode::Published,
            nodes: Vec::new(),
            images: vec![
                ImageReport::from_outcomes(&task, &ok(), &ok(), &ok()),
                ImageReport::from_outcomes(&task, &ok(), &failed(), &skipped()),
            ],
            abort: None,
            elapsed: Duration::from_secs(1),
        };

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.count(ImageStatus::Pushed), 1);

        let value = report.to_json();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["images"][0]["status"], json!("Pushed"));
        assert_eq!(value["images"][1]["status"], json!("TagFailed"));
        assert_eq!(
            value["images"][0]["destination"],
            json!("us-central1-docker.pkg.dev/demo/repo/crypto-worker:5.2.1.0")
        );
    }
}
