//! Dependency-ordered execution of a pipeline run
//!
//! Nodes start as soon as all of their dependencies have succeeded, up to a bounded number
//! at a time. A failed node skips everything downstream of it and nothing else, so one
//! image's failure never stops another image from being mirrored. Provisioning and login
//! failures are the exception: they stop new nodes from starting, let running ones finish,
//! and mark the rest as skipped. A login with no dependents fails on its own.

use crate::archive::Extractor;
use crate::command::CommandRunner;
use crate::error::{AuthError, CommandError, ExtractError, GraphError, MirrorError, PipelineError, ProvisionError};
use crate::logging::Logger;
use crate::mirror::RetryPolicy;
use crate::pipeline::graph::{DependencyNode, NodeAction, PipelineRun, Stage};
use crate::pipeline::report::{ImageReport, NodeOutcome, NodeReport, PipelineReport};
use crate::provision::Provisioner;
use crate::registry::RegistrySession;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// External systems a run talks to
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub provisioner: Arc<dyn Provisioner>,
    pub extractor: Arc<dyn Extractor>,
    pub session: RegistrySession,
}

/// Result of running a single node
struct Attempted {
    result: Result<String, PipelineError>,
    attempts: u32,
    elapsed: Duration,
}

pub struct PipelineExecutor {
    collaborators: Arc<Collaborators>,
    retry: RetryPolicy,
    max_concurrent: usize,
    logger: Logger,
}

impl PipelineExecutor {
    pub fn new(collaborators: Collaborators, logger: Logger) -> Self {
        Self {
            collaborators: Arc::new(collaborators),
            retry: RetryPolicy::default(),
            max_concurrent: 4,
            logger,
        }
    }

    /// Retry policy applied to push nodes
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Execute every node of `run` once.
    ///
    /// Only graph errors are returned as `Err`; every node-level failure ends up in the report.
    pub async fn execute(&self, run: PipelineRun) -> Result<PipelineReport, GraphError> {
        let started = Instant::now();
        let order = run.topological_order()?;
        let dependents = run.dependents()?;
        let nodes = run.nodes();

        let mut waiting_on: Vec<usize> = nodes.iter().map(|node| node.depends_on.len()).collect();
        let mut outcomes: Vec<Option<(NodeOutcome, u32, Duration)>> = vec![None; nodes.len()];
        let mut ready: VecDeque<usize> = order.into_iter().filter(|&i| waiting_on[i] == 0).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut abort: Option<PipelineError> = None;

        debug!(run_id = %run.id, nodes = nodes.len(), mode = %run.mode, "executing pipeline");

        loop {
            while abort.is_none() && in_flight.len() < self.max_concurrent {
                let Some(position) = ready.pop_front() else {
                    break;
                };
                let node = nodes[position].clone();
                let stage = node.stage;
                let label = node.task.map(|t| run.tasks[t].source.with_repository("").reference());
                self.logger.step(&format!("Starting {}: {}", node.id, node.action));

                let handle = tokio::spawn(run_node(
                    Arc::clone(&self.collaborators),
                    self.retry.clone(),
                    node,
                    label.clone(),
                    self.logger.clone(),
                ));
                in_flight.push(async move {
                    let joined = handle.await;
                    (position, stage, label, joined)
                });
            }

            let Some((position, stage, label, joined)) = in_flight.next().await else {
                break;
            };

            let attempted = joined.unwrap_or_else(|e| Attempted {
                result: Err(stage_error(stage, &nodes[position].id, label.as_deref(), 1, format!("task panicked: {}", e))),
                attempts: 1,
                elapsed: Duration::ZERO,
            });
            let id = &nodes[position].id;

            match attempted.result {
                Ok(output) => {
                    self.logger.success(&format!(
                        "{} finished in {}",
                        id,
                        self.logger.format_duration(attempted.elapsed)
                    ));
                    if !output.trim().is_empty() {
                        self.logger.detail(output.trim());
                    }
                    outcomes[position] = Some((NodeOutcome::Succeeded { output }, attempted.attempts, attempted.elapsed));

                    for &next in &dependents[position] {
                        waiting_on[next] -= 1;
                        if waiting_on[next] == 0 && outcomes[next].is_none() {
                            ready.push_back(next);
                        }
                    }
                }
                Err(error) => {
                    self.logger.error(&format!("{} failed: {}", id, error));
                    // A login nothing waits on (source login of a staged run) is reported only
                    if stage.is_fatal() && !dependents[position].is_empty() && abort.is_none() {
                        warn!(node = %id, "fatal failure, no further nodes will be started");
                        abort = Some(error.clone());
                    }
                    outcomes[position] = Some((NodeOutcome::Failed { error }, attempted.attempts, attempted.elapsed));
                    skip_downstream(position, id, &dependents, &mut outcomes);
                }
            }
        }

        let node_reports: Vec<NodeReport> = nodes
            .iter()
            .zip(outcomes)
            .map(|(node, outcome)| {
                let (outcome, attempts, elapsed) =
                    outcome.unwrap_or((NodeOutcome::Skipped { blocked_by: None }, 0, Duration::ZERO));
                NodeReport {
                    id: node.id.clone(),
                    stage: node.stage,
                    outcome,
                    attempts,
                    elapsed,
                }
            })
            .collect();

        let images = run
            .tasks
            .iter()
            .map(|task| {
                let outcome_of = |id: String| {
                    run.index_of(&id)
                        .map(|i| node_reports[i].outcome.clone())
                        .unwrap_or(NodeOutcome::Skipped { blocked_by: None })
                };
                ImageReport::from_outcomes(
                    task,
                    &outcome_of(task.acquire_id()),
                    &outcome_of(task.tag_id()),
                    &outcome_of(task.push_id()),
                )
            })
            .collect();

        Ok(PipelineReport {
            run_id: run.id,
            mode: run.mode.clone(),
            nodes: node_reports,
            images,
            abort,
            elapsed: started.elapsed(),
        })
    }
}

/// Mark every transitive dependent of `failed` that has not run as skipped
fn skip_downstream(
    failed: usize,
    failed_id: &str,
    dependents: &[Vec<usize>],
    outcomes: &mut [Option<(NodeOutcome, u32, Duration)>],
) {
    let mut stack: Vec<usize> = dependents[failed].clone();
    while let Some(next) = stack.pop() {
        if outcomes[next].is_some() {
            continue;
        }
        outcomes[next] = Some((
            NodeOutcome::Skipped {
                blocked_by: Some(failed_id.to_string()),
            },
            0,
            Duration::ZERO,
        ));
        stack.extend(dependents[next].iter().copied());
    }
}

async fn run_node(
    collaborators: Arc<Collaborators>,
    retry: RetryPolicy,
    node: DependencyNode,
    label: Option<String>,
    logger: Logger,
) -> Attempted {
    let started = Instant::now();
    let mut attempts = 1;

    let result = match &node.action {
        NodeAction::Provision(request) => collaborators
            .provisioner
            .create_registry(request)
            .await
            .map(|handle| {
                if handle.created {
                    format!("registry {} created", handle.name)
                } else {
                    format!("registry {} already exists", handle.name)
                }
            })
            .map_err(PipelineError::from),
        NodeAction::Login(endpoint) => collaborators
            .session
            .login(endpoint, collaborators.runner.as_ref())
            .await
            .map(|handle| handle.output)
            .map_err(PipelineError::from),
        NodeAction::Extract { url, destination } => collaborators
            .extractor
            .extract(url, destination)
            .await
            .map(|summary| {
                format!(
                    "extracted {} files and {} directories ({}) into {}",
                    summary.files,
                    summary.directories,
                    logger.format_size(summary.bytes),
                    destination.display()
                )
            })
            .map_err(PipelineError::from),
        NodeAction::Run(spec) => {
            let runner = collaborators.runner.as_ref();
            let policy = if node.stage == Stage::Push {
                retry
            } else {
                RetryPolicy::no_retry()
            };
            let (outcome, made) = policy
                .run(|_| runner.run_checked(spec), CommandError::is_transient)
                .await;
            attempts = made;
            outcome
                .map(|output| output.stdout)
                .map_err(|e| stage_error(node.stage, &node.id, label.as_deref(), made, command_message(e)))
        }
    };

    Attempted {
        result,
        attempts,
        elapsed: started.elapsed(),
    }
}

fn command_message(err: CommandError) -> String {
    match err {
        CommandError::NonZeroExit { code, stderr, .. } if !stderr.is_empty() => {
            format!("exit status {}: {}", code, stderr)
        }
        other => other.to_string(),
    }
}

/// Error for a failed node, typed by the stage it belongs to
fn stage_error(stage: Stage, node_id: &str, image: Option<&str>, attempts: u32, message: String) -> PipelineError {
    let image = image.unwrap_or(node_id).to_string();
    match stage {
        Stage::Provision => ProvisionError::Command(message).into(),
        Stage::DestinationLogin | Stage::SourceLogin => AuthError::LoginFailed {
            host: node_id.to_string(),
            message,
        }
        .into(),
        Stage::Extract => ExtractError::Archive(message).into(),
        Stage::Acquire => MirrorError::AcquireFailed { image, message }.into(),
        Stage::Tag => MirrorError::TagFailed { image, message }.into(),
        Stage::Push => MirrorError::PushFailed {
            image,
            attempts,
            message,
        }
        .into(),
    }
}
