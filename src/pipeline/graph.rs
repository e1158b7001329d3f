//! Dependency graph owned by a single pipeline run
//!
//! Nodes live in an arena (`Vec<DependencyNode>`) and refer to each other by id only, so a
//! run can be built, inspected and validated without any execution engine.

use crate::command::CommandSpec;
use crate::error::GraphError;
use crate::mirror::MirrorTask;
use crate::provision::RegistryRequest;
use crate::registry::RegistryEndpoint;
use crate::release::ReleaseMode;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type NodeId = String;

/// What part of the pipeline a node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provision,
    DestinationLogin,
    SourceLogin,
    Extract,
    Acquire,
    Tag,
    Push,
}

impl Stage {
    /// Stages whose failure aborts the whole run when other nodes depend on them
    pub fn is_fatal(&self) -> bool {
        matches!(self, Stage::Provision | Stage::DestinationLogin | Stage::SourceLogin)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Provision => "provision",
            Stage::DestinationLogin => "destination login",
            Stage::SourceLogin => "source login",
            Stage::Extract => "extract",
            Stage::Acquire => "acquire",
            Stage::Tag => "tag",
            Stage::Push => "push",
        };
        f.write_str(name)
    }
}

/// Work a node performs once its dependencies succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    Provision(RegistryRequest),
    Login(RegistryEndpoint),
    Extract { url: String, destination: PathBuf },
    Run(CommandSpec),
}

impl fmt::Display for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAction::Provision(request) => write!(
                f,
                "create {} registry {} in {} ({})",
                request.format, request.name, request.location, request.project
            ),
            NodeAction::Login(endpoint) => write!(f, "login {}", endpoint),
            NodeAction::Extract { url, destination } => {
                write!(f, "extract {} -> {}", url, destination.display())
            }
            NodeAction::Run(spec) => write!(f, "{}", spec),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub id: NodeId,
    pub stage: Stage,
    pub action: NodeAction,
    pub depends_on: BTreeSet<NodeId>,
    /// Index into [`PipelineRun::tasks`] for per-image nodes
    pub task: Option<usize>,
}

impl DependencyNode {
    pub fn new(id: impl Into<NodeId>, stage: Stage, action: NodeAction) -> Self {
        Self {
            id: id.into(),
            stage,
            action,
            depends_on: BTreeSet::new(),
            task: None,
        }
    }

    pub fn after(mut self, dependency: impl Into<NodeId>) -> Self {
        self.depends_on.insert(dependency.into());
        self
    }

    pub fn for_task(mut self, task: usize) -> Self {
        self.task = Some(task);
        self
    }
}

/// All nodes of one invocation, plus the mirror tasks they were built from
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub mode: ReleaseMode,
    pub tasks: Vec<MirrorTask>,
    nodes: Vec<DependencyNode>,
    index: HashMap<NodeId, usize>,
}

impl PipelineRun {
    pub fn new(mode: ReleaseMode, tasks: Vec<MirrorTask>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            tasks,
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, node: DependencyNode) -> Result<usize, GraphError> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        let position = self.nodes.len();
        self.index.insert(node.id.clone(), position);
        self.nodes.push(node);
        Ok(position)
    }

    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&DependencyNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolved dependency indices of every node
    pub fn dependencies(&self) -> Result<Vec<Vec<usize>>, GraphError> {
        self.nodes
            .iter()
            .map(|node| {
                node.depends_on
                    .iter()
                    .map(|dependency| {
                        self.index_of(dependency).ok_or_else(|| GraphError::UnknownDependency {
                            node: node.id.clone(),
                            dependency: dependency.clone(),
                        })
                    })
                    .collect::<Result<Vec<usize>, GraphError>>()
            })
            .collect()
    }

    /// Reverse edges: for each node, the nodes that wait on it
    pub fn dependents(&self) -> Result<Vec<Vec<usize>>, GraphError> {
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (node, dependencies) in self.dependencies()?.into_iter().enumerate() {
            for dependency in dependencies {
                dependents[dependency].push(node);
            }
        }
        Ok(dependents)
    }

    /// Kahn's algorithm; ties keep insertion order.
    ///
    /// Fails on unknown dependencies and on cycles, naming every node that could not be
    /// ordered.
    pub fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        let dependents = self.dependents()?;
        let mut remaining: Vec<usize> = self.nodes.iter().map(|node| node.depends_on.len()).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for &next in &dependents[current] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .filter(|&i| remaining[i] > 0)
                .map(|i| self.nodes[i].id.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Ordered, human-readable listing used by dry runs
    pub fn describe(&self) -> Result<Vec<String>, GraphError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .map(|i| {
                let node = &self.nodes[i];
                if node.depends_on.is_empty() {
                    format!("{}: {}", node.id, node.action)
                } else {
                    let after: Vec<&str> = node.depends_on.iter().map(String::as_str).collect();
                    format!("{}: {} (after {})", node.id, node.action, after.join(", "))
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_node(id: &str) -> DependencyNode {
        DependencyNode::new(id, Stage::Tag, NodeAction::Run(CommandSpec::new("true", Vec::<String>::new())))
    }

    fn run() -> PipelineRun {
        PipelineRun::new(ReleaseMode::Published, Vec::new())
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut run = run();
        run.add_node(command_node("a")).unwrap();
        assert_eq!(
            run.add_node(command_node("a")),
            Err(GraphError::DuplicateNode("a".to_string()))
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let mut run = run();
        run.add_node(command_node("a").after("missing")).unwrap();
        assert_eq!(
            run.topological_order(),
            Err(GraphError::UnknownDependency {
                node: "a".to_string(),
                dependency: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_cycle_is_detected() {
        let mut run = run();
        run.add_node(command_node("root")).unwrap();
        run.add_node(command_node("a").after("root").after("b")).unwrap();
        run.add_node(command_node("b").after("a")).unwrap();

        assert_eq!(
            run.topological_order(),
            Err(GraphError::Cycle(vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn test_order_respects_dependencies_added_out_of_order() {
        let mut run = run();
        run.add_node(command_node("push").after("tag")).unwrap();
        run.add_node(command_node("tag").after("acquire")).unwrap();
        run.add_node(command_node("acquire")).unwrap();

        let order: Vec<&str> = run
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|i| run.nodes()[i].id.as_str())
            .collect();
        assert_eq!(order, vec!["acquire", "tag", "push"]);
    }

    #[test]
    fn test_fatal_stages() {
        assert!(Stage::Provision.is_fatal());
        assert!(Stage::DestinationLogin.is_fatal());
        assert!(!Stage::Extract.is_fatal());
        assert!(!Stage::Push.is_fatal());
    }
}
