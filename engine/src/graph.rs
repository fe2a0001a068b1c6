use std::path::{Path, PathBuf};

use anyhow::Result;

use util::IdVec;

use crate::{Error, NodeId, Task};

/// What a graph entry actually is.
pub(crate) enum NodeKind {
    /// An atomic unit of work.
    Task(Box<dyn Task>),
    /// A dependency-only grouping of other nodes; performs no I/O and owns
    /// no files. Done iff all subnodes (and extra dependencies) are done.
    Meta {
        description: String,
        subnodes: Vec<NodeId>,
    },
}

pub(crate) struct NodeEntry {
    pub kind: NodeKind,
    /// Direct dependencies (for meta nodes, in addition to subnodes).
    pub deps: Vec<NodeId>,
    /// Reverse edges, in insertion order.
    pub dependents: Vec<NodeId>,
}

/// The set of all nodes and their dependency edges.
///
/// Output-path collisions are rejected at insertion time; cycles are rejected
/// by [`Graph::validate`] before any execution starts. Edges live here, not
/// on the nodes, so task objects stay acyclic value-like objects.
#[derive(Default)]
pub struct Graph {
    entries: IdVec<NodeId, NodeEntry>,
    /// output path -> owning node, for collision checks and listings.
    owners: hashbrown::HashMap<PathBuf, NodeId, util::Hasher>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes (task and meta) in the graph.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a task node depending on the given earlier nodes.
    /// Fails if any of its declared outputs is already claimed.
    pub fn add_task(&mut self, task: impl Task + 'static, deps: &[NodeId]) -> Result<NodeId> {
        self.add_boxed_task(Box::new(task), deps)
    }

    pub fn add_boxed_task(&mut self, task: Box<dyn Task>, deps: &[NodeId]) -> Result<NodeId> {
        let id = NodeId::from(self.entries.len());

        // check every output before claiming any, so a failed insert
        // leaves the graph unchanged:
        for (i, path) in task.output_files().iter().enumerate() {
            if task.output_files()[..i].contains(path) {
                return Err(Error::OutputCollision {
                    path: path.clone(),
                    first: task.description(),
                    second: task.description(),
                }
                .into());
            }
            if let Some(owner) = self.owners.get(path) {
                return Err(Error::OutputCollision {
                    path: path.clone(),
                    first: self.description(*owner),
                    second: task.description(),
                }
                .into());
            }
        }
        for path in task.output_files() {
            self.owners.insert(path.clone(), id);
        }

        log::debug!("node {id}: task '{}'", task.description());
        self.insert_entry(NodeKind::Task(task), deps, &[]);
        Ok(id)
    }

    /// Add a composite node grouping `subnodes`, with optional extra
    /// dependencies. An empty subnode set is legal but almost always a
    /// configuration mistake, so it is logged.
    pub fn add_meta(
        &mut self,
        description: impl Into<String>,
        subnodes: &[NodeId],
        deps: &[NodeId],
    ) -> NodeId {
        let description = description.into();
        if subnodes.is_empty() {
            log::warn!("composite node '{description}' has no subnodes");
        }
        let id = NodeId::from(self.entries.len());
        log::debug!("node {id}: composite '{description}' over {} subnodes", subnodes.len());
        self.insert_entry(
            NodeKind::Meta {
                description,
                subnodes: subnodes.to_vec(),
            },
            deps,
            subnodes,
        );
        id
    }

    fn insert_entry(&mut self, kind: NodeKind, deps: &[NodeId], subnodes: &[NodeId]) {
        let id: NodeId = self.entries.push(NodeEntry {
            kind,
            deps: deps.to_vec(),
            dependents: Vec::new(),
        });
        for dep in deps.iter().chain(subnodes) {
            self.entries.get_mut(*dep).dependents.push(id);
        }
    }

    /// Add an extra dependency edge after insertion.
    pub fn add_dependency(&mut self, node: NodeId, dep: NodeId) {
        self.entries.get_mut(node).deps.push(dep);
        self.entries.get_mut(dep).dependents.push(node);
    }

    /// Description of any node, task or composite.
    pub fn description(&self, id: NodeId) -> String {
        match &self.entries.get(id).kind {
            NodeKind::Task(task) => task.description(),
            NodeKind::Meta { description, .. } => description.clone(),
        }
    }

    /// The task behind `id`, or None for composite nodes.
    pub fn task(&self, id: NodeId) -> Option<&dyn Task> {
        match &self.entries.get(id).kind {
            NodeKind::Task(task) => Some(task.as_ref()),
            NodeKind::Meta { .. } => None,
        }
    }

    /// Thread reservation of a node; composite nodes reserve nothing.
    pub fn threads(&self, id: NodeId) -> usize {
        match &self.entries.get(id).kind {
            NodeKind::Task(task) => task.threads(),
            NodeKind::Meta { .. } => 0,
        }
    }

    pub(crate) fn entry(&self, id: NodeId) -> &NodeEntry {
        self.entries.get(id)
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = NodeId> {
        self.entries.ids()
    }

    /// Everything `id` waits on: direct dependencies plus, for composite
    /// nodes, their subnodes.
    pub(crate) fn effective_deps(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let entry = self.entries.get(id);
        let subnodes = match &entry.kind {
            NodeKind::Meta { subnodes, .. } => subnodes.as_slice(),
            NodeKind::Task(_) => &[],
        };
        entry.deps.iter().chain(subnodes).copied()
    }

    pub(crate) fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.entries.get(id).dependents
    }

    /// Which node produces `path`, if any does.
    pub fn output_owner(&self, path: &Path) -> Option<NodeId> {
        self.owners.get(path).copied()
    }
}

// VALIDATION //////////////////
impl Graph {
    /// Check that the dependency relation is acyclic.
    /// Called once before execution; a cycle is a configuration error, never
    /// a runtime condition.
    pub fn validate(&self) -> Result<()> {
        // 0 = unvisited, 1 = on the current DFS path, 2 = finished.
        let mut color = vec![0u8; self.entries.len()];
        let mut path = Vec::new();
        for id in self.entries.ids() {
            if color[usize::from(id)] == 0 {
                self.check_cycles(id, &mut color, &mut path)?;
            }
        }
        Ok(())
    }

    fn check_cycles(
        &self,
        id: NodeId,
        color: &mut [u8],
        path: &mut Vec<NodeId>,
    ) -> Result<(), Error> {
        color[usize::from(id)] = 1;
        path.push(id);
        for dep in self.effective_deps(id) {
            match color[usize::from(dep)] {
                0 => self.check_cycles(dep, color, path)?,
                1 => {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let members = path[start..]
                        .iter()
                        .map(|n| self.description(*n))
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Err(Error::CyclicDependency(members));
                }
                _ => {}
            }
        }
        path.pop();
        color[usize::from(id)] = 2;
        Ok(())
    }
}

// LISTING QUERIES //////////////////
impl Graph {
    /// All declared input files, sorted, excluding files the graph itself
    /// produces.
    pub fn input_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .tasks()
            .flat_map(|task| task.input_files())
            .filter(|path| !self.owners.contains_key(*path))
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// All declared output files, sorted.
    pub fn output_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.owners.keys().cloned().collect();
        files.sort();
        files
    }

    /// All distinct external tools the graph would invoke, sorted.
    pub fn tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self
            .tasks()
            .filter_map(|task| task.tool())
            .map(str::to_owned)
            .collect();
        tools.sort();
        tools.dedup();
        tools
    }

    fn tasks(&self) -> impl Iterator<Item = &dyn Task> {
        self.entries.iter().filter_map(|entry| match &entry.kind {
            NodeKind::Task(task) => Some(task.as_ref()),
            NodeKind::Meta { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskWorkspace;

    struct Stub {
        description: String,
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
    }

    impl Stub {
        fn new(description: &str, inputs: &[&str], outputs: &[&str]) -> Self {
            Self {
                description: description.to_owned(),
                inputs: inputs.iter().map(PathBuf::from).collect(),
                outputs: outputs.iter().map(PathBuf::from).collect(),
            }
        }
    }

    impl Task for Stub {
        fn description(&self) -> String {
            self.description.clone()
        }
        fn input_files(&self) -> &[PathBuf] {
            &self.inputs
        }
        fn output_files(&self) -> &[PathBuf] {
            &self.outputs
        }
        fn run(&self, _workspace: &TaskWorkspace) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn output_collision_is_rejected_at_insert() -> Result<()> {
        let mut graph = Graph::new();
        graph.add_task(Stub::new("a", &[], &["out/x"]), &[])?;
        let err = graph
            .add_task(Stub::new("b", &[], &["out/x"]), &[])
            .unwrap_err();
        let err = err.downcast::<Error>()?;
        assert!(matches!(err, Error::OutputCollision { .. }));
        // the graph is unchanged by the failed insert:
        assert_eq!(graph.len(), 1);
        Ok(())
    }

    #[test]
    fn cycle_is_detected_with_members_named() -> Result<()> {
        let mut graph = Graph::new();
        let a = graph.add_task(Stub::new("a", &[], &["out/a"]), &[])?;
        let b = graph.add_task(Stub::new("b", &[], &["out/b"]), &[a])?;
        let c = graph.add_task(Stub::new("c", &[], &["out/c"]), &[b])?;
        graph.add_dependency(a, c);

        let err = graph.validate().unwrap_err().downcast::<Error>()?;
        match err {
            Error::CyclicDependency(members) => {
                assert!(members.contains('a') && members.contains('c'), "{members}");
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn meta_subnodes_count_as_dependencies_for_cycles() -> Result<()> {
        let mut graph = Graph::new();
        let a = graph.add_task(Stub::new("a", &[], &["out/a"]), &[])?;
        let meta = graph.add_meta("group", &[a], &[]);
        graph.add_dependency(a, meta);
        assert!(graph.validate().is_err());
        Ok(())
    }

    #[test]
    fn listing_queries_exclude_generated_inputs() -> Result<()> {
        let mut graph = Graph::new();
        let a = graph.add_task(Stub::new("a", &["raw/in.txt"], &["out/mid.txt"]), &[])?;
        graph.add_task(Stub::new("b", &["out/mid.txt"], &["out/final.txt"]), &[a])?;

        assert_eq!(graph.input_files(), vec![PathBuf::from("raw/in.txt")]);
        assert_eq!(
            graph.output_files(),
            vec![PathBuf::from("out/final.txt"), PathBuf::from("out/mid.txt")]
        );
        assert!(graph.tools().is_empty());
        Ok(())
    }
}
