use std::path::PathBuf;

use anyhow::Result;

use crate::workspace::TaskWorkspace;

/// A single unit of work in a pipeline.
///
/// Implementations declare the files they read and the files they will
/// produce; the engine never inspects file contents, only paths, existence,
/// and modification times. When dispatched, the work routine receives a
/// private temp workspace and must write every declared output under it
/// (via [`TaskWorkspace::resolve`]); the engine moves the outputs to their
/// final paths afterwards.
pub trait Task: Send + Sync {
    /// Stable description used for logging and diagnostics.
    fn description(&self) -> String;

    /// Files this node reads, at their real (final) paths.
    fn input_files(&self) -> &[PathBuf];

    /// Files this node produces. Every one must exist under the workspace
    /// when `run` returns, and no two nodes in a graph may declare the same
    /// output path.
    fn output_files(&self) -> &[PathBuf];

    /// Worker-thread reservation counted against the scheduler's budget.
    fn threads(&self) -> usize {
        1
    }

    /// Name of the external executable this node invokes, if any.
    fn tool(&self) -> Option<&str> {
        None
    }

    /// Perform the work. Declared inputs may be read from their final paths;
    /// declared outputs must be written under `workspace`.
    fn run(&self, workspace: &TaskWorkspace) -> Result<()>;
}

/// Index of a node in a [`crate::Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl From<usize> for NodeId {
    fn from(idx: usize) -> Self {
        debug_assert!(idx <= u32::MAX as usize);
        Self(idx as u32)
    }
}

impl From<NodeId> for usize {
    fn from(id: NodeId) -> usize {
        id.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a DONE node got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The work routine ran and its outputs were published.
    Executed,
    /// Outputs were already present and at least as new as every input.
    UpToDate,
}

/// Per-run state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Pending,
    Running,
    Done(Completion),
    Failed,
    /// A dependency chain contains a failure; records the node that failed.
    Skipped(NodeId),
}

impl NodeState {
    /// True for DONE in either form.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// True once the node can no longer change state this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed | Self::Skipped(_))
    }
}
