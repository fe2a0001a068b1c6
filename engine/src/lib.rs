//!
//! Dependency-driven task execution.
//!
//! Callers build a [`Graph`] of task nodes (each declaring its input files,
//! output files, and dependencies) and composite nodes grouping them, then
//! hand the graph to a [`Scheduler`]. The scheduler runs every node at most
//! once, in dependency order, bounded by a thread budget. Each task runs with
//! a private temp directory as its output root; declared outputs are moved to
//! their final paths only after the work routine succeeds, so a crash never
//! leaves a visible but incomplete output, and a later run picks up where the
//! failed one left off.

/// Error kinds shared across the engine
mod error;
pub use error::Error;

/// The polymorphic task interface and per-node state
mod node;
pub use node::{Completion, NodeId, NodeState, Task};

/// Node storage, dependency edges, and build-time validation
mod graph;
pub use graph::Graph;

/// Ready-set bookkeeping and worker dispatch
mod scheduler;
pub use scheduler::{RunOptions, Scheduler};

/// Final per-node state report for a run
mod summary;
pub use summary::{Failure, RunSummary};

/// Temp-workspace allocation and atomic publish
mod workspace;
pub use workspace::{TaskWorkspace, WorkspaceAllocator};

/// File move / staleness helpers
pub mod fs;
