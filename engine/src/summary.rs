use anyhow::Result;
use colored::Colorize;

use util::IdVec;

use crate::{Completion, Graph, NodeId, NodeState};

/// One failed node, with the error its work routine (or the engine's
/// pre-dispatch checks) produced.
pub struct Failure {
    pub node: NodeId,
    pub description: String,
    pub error: anyhow::Error,
}

/// Final state of every node after a run.
pub struct RunSummary {
    states: IdVec<NodeId, NodeState>,
    failures: Vec<Failure>,
}

impl RunSummary {
    pub(crate) fn new(states: IdVec<NodeId, NodeState>, failures: Vec<Failure>) -> Self {
        Self { states, failures }
    }

    pub fn state(&self, id: NodeId) -> &NodeState {
        self.states.get(id)
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// True when every node completed (executed or already up to date).
    pub fn is_ok(&self) -> bool {
        self.states.iter().all(NodeState::is_done)
    }

    pub fn executed(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Done(Completion::Executed)))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Done(Completion::UpToDate)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Failed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Skipped(_)))
    }

    /// Nodes never dispatched, left over after a fail-fast halt.
    pub fn pending(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Pending))
    }

    fn count(&self, pred: impl Fn(&NodeState) -> bool) -> usize {
        self.states.iter().filter(|s| pred(s)).count()
    }

    /// Print a human-readable recap to stderr: counts, then each failure
    /// with its error chain, then which nodes were skipped and why.
    pub fn print_recap(&self, graph: &Graph) -> Result<()> {
        let line = format!(
            "{} executed, {} up to date, {} failed, {} skipped, {} not started",
            self.executed(),
            self.up_to_date(),
            self.failed(),
            self.skipped(),
            self.pending(),
        );
        if self.is_ok() {
            eprintln!("{}", line.green());
        } else {
            eprintln!("{}", line.red());
        }

        for failure in &self.failures {
            eprintln!("{} {}:", "FAILED".red(), failure.description);
            eprintln!("  {:#}", failure.error);
        }
        for (id, state) in self.states.iter_with_ids() {
            if let NodeState::Skipped(cause) = state {
                eprintln!(
                    "{} {} (because '{}' failed)",
                    "SKIPPED".yellow(),
                    graph.description(id),
                    graph.description(*cause)
                );
            }
        }
        Ok(())
    }
}
