use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use colored::Colorize;

use util::IdVec;

use crate::graph::NodeKind;
use crate::summary::{Failure, RunSummary};
use crate::workspace::WorkspaceAllocator;
use crate::{fs as fsutil, Completion, Error, Graph, NodeId, NodeState, Task};

/// Execution knobs for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum worker threads across all concurrently running nodes.
    /// Each node's own reservation is clamped to this budget.
    pub max_threads: usize,
    /// Stop dispatching new nodes after the first failure; running nodes are
    /// still drained.
    pub fail_fast: bool,
    /// Re-run nodes even when their outputs are up to date.
    pub force: bool,
    /// Print extra per-node progress to stderr.
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_threads: 1,
            fail_fast: false,
            force: false,
            verbose: false,
        }
    }
}

/// Outcome of the pre-dispatch checks on a ready task node.
enum Prepared {
    /// Outputs are present and newer than every input; nothing to do.
    UpToDate,
    /// A declared input does not exist, so the node can never run.
    MissingInput(PathBuf),
    /// The node needs to execute.
    Run,
}

/// `Scheduler` walks a validated [`Graph`], dispatching ready nodes to worker
/// threads up to a concurrency budget, and propagating failures to
/// dependents.
///
/// All bookkeeping (the ready queue and every node-state transition) happens
/// on the calling thread; workers only run the task routine plus publish and
/// report back over a channel, so the graph needs no locking.
pub struct Scheduler {
    opts: RunOptions,
    workspaces: WorkspaceAllocator,
}

impl Scheduler {
    pub fn new(opts: RunOptions, workspaces: WorkspaceAllocator) -> Self {
        Self { opts, workspaces }
    }

    /// Compute the dispatch order without executing anything or touching the
    /// filesystem. Ties between equally-ready nodes break in node-insertion
    /// order, matching a real run.
    pub fn plan(graph: &Graph) -> Result<Vec<NodeId>> {
        graph.validate()?;

        let mut remaining = dep_counts(graph);
        let mut queue: VecDeque<NodeId> = graph
            .ids()
            .filter(|id| remaining[usize::from(*id)] == 0)
            .collect();

        let mut order = Vec::with_capacity(graph.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &dependent in graph.dependents(id) {
                let idx = usize::from(dependent);
                remaining[idx] -= 1;
                if remaining[idx] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        // validate() already rejected cycles, so every node must be reachable:
        debug_assert_eq!(order.len(), graph.len());
        Ok(order)
    }

    /// Execute the graph and report the final state of every node.
    ///
    /// Independent branches keep running after a failure (unless `fail_fast`
    /// is set), but a node whose dependency chain contains a failure is never
    /// executed.
    pub fn run(&self, graph: &Graph) -> Result<RunSummary> {
        graph.validate()?;
        let budget = self.opts.max_threads.max(1);

        let mut states: IdVec<NodeId, NodeState> =
            IdVec::fill(NodeState::Pending, graph.len());
        let mut remaining = dep_counts(graph);
        let mut ready: VecDeque<NodeId> = graph
            .ids()
            .filter(|id| remaining[usize::from(*id)] == 0)
            .collect();
        let mut failures: Vec<Failure> = Vec::new();

        log::debug!(
            "starting run: {} nodes, {} initially ready, budget {budget}",
            graph.len(),
            ready.len()
        );

        thread::scope(|scope| -> Result<()> {
            let (tx, rx) = mpsc::channel::<(NodeId, Result<()>)>();
            let mut running = 0usize;
            let mut reserved = 0usize;
            let mut halted = false;

            loop {
                // dispatch as many ready nodes as the budget allows:
                while !halted {
                    let Some(&id) = ready.front() else { break };
                    match &graph.entry(id).kind {
                        NodeKind::Meta { .. } => {
                            ready.pop_front();
                            let completion = meta_completion(graph, &states, id);
                            *states.get_mut(id) = NodeState::Done(completion);
                            log::debug!("composite '{}' complete", graph.description(id));
                            mark_done(graph, &states, &mut remaining, &mut ready, id);
                        }
                        NodeKind::Task(task) => {
                            let reservation = task.threads().clamp(1, budget);
                            if reserved + reservation > budget {
                                // head of the queue waits for threads to free up.
                                break;
                            }
                            ready.pop_front();

                            match self.prepare(task.as_ref()) {
                                Ok(Prepared::UpToDate) => {
                                    *states.get_mut(id) =
                                        NodeState::Done(Completion::UpToDate);
                                    if self.opts.verbose {
                                        eprintln!(
                                            "{} {} (outputs up to date)",
                                            "KEEP".cyan(),
                                            task.description()
                                        );
                                    } else {
                                        log::info!(
                                            "'{}' is up to date; not re-running",
                                            task.description()
                                        );
                                    }
                                    mark_done(graph, &states, &mut remaining, &mut ready, id);
                                }
                                Ok(Prepared::MissingInput(path)) => {
                                    mark_failed(
                                        graph,
                                        &mut states,
                                        &mut failures,
                                        id,
                                        Error::StaleInputMissing(path).into(),
                                    );
                                    if self.opts.fail_fast {
                                        halted = true;
                                    }
                                }
                                Ok(Prepared::Run) => {
                                    *states.get_mut(id) = NodeState::Running;
                                    eprintln!("{} {}", "RUN".green(), task.description());
                                    running += 1;
                                    reserved += reservation;

                                    let tx = tx.clone();
                                    let workspaces = &self.workspaces;
                                    let task = task.as_ref();
                                    scope.spawn(move || {
                                        let result = execute(task, workspaces);
                                        let _ = tx.send((id, result));
                                    });
                                }
                                Err(e) => {
                                    mark_failed(graph, &mut states, &mut failures, id, e);
                                    if self.opts.fail_fast {
                                        halted = true;
                                    }
                                }
                            }
                        }
                    }
                }

                if running == 0 {
                    // nothing in flight; with a non-empty queue this means we
                    // halted after a failure, and those nodes stay pending.
                    break;
                }

                let (id, result) = rx.recv()?;
                running -= 1;
                reserved -= graph.threads(id).clamp(1, budget);

                match result {
                    Ok(()) => {
                        *states.get_mut(id) = NodeState::Done(Completion::Executed);
                        eprintln!("{} {}", "COMPLETED".green(), graph.description(id));
                        mark_done(graph, &states, &mut remaining, &mut ready, id);
                    }
                    Err(e) => {
                        mark_failed(graph, &mut states, &mut failures, id, e);
                        if self.opts.fail_fast {
                            halted = true;
                        }
                    }
                }
            }

            Ok(())
        })?;

        Ok(RunSummary::new(states, failures))
    }

    /// Staleness and input checks for a node that is about to start.
    fn prepare(&self, task: &dyn Task) -> Result<Prepared> {
        for input in task.input_files() {
            if !input.exists() {
                return Ok(Prepared::MissingInput(input.clone()));
            }
        }
        if !self.opts.force && fsutil::is_up_to_date(task.output_files(), task.input_files())? {
            return Ok(Prepared::UpToDate);
        }
        Ok(Prepared::Run)
    }
}

/// Run one task in a fresh workspace and publish its outputs.
/// On any error the workspace is dropped, which removes the temp directory
/// and leaves the final output paths untouched.
fn execute(task: &dyn Task, workspaces: &WorkspaceAllocator) -> Result<()> {
    let workspace = workspaces.allocate()?;
    task.run(&workspace)?;
    workspace.publish(task.output_files())
}

/// Number of nodes each node waits on (dependencies plus subnodes).
fn dep_counts(graph: &Graph) -> Vec<usize> {
    graph
        .ids()
        .map(|id| graph.effective_deps(id).count())
        .collect()
}

/// A composite over nothing but up-to-date work is itself up to date.
fn meta_completion(graph: &Graph, states: &IdVec<NodeId, NodeState>, id: NodeId) -> Completion {
    let mut deps = graph.effective_deps(id).peekable();
    if deps.peek().is_none() {
        return Completion::Executed;
    }
    if deps.all(|dep| matches!(*states.get(dep), NodeState::Done(Completion::UpToDate))) {
        Completion::UpToDate
    } else {
        Completion::Executed
    }
}

/// Credit a completed node to its dependents, queueing any that became ready.
fn mark_done(
    graph: &Graph,
    states: &IdVec<NodeId, NodeState>,
    remaining: &mut [usize],
    ready: &mut VecDeque<NodeId>,
    id: NodeId,
) {
    for &dependent in graph.dependents(id) {
        let idx = usize::from(dependent);
        remaining[idx] -= 1;
        if remaining[idx] == 0 && matches!(*states.get(dependent), NodeState::Pending) {
            ready.push_back(dependent);
        }
    }
}

/// Mark a node failed, record the error, and skip all transitive dependents.
fn mark_failed(
    graph: &Graph,
    states: &mut IdVec<NodeId, NodeState>,
    failures: &mut Vec<Failure>,
    id: NodeId,
    error: anyhow::Error,
) {
    let description = graph.description(id);
    eprintln!("{} {}: {:#}", "FAILED".red(), description, error);
    *states.get_mut(id) = NodeState::Failed;
    failures.push(Failure {
        node: id,
        description,
        error,
    });
    propagate_failure(graph, states, id);
}

/// Transitively mark pending dependents of a failed node.
///
/// A composite with a failed subnode derives FAILED (it can never be
/// complete); everything else becomes SKIPPED, recording the original failed
/// node so the report can name the root cause.
fn propagate_failure(graph: &Graph, states: &mut IdVec<NodeId, NodeState>, failed: NodeId) {
    let mut stack: Vec<(NodeId, NodeId)> = graph
        .dependents(failed)
        .iter()
        .map(|&dependent| (dependent, failed))
        .collect();

    while let Some((id, cause)) = stack.pop() {
        if !matches!(*states.get(id), NodeState::Pending) {
            continue;
        }
        let state = match &graph.entry(id).kind {
            NodeKind::Meta { subnodes, .. }
                if subnodes
                    .iter()
                    .any(|&sub| matches!(*states.get(sub), NodeState::Failed)) =>
            {
                NodeState::Failed
            }
            _ => NodeState::Skipped(cause),
        };
        *states.get_mut(id) = state;
        match state {
            NodeState::Failed => eprintln!(
                "{} {} (subnode '{}' failed)",
                "FAILED".red(),
                graph.description(id),
                graph.description(cause)
            ),
            _ => eprintln!(
                "{} {} (dependency '{}' failed)",
                "SKIPPED".yellow(),
                graph.description(id),
                graph.description(cause)
            ),
        }
        for &dependent in graph.dependents(id) {
            stack.push((dependent, cause));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskWorkspace;
    use anyhow::bail;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Concatenates its inputs (if any) with a fixed payload into every
    /// declared output.
    struct WriteTask {
        description: String,
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
        payload: String,
    }

    impl WriteTask {
        fn new(description: &str, inputs: &[&Path], outputs: &[&Path], payload: &str) -> Self {
            Self {
                description: description.to_owned(),
                inputs: inputs.iter().map(|p| p.to_path_buf()).collect(),
                outputs: outputs.iter().map(|p| p.to_path_buf()).collect(),
                payload: payload.to_owned(),
            }
        }
    }

    impl Task for WriteTask {
        fn description(&self) -> String {
            self.description.clone()
        }
        fn input_files(&self) -> &[PathBuf] {
            &self.inputs
        }
        fn output_files(&self) -> &[PathBuf] {
            &self.outputs
        }
        fn run(&self, workspace: &TaskWorkspace) -> Result<()> {
            let mut text = String::new();
            for input in &self.inputs {
                text.push_str(&fs::read_to_string(input)?);
            }
            text.push_str(&self.payload);
            for output in &self.outputs {
                fs::write(workspace.resolve(output), &text)?;
            }
            Ok(())
        }
    }

    /// Fails after writing a partial file into its workspace.
    struct FailTask {
        description: String,
        outputs: Vec<PathBuf>,
    }

    impl FailTask {
        fn new(description: &str, outputs: &[&Path]) -> Self {
            Self {
                description: description.to_owned(),
                outputs: outputs.iter().map(|p| p.to_path_buf()).collect(),
            }
        }
    }

    impl Task for FailTask {
        fn description(&self) -> String {
            self.description.clone()
        }
        fn input_files(&self) -> &[PathBuf] {
            &[]
        }
        fn output_files(&self) -> &[PathBuf] {
            &self.outputs
        }
        fn run(&self, workspace: &TaskWorkspace) -> Result<()> {
            for output in &self.outputs {
                fs::write(workspace.resolve(output), "partial")?;
            }
            bail!("work routine exploded");
        }
    }

    fn scheduler(temp: &TempDir, opts: RunOptions) -> Scheduler {
        Scheduler::new(opts, WorkspaceAllocator::new(temp.path().join("tmp")))
    }

    fn opts(max_threads: usize) -> RunOptions {
        RunOptions {
            max_threads,
            ..RunOptions::default()
        }
    }

    #[test]
    fn runs_in_dependency_order() -> Result<()> {
        let dir = tempdir()?;
        let a_out = dir.path().join("a.txt");
        let b_out = dir.path().join("b.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(WriteTask::new("a", &[], &[&a_out], "a"), &[])?;
        graph.add_task(WriteTask::new("b", &[&a_out], &[&b_out], "+b"), &[a])?;

        let summary = scheduler(&dir, opts(2)).run(&graph)?;
        assert!(summary.is_ok());
        assert_eq!(summary.executed(), 2);
        assert_eq!(fs::read_to_string(&b_out)?, "a+b");
        Ok(())
    }

    #[test]
    fn failure_skips_transitive_dependents_but_not_independent_branches() -> Result<()> {
        let dir = tempdir()?;
        let b_out = dir.path().join("b.txt");
        let c_out = dir.path().join("c.txt");
        let d_out = dir.path().join("d.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(FailTask::new("a", &[]), &[])?;
        let b = graph.add_task(WriteTask::new("b", &[], &[&b_out], "b"), &[a])?;
        let c = graph.add_task(WriteTask::new("c", &[], &[&c_out], "c"), &[b])?;
        let d = graph.add_task(WriteTask::new("d", &[], &[&d_out], "d"), &[])?;

        let summary = scheduler(&dir, opts(2)).run(&graph)?;
        assert_eq!(*summary.state(a), NodeState::Failed);
        assert_eq!(*summary.state(b), NodeState::Skipped(a));
        assert_eq!(*summary.state(c), NodeState::Skipped(a));
        assert!(summary.state(d).is_done());
        assert_eq!(summary.failures().len(), 1);
        assert!(d_out.exists());
        assert!(!b_out.exists());
        Ok(())
    }

    #[test]
    fn failed_attempt_publishes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let out = dir.path().join("out.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(FailTask::new("a", &[&out]), &[])?;

        let summary = scheduler(&dir, opts(1)).run(&graph)?;
        assert_eq!(*summary.state(a), NodeState::Failed);
        assert!(!out.exists(), "partial output must never be published");
        // no temp workspaces left behind:
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("tmp"))?.collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
        Ok(())
    }

    #[test]
    fn composite_fans_in_and_propagates_failure() -> Result<()> {
        let dir = tempdir()?;
        let ok_out = dir.path().join("ok.txt");
        let after_out = dir.path().join("after.txt");

        let mut graph = Graph::new();
        let ok = graph.add_task(WriteTask::new("ok", &[], &[&ok_out], "ok"), &[])?;
        let bad = graph.add_task(FailTask::new("bad", &[]), &[])?;
        let meta = graph.add_meta("group", &[ok, bad], &[]);
        let after = graph.add_task(WriteTask::new("after", &[], &[&after_out], "x"), &[meta])?;

        let summary = scheduler(&dir, opts(1)).run(&graph)?;
        assert_eq!(*summary.state(meta), NodeState::Failed);
        assert_eq!(*summary.state(after), NodeState::Skipped(bad));
        // the composite counts as failed, not skipped:
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.skipped(), 1);
        assert!(!after_out.exists());
        Ok(())
    }

    #[test]
    fn composite_completes_when_all_subnodes_complete() -> Result<()> {
        let dir = tempdir()?;
        let a_out = dir.path().join("a.txt");
        let b_out = dir.path().join("b.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(WriteTask::new("a", &[], &[&a_out], "a"), &[])?;
        let b = graph.add_task(WriteTask::new("b", &[], &[&b_out], "b"), &[])?;
        let meta = graph.add_meta("group", &[a, b], &[]);

        let summary = scheduler(&dir, opts(2)).run(&graph)?;
        assert!(summary.state(meta).is_done());
        Ok(())
    }

    #[test]
    fn empty_composite_completes_and_unblocks_dependents() -> Result<()> {
        let dir = tempdir()?;
        let out = dir.path().join("out.txt");

        let mut graph = Graph::new();
        let meta = graph.add_meta("empty group", &[], &[]);
        let after = graph.add_task(WriteTask::new("after", &[], &[&out], "x"), &[meta])?;

        let summary = scheduler(&dir, opts(1)).run(&graph)?;
        assert!(summary.state(meta).is_done());
        assert!(summary.state(after).is_done());
        assert!(out.exists());
        Ok(())
    }

    #[test]
    fn second_run_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let a_out = dir.path().join("a.txt");
        let b_out = dir.path().join("b.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(WriteTask::new("a", &[], &[&a_out], "a"), &[])?;
        graph.add_task(WriteTask::new("b", &[&a_out], &[&b_out], "+b"), &[a])?;

        let runner = scheduler(&dir, opts(2));
        let first = runner.run(&graph)?;
        assert_eq!(first.executed(), 2);

        let second = runner.run(&graph)?;
        assert_eq!(second.executed(), 0);
        assert_eq!(second.up_to_date(), 2);
        assert_eq!(fs::read_to_string(&b_out)?, "a+b");
        Ok(())
    }

    #[test]
    fn force_reruns_up_to_date_nodes() -> Result<()> {
        let dir = tempdir()?;
        let out = dir.path().join("a.txt");

        let mut graph = Graph::new();
        graph.add_task(WriteTask::new("a", &[], &[&out], "a"), &[])?;

        scheduler(&dir, opts(1)).run(&graph)?;
        let forced = RunOptions {
            force: true,
            ..opts(1)
        };
        let summary = scheduler(&dir, forced).run(&graph)?;
        assert_eq!(summary.executed(), 1);
        Ok(())
    }

    #[test]
    fn missing_input_fails_without_running() -> Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("does-not-exist");
        let out = dir.path().join("out.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(WriteTask::new("a", &[&missing], &[&out], "a"), &[])?;

        let summary = scheduler(&dir, opts(1)).run(&graph)?;
        assert_eq!(*summary.state(a), NodeState::Failed);
        assert!(!out.exists());
        let error = &summary.failures()[0].error;
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::StaleInputMissing(_))
        ));
        Ok(())
    }

    #[test]
    fn undeclared_output_is_a_contract_violation() -> Result<()> {
        let dir = tempdir()?;
        let out = dir.path().join("never-written.txt");

        // WriteTask with no outputs writes nothing; declare one anyway
        // through a wrapper that lies about its outputs:
        struct NoOp(Vec<PathBuf>);
        impl Task for NoOp {
            fn description(&self) -> String {
                "noop".to_owned()
            }
            fn input_files(&self) -> &[PathBuf] {
                &[]
            }
            fn output_files(&self) -> &[PathBuf] {
                &self.0
            }
            fn run(&self, _workspace: &TaskWorkspace) -> Result<()> {
                Ok(())
            }
        }

        let mut graph = Graph::new();
        let a = graph.add_task(NoOp(vec![out.clone()]), &[])?;

        let summary = scheduler(&dir, opts(1)).run(&graph)?;
        assert_eq!(*summary.state(a), NodeState::Failed);
        assert!(!out.exists());
        let error = &summary.failures()[0].error;
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::MissingDeclaredOutput(_))
        ));
        Ok(())
    }

    #[test]
    fn fail_fast_leaves_unstarted_nodes_pending() -> Result<()> {
        let dir = tempdir()?;
        let b_out = dir.path().join("b.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(FailTask::new("a", &[]), &[])?;
        let b = graph.add_task(WriteTask::new("b", &[], &[&b_out], "b"), &[])?;

        let fail_fast = RunOptions {
            fail_fast: true,
            ..opts(1)
        };
        let summary = scheduler(&dir, fail_fast).run(&graph)?;
        assert_eq!(*summary.state(a), NodeState::Failed);
        assert_eq!(*summary.state(b), NodeState::Pending);
        assert!(!b_out.exists());
        Ok(())
    }

    #[test]
    fn plan_respects_dependency_order_without_touching_disk() -> Result<()> {
        let dir = tempdir()?;
        let a_out = dir.path().join("a.txt");
        let b_out = dir.path().join("b.txt");

        let mut graph = Graph::new();
        let a = graph.add_task(WriteTask::new("a", &[], &[&a_out], "a"), &[])?;
        let b = graph.add_task(WriteTask::new("b", &[&a_out], &[&b_out], "b"), &[a])?;
        let meta = graph.add_meta("all", &[a, b], &[]);

        let order = Scheduler::plan(&graph)?;
        let pos = |id: NodeId| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(meta));
        assert!(!a_out.exists());
        Ok(())
    }
}
