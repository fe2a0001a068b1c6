use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use engine::{Task, TaskWorkspace};

/// How many trailing lines of a failed tool's stderr to carry in the error.
const STDERR_TAIL_LINES: usize = 10;

/// One argv element of an external command.
#[derive(Debug, Clone)]
pub enum CmdArg {
    /// Passed through verbatim.
    Literal(String),
    /// A declared input; passed as an absolute path, since the child runs
    /// with the temp workspace as its working directory.
    Input(PathBuf),
    /// A declared output; rerooted into the temp workspace at run time.
    Output(PathBuf),
}

/// Task node wrapping one external tool invocation.
///
/// The child runs inside the node's temp workspace with stdin closed and
/// stdout/stderr captured to files there; those captures are scratch files
/// and disappear with the workspace. A non-zero exit becomes a
/// [`engine::Error::WorkRoutineFailure`] carrying the tail of stderr.
pub struct CommandNode {
    description: String,
    tool: String,
    args: Vec<CmdArg>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    threads: usize,
    marker: Option<PathBuf>,
}

impl CommandNode {
    pub fn new(description: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            tool: tool.into(),
            args: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            threads: 1,
            marker: None,
        }
    }

    /// Append a literal argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(CmdArg::Literal(arg.into()));
        self
    }

    /// Append an input-path argument and declare it as an input.
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.inputs.push(path.clone());
        self.args.push(CmdArg::Input(path));
        self
    }

    /// Declare an input that does not appear on the command line.
    pub fn require(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Append an output-path argument and declare it as an output.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.outputs.push(path.clone());
        self.args.push(CmdArg::Output(path));
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Declare an empty marker file, written only when the tool succeeds.
    /// Used by validation nodes, whose tools produce no file of their own.
    pub fn completion_marker(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.outputs.push(path.clone());
        self.marker = Some(path);
        self
    }
}

impl Task for CommandNode {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn input_files(&self) -> &[PathBuf] {
        &self.inputs
    }

    fn output_files(&self) -> &[PathBuf] {
        &self.outputs
    }

    fn threads(&self) -> usize {
        self.threads
    }

    fn tool(&self) -> Option<&str> {
        Some(&self.tool)
    }

    fn run(&self, workspace: &TaskWorkspace) -> Result<()> {
        let mut command = Command::new(&self.tool);
        for arg in &self.args {
            match arg {
                CmdArg::Literal(text) => command.arg(text),
                CmdArg::Input(path) => command.arg(std::path::absolute(path)?),
                CmdArg::Output(path) => command.arg(workspace.resolve(path)),
            };
        }

        let stdout_path = workspace.path().join("stdout.txt");
        let stderr_path = workspace.path().join("stderr.txt");
        let stdout = fs::File::create(&stdout_path)?;
        let stderr = fs::File::create(&stderr_path)?;

        log::debug!("running '{}' in {:?}", self.tool, workspace.path());
        let status = command
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .with_context(|| format!("starting '{}'", self.tool))?;

        if !status.success() {
            return Err(engine::Error::WorkRoutineFailure {
                tool: self.tool.clone(),
                status: status.to_string(),
                stderr_tail: stderr_tail(&stderr_path)?,
            }
            .into());
        }

        if let Some(marker) = &self.marker {
            fs::write(workspace.resolve(marker), b"")?;
        }
        Ok(())
    }
}

fn stderr_tail(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading captured stderr {path:?}"))?;
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    Ok(lines[start..].join("\n"))
}
