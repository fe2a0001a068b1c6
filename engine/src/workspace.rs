use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fs, io};

use anyhow::{Context, Result};

use crate::{fs as fsutil, Error};

/// Hands out process-unique temp directories under a single temp root.
///
/// Directory names combine the process id with a sequence counter, so
/// concurrently running nodes never share a workspace and leftovers from a
/// previous (crashed) process never get reused.
pub struct WorkspaceAllocator {
    temp_root: PathBuf,
    seq: AtomicU64,
}

impl WorkspaceAllocator {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Create a fresh, empty workspace directory.
    pub fn allocate(&self) -> Result<TaskWorkspace> {
        fs::create_dir_all(&self.temp_root)
            .with_context(|| format!("creating temp root {:?}", self.temp_root))?;

        loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let dir = self
                .temp_root
                .join(format!("{}_{seq:04}", std::process::id()));
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(TaskWorkspace { dir }),
                // stale leftover with the same name; try the next sequence number.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("creating temp workspace {dir:?}"))
                }
            }
        }
    }
}

/// Private temp directory for one running node.
///
/// The work routine writes every declared output under this directory (at
/// [`TaskWorkspace::resolve`] paths); [`TaskWorkspace::publish`] then moves
/// them to their final paths. Whatever is left in the directory (stdio
/// captures, scratch files, everything after a failure) is removed when the
/// workspace is dropped, so a failed attempt leaves no trace at the final
/// output paths.
pub struct TaskWorkspace {
    dir: PathBuf,
}

impl TaskWorkspace {
    /// Root of the workspace; also the working directory for external tools.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Temp location for a declared output: its final file name, rerooted
    /// onto this workspace.
    pub fn resolve(&self, final_path: &Path) -> PathBuf {
        match final_path.file_name() {
            Some(name) => self.dir.join(name),
            None => self.dir.clone(),
        }
    }

    /// Move every declared output from the workspace to its final path,
    /// creating parent directories as needed. Each move is atomic per file.
    /// A declared output missing from the workspace is a contract violation
    /// by the work routine.
    pub fn publish(self, outputs: &[PathBuf]) -> Result<()> {
        for output in outputs {
            let temp = self.resolve(output);
            if !temp.exists() {
                return Err(Error::MissingDeclaredOutput(output.clone()).into());
            }
            fsutil::create_parent_dir(output)?;
            fsutil::move_file(&temp, output)
                .with_context(|| format!("publishing {output:?}"))?;
        }
        Ok(())
        // dropping self removes the (now outputless) temp directory.
    }
}

impl Drop for TaskWorkspace {
    fn drop(&mut self) {
        if self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                log::warn!("failed to remove temp workspace {:?}: {e}", self.dir);
            }
        }
    }
}
