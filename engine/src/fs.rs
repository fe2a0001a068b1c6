use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

/// Move `src` to `tgt` such that `tgt` only ever appears in its complete form.
///
/// Uses `rename` when possible. If that fails (typically because the temp
/// workspace and the final path are on different filesystems), the file is
/// copied to a hidden sibling of `tgt` first and renamed into place from
/// there, so a concurrent reader of `tgt` observes either nothing or the
/// whole file.
pub fn move_file(src: &Path, tgt: &Path) -> Result<()> {
    match fs::rename(src, tgt) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::debug!("rename {src:?} -> {tgt:?} failed ({e}); copying instead");
            let staged = staging_path(tgt);
            fs::copy(src, &staged)
                .with_context(|| format!("copying {src:?} to staging file {staged:?}"))?;
            fs::rename(&staged, tgt)
                .with_context(|| format!("renaming staging file into place at {tgt:?}"))?;
            fs::remove_file(src).with_context(|| format!("removing moved source {src:?}"))?;
            Ok(())
        }
    }
}

/// Hidden sibling of `path` used to stage cross-filesystem moves.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    name.push(".tmp");
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Create the parent directory of `path`, and any missing ancestors.
pub fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent dir of {path:?}"))?;
    }
    Ok(())
}

/// Modification time of `path`.
pub fn modified(path: &Path) -> Result<SystemTime> {
    let meta = fs::metadata(path).with_context(|| format!("reading metadata of {path:?}"))?;
    Ok(meta.modified()?)
}

/// True if every output exists and the oldest output is at least as new as
/// the newest input. A node with no outputs can never be proven satisfied.
pub fn is_up_to_date(outputs: &[PathBuf], inputs: &[PathBuf]) -> Result<bool> {
    if outputs.is_empty() {
        return Ok(false);
    }

    let mut oldest_output: Option<SystemTime> = None;
    for output in outputs {
        if !output.exists() {
            return Ok(false);
        }
        let mtime = modified(output)?;
        if oldest_output.map_or(true, |oldest| mtime < oldest) {
            oldest_output = Some(mtime);
        }
    }

    for input in inputs {
        // missing inputs are handled by the scheduler before this check.
        if modified(input)? > oldest_output.unwrap_or(SystemTime::UNIX_EPOCH) {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn move_file_replaces_target_path() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        let tgt = dir.path().join("sub/tgt");
        fs::write(&src, "payload")?;

        create_parent_dir(&tgt)?;
        move_file(&src, &tgt)?;

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&tgt)?, "payload");
        Ok(())
    }

    #[test]
    fn up_to_date_requires_all_outputs() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("in");
        let out_a = dir.path().join("a");
        let out_b = dir.path().join("b");
        fs::write(&input, "")?;
        fs::write(&out_a, "")?;

        let inputs = vec![input];
        assert!(!is_up_to_date(&[out_a.clone(), out_b.clone()], &inputs)?);

        fs::write(&out_b, "")?;
        assert!(is_up_to_date(&[out_a, out_b], &inputs)?);
        Ok(())
    }

    #[test]
    fn newer_input_marks_outputs_stale() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::write(&output, "")?;
        fs::write(&input, "")?;

        let old = SystemTime::now() - std::time::Duration::from_secs(60);
        fs::File::open(&output)?.set_modified(old)?;

        assert!(!is_up_to_date(&[output], &[input])?);
        Ok(())
    }
}
