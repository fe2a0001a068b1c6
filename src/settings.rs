use std::path::PathBuf;

use anyhow::Result;

use crate::args::Args;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("thread counts must be at least 1")]
    ZeroThreads,
    #[error("at most one --list-* flag may be given")]
    MultipleListModes,
}

/// What to print instead of executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    InputFiles,
    OutputFiles,
    Executables,
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    pub max_threads: usize,
    pub tool_threads: usize,
    pub dry_run: bool,
    pub fail_fast: bool,
    pub force: bool,
    pub temp_root: PathBuf,
    pub destination: PathBuf,
    pub samples_root: Option<PathBuf>,
    pub list_mode: Option<ListMode>,
    pub yes: bool,
    pub verbose: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_threads: 1,
            tool_threads: 1,
            dry_run: false,
            fail_fast: false,
            force: false,
            temp_root: default_temp_root(),
            destination: PathBuf::from("./results"),
            samples_root: None,
            list_mode: None,
            yes: false,
            verbose: 0,
        }
    }
}

fn default_temp_root() -> PathBuf {
    std::env::temp_dir().join("seqflow")
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self> {
        if args.max_threads == 0 || args.tool_threads == 0 {
            return Err(Error::ZeroThreads.into());
        }

        let mut list_mode = None;
        let flags = [
            (args.list_input_files, ListMode::InputFiles),
            (args.list_output_files, ListMode::OutputFiles),
            (args.list_executables, ListMode::Executables),
        ];
        for (flag, mode) in flags {
            if flag {
                if list_mode.is_some() {
                    return Err(Error::MultipleListModes.into());
                }
                list_mode = Some(mode);
            }
        }

        Ok(Self {
            max_threads: args.max_threads,
            tool_threads: args.tool_threads,
            dry_run: args.dry_run,
            fail_fast: args.fail_fast,
            force: args.force,
            temp_root: args.temp_root.unwrap_or_else(default_temp_root),
            destination: args.destination,
            samples_root: args.samples_root,
            list_mode,
            yes: args.yes,
            verbose: args.verbose,
        })
    }
}
