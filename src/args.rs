use std::path::PathBuf;

use clap::Parser;

const CMD_NAME: &str = "seqflow";
const DEFAULT_DESTINATION: &str = "./results";

/// Stores our command-line args format.
#[derive(Parser, Debug)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    /// Total worker-thread budget
    #[arg(short = 't', long, value_name = "N", default_value_t = 1)]
    pub max_threads: usize,

    /// Thread reservation for multi-threaded external tools
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub tool_threads: usize,

    /// Dry run; print the execution plan but don't run anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Stop dispatching new nodes after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Re-run nodes even when their outputs are up to date
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Directory for per-node temp workspaces
    #[arg(long, value_name = "DIR", env = "SEQFLOW_TEMP_ROOT")]
    pub temp_root: Option<PathBuf>,

    /// Directory for final pipeline outputs
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_DESTINATION)]
    #[arg(env = "SEQFLOW_DESTINATION")]
    pub destination: PathBuf,

    /// Directory containing per-sample input files
    #[arg(long, value_name = "DIR", env = "SEQFLOW_SAMPLES_ROOT")]
    pub samples_root: Option<PathBuf>,

    /// List external input files the pipeline would read, then exit
    #[arg(long)]
    pub list_input_files: bool,

    /// List output files the pipeline would produce, then exit
    #[arg(long)]
    pub list_output_files: bool,

    /// List external executables the pipeline would invoke, then exit
    #[arg(long)]
    pub list_executables: bool,

    /// Bypass user confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
