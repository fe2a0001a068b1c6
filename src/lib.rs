//!
//! seqflow: a dependency-driven task execution engine for genomics
//! pipelines. The [`engine`] crate schedules arbitrary task nodes; the
//! [`nodes`] crate provides concrete node kinds and graph builders; this
//! crate ties them together behind a [`Pipeline`] façade plus command-line
//! argument handling for embedding applications.

/// Definition of command-line args
mod args;
/// Pipeline façade: listing modes, dry run, confirmation, execution
mod pipeline;
/// Interpreted run settings
mod settings;
/// Text UI
mod ui;

pub use args::Args;
pub use pipeline::Pipeline;
pub use settings::{ListMode, Settings};
pub use ui::Ui;

pub use engine;
pub use nodes;

/// Initialize stderr logging from a `-v` count.
pub fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);
}
