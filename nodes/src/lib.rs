//!
//! Concrete node kinds and graph builders for sequence pipelines.
//!
//! The [`engine`] crate knows nothing about file contents; everything
//! domain-specific lives here: FASTA plumbing, sequence collection,
//! singleton filtering, external-tool invocation, and the per-reference
//! assembly builder.

/// Minimal FASTA record reader/writer
pub mod fasta;

/// Multiple-sequence alignments and singleton masking
pub mod msa;

/// Sequence collection and filtering nodes, and their grouping builder
mod sequences;
pub use sequences::{
    collect_filtered, CollectSequencesNode, Error, FilterSingletonsNode, SingletonFilter,
};

/// External-tool task node with workspace-rerooted argv
mod command;
pub use command::{CmdArg, CommandNode};

/// Per-reference assembly builder
mod assembly;
pub use assembly::{build_reference, Assembly, Features, Reference, Sample, ToolConfig};
