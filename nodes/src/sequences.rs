use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use engine::{Graph, NodeId, Task, TaskWorkspace};

use crate::fasta;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("taxon '{taxon}' has no sequence named '{sequence}'")]
    SequenceMissing { taxon: String, sequence: String },

    #[error("singleton filter for '{0}' has no comparison groups")]
    EmptyFilterGroups(String),

    #[error("path {0:?} has no file name")]
    NoFileName(PathBuf),
}

/// Regroups per-taxon FASTA files into per-sequence FASTA files.
///
/// Each input file holds one taxon's copy of many named sequences; each
/// output file holds one sequence across all taxa, one record per taxon,
/// named after the taxon. Taxa and sequences are processed in sorted order
/// so output files are deterministic.
pub struct CollectSequencesNode {
    description: String,
    /// (taxon, per-taxon FASTA file), sorted by taxon.
    taxa: Vec<(String, PathBuf)>,
    /// Sequence names, sorted and deduplicated; parallel to `outputs`.
    sequences: Vec<String>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
}

impl CollectSequencesNode {
    pub fn new(fasta_files: &[(String, PathBuf)], sequences: &[String], destination: &Path) -> Self {
        let mut taxa = fasta_files.to_vec();
        taxa.sort();
        let mut sequences = sequences.to_vec();
        sequences.sort();
        sequences.dedup();

        let inputs = taxa.iter().map(|(_, path)| path.clone()).collect();
        let outputs = sequences
            .iter()
            .map(|name| destination.join(format!("{name}.fasta")))
            .collect();
        let description = format!(
            "collecting {} sequences from {} taxa in '{}'",
            sequences.len(),
            taxa.len(),
            destination.display()
        );

        Self {
            description,
            taxa,
            sequences,
            inputs,
            outputs,
        }
    }
}

impl Task for CollectSequencesNode {
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
        let mut writers = self
            .outputs
            .iter()
            .map(|output| fs::File::create(workspace.resolve(output)).map(io::BufWriter::new))
            .collect::<io::Result<Vec<_>>>()?;

        for (taxon, path) in &self.taxa {
            let records = fasta::read_records(path)?;
            let by_name: util::HashMap<&str, &str> = records
                .iter()
                .map(|record| (record.name.as_str(), record.sequence.as_str()))
                .collect();

            for (name, writer) in self.sequences.iter().zip(&mut writers) {
                let sequence = by_name.get(name.as_str()).ok_or_else(|| Error::SequenceMissing {
                    taxon: taxon.clone(),
                    sequence: name.clone(),
                })?;
                fasta::write_record(writer, taxon, sequence)?;
            }
        }

        for mut writer in writers {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Which taxon to filter and which comparison groups corroborate its bases.
#[derive(Debug, Clone)]
pub struct SingletonFilter {
    pub taxon: String,
    pub groups: Vec<Vec<String>>,
}

/// Masks singleton bases of one taxon in one alignment file.
#[derive(Debug)]
pub struct FilterSingletonsNode {
    description: String,
    filter: SingletonFilter,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
}

impl FilterSingletonsNode {
    /// Fails fast on a filter with no comparison groups; running such a
    /// filter would silently pass everything through.
    pub fn new(input: PathBuf, output: PathBuf, filter: SingletonFilter) -> Result<Self, Error> {
        if filter.groups.is_empty() || filter.groups.iter().any(Vec::is_empty) {
            return Err(Error::EmptyFilterGroups(filter.taxon));
        }
        let description = format!(
            "filtering singletons of '{}' in '{}'",
            filter.taxon,
            input.display()
        );
        Ok(Self {
            description,
            filter,
            inputs: vec![input],
            outputs: vec![output],
        })
    }
}

impl Task for FilterSingletonsNode {
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
        let mut msa = crate::msa::Msa::from_file(&self.inputs[0])?;
        for group in &self.filter.groups {
            msa = msa.filter_singletons(&self.filter.taxon, group)?;
        }

        let output = &self.outputs[0];
        let mut writer = io::BufWriter::new(fs::File::create(workspace.resolve(output))?);
        for record in msa.records() {
            fasta::write_record(&mut writer, &record.name, &record.sequence)?;
        }
        writer.flush().with_context(|| format!("writing {output:?}"))
    }
}

/// Fan one [`FilterSingletonsNode`] out per input file, writing same-named
/// outputs under `destination`, grouped under a single composite node.
///
/// `input_files` pairs each alignment with the node that produces it, so the
/// filters are scheduled after their producers.
pub fn collect_filtered(
    graph: &mut Graph,
    input_files: &[(PathBuf, NodeId)],
    destination: &Path,
    filter: &SingletonFilter,
    dependencies: &[NodeId],
) -> Result<NodeId> {
    let mut subnodes = Vec::with_capacity(input_files.len());
    for (path, producer) in input_files {
        let name = path
            .file_name()
            .ok_or_else(|| Error::NoFileName(path.clone()))?;
        let node = graph.add_task(
            FilterSingletonsNode::new(path.clone(), destination.join(name), filter.clone())?,
            &[*producer],
        )?;
        subnodes.push(node);
    }

    let description = format!(
        "filtering singletons of '{}' into '{}'",
        filter.taxon,
        destination.display()
    );
    Ok(graph.add_meta(description, &subnodes, dependencies))
}
