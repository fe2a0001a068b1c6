use std::path::{Path, PathBuf};

use anyhow::Result;

use engine::{Graph, NodeId};

use crate::command::CommandNode;

/// Which assembly flavors to publish for a reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub raw: bool,
    pub realigned: bool,
}

/// External tools (and their thread reservation) used by the assembly steps.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Merges per-sample alignment files into one.
    pub merge: String,
    /// Produces realignment intervals and the realigned alignment.
    pub realign: String,
    /// Checks an alignment file for consistency; produces no file itself.
    pub validate: String,
    pub tool_threads: usize,
}

/// A reference genome to assemble against.
#[derive(Debug, Clone)]
pub struct Reference {
    pub name: String,
    pub sequence: PathBuf,
}

/// One sample's contribution: its alignment files, each paired with the
/// node producing it, plus the sample's own grouping node.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub files_and_nodes: Vec<(PathBuf, NodeId)>,
    pub node: NodeId,
}

/// The published result of [`build_reference`]: each final alignment file
/// paired with the validation node that must succeed before the file is
/// trustworthy, plus the grouping node for the whole reference. Consumers
/// wiring dependencies through `files_and_nodes` therefore wait for the
/// file to be produced *and* validated.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub name: String,
    pub files_and_nodes: Vec<(PathBuf, NodeId)>,
    pub node: NodeId,
}

/// Build the assembly subgraph for one reference of one target.
///
/// With at least one feature enabled, all samples' files are merged into
/// `<destination>/<target>.<name>.bam` and every physical output gets a
/// paired validation node publishing a marker under `<destination>/<target>/`.
/// The returned grouping node covers the validations and depends on the
/// per-sample nodes, so it only completes once the whole subtree has.
///
/// With no features enabled nothing is built: the grouping node covers just
/// the per-sample nodes and the per-sample files are published as-is.
pub fn build_reference(
    graph: &mut Graph,
    destination: &Path,
    target: &str,
    reference: &Reference,
    samples: &[Sample],
    features: &Features,
    tools: &ToolConfig,
) -> Result<Assembly> {
    let name = &reference.name;
    let sample_nodes = sorted_deduped(samples.iter().map(|sample| sample.node));

    if !features.raw && !features.realigned {
        log::info!("no assembly features enabled for '{target}.{name}'; grouping samples only");
        let files_and_nodes = samples
            .iter()
            .flat_map(|sample| sample.files_and_nodes.iter().cloned())
            .collect();
        let node = graph.add_meta(format!("assembly '{target}.{name}'"), &sample_nodes, &[]);
        return Ok(Assembly {
            name: name.clone(),
            files_and_nodes,
            node,
        });
    }

    let raw_bam = destination.join(format!("{target}.{name}.bam"));
    let check_dir = destination.join(target);

    let mut merge = CommandNode::new(
        format!("merging '{target}' samples into '{}'", raw_bam.display()),
        &tools.merge,
    )
    .threads(tools.tool_threads)
    .output(&raw_bam);
    let mut merge_deps = Vec::new();
    for sample in samples {
        for (path, producer) in &sample.files_and_nodes {
            merge = merge.input(path);
            merge_deps.push(*producer);
        }
    }
    let merge_node = graph.add_task(merge, &sorted_deduped(merge_deps))?;

    let mut validations = Vec::new();
    let raw_check = CommandNode::new(
        format!("validating '{}'", raw_bam.display()),
        &tools.validate,
    )
    .input(&raw_bam)
    .require(&reference.sequence)
    .completion_marker(check_dir.join(format!("{name}.validated")));
    let raw_check_node = graph.add_task(raw_check, &[merge_node])?;
    validations.push(raw_check_node);

    let mut files_and_nodes = Vec::new();
    if features.raw {
        files_and_nodes.push((raw_bam.clone(), raw_check_node));
    }

    if features.realigned {
        let realigned_bam = destination.join(format!("{target}.{name}.realigned.bam"));
        let realign = CommandNode::new(
            format!("realigning indels in '{}'", raw_bam.display()),
            &tools.realign,
        )
        .threads(tools.tool_threads)
        .input(&raw_bam)
        .require(&reference.sequence)
        .output(check_dir.join(format!("{name}.intervals")))
        .output(&realigned_bam);
        let realign_node = graph.add_task(realign, &[merge_node])?;

        let realigned_check = CommandNode::new(
            format!("validating '{}'", realigned_bam.display()),
            &tools.validate,
        )
        .input(&realigned_bam)
        .require(&reference.sequence)
        .completion_marker(check_dir.join(format!("{name}.realigned.validated")));
        let realigned_check_node = graph.add_task(realigned_check, &[realign_node])?;
        validations.push(realigned_check_node);

        files_and_nodes.push((realigned_bam, realigned_check_node));
    }

    let node = graph.add_meta(
        format!("assembly '{target}.{name}'"),
        &validations,
        &sample_nodes,
    );
    Ok(Assembly {
        name: name.clone(),
        files_and_nodes,
        node,
    })
}

fn sorted_deduped(nodes: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = nodes.into_iter().collect();
    nodes.sort();
    nodes.dedup();
    nodes
}
