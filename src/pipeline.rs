use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::Colorize;

use engine::{Graph, RunOptions, RunSummary, Scheduler, WorkspaceAllocator};
use nodes::ToolConfig;

use crate::settings::{ListMode, Settings};
use crate::ui::Ui;

/// Owns the graph under construction and runs it according to settings.
///
/// Callers populate the graph through [`Pipeline::graph_mut`] (directly or
/// with the builders in the `nodes` crate), then call [`Pipeline::run`].
pub struct Pipeline {
    graph: Graph,
    settings: Settings,
    ui: Ui,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        let ui = Ui::new(&settings);
        Self {
            graph: Graph::new(),
            settings,
            ui,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Tool configuration for the assembly builders, carrying the
    /// per-external-tool thread cap from the settings.
    pub fn tool_config(&self, merge: &str, realign: &str, validate: &str) -> ToolConfig {
        ToolConfig {
            merge: merge.to_owned(),
            realign: realign.to_owned(),
            validate: validate.to_owned(),
            tool_threads: self.settings.tool_threads,
        }
    }

    /// Resolve a per-sample input file against the configured samples root.
    pub fn samples_path(&self, file: impl AsRef<Path>) -> PathBuf {
        match &self.settings.samples_root {
            Some(root) => root.join(file),
            None => file.as_ref().to_path_buf(),
        }
    }

    /// Run the pipeline according to the settings.
    ///
    /// Listing modes and dry runs print to stdout/stderr, execute nothing,
    /// write nothing, and return `None`. A declined confirmation also
    /// returns `None`. Otherwise the graph is executed and the summary
    /// returned; a summary with failures is still `Ok`, since the run
    /// itself completed.
    pub fn run(mut self) -> Result<Option<RunSummary>> {
        if let Some(mode) = self.settings.list_mode {
            self.print_listing(mode);
            return Ok(None);
        }

        self.ui.verbose_progress("Validating graph");
        self.graph.validate()?;
        self.ui.done();

        if self.settings.dry_run {
            self.print_plan()?;
            return Ok(None);
        }

        self.ui
            .verbose_msg(&format!("Using output directory {:?}", self.settings.destination));
        let prompt = format!("Run {} nodes?", self.graph.len());
        if !self.ui.confirm(&prompt)? {
            eprintln!("{}", "Not running.".red());
            return Ok(None);
        }

        let options = RunOptions {
            max_threads: self.settings.max_threads,
            fail_fast: self.settings.fail_fast,
            force: self.settings.force,
            verbose: self.settings.verbose > 0,
        };
        let scheduler = Scheduler::new(
            options,
            WorkspaceAllocator::new(&self.settings.temp_root),
        );

        self.ui.start_timer();
        let summary = scheduler.run(&self.graph)?;
        self.ui.print_elapsed("pipeline");

        summary.print_recap(&self.graph)?;
        Ok(Some(summary))
    }

    fn print_listing(&self, mode: ListMode) {
        match mode {
            ListMode::InputFiles => {
                for path in self.graph.input_files() {
                    println!("{}", path.display());
                }
            }
            ListMode::OutputFiles => {
                for path in self.graph.output_files() {
                    println!("{}", path.display());
                }
            }
            ListMode::Executables => {
                for tool in self.graph.tools() {
                    println!("{tool}");
                }
            }
        }
    }

    fn print_plan(&self) -> Result<()> {
        let order = Scheduler::plan(&self.graph)?;
        eprintln!("{}", format!("Would run {} nodes:", order.len()).green());
        for id in order {
            eprintln!("  {id} {}", self.graph.description(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_config_carries_the_tool_thread_cap() {
        let settings = Settings {
            tool_threads: 4,
            ..Settings::default()
        };
        let pipeline = Pipeline::new(settings);

        let tools = pipeline.tool_config("merge-tool", "realign-tool", "validate-tool");
        assert_eq!(tools.tool_threads, 4);
        assert_eq!(tools.merge, "merge-tool");
        assert_eq!(tools.validate, "validate-tool");
    }

    #[test]
    fn sample_files_resolve_against_the_samples_root() {
        let settings = Settings {
            samples_root: Some(PathBuf::from("/data/samples")),
            ..Settings::default()
        };
        let pipeline = Pipeline::new(settings);
        assert_eq!(
            pipeline.samples_path("s1.bam"),
            PathBuf::from("/data/samples/s1.bam")
        );

        let pipeline = Pipeline::new(Settings::default());
        assert_eq!(pipeline.samples_path("s1.bam"), PathBuf::from("s1.bam"));
    }
}
