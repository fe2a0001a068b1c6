use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Dependency cycle: {0}")]
    CyclicDependency(String),

    #[error("Two nodes claim the same output path {path:?}: '{first}' and '{second}'")]
    OutputCollision {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("Declared output {0:?} was not produced by the work routine")]
    MissingDeclaredOutput(PathBuf),

    #[error("Input file {0:?} does not exist")]
    StaleInputMissing(PathBuf),

    #[error("{tool} failed with {status}{}", fmt_stderr_tail(.stderr_tail))]
    WorkRoutineFailure {
        tool: String,
        status: String,
        stderr_tail: String,
    },
}

fn fmt_stderr_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("; last stderr output:\n{}", tail.trim_end())
    }
}
