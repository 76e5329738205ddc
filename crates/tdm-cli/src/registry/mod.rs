//! Run registry: one directory per `tdm run` under `--run-dir`.
//!
//! ```text
//! <run-dir>/<started-at>__run_<id>/
//!   config.json    inputs, environments, seed, git state
//!   logs.ndjson    every tracing event of the run
//!   report.json    run report, partial when an operation failed
//! ```

mod logging;
mod run;

use std::path::PathBuf;

pub use logging::init_run_logging;
pub use run::{RunContext, RunPaths, start_run, write_report};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to write run artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install run log subscriber: {0}")]
    Subscriber(String),
}

impl RegistryError {
    fn artifact(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| RegistryError::Artifact {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
