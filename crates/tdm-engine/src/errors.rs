use thiserror::Error;

use tdm_core::{ConfigError, JobKind, OperationKind};

use crate::model::RunReport;
use crate::platform::PlatformError;

/// Errors emitted by the synchronization engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad template or descriptor; raised before any network I/O.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("query on {object} failed: {source}")]
    Query {
        object: String,
        #[source]
        source: PlatformError,
    },
    /// Job creation, submission, or completion failure for one chunk.
    #[error("{kind} job on {object} (chunk {chunk}) failed: {source}")]
    Job {
        kind: JobKind,
        object: String,
        chunk: usize,
        #[source]
        source: PlatformError,
    },
    /// The target answered with a different number of outcomes than records sent.
    #[error("{kind} job on {object} (chunk {chunk}) returned {received} outcomes for {sent} records")]
    OutcomeMismatch {
        kind: JobKind,
        object: String,
        chunk: usize,
        sent: usize,
        received: usize,
    },
    /// A batch worker panicked or was aborted.
    #[error("batch worker failed: {0}")]
    Worker(String),
    /// Fatal error while running one template operation.
    #[error("operation {index} ({operation} {object}) failed: {source}")]
    Operation {
        index: usize,
        operation: OperationKind,
        object: String,
        #[source]
        source: Box<SyncError>,
        /// Operations that ran before the failure; their changes are applied.
        partial: Box<RunReport>,
    },
}

impl SyncError {
    /// Report of the work applied before a fatal operation error.
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            SyncError::Operation { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
