use std::fmt;

use serde::{Deserialize, Serialize};

/// Bulk job kinds supported by the target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Insert => "Insert",
            JobKind::Update => "Update",
            JobKind::Upsert => "Upsert",
            JobKind::Delete => "Delete",
        }
    }

    /// Whether the job addresses records by an external identifier.
    pub fn requires_external_id(self) -> bool {
        matches!(self, JobKind::Update | JobKind::Upsert)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record outcome reported by the target platform, positionally aligned
/// with the submitted records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    pub id: Option<String>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            error: None,
        }
    }

    pub fn failed(id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            id,
            error: Some(error.into()),
        }
    }
}

/// A record rejected by the target within an otherwise successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Chunk index within the dispatch.
    pub chunk: usize,
    /// Position of the record within its chunk.
    pub position: usize,
    /// Target-assigned identifier, when reported.
    pub id: Option<String>,
    /// External identifier value of the submitted record, when present.
    pub external_id: Option<String>,
    pub message: String,
}

/// Aggregated success/error counts for one or more jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success_count: u64,
    pub error_count: u64,
    pub errors: Vec<RecordError>,
}

impl JobResult {
    pub fn total(&self) -> u64 {
        self.success_count + self.error_count
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_error(&mut self, error: RecordError) {
        self.error_count += 1;
        self.errors.push(error);
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: JobResult) {
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.errors.extend(other.errors);
    }
}
