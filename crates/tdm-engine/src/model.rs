use std::fmt;

use serde::{Deserialize, Serialize};

use tdm_core::{JobResult, OperationKind};

use crate::resolver::PlanPass;

/// Options for the synchronization engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Run queries but never submit Delete/Upsert jobs.
    pub dry_run: bool,
    /// Seed for `fake.*` masks; random when absent.
    pub mask_seed: Option<u64>,
}

/// Lifecycle of one template operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Skipped,
    Deleting,
    Upserting,
    Verified,
    Done,
}

impl OperationState {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Skipped => "skipped",
            OperationState::Deleting => "deleting",
            OperationState::Upserting => "upserting",
            OperationState::Verified => "verified",
            OperationState::Done => "done",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one fetch/upsert pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass: PlanPass,
    /// Records returned by the source query.
    pub fetched: u64,
    pub result: JobResult,
}

/// Summary of one template operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub index: usize,
    pub object: String,
    pub operation: OperationKind,
    pub state: OperationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<JobResult>,
    pub passes: Vec<PassReport>,
    /// Post-run record count on the target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_count: Option<u64>,
    pub duration_ms: u64,
}

impl OperationReport {
    pub fn new(index: usize, operation: OperationKind, object: impl Into<String>) -> Self {
        Self {
            index,
            object: object.into(),
            operation,
            state: OperationState::Pending,
            deleted: None,
            passes: Vec::new(),
            target_count: None,
            duration_ms: 0,
        }
    }

    /// Upsert totals across every pass.
    pub fn upserted(&self) -> JobResult {
        let mut total = JobResult::default();
        for pass in &self.passes {
            total.merge(pass.result.clone());
        }
        total
    }
}

/// Summary of a template run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: String,
    pub source: String,
    pub target: String,
    pub dry_run: bool,
    pub operations: Vec<OperationReport>,
    /// Fatal error that ended the run early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Upsert totals across every operation.
    pub fn upserted(&self) -> JobResult {
        let mut total = JobResult::default();
        for operation in &self.operations {
            total.merge(operation.upserted());
        }
        total
    }

    /// Delete totals across every operation.
    pub fn deleted(&self) -> JobResult {
        let mut total = JobResult::default();
        for deleted in self.operations.iter().filter_map(|op| op.deleted.as_ref()) {
            total.merge(deleted.clone());
        }
        total
    }

    pub fn skipped(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.state == OperationState::Skipped)
            .count()
    }
}
