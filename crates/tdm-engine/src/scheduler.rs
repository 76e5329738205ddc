use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use tdm_core::{JobKind, JobOutcome, JobResult, Record, RecordError};

use crate::errors::{SyncError, SyncResult};
use crate::platform::BulkJobTarget;

/// Smallest efficient batch on the target platform.
pub const MIN_BATCH: usize = 200;
/// Largest batch accepted per job.
pub const MAX_BATCH: usize = 5000;
const DELETE_THREADS: usize = 10;
const DEFAULT_THREADS: usize = 20;

/// Worker count for a dispatch.
pub fn thread_count(kind: JobKind, concurrent: bool) -> usize {
    match (concurrent, kind) {
        (false, _) => 1,
        (true, JobKind::Delete) => DELETE_THREADS,
        (true, _) => DEFAULT_THREADS,
    }
}

/// Adaptive chunk size: an even share per worker rounded up to a multiple of
/// [`MIN_BATCH`], capped at [`MAX_BATCH`].
pub fn chunk_size(record_count: usize, threads: usize) -> usize {
    let base = record_count / threads.max(1);
    let remainder = base % MIN_BATCH;
    let size = if base > 0 && remainder == 0 {
        base
    } else {
        base + (MIN_BATCH - remainder)
    };
    size.min(MAX_BATCH)
}

/// Split into consecutive chunks of `size`; the last chunk may be shorter.
pub fn split_chunks(records: Vec<Record>, size: usize) -> Vec<Vec<Record>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(records.len().div_ceil(size));
    let mut iter = records.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

/// What to dispatch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub kind: JobKind,
    pub object: String,
    /// Key field of each record: the external id for `Upsert` and `Update`
    /// (required), the primary key for `Delete`.
    pub external_id: Option<String>,
    pub concurrent: bool,
}

/// Dispatches record sets as concurrent bulk jobs bounded by a worker limit.
#[derive(Clone)]
pub struct BatchScheduler {
    target: Arc<dyn BulkJobTarget>,
    dry_run: bool,
}

impl BatchScheduler {
    pub fn new(target: Arc<dyn BulkJobTarget>, dry_run: bool) -> Self {
        Self { target, dry_run }
    }

    /// Run every chunk to completion and aggregate the outcomes.
    ///
    /// Rejected records are counted and logged. A failed chunk does not stop
    /// its siblings; once all chunks have finished the first failure is
    /// returned.
    pub async fn dispatch(
        &self,
        request: &BatchRequest,
        records: Vec<Record>,
    ) -> SyncResult<JobResult> {
        if records.is_empty() {
            return Ok(JobResult::default());
        }

        let threads = thread_count(request.kind, request.concurrent);
        let size = chunk_size(records.len(), threads);
        let total = records.len();
        let chunks = split_chunks(records, size);
        let start = Instant::now();
        debug!(
            object = %request.object,
            kind = %request.kind,
            records = total,
            threads,
            chunk_size = size,
            chunks = chunks.len(),
            "dispatching batch jobs"
        );

        if self.dry_run {
            info!(
                object = %request.object,
                kind = %request.kind,
                records = total,
                chunks = chunks.len(),
                "dry run: batch jobs not submitted"
            );
            return Ok(JobResult::default());
        }

        let permits = Arc::new(Semaphore::new(threads));
        let mut handles = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            let target = Arc::clone(&self.target);
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|err| SyncError::Worker(err.to_string()))?;
                run_chunk(target.as_ref(), &request, index, chunk).await
            }));
        }

        let mut result = JobResult::default();
        let mut first_error = None;
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(SyncError::Worker(join_err.to_string())),
            };
            match outcome {
                Ok(chunk_result) => result.merge(chunk_result),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        info!(
            object = %request.object,
            kind = %request.kind,
            successes = result.success_count,
            failures = result.error_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "batch jobs completed"
        );
        Ok(result)
    }
}

async fn run_chunk(
    target: &dyn BulkJobTarget,
    request: &BatchRequest,
    chunk: usize,
    records: Vec<Record>,
) -> SyncResult<JobResult> {
    let sent = records.len();
    let external_ids: Vec<Option<String>> = match request.external_id.as_deref() {
        Some(field) => records.iter().map(|record| record.text(field)).collect(),
        None => vec![None; sent],
    };

    let outcomes = target
        .run_job(
            request.kind,
            &request.object,
            request.external_id.as_deref(),
            records,
        )
        .await
        .map_err(|source| SyncError::Job {
            kind: request.kind,
            object: request.object.clone(),
            chunk,
            source,
        })?;

    if outcomes.len() != sent {
        return Err(SyncError::OutcomeMismatch {
            kind: request.kind,
            object: request.object.clone(),
            chunk,
            sent,
            received: outcomes.len(),
        });
    }

    let result = tally(&request.object, chunk, outcomes, external_ids);
    info!(
        object = %request.object,
        kind = %request.kind,
        chunk,
        successes = result.success_count,
        failures = result.error_count,
        "batch job completed"
    );
    Ok(result)
}

fn tally(
    object: &str,
    chunk: usize,
    outcomes: Vec<JobOutcome>,
    external_ids: Vec<Option<String>>,
) -> JobResult {
    let mut result = JobResult::default();
    for (position, (outcome, external_id)) in outcomes.into_iter().zip(external_ids).enumerate() {
        if outcome.success {
            result.record_success();
            continue;
        }
        let message = outcome
            .error
            .unwrap_or_else(|| "record rejected without message".to_string());
        warn!(
            object,
            chunk,
            position,
            id = outcome.id.as_deref().unwrap_or(""),
            external_id = external_id.as_deref().unwrap_or(""),
            error = %message,
            "record failed in batch"
        );
        result.record_error(RecordError {
            chunk,
            position,
            id: outcome.id,
            external_id,
            message,
        });
    }
    result
}
