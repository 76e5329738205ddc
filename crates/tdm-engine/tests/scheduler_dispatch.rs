use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tdm_core::{FieldValue, JobKind, JobOutcome, Record};
use tdm_engine::{
    BatchRequest, BatchScheduler, BulkJobTarget, MemoryPlatform, PlatformError, SyncError,
};

fn accounts(count: usize) -> Vec<Record> {
    (0..count)
        .map(|n| {
            [
                ("Name", FieldValue::Text(format!("Account {n}"))),
                ("UUID__c", FieldValue::Text(format!("u{n}"))),
            ]
            .into_iter()
            .collect()
        })
        .collect()
}

fn upsert(concurrent: bool) -> BatchRequest {
    BatchRequest {
        kind: JobKind::Upsert,
        object: "Account".to_string(),
        external_id: Some("UUID__c".to_string()),
        concurrent,
    }
}

#[tokio::test]
async fn rejected_record_is_counted_without_aborting() {
    let target = Arc::new(MemoryPlatform::new());
    target
        .reject_records("Account", "UUID__c", "u1", "DUPLICATE_VALUE")
        .unwrap();
    let scheduler = BatchScheduler::new(target.clone(), false);

    let result = scheduler.dispatch(&upsert(true), accounts(3)).await.unwrap();
    assert_eq!(result.success_count, 2);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors[0].external_id.as_deref(), Some("u1"));
    assert_eq!(result.errors[0].message, "DUPLICATE_VALUE");
    assert_eq!(target.records("Account").unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_dispatch_covers_every_record_once() {
    let target = Arc::new(MemoryPlatform::new());
    let scheduler = BatchScheduler::new(target.clone(), false);

    let result = scheduler.dispatch(&upsert(true), accounts(450)).await.unwrap();
    assert_eq!(result.success_count, 450);
    assert_eq!(result.error_count, 0);

    let mut sizes: Vec<usize> = target
        .job_log()
        .unwrap()
        .iter()
        .map(|entry| entry.records)
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![50, 200, 200]);
    assert_eq!(target.records("Account").unwrap().len(), 450);
}

#[tokio::test]
async fn sequential_dispatch_uses_one_job_per_chunk() {
    let target = Arc::new(MemoryPlatform::new());
    let scheduler = BatchScheduler::new(target.clone(), false);

    scheduler.dispatch(&upsert(false), accounts(450)).await.unwrap();
    let log = target.job_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].records, 450);
}

#[tokio::test]
async fn job_failure_is_fatal() {
    let target = Arc::new(MemoryPlatform::new());
    target.fail_jobs("Account").unwrap();
    let scheduler = BatchScheduler::new(target.clone(), false);

    let err = scheduler
        .dispatch(&upsert(true), accounts(10))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Job { kind: JobKind::Upsert, chunk: 0, .. }
    ));
}

#[tokio::test]
async fn dry_run_submits_nothing() {
    let target = Arc::new(MemoryPlatform::new());
    let scheduler = BatchScheduler::new(target.clone(), true);

    let result = scheduler.dispatch(&upsert(true), accounts(25)).await.unwrap();
    assert_eq!(result.total(), 0);
    assert!(target.job_log().unwrap().is_empty());
    assert!(target.records("Account").unwrap().is_empty());
}

#[tokio::test]
async fn empty_input_dispatches_nothing() {
    let target = Arc::new(MemoryPlatform::new());
    let scheduler = BatchScheduler::new(target.clone(), false);

    let result = scheduler.dispatch(&upsert(true), Vec::new()).await.unwrap();
    assert_eq!(result.total(), 0);
    assert!(target.job_log().unwrap().is_empty());
}

struct SilentTarget;

#[async_trait]
impl BulkJobTarget for SilentTarget {
    async fn run_job(
        &self,
        _kind: JobKind,
        _object: &str,
        _external_id: Option<&str>,
        _records: Vec<Record>,
    ) -> Result<Vec<JobOutcome>, PlatformError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn missing_outcomes_are_reported() {
    let scheduler = BatchScheduler::new(Arc::new(SilentTarget), false);

    let err = scheduler
        .dispatch(&upsert(false), accounts(4))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::OutcomeMismatch { sent: 4, received: 0, .. }
    ));
}

/// Records what each job applied and how many jobs ran at once.
#[derive(Default)]
struct TrackingTarget {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    applied: Mutex<Vec<String>>,
    failing_key: Option<String>,
}

impl TrackingTarget {
    fn failing_on(key: &str) -> Self {
        Self {
            failing_key: Some(key.to_string()),
            ..Self::default()
        }
    }

    fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl BulkJobTarget for TrackingTarget {
    async fn run_job(
        &self,
        _kind: JobKind,
        _object: &str,
        external_id: Option<&str>,
        records: Vec<Record>,
    ) -> Result<Vec<JobOutcome>, PlatformError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let field = external_id.unwrap_or("UUID__c");
        let keys: Vec<String> = records.iter().filter_map(|r| r.text(field)).collect();
        if self.failing_key.as_ref().is_some_and(|key| keys.contains(key)) {
            return Err(PlatformError::Transport("job creation failed".to_string()));
        }
        let outcomes = keys.iter().map(|key| JobOutcome::succeeded(key.clone())).collect();
        self.applied.lock().unwrap().extend(keys);
        Ok(outcomes)
    }
}

#[tokio::test]
async fn failed_chunk_does_not_cancel_its_siblings() {
    let target = Arc::new(TrackingTarget::failing_on("u200"));
    let scheduler = BatchScheduler::new(target.clone(), false);

    let err = scheduler
        .dispatch(&upsert(true), accounts(450))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Job { kind: JobKind::Upsert, chunk: 1, .. }
    ));

    let applied = target.applied();
    assert_eq!(applied.len(), 250);
    assert!(applied.contains(&"u0".to_string()));
    assert!(applied.contains(&"u449".to_string()));
    assert!(!applied.contains(&"u200".to_string()));
}

#[tokio::test]
async fn in_flight_jobs_never_exceed_the_worker_limit() {
    let target = Arc::new(TrackingTarget::default());
    let scheduler = BatchScheduler::new(target.clone(), false);

    let result = scheduler
        .dispatch(&upsert(true), accounts(120_000))
        .await
        .unwrap();
    assert_eq!(result.success_count, 120_000);

    let peak = target.peak.load(Ordering::SeqCst);
    assert!(peak > 1, "chunks should overlap, peak was {peak}");
    assert!(peak <= 20, "peak of {peak} in-flight jobs exceeds 20 workers");
    assert_eq!(target.applied().len(), 120_000);
}

#[tokio::test]
async fn delete_jobs_use_at_most_ten_workers() {
    let target = Arc::new(TrackingTarget::default());
    let scheduler = BatchScheduler::new(target.clone(), false);
    let request = BatchRequest {
        kind: JobKind::Delete,
        object: "Account".to_string(),
        external_id: Some("UUID__c".to_string()),
        concurrent: true,
    };

    scheduler.dispatch(&request, accounts(60_000)).await.unwrap();
    assert!(target.peak.load(Ordering::SeqCst) <= 10);
}
