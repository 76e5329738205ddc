use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use tdm_core::{
    ConfigError, JobKind, JobResult, OperationDescriptor, Record, Template, validate_template,
};

use crate::errors::{SyncError, SyncResult};
use crate::flatten::flatten_records;
use crate::masking::MaskApplier;
use crate::model::{EngineOptions, OperationReport, OperationState, PassReport, RunReport};
use crate::platform::{BulkJobTarget, QueryRequest, QuerySource};
use crate::resolver::{UpsertPlan, build_plans};
use crate::scheduler::{BatchRequest, BatchScheduler};

/// Runs templates from a source platform into a target platform.
///
/// Operations run serially in template order; only the batch jobs of one
/// pass run concurrently.
pub struct SyncEngine {
    source: Arc<dyn QuerySource>,
    target: Arc<dyn QuerySource>,
    scheduler: BatchScheduler,
    masker: MaskApplier,
    options: EngineOptions,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn QuerySource>,
        target: Arc<dyn QuerySource>,
        jobs: Arc<dyn BulkJobTarget>,
        options: EngineOptions,
    ) -> Self {
        let masker = match options.mask_seed {
            Some(seed) => MaskApplier::seeded(seed),
            None => MaskApplier::random(),
        };
        Self {
            source,
            target,
            scheduler: BatchScheduler::new(jobs, options.dry_run),
            masker,
            options,
        }
    }

    /// Engine whose target serves both queries and bulk jobs.
    pub fn with_target<T>(source: Arc<dyn QuerySource>, target: Arc<T>, options: EngineOptions) -> Self
    where
        T: QuerySource + BulkJobTarget + 'static,
    {
        let query: Arc<dyn QuerySource> = target.clone();
        let jobs: Arc<dyn BulkJobTarget> = target;
        Self::new(source, query, jobs, options)
    }

    /// Replace the mask generator (ex.: to pin the reference date).
    pub fn with_masker(mut self, masker: MaskApplier) -> Self {
        self.masker = masker;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Validate then run every operation of `template`.
    ///
    /// Validation errors abort before any query is issued. The first fatal
    /// operation error terminates the run.
    pub async fn run_template(&mut self, template: &Template) -> SyncResult<RunReport> {
        let start = Instant::now();
        let validation = validate_template(template);
        for issue in &validation.warnings {
            warn!(code = %issue.code, path = %issue.path, "{}", issue.message);
        }
        if !validation.is_ok() {
            for issue in &validation.errors {
                error!(code = %issue.code, path = %issue.path, "{}", issue.message);
            }
            return Err(ConfigError::Validation(validation).into());
        }

        info!(
            source = %template.source,
            target = %template.target,
            operations = template.data.len(),
            dry_run = self.options.dry_run,
            "template run started"
        );

        let mut operations = Vec::with_capacity(template.data.len());
        for (index, op) in template.data.iter().enumerate() {
            match self.run_operation(index, op, template).await {
                Ok(report) => operations.push(report),
                Err(err) => {
                    error!(
                        index,
                        operation = %op.operation,
                        object = %op.object,
                        source = %template.source,
                        target = %template.target,
                        error = %err,
                        "operation failed; aborting template run"
                    );
                    let partial = self.finish_report(template, operations, start, Some(&err));
                    return Err(SyncError::Operation {
                        index,
                        operation: op.operation,
                        object: op.object.clone(),
                        source: Box::new(err),
                        partial: Box::new(partial),
                    });
                }
            }
        }

        let report = self.finish_report(template, operations, start, None);
        info!(
            duration_ms = report.duration_ms,
            summary = %report.summary,
            "template run completed"
        );
        Ok(report)
    }

    fn finish_report(
        &self,
        template: &Template,
        operations: Vec<OperationReport>,
        start: Instant,
        failure: Option<&SyncError>,
    ) -> RunReport {
        let mut report = RunReport {
            summary: String::new(),
            source: template.source.clone(),
            target: template.target.clone(),
            dry_run: self.options.dry_run,
            operations,
            error: failure.map(ToString::to_string),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        let upserted = report.upserted();
        let status = if failure.is_some() { "Failed" } else { "Completed" };
        report.summary = format!(
            "{status} {}>>{} template run: {} operation(s), {} skipped, {} deleted, {} upserted, {} rejected",
            report.source,
            report.target,
            report.operations.len(),
            report.skipped(),
            report.deleted().success_count,
            upserted.success_count,
            upserted.error_count + report.deleted().error_count,
        );
        report
    }

    /// Drive one operation through its states.
    pub async fn run_operation(
        &mut self,
        index: usize,
        op: &OperationDescriptor,
        template: &Template,
    ) -> SyncResult<OperationReport> {
        let start = Instant::now();
        let mut report = OperationReport::new(index, op.operation, op.object.clone());
        info!(
            index,
            object = %op.object,
            operation = %op.operation,
            source = %template.source,
            target = %template.target,
            "operation started"
        );

        if !op.operation.is_supported() {
            report.state = OperationState::Skipped;
            warn!(
                index,
                object = %op.object,
                operation = %op.operation,
                "operation is not supported yet; skipping"
            );
            report.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(report);
        }

        if op.operation.runs_delete() {
            self.transition(&mut report, OperationState::Deleting);
            report.deleted = Some(self.delete_all(op).await?);
        }

        if op.operation.runs_upsert() {
            self.transition(&mut report, OperationState::Upserting);
            for plan in build_plans(op) {
                let pass = self.run_plan(op, &plan).await?;
                report.passes.push(pass);
            }
        }

        let count = self
            .target
            .count(&op.object, &op.primary_key)
            .await
            .map_err(|source| SyncError::Query {
                object: op.object.clone(),
                source,
            })?;
        report.target_count = Some(count);
        self.transition(&mut report, OperationState::Verified);
        info!(object = %op.object, target_count = count, "target count after operation");

        self.transition(&mut report, OperationState::Done);
        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            index,
            object = %op.object,
            operation = %op.operation,
            duration_ms = report.duration_ms,
            "operation completed"
        );
        Ok(report)
    }

    fn transition(&self, report: &mut OperationReport, next: OperationState) {
        debug!(
            index = report.index,
            object = %report.object,
            from = %report.state,
            to = %next,
            "operation state changed"
        );
        report.state = next;
    }

    async fn delete_all(&self, op: &OperationDescriptor) -> SyncResult<JobResult> {
        let fields = vec![op.primary_key.clone()];
        let rows = self
            .target
            .query(&QueryRequest::new(op.object.clone(), fields.clone()))
            .await
            .map_err(|source| SyncError::Query {
                object: op.object.clone(),
                source,
            })?;
        if rows.is_empty() {
            info!(object = %op.object, "no target records to delete");
            return Ok(JobResult::default());
        }

        let records = flatten_records(&rows, &fields);
        info!(object = %op.object, records = records.len(), "deleting target records");
        let request = BatchRequest {
            kind: JobKind::Delete,
            object: op.object.clone(),
            external_id: Some(op.primary_key.clone()),
            concurrent: op.bulk_thread,
        };
        self.scheduler.dispatch(&request, records).await
    }

    async fn run_plan(&mut self, op: &OperationDescriptor, plan: &UpsertPlan) -> SyncResult<PassReport> {
        let start = Instant::now();
        debug!(
            object = %plan.object,
            pass = %plan.pass,
            fields = ?plan.fields,
            filter = ?plan.filter,
            masks = plan.masks.len(),
            "resolved upsert plan"
        );

        let rows = self
            .source
            .query(&plan.query())
            .await
            .map_err(|source| SyncError::Query {
                object: plan.object.clone(),
                source,
            })?;
        let fetched = rows.len() as u64;

        let records: Vec<Record> = flatten_records(&rows, &plan.fields)
            .into_iter()
            .map(|record| self.masker.apply(record, &plan.masks))
            .collect();

        let request = BatchRequest {
            kind: JobKind::Upsert,
            object: op.object.clone(),
            external_id: Some(op.external_id.clone()),
            concurrent: op.bulk_thread,
        };
        let result = self.scheduler.dispatch(&request, records).await?;

        info!(
            object = %plan.object,
            pass = %plan.pass,
            fetched,
            successes = result.success_count,
            failures = result.error_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "upsert pass completed"
        );
        Ok(PassReport {
            pass: plan.pass.clone(),
            fetched,
            result,
        })
    }
}
