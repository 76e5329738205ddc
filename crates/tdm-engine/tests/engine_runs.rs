use std::sync::Arc;

use serde_json::{Value, json};

use tdm_core::{ConfigError, JobKind, NestedRecord, OperationKind, Template};
use tdm_engine::{
    EngineOptions, MemoryPlatform, OperationState, PlanPass, SyncEngine, SyncError,
};

fn row(value: Value) -> NestedRecord {
    value.as_object().cloned().expect("object literal")
}

fn text<'a>(record: &'a NestedRecord, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

fn find<'a>(records: &'a [NestedRecord], field: &str, value: &str) -> &'a NestedRecord {
    records
        .iter()
        .find(|record| text(record, field) == Some(value))
        .unwrap_or_else(|| panic!("no record with {field} = {value}"))
}

fn source() -> Arc<MemoryPlatform> {
    Arc::new(
        MemoryPlatform::new()
            .with_records(
                "Account",
                vec![
                    row(json!({
                        "Id": "001S1", "Name": "Acme", "UUID__c": "u1",
                        "EIN__c": "12-3456789", "ParentId": null, "Parent": null
                    })),
                    row(json!({
                        "Id": "001S2", "Name": "Acme West", "UUID__c": "u2",
                        "EIN__c": "98-7654321", "ParentId": "001S1",
                        "Parent": {"UUID__c": "u1"}
                    })),
                ],
            )
            .with_records(
                "Contact",
                vec![row(json!({
                    "Id": "003S1", "LastName": "Doe", "UUID__c": "c1",
                    "Email": "jane.doe@acme.test", "AccountId": "001S2",
                    "Account": {"UUID__c": "u2"}
                }))],
            ),
    )
}

fn target() -> Arc<MemoryPlatform> {
    Arc::new(MemoryPlatform::new().with_records(
        "Account",
        vec![row(json!({"Id": "001T0", "Name": "Stale", "UUID__c": "old"}))],
    ))
}

fn template() -> Template {
    Template::from_json_str(
        r#"{
          "source": "PRD",
          "target": "QA",
          "data": [
            {
              "operation": "refresh",
              "object": "Account",
              "fields": ["Name", "UUID__c", "ParentId", "EIN__c"],
              "relationships": [
                {"object": "Account", "relationshipName": "Parent", "field": "ParentId", "externalId": "UUID__c"}
              ],
              "masks": {"EIN__c": "fixed.ein"}
            },
            {
              "operation": "upsert",
              "object": "Contact",
              "fields": ["LastName", "UUID__c", "AccountId", "Email"],
              "relationships": [
                {"object": "Account", "relationshipName": "Account", "field": "AccountId", "externalId": "UUID__c"}
              ],
              "masks": {"Email": "fake.email"}
            }
          ]
        }"#,
    )
    .expect("template parses")
}

fn options(dry_run: bool) -> EngineOptions {
    EngineOptions {
        dry_run,
        mask_seed: Some(7),
    }
}

#[tokio::test]
async fn refresh_relinks_self_references_in_a_second_pass() {
    let target = target();
    let mut engine = SyncEngine::with_target(source(), target.clone(), options(false));

    let report = engine.run_template(&template()).await.expect("run succeeds");
    assert_eq!(report.operations.len(), 2);
    assert!(report.summary.starts_with("Completed PRD>>QA template run"));

    let account = &report.operations[0];
    assert_eq!(account.state, OperationState::Done);
    assert_eq!(account.deleted.as_ref().map(|d| d.success_count), Some(1));
    assert_eq!(account.passes.len(), 2);
    assert_eq!(account.passes[0].pass, PlanPass::Primary);
    assert_eq!(account.passes[0].result.success_count, 2);
    assert_eq!(account.passes[1].fetched, 1);
    assert_eq!(account.passes[1].result.success_count, 1);
    assert_eq!(account.target_count, Some(2));

    let accounts = target.records("Account").unwrap();
    assert_eq!(accounts.len(), 2);
    assert!(accounts.iter().all(|a| text(a, "UUID__c") != Some("old")));
    let root = find(&accounts, "UUID__c", "u1");
    let child = find(&accounts, "UUID__c", "u2");
    assert_eq!(text(root, "EIN__c"), Some("95-8101756"));
    assert_ne!(text(child, "Id"), Some("001S2"));
    assert_eq!(text(child, "ParentId"), text(root, "Id"));

    let contacts = target.records("Contact").unwrap();
    assert_eq!(contacts.len(), 1);
    let contact = &contacts[0];
    assert_eq!(text(contact, "AccountId"), text(child, "Id"));
    let email = text(contact, "Email").expect("email set");
    assert_ne!(email, "jane.doe@acme.test");
    assert!(email.contains('@'));

    let kinds: Vec<JobKind> = target
        .job_log()
        .unwrap()
        .iter()
        .map(|entry| entry.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![JobKind::Delete, JobKind::Upsert, JobKind::Upsert, JobKind::Upsert]
    );
}

#[tokio::test]
async fn unresolved_reference_is_a_record_error() {
    let target = Arc::new(MemoryPlatform::new());
    let template = Template::from_json_str(
        r#"{
          "target": "QA",
          "data": [{
            "operation": "upsert",
            "object": "Contact",
            "fields": ["LastName", "UUID__c", "AccountId"],
            "relationships": [
              {"object": "Account", "relationshipName": "Account", "field": "AccountId", "externalId": "UUID__c"}
            ]
          }]
        }"#,
    )
    .unwrap();

    let mut engine = SyncEngine::with_target(source(), target.clone(), options(false));
    let report = engine.run_template(&template).await.expect("run completes");

    let upserted = report.upserted();
    assert_eq!(upserted.success_count, 0);
    assert_eq!(upserted.error_count, 1);
    assert_eq!(upserted.errors[0].external_id.as_deref(), Some("c1"));
    assert!(upserted.errors[0].message.contains("Account.UUID__c"));
}

#[tokio::test]
async fn dry_run_queries_but_leaves_target_untouched() {
    let target = target();
    let mut engine = SyncEngine::with_target(source(), target.clone(), options(true));

    let report = engine.run_template(&template()).await.expect("run succeeds");
    assert!(report.dry_run);
    assert_eq!(report.operations[0].passes[0].fetched, 2);
    assert_eq!(report.upserted().total(), 0);
    assert_eq!(report.operations[0].target_count, Some(1));

    assert!(target.job_log().unwrap().is_empty());
    let accounts = target.records("Account").unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(text(&accounts[0], "UUID__c"), Some("old"));
}

#[tokio::test]
async fn unsupported_operations_are_skipped() {
    let target = target();
    let template = Template::from_json_str(
        r#"{
          "target": "QA",
          "data": [
            {"operation": "execute", "object": "Account"},
            {"operation": "delete", "object": "Account"},
            {"operation": "deleteAll", "object": "Account"}
          ]
        }"#,
    )
    .unwrap();

    let mut engine = SyncEngine::with_target(source(), target.clone(), options(false));
    let report = engine.run_template(&template).await.expect("run succeeds");

    let states: Vec<OperationState> = report.operations.iter().map(|op| op.state).collect();
    assert_eq!(
        states,
        vec![OperationState::Skipped, OperationState::Skipped, OperationState::Done]
    );
    assert_eq!(report.skipped(), 2);
    assert_eq!(report.deleted().success_count, 1);
    assert_eq!(report.operations[2].target_count, Some(0));
    assert!(target.records("Account").unwrap().is_empty());
}

#[tokio::test]
async fn fatal_job_failure_stops_the_run() {
    let target = target();
    target.fail_jobs("Account").unwrap();

    let mut engine = SyncEngine::with_target(source(), target.clone(), options(false));
    let err = engine.run_template(&template()).await.unwrap_err();

    match err {
        SyncError::Operation {
            index,
            operation,
            object,
            source,
            partial,
        } => {
            assert_eq!(index, 0);
            assert_eq!(operation, OperationKind::Refresh);
            assert_eq!(object, "Account");
            assert!(matches!(
                *source,
                SyncError::Job { kind: JobKind::Delete, .. }
            ));
            assert!(partial.operations.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(target.records("Contact").unwrap().is_empty());
}

#[tokio::test]
async fn failed_run_reports_the_operations_already_applied() {
    let target = target();
    target.fail_jobs("Contact").unwrap();

    let mut engine = SyncEngine::with_target(source(), target.clone(), options(false));
    let err = engine.run_template(&template()).await.unwrap_err();

    let partial = err.partial_report().expect("partial report");
    assert_eq!(partial.operations.len(), 1);
    assert_eq!(partial.operations[0].state, OperationState::Done);
    assert_eq!(partial.upserted().success_count, 3);
    assert!(partial.summary.starts_with("Failed PRD>>QA template run"));
    assert!(partial.error.as_deref().is_some_and(|e| e.contains("Contact")));
    assert_eq!(target.records("Account").unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_template_fails_before_any_job() {
    let target = target();
    let template = Template::from_json_str(
        r#"{"target": " ", "data": [{"operation": "upsert", "object": "Account"}]}"#,
    )
    .unwrap();

    let mut engine = SyncEngine::with_target(source(), target.clone(), options(false));
    let err = engine.run_template(&template).await.unwrap_err();

    let SyncError::Config(ConfigError::Validation(report)) = err else {
        panic!("expected a validation error");
    };
    let codes: Vec<&str> = report.errors.iter().map(|issue| issue.code.as_str()).collect();
    assert_eq!(codes, vec!["missing_target", "empty_fields"]);
    assert!(target.job_log().unwrap().is_empty());
}

#[tokio::test]
async fn dotted_self_reference_keeps_child_columns() {
    let source = Arc::new(MemoryPlatform::new().with_records(
        "Account",
        vec![
            row(json!({
                "Id": "001S2", "Name": "Acme West", "UUID__c": "u2",
                "ParentId": "001S1", "Parent": {"UUID__c": "u1"}
            })),
            row(json!({
                "Id": "001S1", "Name": "Acme", "UUID__c": "u1",
                "ParentId": null, "Parent": null
            })),
        ],
    ));
    let target = Arc::new(MemoryPlatform::new());
    let template = Template::from_json_str(
        r#"{
          "target": "QA",
          "data": [{
            "operation": "upsert",
            "object": "Account",
            "fields": ["Name", "UUID__c", "Parent.UUID__c"],
            "relationships": [
              {"object": "Account", "relationshipName": "Parent", "field": "ParentId", "externalId": "UUID__c"}
            ]
          }]
        }"#,
    )
    .unwrap();

    let mut engine = SyncEngine::with_target(source, target.clone(), options(false));
    let report = engine.run_template(&template).await.expect("run succeeds");

    let passes = &report.operations[0].passes;
    assert_eq!(passes[0].result.success_count, 2);
    assert_eq!(passes[0].result.error_count, 0);
    assert_eq!(passes[1].result.success_count, 1);

    let accounts = target.records("Account").unwrap();
    let root = find(&accounts, "UUID__c", "u1");
    let child = find(&accounts, "UUID__c", "u2");
    assert_eq!(text(child, "Name"), Some("Acme West"));
    assert_eq!(text(child, "ParentId"), text(root, "Id"));
}

#[tokio::test]
async fn delete_all_addresses_records_by_the_declared_primary_key() {
    let target = Arc::new(MemoryPlatform::new().with_records(
        "Region__c",
        vec![
            row(json!({"Code__c": "EU", "Name": "Europe"})),
            row(json!({"Code__c": "NA", "Name": "North America"})),
        ],
    ));
    let template = Template::from_json_str(
        r#"{
          "target": "QA",
          "data": [{"operation": "deleteAll", "object": "Region__c", "primaryKey": "Code__c"}]
        }"#,
    )
    .unwrap();

    let mut engine = SyncEngine::with_target(source(), target.clone(), options(false));
    let report = engine.run_template(&template).await.expect("run succeeds");

    assert_eq!(report.deleted().success_count, 2);
    assert_eq!(report.deleted().error_count, 0);
    assert!(target.records("Region__c").unwrap().is_empty());
}
