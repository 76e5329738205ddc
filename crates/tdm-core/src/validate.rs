use std::collections::HashSet;

use serde::Serialize;

use crate::model::{OperationDescriptor, Template};

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// Structured validation issue with location and hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationIssue {
    /// Create a new validation issue.
    pub fn new(
        severity: IssueSeverity,
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            path: path.into(),
            message: message.into(),
            hint,
        }
    }
}

/// Aggregated validation report with errors and warnings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Returns true when there are no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(
        &mut self,
        code: &str,
        path: String,
        message: String,
        hint: Option<&str>,
    ) {
        self.errors.push(ValidationIssue::new(
            IssueSeverity::Error,
            code,
            path,
            message,
            hint.map(str::to_string),
        ));
    }

    pub fn push_warning(
        &mut self,
        code: &str,
        path: String,
        message: String,
        hint: Option<&str>,
    ) {
        self.warnings.push(ValidationIssue::new(
            IssueSeverity::Warning,
            code,
            path,
            message,
            hint.map(str::to_string),
        ));
    }
}

/// Validate a parsed template. Errors make the template unrunnable.
pub fn validate_template(template: &Template) -> ValidationReport {
    let mut report = ValidationReport::default();

    if template.target.trim().is_empty() {
        report.push_error(
            "missing_target",
            "/target".to_string(),
            "template target environment is empty".to_string(),
            Some("set target to an environment name from the env map"),
        );
    }
    if template.source.trim().is_empty() {
        report.push_error(
            "missing_source",
            "/source".to_string(),
            "template source environment is empty".to_string(),
            None,
        );
    }
    if template.data.is_empty() {
        report.push_warning(
            "empty_template",
            "/data".to_string(),
            "template has no operations".to_string(),
            None,
        );
    }

    for (index, operation) in template.data.iter().enumerate() {
        validate_operation(index, operation, &mut report);
    }

    report
}

fn validate_operation(index: usize, op: &OperationDescriptor, report: &mut ValidationReport) {
    let path = format!("/data/{index}");

    if op.object.trim().is_empty() {
        report.push_error(
            "missing_object",
            format!("{path}/object"),
            "operation object name is empty".to_string(),
            None,
        );
    }

    if !op.operation.is_supported() {
        report.push_warning(
            "unsupported_operation",
            format!("{path}/operation"),
            format!(
                "'{}' operations are not supported and will be skipped",
                op.operation
            ),
            None,
        );
        return;
    }

    if op.operation.runs_delete() && op.primary_key.trim().is_empty() {
        report.push_error(
            "missing_primary_key",
            format!("{path}/primaryKey"),
            format!("{} on {} requires a primary key", op.operation, op.object),
            None,
        );
    }

    if !op.operation.runs_upsert() {
        if !op.masks.is_empty() {
            report.push_warning(
                "masks_ignored",
                format!("{path}/masks"),
                format!("masks have no effect on '{}' operations", op.operation),
                None,
            );
        }
        return;
    }

    if op.external_id.trim().is_empty() {
        report.push_error(
            "missing_external_id",
            format!("{path}/externalId"),
            format!("{} on {} requires an external id", op.operation, op.object),
            None,
        );
    } else if !op.fields.iter().any(|field| field == &op.external_id) {
        report.push_warning(
            "external_id_not_selected",
            format!("{path}/fields"),
            format!(
                "external id '{}' is not in the field list; upserted records cannot be matched",
                op.external_id
            ),
            Some("add the external id field to fields"),
        );
    }

    if op.fields.is_empty() {
        report.push_error(
            "empty_fields",
            format!("{path}/fields"),
            format!("{} on {} selects no fields", op.operation, op.object),
            None,
        );
    }

    let mut seen_fields: HashSet<&str> = HashSet::new();
    for (rel_index, relationship) in op.relationships.iter().enumerate() {
        let rel_path = format!("{path}/relationships/{rel_index}");
        for (key, value) in [
            ("object", &relationship.object),
            ("relationshipName", &relationship.relationship_name),
            ("field", &relationship.field),
            ("externalId", &relationship.external_id),
        ] {
            if value.trim().is_empty() {
                report.push_error(
                    "invalid_relationship",
                    format!("{rel_path}/{key}"),
                    format!("relationship {key} is empty"),
                    None,
                );
            }
        }
        if !seen_fields.insert(relationship.field.as_str()) {
            report.push_warning(
                "duplicate_relationship_field",
                format!("{rel_path}/field"),
                format!(
                    "field '{}' is declared by more than one relationship; the first one wins",
                    relationship.field
                ),
                None,
            );
        }
    }

    for field in op.masks.keys() {
        if !op.fields.iter().any(|selected| selected == field) {
            report.push_warning(
                "mask_field_not_selected",
                format!("{path}/masks/{field}"),
                format!("masked field '{field}' is not in the field list and will not be masked"),
                None,
            );
        }
    }
}
