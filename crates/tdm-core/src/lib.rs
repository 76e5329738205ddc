//! Core contracts and helpers for tdm.
//!
//! This crate defines the template contracts, mask method taxonomy, record and
//! job value types, and the validation gate shared by the engine and the CLI.

pub mod error;
pub mod job;
pub mod mask;
pub mod model;
pub mod record;
pub mod schema;
pub mod validate;

pub use error::{ConfigError, Result};
pub use job::{JobKind, JobOutcome, JobResult, RecordError};
pub use mask::{MaskKind, MaskMethod};
pub use model::{MaskMap, OperationDescriptor, OperationKind, RelationshipDescriptor, Template};
pub use record::{FieldValue, NestedRecord, Record};
pub use schema::template_json_schema;
pub use validate::{IssueSeverity, ValidationIssue, ValidationReport, validate_template};

/// Default primary key field used when an operation omits `primaryKey`.
pub const DEFAULT_PRIMARY_KEY: &str = "Id";
/// Default external identifier field used when an operation omits `externalId`.
pub const DEFAULT_EXTERNAL_ID: &str = "UUID__c";
/// Default source environment when a template omits `source`.
pub const DEFAULT_SOURCE: &str = "PRD";
