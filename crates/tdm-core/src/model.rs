use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConfigError, Result};
use crate::mask::MaskMethod;
use crate::{DEFAULT_EXTERNAL_ID, DEFAULT_PRIMARY_KEY, DEFAULT_SOURCE};

/// Ordered field → mask method map.
pub type MaskMap = IndexMap<String, MaskMethod>;

/// Ordered list of operations run from a source environment into a target.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Template {
    /// Source environment name.
    #[serde(default = "default_source")]
    pub source: String,
    /// Target environment name.
    pub target: String,
    /// Operations, executed serially in order.
    #[serde(default)]
    pub data: Vec<OperationDescriptor>,
}

impl Template {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            ConfigError::InvalidTemplate(format!(
                "failed to read template {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&content)
    }
}

/// Operation kinds accepted in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    /// Delete every target record, then upsert from source.
    Refresh,
    Insert,
    Upsert,
    /// Delete every target record.
    DeleteAll,
    /// Reserved; skipped.
    Delete,
    /// Reserved; skipped.
    Execute,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Refresh => "refresh",
            OperationKind::Insert => "insert",
            OperationKind::Upsert => "upsert",
            OperationKind::DeleteAll => "deleteAll",
            OperationKind::Delete => "delete",
            OperationKind::Execute => "execute",
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, OperationKind::Delete | OperationKind::Execute)
    }

    pub fn runs_delete(self) -> bool {
        matches!(self, OperationKind::Refresh | OperationKind::DeleteAll)
    }

    pub fn runs_upsert(self) -> bool {
        matches!(
            self,
            OperationKind::Refresh | OperationKind::Insert | OperationKind::Upsert
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of one object operation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub operation: OperationKind,
    pub object: String,
    #[serde(default = "default_primary_key", alias = "primary_key")]
    pub primary_key: String,
    /// External identifier used to address records on the target.
    #[serde(default = "default_external_id", alias = "external_id")]
    pub external_id: String,
    #[serde(default)]
    pub fields: Vec<String>,
    /// Source filter expression.
    #[serde(
        default,
        rename = "where",
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub filter: Option<String>,
    #[serde(
        default,
        alias = "orderby",
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub order_by: Option<String>,
    /// Row limit; `0` means unlimited.
    #[serde(
        default,
        deserialize_with = "zero_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<u64>")]
    pub limit: Option<u64>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
    #[serde(default)]
    pub masks: MaskMap,
    /// Run batch jobs concurrently.
    #[serde(default = "default_true", alias = "bulk_thread")]
    pub bulk_thread: bool,
}

impl OperationDescriptor {
    /// Minimal descriptor with template defaults for everything but kind and object.
    pub fn new(operation: OperationKind, object: impl Into<String>) -> Self {
        Self {
            operation,
            object: object.into(),
            primary_key: default_primary_key(),
            external_id: default_external_id(),
            fields: Vec::new(),
            filter: None,
            order_by: None,
            limit: None,
            relationships: Vec::new(),
            masks: MaskMap::new(),
            bulk_thread: true,
        }
    }
}

/// Relationship field declared on an operation.
///
/// The owning object is the enclosing operation's `object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDescriptor {
    /// Related object type.
    pub object: String,
    /// Relationship path name (ex.: `Parent`).
    pub relationship_name: String,
    /// Local foreign-key field (ex.: `ParentId`).
    pub field: String,
    /// External identifier field on the related object.
    #[serde(alias = "external_id")]
    pub external_id: String,
}

impl RelationshipDescriptor {
    pub fn new(
        object: impl Into<String>,
        relationship_name: impl Into<String>,
        field: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relationship_name: relationship_name.into(),
            field: field.into(),
            external_id: external_id.into(),
        }
    }

    pub fn is_self_for(&self, owner: &str) -> bool {
        self.object == owner
    }

    /// `<relationshipName>.<externalId>`, the form used in field lists and upsert keys.
    pub fn dotted_reference(&self) -> String {
        format!("{}.{}", self.relationship_name, self.external_id)
    }

    /// `<relationshipName>_<externalId>`, the form produced by flattening.
    pub fn underscore_reference(&self) -> String {
        format!("{}_{}", self.relationship_name, self.external_id)
    }
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_external_id() -> String {
    DEFAULT_EXTERNAL_ID.to_string()
}

fn default_true() -> bool {
    true
}

fn blank_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.trim().is_empty()))
}

fn zero_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<u64>::deserialize(deserializer)?;
    Ok(value.filter(|value| *value > 0))
}
