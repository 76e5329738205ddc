use async_trait::async_trait;
use thiserror::Error;

use tdm_core::{JobKind, JobOutcome, NestedRecord, Record};

/// Errors raised by source/target platform collaborators.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The request uses a capability the platform does not offer.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The request is malformed for this platform.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Connection, authentication, or job lifecycle failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Structured query handed to a [`QuerySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub object: String,
    pub fields: Vec<String>,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl QueryRequest {
    pub fn new(object: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            object: object.into(),
            fields,
            filter: None,
            order_by: None,
            limit: None,
        }
    }
}

/// Read side of a platform.
///
/// Implementations paginate transparently and return an empty vector when
/// nothing matches.
#[async_trait]
pub trait QuerySource: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<NestedRecord>, PlatformError>;

    /// Number of records of `object`, via a `count(<pk>) Ct` aggregate query.
    async fn count(&self, object: &str, primary_key: &str) -> Result<u64, PlatformError> {
        let request = QueryRequest::new(object, vec![format!("count({primary_key}) Ct")]);
        let rows = self.query(&request).await?;
        let value = rows.first().and_then(|row| row.get("Ct"));
        match value {
            Some(serde_json::Value::Number(number)) => number.as_u64().ok_or_else(|| {
                PlatformError::InvalidRequest(format!("count for {object} is not an integer"))
            }),
            Some(serde_json::Value::String(text)) => text.parse().map_err(|_| {
                PlatformError::InvalidRequest(format!("count for {object} is not an integer"))
            }),
            _ => Ok(0),
        }
    }
}

/// Write side of a platform: blocking bulk jobs returning per-record outcomes.
///
/// `Upsert` and `Update` require `external_id`; `Update` resolves target
/// identifiers internally before submission.
#[async_trait]
pub trait BulkJobTarget: Send + Sync {
    async fn run_job(
        &self,
        kind: JobKind,
        object: &str,
        external_id: Option<&str>,
        records: Vec<Record>,
    ) -> Result<Vec<JobOutcome>, PlatformError>;
}
