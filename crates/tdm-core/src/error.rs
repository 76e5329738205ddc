use thiserror::Error;

use crate::validate::ValidationReport;

/// Configuration errors. Always fatal and raised before any network I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A mask method outside the `fixed.*` / `fake.*` families.
    #[error("unknown mask method '{0}'")]
    UnknownMaskMethod(String),
    /// The template is structurally invalid.
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    /// The template failed validation.
    #[error("template validation failed with {} error(s)", .0.errors.len())]
    Validation(ValidationReport),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results returned by tdm-core.
pub type Result<T> = std::result::Result<T, ConfigError>;
