use schemars::schema_for;

use crate::error::Result;
use crate::model::Template;

/// JSON Schema for template files.
pub fn template_json_schema() -> Result<serde_json::Value> {
    let schema = schema_for!(Template);
    Ok(serde_json::to_value(&schema)?)
}
