use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("failed to read env map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("environment '{0}' is not defined in the env map")]
    Unknown(String),
}

/// Environment name → snapshot location.
///
/// ```toml
/// [environments.PRD]
/// snapshot = "snapshots/prd"
/// description = "production extract"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvMap {
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,
    /// Directory relative snapshot paths are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub snapshot: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EnvMap {
    pub fn load(path: &Path) -> Result<Self, EnvError> {
        let content = std::fs::read_to_string(path).map_err(|source| EnvError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut map = Self::from_toml_str(&content)?;
        map.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(map)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EnvError> {
        Ok(toml::from_str(content)?)
    }

    /// Snapshot directory for environment `name`.
    pub fn snapshot_dir(&self, name: &str) -> Result<PathBuf, EnvError> {
        let environment = self
            .environments
            .get(name)
            .ok_or_else(|| EnvError::Unknown(name.to_string()))?;
        if environment.snapshot.is_absolute() {
            Ok(environment.snapshot.clone())
        } else {
            Ok(self.base_dir.join(&environment.snapshot))
        }
    }
}
