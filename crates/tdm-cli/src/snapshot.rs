//! Snapshot directories: one `<Object>.json` array of records per object.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use tdm_core::NestedRecord;
use tdm_engine::{MemoryPlatform, PlatformError};

use crate::atomic::write_json_atomic;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot directory {0} does not exist")]
    Missing(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load every `<Object>.json` file of `dir` into a fresh platform.
pub fn load_snapshot(dir: &Path) -> Result<MemoryPlatform, SnapshotError> {
    if !dir.is_dir() {
        return Err(SnapshotError::Missing(dir.to_path_buf()));
    }

    let platform = MemoryPlatform::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_error(dir))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    entries.sort();

    for path in entries {
        let Some(object) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let content = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        let records: Vec<NestedRecord> =
            serde_json::from_str(&content).map_err(|source| SnapshotError::Json {
                path: path.clone(),
                source,
            })?;
        debug!(object, records = records.len(), path = %path.display(), "snapshot object loaded");
        platform.load(object, records)?;
    }

    info!(path = %dir.display(), "snapshot loaded");
    Ok(platform)
}

/// Write every object of `platform` back to `dir`, one atomic file per object.
pub fn persist_snapshot(platform: &MemoryPlatform, dir: &Path) -> Result<(), SnapshotError> {
    for (object, records) in platform.export()? {
        let path = dir.join(format!("{object}.json"));
        write_json_atomic(&path, &records).map_err(io_error(&path))?;
        debug!(object = %object, records = records.len(), "snapshot object written");
    }
    info!(path = %dir.display(), "snapshot persisted");
    Ok(())
}
