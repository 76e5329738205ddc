use std::fs::{OpenOptions, create_dir_all};
use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tdm_engine::RunReport;

use super::{RegistryError, RegistryResult};
use crate::atomic::write_json_atomic;

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub run_dir: PathBuf,
    pub template: PathBuf,
    pub env_map: PathBuf,
    pub source: String,
    pub target: String,
    pub dry_run: bool,
    pub mask_seed: Option<u64>,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
pub struct RunConfig {
    pub run_id: String,
    pub started_at: String,
    pub template: String,
    pub env_map: String,
    pub source: String,
    pub target: String,
    pub dry_run: bool,
    pub mask_seed: Option<u64>,
    pub git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
pub struct GitInfo {
    pub commit: Option<String>,
    pub dirty: Option<bool>,
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
    pub report_path: PathBuf,
}

pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let root = ctx.run_dir.join(format!("{timestamp}__run_{}", ctx.run_id));

    create_dir_all(&root).map_err(RegistryError::artifact(&root))?;

    let config_path = root.join("config.json");
    let logs_path = root.join("logs.ndjson");
    let report_path = root.join("report.json");

    let config = RunConfig {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        template: ctx.template.display().to_string(),
        env_map: ctx.env_map.display().to_string(),
        source: ctx.source.clone(),
        target: ctx.target.clone(),
        dry_run: ctx.dry_run,
        mask_seed: ctx.mask_seed,
        git: collect_git_info(),
    };

    write_json_atomic(&config_path, &config).map_err(RegistryError::artifact(&config_path))?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&logs_path)
        .map_err(RegistryError::artifact(&logs_path))?;

    Ok(RunPaths {
        root,
        logs_path,
        report_path,
    })
}

pub fn write_report(paths: &RunPaths, report: &RunReport) -> RegistryResult<()> {
    write_json_atomic(&paths.report_path, report)
        .map_err(RegistryError::artifact(&paths.report_path))
}

pub fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}
