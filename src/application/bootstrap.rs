use crate::infrastructure::config::{ensure_default_configs, load_config, SchedulerConfig};
use crate::infrastructure::error::SchedulerError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_path: PathBuf,
    pub config: SchedulerConfig,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, SchedulerError> {
    let config_dir = workspace_root.join("config");
    fs::create_dir_all(&config_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_config(&config_dir)?;
    info!(workspace = %workspace_root.display(), timezone = %config.timezone, "workspace ready");

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_path: config_dir.join("scheduler.json"),
        config,
    })
}
