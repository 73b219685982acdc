//! CLI subcommands.

pub mod batch;
pub mod config;
pub mod doctor;
pub mod inspect;
pub mod process;

use std::path::{Path, PathBuf};

use tracing::debug;

use invx_core::InvxConfig;

/// `<config dir>/invx/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invx")
        .join("config.json")
}

/// The file named by `-c`, else the default file if it exists, else defaults.
///
/// Settings the pipeline cannot run with are rejected here, before any work.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<InvxConfig> {
    let config = match config_path {
        Some(path) => InvxConfig::from_file(Path::new(path))
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path, e))?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                debug!("Using config from {}", default_path.display());
                InvxConfig::from_file(&default_path)?
            } else {
                InvxConfig::default()
            }
        }
    };
    config.validate().map_err(describe)?;
    Ok(config)
}

/// Attach the stable error kind to a library error.
pub fn describe(err: invx_core::InvxError) -> anyhow::Error {
    anyhow::anyhow!("[{}] {}", err.kind(), err)
}
