pub mod config;
pub mod doctor;
pub mod preview;

use anyhow::Context;
use dearblog_core::config::Config;
use std::path::Path;

/// Load `.dearblog.yaml` from `root`, applying a `--hugo` / `DEARBLOG_HUGO`
/// override on top.
pub fn load_config(root: &Path, hugo_override: Option<&str>) -> anyhow::Result<Config> {
    let mut config = Config::load(root).context("failed to load .dearblog.yaml")?;
    if let Some(binary) = hugo_override {
        config.hugo.binary = binary.to_string();
    }
    Ok(config)
}
