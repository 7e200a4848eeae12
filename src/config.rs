use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::session::Permissions;

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Refuse `register_pc` for a key whose owner is still connected,
    /// instead of replacing that owner.
    pub reject_live_duplicates: bool,

    /// Reply `pc_unavailable` to viewers whose command could not reach the PC.
    pub notify_pc_unavailable: bool,

    /// Serve this file at `/` instead of the bundled client page.
    pub index_html: Option<PathBuf>,

    /// Permissions every new session starts with.
    pub default_permissions: Permissions,
}

/// Read the relay config, writing out the defaults first if `path` is missing.
pub fn load(path: &Path) -> Result<Config, failure::Error> {
    if path.exists() {
        return Ok(toml::from_str(&fs::read_to_string(path)?)?);
    }

    let config = Config::default();
    fs::write(path, toml::to_string(&config)?)?;
    info!("Wrote default config to {}", path.display());
    Ok(config)
}
