pub mod check;
pub mod serve;

use std::path::Path;

use anyhow::{Context, Result};
use curator::config::Config;

pub use check::check_config;
pub use serve::{serve, ServeOverrides};

/// Load `path` (or defaults) and layer `CURATOR_*` variables on top
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid CURATOR_* environment variable")?;
    Ok(config)
}
