//! Shared helpers for command handlers.

use mielelink_config::{Config, Profile};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the config file named by `--config`, else the platform default.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let cfg = match &global.config {
        Some(path) => mielelink_config::load_config_from(path)?,
        None => mielelink_config::load_config()?,
    };
    Ok(cfg)
}

/// The active profile and its name, cloned so CLI flags can override it.
pub fn active_profile(global: &GlobalOpts, cfg: &Config) -> Result<(String, Profile), CliError> {
    let name = cfg.active_profile_name(global.profile.as_deref());
    let profile = cfg.profile(&name)?.clone();
    Ok((name, profile))
}
