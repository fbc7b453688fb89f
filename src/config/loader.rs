// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::config::model::Config;
use crate::config::validate::validate_config;
use crate::errors::Result;

/// Load a configuration file and return the raw [`Config`].
///
/// This only performs TOML deserialization; it does **not** perform
/// semantic validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {:?}", path))?;

    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file and run semantic validation.
///
/// This is the entry point the rest of the application should use: it
/// reads TOML, applies defaults, and rejects configs that would only fail
/// later (no cities, zero workers, bucket width that does not divide a
/// day, empty URLs or schemas).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}
