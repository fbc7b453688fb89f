// src/config/validate.rs

use crate::config::model::{CityConfig, Config};
use crate::errors::{PipelineError, Result};

/// Run semantic validation against a loaded configuration.
///
/// Checks:
/// - there is at least one `[city.<name>]` section
/// - `workers >= 1`
/// - the availability bucket width divides a day evenly
/// - per city: non-empty schema/urls, complete feature mappings
///
/// All failures are `PipelineError::Configuration`, reported before any
/// task executes.
pub fn validate_config(cfg: &Config) -> Result<()> {
    ensure_has_cities(cfg)?;
    validate_pipeline_section(cfg)?;
    for (name, city) in cfg.city.iter() {
        validate_city(name, city)?;
    }
    Ok(())
}

fn ensure_has_cities(cfg: &Config) -> Result<()> {
    if cfg.city.is_empty() {
        return Err(PipelineError::Configuration(
            "config must contain at least one [city.<name>] section".into(),
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &Config) -> Result<()> {
    if cfg.pipeline.data_dir.as_os_str().is_empty() {
        return Err(PipelineError::Configuration(
            "[pipeline].data_dir must not be empty".into(),
        ));
    }

    if cfg.pipeline.workers == 0 {
        return Err(PipelineError::Configuration(
            "[pipeline].workers must be >= 1 (got 0)".into(),
        ));
    }

    let interval = cfg.pipeline.availability_interval_minutes;
    if interval == 0 || interval > 1440 || 1440 % interval != 0 {
        return Err(PipelineError::Configuration(format!(
            "[pipeline].availability_interval_minutes must divide a day evenly (got {interval})"
        )));
    }

    if cfg.pipeline.shapefile_loader.trim().is_empty() {
        return Err(PipelineError::Configuration(
            "[pipeline].shapefile_loader must not be empty".into(),
        ));
    }

    Ok(())
}

fn validate_city(name: &str, city: &CityConfig) -> Result<()> {
    let require = |field: &str, value: &str| -> Result<()> {
        if value.trim().is_empty() {
            return Err(PipelineError::Configuration(format!(
                "[city.{name}].{field} must not be empty"
            )));
        }
        Ok(())
    };

    require("schema", &city.schema)?;
    require("srid", &city.srid)?;
    require("typename", &city.typename)?;
    require("stations_url", &city.stations_url)?;
    require("availability_url", &city.availability_url)?;

    for col in CityConfig::STATION_COLUMNS {
        if !city.features.contains_key(col) {
            return Err(PipelineError::Configuration(format!(
                "[city.{name}.features] is missing a mapping for '{col}'"
            )));
        }
    }

    for col in CityConfig::AVAILABILITY_COLUMNS {
        if !city.availability_features.contains_key(col) {
            return Err(PipelineError::Configuration(format!(
                "[city.{name}.availability_features] is missing a mapping for '{col}'"
            )));
        }
    }

    Ok(())
}
