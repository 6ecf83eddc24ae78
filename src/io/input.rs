use crate::io::Configuration;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Reads the configuration file. If it does not exist, the default settings are used and
/// written to `path`, so that the user can see all options of the calculation.
pub fn read_input<P: AsRef<Path>>(path: P) -> Result<Configuration> {
    let config_file_path: &Path = path.as_ref();
    let exists: bool = config_file_path.exists();
    let config_string: String = if exists {
        fs::read_to_string(config_file_path).with_context(|| {
            format!(
                "Unable to read config file {}",
                config_file_path.display()
            )
        })?
    } else {
        String::new()
    };
    let config: Configuration = toml::from_str(&config_string).with_context(|| {
        format!(
            "Unable to parse config file {}",
            config_file_path.display()
        )
    })?;
    if !exists {
        let config_string: String =
            toml::to_string(&config).context("Unable to serialize the configuration")?;
        fs::write(config_file_path, config_string).with_context(|| {
            format!(
                "Unable to write config file {}",
                config_file_path.display()
            )
        })?;
    }
    Ok(config)
}
