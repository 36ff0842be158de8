//! Runtime configuration.
//!
//! A plain value handed to constructors; there is no global configuration
//! state. Loaded from a `key = value` file, unknown keys are ignored with a
//! warning so configs can be shared between tools.

use std::fs;
use std::path::Path;

use log::warn;

use crate::error::{Error, Result};
use crate::layout::MAX_LIST_LAYERS;

#[derive(Debug, Clone)]
pub struct Config {
    /// k for top-k retrieval.
    pub max_num_results: usize,
    /// Whether the layered index generator produces overlapping layers.
    pub overlapping_layers: bool,
    /// Number of layers the generator splits lists into.
    pub num_layers: usize,
    /// Whether position data is decoded and made available to evaluators.
    pub use_positions: bool,
    /// Load the whole posting file into memory.
    pub memory_resident_index: bool,
    /// Memory-map the posting file.
    pub memory_mapped_index: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_num_results: 10,
            overlapping_layers: false,
            num_layers: 1,
            use_positions: false,
            memory_resident_index: false,
            memory_mapped_index: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut config = Config::default();
        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "malformed config line {} in '{}'",
                    line_num + 1,
                    path.display()
                ))
            })?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "max_number_results" => config.max_num_results = parse_num(key, value)?,
                "overlapping_layers" => config.overlapping_layers = parse_bool(key, value)?,
                "num_layers" => config.num_layers = parse_num(key, value)?,
                "use_positions" => config.use_positions = parse_bool(key, value)?,
                "memory_resident_index" => config.memory_resident_index = parse_bool(key, value)?,
                "memory_mapped_index" => config.memory_mapped_index = parse_bool(key, value)?,
                _ => warn!("ignoring unrecognized config key '{key}'"),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_num_results == 0 {
            return Err(Error::Config(
                "max_number_results must be positive".to_string(),
            ));
        }
        if self.num_layers == 0 || self.num_layers > MAX_LIST_LAYERS {
            return Err(Error::Config(format!(
                "num_layers must be in [1, {MAX_LIST_LAYERS}]"
            )));
        }
        if self.memory_resident_index && self.memory_mapped_index {
            return Err(Error::Config(
                "memory_resident_index and memory_mapped_index are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::Config(format!(
            "config key '{key}' has non-boolean value '{value}'"
        ))),
    }
}

fn parse_num(key: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| {
        Error::Config(format!(
            "config key '{key}' has non-numeric value '{value}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.conf");
        fs::write(
            &path,
            "max_number_results = 25\nnum_layers = 2\noverlapping_layers = true\n# comment\nbogus_key = 7\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.max_num_results, 25);
        assert_eq!(config.num_layers, 2);
        assert!(config.overlapping_layers);
        assert!(!config.memory_mapped_index);
    }

    #[test]
    fn test_config_rejects_conflicting_cache_modes() {
        let config = Config {
            memory_resident_index: true,
            memory_mapped_index: true,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
