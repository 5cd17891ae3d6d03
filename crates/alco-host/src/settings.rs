//! Loading the device configuration from TOML

use std::fs;
use std::path::{Path, PathBuf};

use alco_core::config::{Config, ConfigError};
use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(ConfigError),
}

/// Parse and validate a configuration from TOML text.
pub fn parse(text: &str, path: &Path) -> Result<Config, SettingsError> {
    let config: Config = toml::from_str(text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate().map_err(SettingsError::Invalid)?;
    Ok(config)
}

/// Load the configuration, falling back to built-in defaults without a file.
pub fn load(path: Option<&Path>) -> Result<Config, SettingsError> {
    let Some(path) = path else {
        info!("No config file given, using built-in defaults");
        let config = Config::default();
        config.validate().map_err(SettingsError::Invalid)?;
        return Ok(config);
    };

    let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&text, path)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse(
            r#"
            http_port = 8080

            [timing]
            sampling_interval_ms = 200

            [pins]
            led_alert = 22
            "#,
            Path::new("alco.toml"),
        )
        .unwrap();

        assert_eq!(config.http_port, 8080);
        assert_eq!(config.timing.sampling_interval_ms, 200);
        assert_eq!(config.timing.actuation_interval_ms, 100);
        assert_eq!(config.pins.led_alert, 22);
        assert_eq!(config.pins.led_normal, 17);
        assert_eq!(config.thresholds.trace, 40);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = parse(
            "[thresholds]\ntrace = 120\nalert = 100\n",
            Path::new("alco.toml"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid(ConfigError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = parse("http_port = \"not a number\"", Path::new("alco.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let err = load(Some(Path::new("/nonexistent/alco.toml"))).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn test_no_file_uses_defaults() {
        assert_eq!(load(None).unwrap(), Config::default());
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let config = parse(
            include_str!("../../../config/alco.example.toml"),
            Path::new("alco.example.toml"),
        )
        .unwrap();
        let defaults = Config::default();
        assert_eq!(config.bus, defaults.bus);
        assert_eq!(config.pins, defaults.pins);
        assert_eq!(config.thresholds, defaults.thresholds);
        assert_eq!(config.timing, defaults.timing);
        assert_eq!(config.http_port, 5000);
        assert!((config.conversion_factor - defaults.conversion_factor).abs() < 1e-9);
    }
}
