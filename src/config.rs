//! Configuration module

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::model::ModelKind;
use crate::scoring::{ThresholdConfig, DEFAULT_THRESHOLD};

/// Default listening port
pub const DEFAULT_PORT: u16 = 8005;

/// Default weight directory
pub const DEFAULT_MODEL_DIR: &str = "models";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a number, got '{value}'")]
    InvalidNumber { name: String, value: String },

    #[error("{name} must be an IP address, got '{value}'")]
    InvalidAddress { name: String, value: String },

    #[error("{0}")]
    InvalidThreshold(String),
}

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Secret expected in `X-API-Key`; unset rejects every prediction
    pub api_key: Option<String>,

    /// Bind address
    pub host: IpAddr,

    /// Server port
    pub port: u16,

    /// Directory holding `enhanced_<id>.safetensors`
    pub model_dir: PathBuf,

    /// Anomaly thresholds
    pub thresholds: ThresholdConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("API_KEY").filter(|key| !key.is_empty());

        let host = match lookup("HOST") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidAddress {
                name: "HOST".to_string(),
                value,
            })?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        let model_dir = lookup("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));

        let mut thresholds = ThresholdConfig::new(parse_or(&lookup, "ANOMALY_THRESHOLD", DEFAULT_THRESHOLD)?);
        for kind in ModelKind::ALL {
            let name = format!("ANOMALY_THRESHOLD_{}", kind.id().to_uppercase());
            if let Some(value) = lookup(&name) {
                let threshold = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { name, value })?;
                thresholds = thresholds.with_override(kind, threshold);
            }
        }
        thresholds.validate().map_err(ConfigError::InvalidThreshold)?;

        Ok(Self {
            api_key,
            host,
            port,
            model_dir,
            thresholds,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

// The secret stays out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("model_dir", &self.model_dir)
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.port, 8005);
        assert_eq!(config.host, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.model_dir, PathBuf::from("models"));
        assert_eq!(config.thresholds, ThresholdConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("API_KEY", "s3cret"),
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("MODEL_DIR", "/srv/weights"),
            ("ANOMALY_THRESHOLD", "0.2"),
            ("ANOMALY_THRESHOLD_RNN", "0.5"),
        ])
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.model_dir, PathBuf::from("/srv/weights"));
        assert_eq!(config.thresholds.threshold_for(ModelKind::Autoencoder), 0.2);
        assert_eq!(config.thresholds.threshold_for(ModelKind::Attention), 0.5);
    }

    #[test]
    fn test_empty_api_key_is_unset() {
        assert_eq!(config_from(&[("API_KEY", "")]).unwrap().api_key, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(config_from(&[("PORT", "http")]), Err(ConfigError::InvalidNumber { .. })));
        assert!(matches!(config_from(&[("HOST", "localhost:1")]), Err(ConfigError::InvalidAddress { .. })));
        assert!(matches!(
            config_from(&[("ANOMALY_THRESHOLD_LSTM", "-0.1")]),
            Err(ConfigError::InvalidThreshold(_))
        ));
        assert!(matches!(
            config_from(&[("ANOMALY_THRESHOLD", "abc")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = config_from(&[("API_KEY", "s3cret")]).unwrap();
        assert!(!format!("{:?}", config).contains("s3cret"));
    }
}
