//! Bridge configuration.
//!
//! Defaults, then the JSON file named by `HOSTLET_CONFIG`, then per-key
//! `HOSTLET_<KEY>` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::codec::DEFAULT_MAX_FRAME_LEN;
use crate::bridge::protocol::CREATE_COMPONENT_FIELDS;
use crate::stream::FlowLimits;

pub const CONFIG_ENV: &str = "HOSTLET_CONFIG";
const ENV_PREFIX: &str = "HOSTLET_";

/// Smallest frame limit that still fits an ordinary `CreateComponent`.
const MIN_FRAME_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub eval_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub flush_timeout_secs: u64,
    pub permission_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub stream_high_water: usize,
    pub stream_low_water: usize,
    pub max_frame_len: usize,
    pub max_fields: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            eval_timeout_secs: 30,
            connect_timeout_secs: 20,
            flush_timeout_secs: 10,
            permission_timeout_secs: 300,
            shutdown_timeout_secs: 10,
            stream_high_water: 10,
            stream_low_water: 5,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_fields: crate::bridge::codec::DEFAULT_MAX_FIELDS,
        }
    }
}

impl BridgeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load using `lookup` in place of the environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path))?,
            _ => Self::default(),
        };

        override_from(&lookup, "eval_timeout_secs", &mut config.eval_timeout_secs)?;
        override_from(&lookup, "connect_timeout_secs", &mut config.connect_timeout_secs)?;
        override_from(&lookup, "flush_timeout_secs", &mut config.flush_timeout_secs)?;
        override_from(&lookup, "permission_timeout_secs", &mut config.permission_timeout_secs)?;
        override_from(&lookup, "shutdown_timeout_secs", &mut config.shutdown_timeout_secs)?;
        override_from(&lookup, "stream_high_water", &mut config.stream_high_water)?;
        override_from(&lookup, "stream_low_water", &mut config.stream_low_water)?;
        override_from(&lookup, "max_frame_len", &mut config.max_frame_len)?;
        override_from(&lookup, "max_fields", &mut config.max_fields)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_low_water >= self.stream_high_water {
            return Err(ConfigError::Invalid(format!(
                "stream_low_water ({}) must be below stream_high_water ({})",
                self.stream_low_water, self.stream_high_water
            )));
        }
        if !(MIN_FRAME_LEN..=DEFAULT_MAX_FRAME_LEN).contains(&self.max_frame_len) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_len must be between {MIN_FRAME_LEN} and {DEFAULT_MAX_FRAME_LEN}"
            )));
        }
        if self.max_fields < CREATE_COMPONENT_FIELDS {
            return Err(ConfigError::Invalid(format!(
                "max_fields ({}) must be at least {CREATE_COMPONENT_FIELDS}",
                self.max_fields
            )));
        }
        Ok(())
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_secs(self.eval_timeout_secs)
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.permission_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn flow_limits(&self) -> FlowLimits {
        FlowLimits {
            high_water: self.stream_high_water,
            low_water: self.stream_low_water,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            flush_timeout: Duration::from_secs(self.flush_timeout_secs),
        }
    }
}

fn override_from<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    let var = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
    let Some(value) = lookup(&var) else {
        return Ok(());
    };
    *slot = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let config = BridgeConfig::load_with(env(&[])).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.eval_timeout(), Duration::from_secs(30));
        let limits = config.flow_limits();
        assert_eq!((limits.high_water, limits.low_water), (10, 5));
        assert_eq!(limits.connect_timeout, Duration::from_secs(20));
        assert_eq!(limits.flush_timeout, Duration::from_secs(10));
    }

    #[test]
    fn file_then_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"eval_timeout_secs": 5, "stream_high_water": 20}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = BridgeConfig::load_with(env(&[
            ("HOSTLET_CONFIG", path.as_str()),
            ("HOSTLET_EVAL_TIMEOUT_SECS", "7"),
        ]))
        .unwrap();
        assert_eq!(config.eval_timeout_secs, 7);
        assert_eq!(config.stream_high_water, 20);
        assert_eq!(config.stream_low_water, 5);
    }

    #[test]
    fn rejects_bad_values() {
        let err = BridgeConfig::load_with(env(&[("HOSTLET_MAX_FIELDS", "lots")])).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @r#"invalid value "lots" for HOSTLET_MAX_FIELDS"#);

        let err = BridgeConfig::load_with(env(&[("HOSTLET_STREAM_LOW_WATER", "10")])).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"stream_low_water (10) must be below stream_high_water (10)");
    }

    #[test]
    fn rejects_limits_too_small_for_create_component() {
        let err = BridgeConfig::load_with(env(&[("HOSTLET_MAX_FIELDS", "0")])).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"max_fields (0) must be at least 14");

        let err = BridgeConfig::load_with(env(&[("HOSTLET_MAX_FRAME_LEN", "16")])).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"max_frame_len must be between 1024 and 99999999");

        let config = BridgeConfig::load_with(env(&[
            ("HOSTLET_MAX_FIELDS", "14"),
            ("HOSTLET_MAX_FRAME_LEN", "1024"),
        ]))
        .unwrap();
        assert_eq!((config.max_fields, config.max_frame_len), (14, 1024));
    }

    #[test]
    fn rejects_unknown_file_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"eval_timeout": 5}}"#).unwrap();
        let err = BridgeConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
