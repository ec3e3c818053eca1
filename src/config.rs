use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IdError, Result};
use crate::generator::{validate_period, DEFAULT_PERIOD};

/// Tunables for IP identifier selection.
///
/// Missing keys take their defaults, so an empty document is valid:
///
/// ```toml
/// random_id = true
/// random_id_period = 8192
/// rfc6864 = true
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpIdConfig {
    /// Use randomized identifiers instead of a sequential counter.
    pub random_id: bool,
    /// Number of issuances before a random identifier may recur.
    pub random_id_period: usize,
    /// Send atomic datagrams with an identifier of 0.
    pub rfc6864: bool,
}

impl Default for IpIdConfig {
    fn default() -> Self {
        Self {
            random_id: false,
            random_id_period: DEFAULT_PERIOD,
            rfc6864: true,
        }
    }
}

impl IpIdConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: IpIdConfig =
            toml::from_str(content).map_err(|e| IdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| IdError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IdError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        validate_period(self.random_id_period)
    }
}
