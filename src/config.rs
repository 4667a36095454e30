// mihub - Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for mihub
//!
//! A [`BridgeConfig`] is usually loaded from JSON. Every field has a default,
//! so `{}` is a valid configuration: one wildcard gateway without a key,
//! interface `any` and three discovery attempts.
//!
//! ```rust
//! use mihub::BridgeConfig;
//!
//! let config = BridgeConfig::from_json_str(r#"{
//!     "gateways": [{ "sid": "34:CE:00:88:DB:36", "key": "0123456789abcdef" }],
//!     "discovery_retry": 5
//! }"#).unwrap();
//!
//! assert_eq!(config.gateways[0].sid.as_deref(), Some("34ce0088db36"));
//! assert_eq!(config.discovery_retry, 5);
//! ```

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Required length of a gateway key
pub const KEY_LENGTH: usize = 16;

/// Default number of discovery attempts
pub const DEFAULT_DISCOVERY_RETRY: u32 = 3;

/// Default multicast interface
pub const DEFAULT_INTERFACE: &str = "any";

/// Top-level key the bridge section may be nested under
pub const DOMAIN: &str = "xiaomi";

/// Normalize a gateway sid: strip every `:` and lowercase.
///
/// Normalizing twice yields the same value as normalizing once.
pub fn normalize_sid(sid: &str) -> String {
    sid.chars()
        .filter(|c| *c != ':')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Credentials for one gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Normalized gateway sid. `None` matches any gateway.
    #[serde(default)]
    pub sid: Option<String>,

    /// 16 character key enabling writes to the hub
    #[serde(default)]
    pub key: Option<String>,
}

impl GatewayConfig {
    /// Create validated gateway credentials
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidKeyLength`] if a key is given and is not
    /// exactly 16 characters long.
    pub fn new(sid: Option<&str>, key: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self {
            sid: sid.map(str::to_string),
            key: key.map(str::to_string),
        };
        config.validate()?;
        Ok(config)
    }

    /// Wildcard entry without a key
    pub fn wildcard() -> Self {
        Self::default()
    }

    /// Normalize the sid in place and check the key length
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if let Some(sid) = self.sid.as_mut() {
            *sid = normalize_sid(sid);
        }
        if let Some(key) = &self.key {
            let length = key.chars().count();
            if length != KEY_LENGTH {
                return Err(ConfigError::InvalidKeyLength {
                    sid: self.display_sid().to_string(),
                    length,
                });
            }
        }
        Ok(())
    }

    /// Whether this entry matches any gateway
    pub fn is_wildcard(&self) -> bool {
        self.sid.is_none()
    }

    /// Sid for log output
    pub fn display_sid(&self) -> &str {
        self.sid.as_deref().unwrap_or("<any>")
    }
}

/// Bridge-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Configured gateways; a single object is accepted as a one-element list
    #[serde(default = "default_gateways", deserialize_with = "one_or_many")]
    pub gateways: Vec<GatewayConfig>,

    /// Network interface handed to the client before discovery
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Number of discovery attempts before giving up
    #[serde(default = "default_discovery_retry", alias = "discoveryRetry")]
    pub discovery_retry: u32,
}

fn default_gateways() -> Vec<GatewayConfig> {
    vec![GatewayConfig::wildcard()]
}

fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}

fn default_discovery_retry() -> u32 {
    DEFAULT_DISCOVERY_RETRY
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<GatewayConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(GatewayConfig),
        Many(Vec<GatewayConfig>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(gateway) => vec![gateway],
        OneOrMany::Many(gateways) => gateways,
    })
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateways: default_gateways(),
            interface: default_interface(),
            discovery_retry: DEFAULT_DISCOVERY_RETRY,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration for the given gateways
    pub fn with_gateways(gateways: Vec<GatewayConfig>) -> Self {
        Self {
            gateways,
            ..Default::default()
        }
    }

    /// Create a configuration with a custom discovery retry count
    pub fn with_discovery_retry(discovery_retry: u32) -> Self {
        Self {
            discovery_retry,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document
    ///
    /// The bridge section may either be the document itself or be nested
    /// under the `xiaomi` key next to unrelated sections.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut document: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let section = if document.get(DOMAIN).is_some() {
            document[DOMAIN].take()
        } else {
            document
        };

        let mut config: BridgeConfig =
            serde_json::from_value(section).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Normalize every gateway sid and check keys and retry count
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.discovery_retry == 0 {
            return Err(ConfigError::InvalidDiscoveryRetry(self.discovery_retry));
        }
        for gateway in &mut self.gateways {
            gateway.validate()?;
        }
        Ok(())
    }

    /// Number of gateways discovery should wait for
    pub fn expected_gateways(&self) -> usize {
        self.gateways.len()
    }
}
