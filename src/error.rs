//! Error types for mihub
//!
//! This module defines all error types used throughout the library.
//! Setup errors ([`ConfigError`], [`DiscoveryError`]) are fatal and surface
//! from [`Bridge::setup`](crate::Bridge::setup). Runtime errors
//! ([`ActionError`], [`ParseError`]) are only ever logged.

use thiserror::Error;

/// Result type alias for mihub operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for mihub operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Discovery error
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Gateway client error
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Remote action error
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Registry lookup error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors while validating or loading configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Gateway key is not exactly 16 characters
    #[error("Invalid key for gateway {sid}: key must be 16 characters, got {length}")]
    InvalidKeyLength { sid: String, length: usize },

    /// Discovery retry count must be positive
    #[error("Invalid discovery_retry: {0} (must be a positive integer)")]
    InvalidDiscoveryRetry(u32),

    /// Configuration document could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(String),
}

/// Errors during gateway discovery
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    /// No gateway answered within the retry budget
    #[error("No gateway discovered after {attempts} attempts")]
    NoGatewaysDiscovered { attempts: u32 },
}

/// Errors reported by the gateway client collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Socket level failure
    #[error("IO error: {0}")]
    Io(String),

    /// Unexpected or malformed gateway response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation requires an active listen loop
    #[error("Client is not listening")]
    NotListening,

    /// The hub refused a write
    #[error("Write rejected by gateway {sid}: {reason}")]
    WriteRejected { sid: String, reason: String },
}

/// Errors raised by remote actions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// A mandatory parameter was not supplied
    #[error("Mandatory parameter ({0}) is not specified")]
    MissingParameter(&'static str),

    /// A parameter could not be interpreted
    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    /// The ringtone id is not defined in the gateway
    #[error("Specified mid: {0} is not defined in gateway")]
    ReservedRingtoneId(i64),

    /// No live connection matches the sid
    #[error("Unknown gateway sid: {0} was specified")]
    UnknownGateway(String),

    /// The action name is not registered
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// The write to the hub failed
    #[error("Write failed: {0}")]
    Write(#[from] ClientError),
}

/// Errors while parsing a device payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// A field carried a value of the wrong shape
    #[error("Invalid value for field '{field}': {value}")]
    InvalidValue { field: String, value: String },
}

impl ParseError {
    /// Build an [`ParseError::InvalidValue`] from a field name and raw JSON value
    pub fn invalid(field: &str, value: &serde_json::Value) -> Self {
        ParseError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Errors related to the gateway registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// No live connection with this sid
    #[error("Gateway not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::Config(ConfigError::InvalidKeyLength {
            sid: "34ce0088db36".to_string(),
            length: 12,
        });
        let msg = format!("{}", err);
        assert!(msg.contains("16 characters"));
        assert!(msg.contains("34ce0088db36"));
    }

    #[test]
    fn test_error_conversion() {
        let discovery_err = DiscoveryError::NoGatewaysDiscovered { attempts: 3 };
        let err: BridgeError = discovery_err.into();
        assert!(matches!(err, BridgeError::Discovery(_)));

        let action_err: ActionError = ClientError::NotListening.into();
        assert!(matches!(action_err, ActionError::Write(ClientError::NotListening)));
    }

    #[test]
    fn test_parse_error_invalid() {
        let err = ParseError::invalid("voltage", &serde_json::json!("abc"));
        assert_eq!(
            err,
            ParseError::InvalidValue {
                field: "voltage".to_string(),
                value: "\"abc\"".to_string(),
            }
        );
    }
}
