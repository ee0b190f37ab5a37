//! Error types for taskline.

use std::path::PathBuf;
use thiserror::Error;

/// Framing errors raised by [`Message`](crate::runtime::Message) accessors.
///
/// A failed accessor never moves the read or write cursor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Read past the written region.
    #[error("read of {needed} bytes with only {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    /// Append past the buffer capacity.
    #[error("append of {needed} bytes with only {available} available")]
    Overflow { needed: usize, available: usize },

    /// String does not fit in the u16 length prefix.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    /// Length-prefixed string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Absolute position outside the written region.
    #[error("position {pos} outside message of length {length}")]
    OutOfRange { pos: usize, length: usize },
}

/// Errors raised while wiring services onto ports.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A port whose protocol speaks first cannot share its socket.
    #[error("service '{0}' cannot share a port with a protocol that speaks first")]
    SingleSocketConflict(String),

    /// Two services on one port claim the same id byte.
    #[error("protocol id {id:#04x} is already bound to '{existing}'")]
    DuplicateProtocolId { id: u8, existing: String },

    /// A service without an id byte would make sniffing ambiguous.
    #[error("service '{0}' has no protocol id and cannot share a port")]
    AmbiguousService(String),

    /// Protocol name not present in the registry.
    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("no services configured")]
    NoServices,
}

/// Top-level server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::FileRead(
            PathBuf::from("/etc/taskline.toml"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(
            err.to_string(),
            "failed to read config file '/etc/taskline.toml': missing"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
