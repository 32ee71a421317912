//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering configuration and cipher failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Configuration errors
    /// The token passphrase was not configured.
    #[error("configuration error: the token passphrase must be set")]
    EmptyPassphrase,

    /// The derived key does not match the cipher's key size.
    #[error("configuration error: key must be exactly {expected} bytes long, {got} given")]
    InvalidKeyLength {
        /// Required key length.
        expected: usize,
        /// Derived key length.
        got: usize,
    },

    /// The derived IV does not match the cipher's IV size.
    #[error("configuration error: iv must be exactly {expected} bytes long, {got} given")]
    InvalidIvLength {
        /// Required IV length.
        expected: usize,
        /// Derived IV length.
        got: usize,
    },

    /// The configured cipher name is not supported.
    #[error("configuration error: unsupported cipher algorithm: {0}")]
    UnsupportedCipher(String),

    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption or authentication failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The sealed token would exceed the length accepted on decode.
    #[error("token length {size} exceeds maximum of {max}")]
    TokenTooLarge {
        /// Length of the sealed token text.
        size: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Token text is not valid URL-safe base64.
    #[error("invalid token encoding: {0}")]
    Encoding(String),
}

impl ProtocolError {
    /// Returns true for errors that must abort component initialization.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProtocolError::EmptyPassphrase
                | ProtocolError::InvalidKeyLength { .. }
                | ProtocolError::InvalidIvLength { .. }
                | ProtocolError::UnsupportedCipher(_)
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// The single failure returned when an access token cannot be opened.
///
/// Every lower-level failure (bad base64, failed authentication, invalid
/// UTF-8, wrong JSON shape) collapses into this type. The reason is kept for
/// server-side debug logging only and is not part of the `Display` output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid access token")]
pub struct DecodeError {
    reason: String,
}

impl DecodeError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Internal description of what went wrong. Never send this to a client.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::Encoding(err.to_string())
    }
}

impl From<ProtocolError> for DecodeError {
    fn from(err: ProtocolError) -> Self {
        DecodeError::new(err.to_string())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::new(format!("malformed payload: {err}"))
    }
}
