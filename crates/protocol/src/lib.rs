//! # fsgate Protocol Library
//!
//! This crate provides the access-token protocol for fsgate: the pieces that
//! turn a storage path into a signed, time-bounded URL token and back again.
//!
//! ## Overview
//!
//! The protocol crate is shared by every component that issues or redeems
//! tokens, providing:
//!
//! - **Path Normalization**: canonical, traversal-safe backend keys
//! - **Key Derivation**: passphrase-stretched key and IV material
//! - **Token Cipher**: AES-GCM with a random nonce per token
//! - **Token Codec**: JSON payloads sealed into URL-safe text
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          AccessTokenPayload             │  {path, expires, config}
//! ├─────────────────────────────────────────┤
//! │               JSON                      │  serde_json
//! ├─────────────────────────────────────────┤
//! │            TokenCipher                  │  AES-GCM, aad = derived IV
//! ├─────────────────────────────────────────┤
//! │         base64url (no padding)          │  ?data=<token>
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{AccessTokenCodec, AccessTokenPayload, CipherAlgorithm, NormalizedPath, TokenCipher};
//!
//! let cipher = TokenCipher::from_passphrase(
//!     "s3cr3t-passphrase-value",
//!     None,
//!     "fsgate",
//!     CipherAlgorithm::Aes128Gcm,
//! )
//! .unwrap();
//! let codec = AccessTokenCodec::new(cipher);
//!
//! let payload = AccessTokenPayload::public(NormalizedPath::new("/docs/../report.pdf"), Default::default());
//! let token = codec.encode(&payload).unwrap();
//!
//! let decoded = codec.decode(token.as_str()).unwrap();
//! assert_eq!(decoded.path.as_str(), "report.pdf");
//! ```
//!
//! ## Modules
//!
//! - [`path`]: Path normalization
//! - [`cipher`]: Key derivation and token encryption
//! - [`token`]: Access token payloads and codec
//! - [`error`]: Error types

pub mod cipher;
pub mod error;
pub mod path;
pub mod token;

pub use cipher::{CipherAlgorithm, CipherKeyMaterial, TokenCipher, NONCE_LENGTH, TAG_LENGTH};
pub use error::{DecodeError, ProtocolError, Result};
pub use path::{normalize, NormalizedPath, SEPARATOR};
pub use token::{
    unix_now, AccessToken, AccessTokenCodec, AccessTokenPayload, ATTACHMENT_NAME_KEY,
    MAX_TOKEN_LENGTH, NO_EXPIRY,
};
