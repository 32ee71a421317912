//! Symmetric authenticated encryption for access tokens.
//!
//! Key material is derived from a configured passphrase by repeating it until
//! it covers the cipher's key length and truncating. The IV is derived the same
//! way from an optional IV source, falling back to the application id, so that
//! every replica configured with the same secret derives identical material
//! without sharing state.
//!
//! Each sealed message uses a fresh random 96-bit nonce that travels in front
//! of the ciphertext. The derived IV is bound into every message as AEAD
//! associated data, so a token only opens under the configuration that minted
//! it.
//!
//! ```text
//! token = base64url_nopad( nonce(12) || AES-GCM(key, nonce, plaintext, aad = iv) )
//! ```

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{ProtocolError, Result};

/// Length of the per-message nonce in bytes.
pub const NONCE_LENGTH: usize = 12;

/// Length of the AES-GCM authentication tag in bytes.
pub const TAG_LENGTH: usize = 16;

/// Supported token cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherAlgorithm {
    /// AES-128 in Galois/Counter mode.
    #[default]
    Aes128Gcm,
    /// AES-256 in Galois/Counter mode.
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// All supported algorithms.
    pub const ALL: [CipherAlgorithm; 2] = [CipherAlgorithm::Aes128Gcm, CipherAlgorithm::Aes256Gcm];

    /// Configuration name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes128Gcm => "aes-128-gcm",
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
        }
    }

    /// Required key length in bytes.
    pub fn key_length(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Gcm => 16,
            CipherAlgorithm::Aes256Gcm => 32,
        }
    }

    /// Required IV length in bytes.
    pub fn iv_length(&self) -> usize {
        NONCE_LENGTH
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|algo| algo.name() == lower)
            .ok_or_else(|| ProtocolError::UnsupportedCipher(s.to_string()))
    }
}

/// Repeats `input` until it is at least `length` bytes long, then truncates.
///
/// An empty input yields an empty output; callers check the resulting length.
pub fn stretch(input: &[u8], length: usize) -> Vec<u8> {
    if input.is_empty() {
        return Vec::new();
    }
    input.iter().copied().cycle().take(length).collect()
}

/// Secret key and IV derived from the configured passphrase.
///
/// Immutable after construction and zeroized on drop.
#[derive(Clone)]
pub struct CipherKeyMaterial {
    algorithm: CipherAlgorithm,
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
}

impl CipherKeyMaterial {
    /// Derives key material for `algorithm`.
    ///
    /// `iv_source` is used for the IV when given; otherwise `app_id` is.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the passphrase is empty or if the
    /// derived key or IV does not have exactly the required length.
    pub fn derive(
        passphrase: &str,
        iv_source: Option<&str>,
        app_id: &str,
        algorithm: CipherAlgorithm,
    ) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(ProtocolError::EmptyPassphrase);
        }

        let key = Zeroizing::new(stretch(passphrase.as_bytes(), algorithm.key_length()));
        if key.len() != algorithm.key_length() {
            return Err(ProtocolError::InvalidKeyLength {
                expected: algorithm.key_length(),
                got: key.len(),
            });
        }

        let iv_source = iv_source.unwrap_or(app_id);
        let iv = Zeroizing::new(stretch(iv_source.as_bytes(), algorithm.iv_length()));
        if iv.len() != algorithm.iv_length() {
            return Err(ProtocolError::InvalidIvLength {
                expected: algorithm.iv_length(),
                got: iv.len(),
            });
        }

        Ok(Self { algorithm, key, iv })
    }

    /// The algorithm this material was derived for.
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// The derived key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The derived IV bytes.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

impl fmt::Debug for CipherKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKeyMaterial")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

enum AeadCipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// Token encryption engine bound to one set of key material.
pub struct TokenCipher {
    cipher: AeadCipher,
    material: CipherKeyMaterial,
}

impl TokenCipher {
    /// Creates a cipher from already-derived key material.
    pub fn new(material: CipherKeyMaterial) -> Result<Self> {
        let invalid_key = |_| ProtocolError::InvalidKeyLength {
            expected: material.algorithm.key_length(),
            got: material.key.len(),
        };
        let cipher = match material.algorithm {
            CipherAlgorithm::Aes128Gcm => AeadCipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(material.key()).map_err(invalid_key)?,
            )),
            CipherAlgorithm::Aes256Gcm => AeadCipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(material.key()).map_err(invalid_key)?,
            )),
        };
        Ok(Self { cipher, material })
    }

    /// Derives key material from a passphrase and creates a cipher.
    pub fn from_passphrase(
        passphrase: &str,
        iv_source: Option<&str>,
        app_id: &str,
        algorithm: CipherAlgorithm,
    ) -> Result<Self> {
        Self::new(CipherKeyMaterial::derive(passphrase, iv_source, app_id, algorithm)?)
    }

    /// The algorithm in use.
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.material.algorithm
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);

        let payload = Payload {
            msg: plaintext,
            aad: self.material.iv(),
        };
        let nonce_ref = Nonce::from_slice(&nonce);
        let ciphertext = match &self.cipher {
            AeadCipher::Aes128(c) => c.encrypt(nonce_ref, payload),
            AeadCipher::Aes256(c) => c.encrypt(nonce_ref, payload),
        }
        .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a buffer produced by [`TokenCipher::encrypt`].
    ///
    /// Fails if the buffer is truncated or fails authentication.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(ProtocolError::Decryption(format!(
                "ciphertext too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
        let payload = Payload {
            msg: ciphertext,
            aad: self.material.iv(),
        };
        let nonce_ref = Nonce::from_slice(nonce);
        let plaintext = match &self.cipher {
            AeadCipher::Aes128(c) => c.decrypt(nonce_ref, payload),
            AeadCipher::Aes256(c) => c.decrypt(nonce_ref, payload),
        };
        plaintext.map_err(|_| ProtocolError::Decryption("authentication failed".to_string()))
    }

    /// Encrypts and encodes as URL-safe base64 without padding.
    pub fn seal_to_text(&self, plaintext: &[u8]) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.encrypt(plaintext)?))
    }

    /// Decodes URL-safe base64 text and decrypts it.
    ///
    /// Trailing `=` padding is tolerated.
    pub fn open_from_text(&self, text: &str) -> Result<Vec<u8>> {
        let sealed = URL_SAFE_NO_PAD.decode(text.trim().trim_end_matches('='))?;
        self.decrypt(&sealed)
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher")
            .field("material", &self.material)
            .finish()
    }
}
