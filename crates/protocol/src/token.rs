//! Access token payloads and their encrypted text form.
//!
//! A token is the sealed JSON encoding of an [`AccessTokenPayload`]:
//!
//! ```json
//! {"path":"docs/report.pdf","expires":1735689600,"config":{"attachmentName":"report.pdf"}}
//! ```
//!
//! `expires` is in Unix epoch seconds; `0` means the token never expires.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cipher::TokenCipher;
use crate::error::{DecodeError, ProtocolError, Result};
use crate::path::NormalizedPath;

/// Expiry value meaning "never expires".
pub const NO_EXPIRY: u64 = 0;

/// Tokens longer than this are rejected before any decoding work.
pub const MAX_TOKEN_LENGTH: usize = 8 * 1024;

/// Config key carrying the filename used when the file is delivered.
pub const ATTACHMENT_NAME_KEY: &str = "attachmentName";

/// The structured content of an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessTokenPayload {
    /// Backend key of the file this token grants access to.
    pub path: NormalizedPath,
    /// Expiry in Unix epoch seconds, or [`NO_EXPIRY`].
    pub expires: u64,
    /// Opaque caller-supplied metadata.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl AccessTokenPayload {
    /// A payload that never expires.
    pub fn public(path: NormalizedPath, config: Map<String, Value>) -> Self {
        Self {
            path,
            expires: NO_EXPIRY,
            config,
        }
    }

    /// A payload that expires at `expires` epoch seconds.
    pub fn temporary(path: NormalizedPath, expires: u64, config: Map<String, Value>) -> Self {
        Self {
            path,
            expires,
            config,
        }
    }

    /// Returns true if the payload has no expiry.
    pub fn is_public(&self) -> bool {
        self.expires == NO_EXPIRY
    }

    /// Returns true if the payload expired strictly before `now` (epoch seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires != NO_EXPIRY && self.expires < now
    }

    /// Returns true if the payload has expired relative to the system clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    /// Filename to present on delivery: `config.attachmentName` if it is a
    /// non-empty string, otherwise the path's basename.
    pub fn attachment_name(&self) -> &str {
        match self.config.get(ATTACHMENT_NAME_KEY) {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => self.path.basename(),
        }
    }
}

/// An opaque, URL-safe encrypted access token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessToken(String);

impl AccessToken {
    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the token and returns the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Converts payloads to and from sealed token text.
#[derive(Debug)]
pub struct AccessTokenCodec {
    cipher: TokenCipher,
}

impl AccessTokenCodec {
    /// Creates a codec using `cipher` for confidentiality and integrity.
    pub fn new(cipher: TokenCipher) -> Self {
        Self { cipher }
    }

    /// Returns the underlying cipher.
    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Serializes and seals a payload.
    ///
    /// Fails with [`ProtocolError::TokenTooLarge`] when the token would be
    /// longer than [`MAX_TOKEN_LENGTH`] and so could never be decoded.
    pub fn encode(&self, payload: &AccessTokenPayload) -> Result<AccessToken> {
        let json = serde_json::to_vec(payload)?;
        let text = self.cipher.seal_to_text(&json)?;
        if text.len() > MAX_TOKEN_LENGTH {
            return Err(ProtocolError::TokenTooLarge {
                size: text.len(),
                max: MAX_TOKEN_LENGTH,
            });
        }
        Ok(AccessToken(text))
    }

    /// Opens and parses token text.
    ///
    /// The input is untrusted client data; every failure is reported as a
    /// single [`DecodeError`].
    pub fn decode(&self, token: &str) -> std::result::Result<AccessTokenPayload, DecodeError> {
        if token.is_empty() {
            return Err(DecodeError::new("empty token"));
        }
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(DecodeError::new(format!(
                "token length {} exceeds maximum of {}",
                token.len(),
                MAX_TOKEN_LENGTH
            )));
        }

        let plaintext = self.cipher.open_from_text(token)?;
        let payload: AccessTokenPayload = serde_json::from_slice(&plaintext)?;
        Ok(payload)
    }
}

/// Current Unix time in seconds. A clock before the epoch reads as 0.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherAlgorithm;
    use proptest::prelude::*;
    use serde_json::json;

    fn codec() -> AccessTokenCodec {
        let cipher = TokenCipher::from_passphrase(
            "s3cr3t-passphrase-value",
            None,
            "fsgate",
            CipherAlgorithm::Aes128Gcm,
        )
        .unwrap();
        AccessTokenCodec::new(cipher)
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_roundtrip_public() {
        let codec = codec();
        let payload = AccessTokenPayload::public(NormalizedPath::new("docs/report.pdf"), Map::new());
        let token = codec.encode(&payload).unwrap();
        let decoded = codec.decode(token.as_str()).unwrap();
        assert_eq!(decoded, payload);
        assert!(decoded.is_public());
    }

    #[test]
    fn test_roundtrip_with_config() {
        let codec = codec();
        let payload = AccessTokenPayload::temporary(
            NormalizedPath::new("a/b.txt"),
            1_900_000_000,
            config(json!({"attachmentName": "b.txt", "nested": {"k": [1, 2]}})),
        );
        let token = codec.encode(&payload).unwrap();
        assert_eq!(codec.decode(token.as_str()).unwrap(), payload);
    }

    #[test]
    fn test_wire_keys() {
        let payload = AccessTokenPayload::temporary(NormalizedPath::new("x"), 5, Map::new());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, json!({"path": "x", "expires": 5, "config": {}}));
    }

    #[test]
    fn test_decode_empty_rejected() {
        assert!(codec().decode("").is_err());
    }

    #[test]
    fn test_decode_oversized_rejected() {
        let huge = "A".repeat(MAX_TOKEN_LENGTH + 1);
        let err = codec().decode(&huge).unwrap_err();
        assert!(err.reason().contains("exceeds maximum"));
    }

    #[test]
    fn test_encode_refuses_tokens_decode_would_reject() {
        let codec = codec();
        let path = NormalizedPath::new("docs/a.pdf");

        let too_big =
            AccessTokenPayload::public(path.clone(), config(json!({"note": "x".repeat(7000)})));
        assert!(matches!(
            codec.encode(&too_big),
            Err(ProtocolError::TokenTooLarge { max: MAX_TOKEN_LENGTH, .. })
        ));

        // Walk across the limit: every token that is issued must decode.
        let mut issued = 0;
        let mut refused = 0;
        for len in 5900..6200 {
            let payload =
                AccessTokenPayload::public(path.clone(), config(json!({"note": "x".repeat(len)})));
            match codec.encode(&payload) {
                Ok(token) => {
                    assert!(token.as_str().len() <= MAX_TOKEN_LENGTH);
                    assert_eq!(codec.decode(token.as_str()).unwrap(), payload);
                    issued += 1;
                }
                Err(ProtocolError::TokenTooLarge { size, max }) => {
                    assert!(size > max);
                    refused += 1;
                }
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert!(issued > 0 && refused > 0);
    }

    #[test]
    fn test_decode_garbage_rejected() {
        let codec = codec();
        assert!(codec.decode("not-a-token").is_err());
        assert!(codec.decode("%%%").is_err());
        assert!(codec.decode("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let codec = codec();
        let sealed = codec.cipher().seal_to_text(br#"{"path":"x"}"#).unwrap();
        assert!(codec.decode(&sealed).is_err());

        let sealed = codec.cipher().seal_to_text(br#"[1,2,3]"#).unwrap();
        assert!(codec.decode(&sealed).is_err());

        let sealed = codec
            .cipher()
            .seal_to_text(br#"{"path":"x","expires":-4,"config":{}}"#)
            .unwrap();
        assert!(codec.decode(&sealed).is_err());

        let sealed = codec.cipher().seal_to_text(&[0xff, 0xfe]).unwrap();
        assert!(codec.decode(&sealed).is_err());
    }

    #[test]
    fn test_decode_tolerates_missing_config() {
        let codec = codec();
        let sealed = codec
            .cipher()
            .seal_to_text(br#"{"path":"../x/./y","expires":0}"#)
            .unwrap();
        let payload = codec.decode(&sealed).unwrap();
        assert_eq!(payload.path.as_str(), "x/y");
        assert!(payload.config.is_empty());
    }

    #[test]
    fn test_tamper_every_character() {
        let codec = codec();
        let payload = AccessTokenPayload::public(NormalizedPath::new("docs/report.pdf"), Map::new());
        let token = codec.encode(&payload).unwrap().into_string();

        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            // Flipping the final character may only touch unused padding bits.
            if let Ok(decoded) = codec.decode(&tampered) {
                assert_eq!(i, token.len() - 1, "tampering at {} went undetected", i);
                assert_eq!(decoded, payload);
            }
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = 1_700_000_000;
        let path = NormalizedPath::new("f");
        assert!(AccessTokenPayload::temporary(path.clone(), now - 1, Map::new()).is_expired_at(now));
        assert!(!AccessTokenPayload::temporary(path.clone(), now, Map::new()).is_expired_at(now));
        assert!(!AccessTokenPayload::temporary(path.clone(), now + 1, Map::new()).is_expired_at(now));
        assert!(!AccessTokenPayload::public(path, Map::new()).is_expired_at(u64::MAX));
    }

    #[test]
    fn test_attachment_name() {
        let path = NormalizedPath::new("docs/report.pdf");
        let plain = AccessTokenPayload::public(path.clone(), Map::new());
        assert_eq!(plain.attachment_name(), "report.pdf");

        let named = AccessTokenPayload::public(path.clone(), config(json!({"attachmentName": "Q3.pdf"})));
        assert_eq!(named.attachment_name(), "Q3.pdf");

        let bogus = AccessTokenPayload::public(path, config(json!({"attachmentName": 7})));
        assert_eq!(bogus.attachment_name(), "report.pdf");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_token_roundtrip(
            path in "[a-z0-9]{1,8}(/[a-z0-9._-]{1,8}){0,4}",
            expires in any::<u64>(),
            label in "[ -~]{0,24}",
        ) {
            let codec = codec();
            let mut config = Map::new();
            config.insert("label".to_string(), Value::String(label));
            let payload = AccessTokenPayload::temporary(NormalizedPath::new(&path), expires, config);
            let token = codec.encode(&payload).unwrap();
            prop_assert_eq!(codec.decode(token.as_str()).unwrap(), payload);
        }
    }
}
