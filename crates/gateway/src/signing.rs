//! Signed URL issuing.
//!
//! The issuer turns a storage key into a URL pointing at the delivery route.
//! The key, expiry and caller options travel inside an encrypted access
//! token, so the delivery side needs nothing but the shared secret.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use protocol::{
    AccessTokenCodec, AccessTokenPayload, NormalizedPath, ProtocolError, ATTACHMENT_NAME_KEY,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Query parameter carrying the token.
pub const TOKEN_PARAM: &str = "data";

/// Errors raised while issuing URLs.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid delivery action: {0}")]
    InvalidAction(String),

    #[error("expiry must be after the Unix epoch")]
    InvalidExpiry,

    #[error("token encoding failed: {0}")]
    Token(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Builds public and temporary URLs served by the delivery route.
pub struct SignedUrlIssuer {
    codec: Arc<AccessTokenCodec>,
    endpoint: Url,
}

impl SignedUrlIssuer {
    /// Create an issuer for URLs of the form `<base_url><action>?data=<token>`.
    pub fn new(codec: Arc<AccessTokenCodec>, base_url: &str, action: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| SigningError::InvalidBaseUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(SigningError::InvalidBaseUrl(format!(
                "{} is not an http(s) URL",
                base_url
            )));
        }
        if !action.starts_with('/') || action.contains(['?', '#']) {
            return Err(SigningError::InvalidAction(action.to_string()));
        }

        let endpoint = format!("{}{}", base.as_str().trim_end_matches('/'), action);
        let endpoint =
            Url::parse(&endpoint).map_err(|e| SigningError::InvalidAction(e.to_string()))?;

        Ok(Self { codec, endpoint })
    }

    /// The delivery endpoint without a query.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The path component of the delivery endpoint, as routed by the server.
    pub fn action_path(&self) -> &str {
        self.endpoint.path()
    }

    /// The codec shared with the delivery handler.
    pub fn codec(&self) -> &Arc<AccessTokenCodec> {
        &self.codec
    }

    /// A URL that never expires.
    pub fn public_url(&self, path: &NormalizedPath, config: &Map<String, Value>) -> Result<String> {
        let payload = AccessTokenPayload::public(path.clone(), with_attachment_name(path, config));
        self.issue(&payload)
    }

    /// A URL that stops working once `expires_at` has passed.
    pub fn temporary_url(
        &self,
        path: &NormalizedPath,
        expires_at: SystemTime,
        config: &Map<String, Value>,
    ) -> Result<String> {
        let expires = expires_at
            .duration_since(UNIX_EPOCH)
            .map_err(|_| SigningError::InvalidExpiry)?
            .as_secs();
        // Zero is reserved for tokens that never expire.
        if expires == 0 {
            return Err(SigningError::InvalidExpiry);
        }

        let payload = AccessTokenPayload::temporary(
            path.clone(),
            expires,
            with_attachment_name(path, config),
        );
        self.issue(&payload)
    }

    fn issue(&self, payload: &AccessTokenPayload) -> Result<String> {
        let token = self.codec.encode(payload)?;
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair(TOKEN_PARAM, token.as_str());
        debug!(
            "Issued URL for {} (expires: {})",
            payload.path, payload.expires
        );
        Ok(url.into())
    }
}

fn with_attachment_name(path: &NormalizedPath, config: &Map<String, Value>) -> Map<String, Value> {
    let mut config = config.clone();
    if !path.is_root() && !config.contains_key(ATTACHMENT_NAME_KEY) {
        config.insert(
            ATTACHMENT_NAME_KEY.to_string(),
            Value::String(path.basename().to_string()),
        );
    }
    config
}
