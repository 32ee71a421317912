//! Redemption of signed delivery URLs.
//!
//! The handler is stateless: everything it needs to serve a file comes from
//! the token. A request moves through decoding and validation and ends
//! either serving the file or rejected. Rejections carry a reason for the
//! logs, but callers must present every rejection to the client the same way.

use std::sync::Arc;

use protocol::{AccessTokenCodec, DecodeError, NormalizedPath};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{mime::FALLBACK_MIME_TYPE, StorageAdapter, StorageError};

/// Why a delivery request was refused.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("no token supplied")]
    MissingToken,

    #[error("malformed token: {}", .0.reason())]
    Malformed(DecodeError),

    #[error("token expired at {expires} (now {now})")]
    Expired { expires: u64, now: u64 },

    #[error("token addresses the storage root")]
    RootPath,

    #[error("file not found: {0}")]
    NotFound(NormalizedPath),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// A file ready to be sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFile {
    pub contents: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

impl DeliveredFile {
    /// `Content-Disposition` value presenting the file inline.
    pub fn content_disposition(&self) -> String {
        format!("inline; filename=\"{}\"", header_filename(&self.filename))
    }
}

/// Quote-safe, visible-ASCII rendition of a filename for a header value.
fn header_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

/// Decodes delivery tokens and reads the files they grant access to.
pub struct FileDeliveryHandler {
    codec: Arc<AccessTokenCodec>,
    adapter: Arc<dyn StorageAdapter>,
}

impl FileDeliveryHandler {
    pub fn new(codec: Arc<AccessTokenCodec>, adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { codec, adapter }
    }

    /// Redeem `data` at time `now` (Unix epoch seconds).
    pub fn handle(&self, data: Option<&str>, now: u64) -> Result<DeliveredFile, Rejection> {
        let token = data.ok_or(Rejection::MissingToken)?;
        let payload = self.codec.decode(token).map_err(Rejection::Malformed)?;

        if payload.is_expired_at(now) {
            return Err(Rejection::Expired {
                expires: payload.expires,
                now,
            });
        }
        if payload.path.is_root() {
            return Err(Rejection::RootPath);
        }
        if !self.adapter.file_exists(&payload.path)? {
            return Err(Rejection::NotFound(payload.path));
        }

        let contents = self.adapter.read(&payload.path)?;
        let mime_type = match self.adapter.mime_type(&payload.path) {
            Ok(mime) => mime,
            Err(e) => {
                warn!("Falling back to default MIME type: {}", e);
                FALLBACK_MIME_TYPE.to_string()
            }
        };

        debug!("Serving {} ({} bytes)", payload.path, contents.len());
        Ok(DeliveredFile {
            contents,
            mime_type,
            filename: payload.attachment_name().to_string(),
        })
    }
}
