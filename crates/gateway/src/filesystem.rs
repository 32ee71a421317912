//! The filesystem facade.
//!
//! [`Filesystem`] is what applications talk to. It normalizes every path
//! under the configured prefix before handing it to the storage adapter,
//! checks optional capabilities at call time, and falls back to signed
//! delivery URLs for backends without native URL support.

use std::io::Read;
use std::sync::Arc;
use std::time::SystemTime;

use protocol::{normalize, NormalizedPath};
use serde_json::{Map, Value};
use tracing::debug;

use crate::signing::SignedUrlIssuer;
use crate::storage::{
    ChecksumAlgorithm, Result, StorageAdapter, StorageAttributes, StorageError, Visibility,
    WriteOptions,
};

/// One storage backend behind a uniform, prefix-aware API.
#[derive(Clone)]
pub struct Filesystem {
    adapter: Arc<dyn StorageAdapter>,
    prefix: NormalizedPath,
    debug: bool,
    issuer: Option<Arc<SignedUrlIssuer>>,
}

impl Filesystem {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            prefix: NormalizedPath::root(),
            debug: false,
            issuer: None,
        }
    }

    /// Place every user path below `prefix`.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = NormalizedPath::new(prefix);
        self
    }

    /// In debug mode, missing backend capabilities are errors instead of
    /// empty results.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Use `issuer` for URLs the backend cannot generate itself.
    pub fn with_issuer(mut self, issuer: Arc<SignedUrlIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn prefix(&self) -> &NormalizedPath {
        &self.prefix
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// The adapter key for a user path.
    pub fn path(&self, raw: &str) -> NormalizedPath {
        normalize(raw, Some(self.prefix.as_str()))
    }

    pub fn file_exists(&self, path: &str) -> Result<bool> {
        self.adapter.file_exists(&self.path(path))
    }

    pub fn directory_exists(&self, path: &str) -> Result<bool> {
        self.adapter.directory_exists(&self.path(path))
    }

    /// Check whether a file or a directory exists at `path`.
    pub fn has(&self, path: &str) -> Result<bool> {
        let key = self.path(path);
        Ok(self.adapter.file_exists(&key)? || self.adapter.directory_exists(&key)?)
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.adapter.read(&self.path(path))
    }

    pub fn read_stream(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.adapter.read_stream(&self.path(path))
    }

    pub fn write(&self, path: &str, contents: &[u8], options: &WriteOptions) -> Result<()> {
        self.adapter.write(&self.path(path), contents, options)
    }

    pub fn write_stream(
        &self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<()> {
        self.adapter.write_stream(&self.path(path), contents, options)
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.adapter.delete(&self.path(path))
    }

    pub fn delete_directory(&self, path: &str) -> Result<()> {
        self.adapter.delete_directory(&self.path(path))
    }

    pub fn create_directory(&self, path: &str, options: &WriteOptions) -> Result<()> {
        self.adapter.create_directory(&self.path(path), options)
    }

    /// List entries below `path`. Returned paths are relative to the prefix,
    /// so they can be passed straight back into this facade.
    pub fn list_contents(&self, path: &str, deep: bool) -> Result<Vec<StorageAttributes>> {
        let entries = self.adapter.list_contents(&self.path(path), deep)?;
        Ok(entries
            .into_iter()
            .filter_map(|mut entry| {
                entry.path = entry.path.strip_prefix(&self.prefix)?;
                Some(entry)
            })
            .collect())
    }

    pub fn move_file(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        self.adapter
            .move_file(&self.path(source), &self.path(destination), options)
    }

    pub fn copy_file(&self, source: &str, destination: &str, options: &WriteOptions) -> Result<()> {
        self.adapter
            .copy_file(&self.path(source), &self.path(destination), options)
    }

    pub fn last_modified(&self, path: &str) -> Result<u64> {
        self.adapter.last_modified(&self.path(path))
    }

    pub fn file_size(&self, path: &str) -> Result<u64> {
        self.adapter.file_size(&self.path(path))
    }

    pub fn mime_type(&self, path: &str) -> Result<String> {
        self.adapter.mime_type(&self.path(path))
    }

    pub fn visibility(&self, path: &str) -> Result<Visibility> {
        self.adapter.visibility(&self.path(path))
    }

    pub fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        self.adapter.set_visibility(&self.path(path), visibility)
    }

    /// Content checksum using the named algorithm (`md5` or `sha256`).
    ///
    /// Backends without checksum support yield an empty string, or
    /// [`StorageError::ChecksumUnsupported`] in debug mode.
    pub fn checksum(&self, path: &str, algorithm: &str) -> Result<String> {
        let key = self.path(path);
        let Some(provider) = self.adapter.as_checksum_provider() else {
            return self.capability_gap(StorageError::ChecksumUnsupported {
                backend: self.adapter.name(),
            });
        };
        let algorithm: ChecksumAlgorithm = algorithm.parse()?;
        provider.checksum(&key, algorithm)
    }

    /// A permanent URL for `path`.
    pub fn public_url(&self, path: &str, config: &Map<String, Value>) -> Result<String> {
        let key = self.path(path);
        if let Some(generator) = self.adapter.as_public_url_generator() {
            return generator.public_url(&key, config);
        }
        if !self.adapter.serves_signed_urls() {
            return self.capability_gap(StorageError::UnsupportedCapability {
                backend: self.adapter.name(),
                operation: "public URLs",
            });
        }
        self.issuer(&key, "public")?
            .public_url(&key, config)
            .map_err(|e| StorageError::url(&key, "public", e))
    }

    /// A URL for `path` that stops working after `expires_at`.
    pub fn temporary_url(
        &self,
        path: &str,
        expires_at: SystemTime,
        config: &Map<String, Value>,
    ) -> Result<String> {
        let key = self.path(path);
        if let Some(generator) = self.adapter.as_temporary_url_generator() {
            return generator.temporary_url(&key, expires_at, config);
        }
        if !self.adapter.serves_signed_urls() {
            return self.capability_gap(StorageError::UnsupportedCapability {
                backend: self.adapter.name(),
                operation: "temporary URLs",
            });
        }
        self.issuer(&key, "temporary")?
            .temporary_url(&key, expires_at, config)
            .map_err(|e| StorageError::url(&key, "temporary", e))
    }

    fn issuer(&self, key: &NormalizedPath, kind: &'static str) -> Result<&SignedUrlIssuer> {
        self.issuer
            .as_deref()
            .ok_or_else(|| StorageError::url(key, kind, "no URL issuer configured"))
    }

    fn capability_gap(&self, err: StorageError) -> Result<String> {
        if self.debug {
            return Err(err);
        }
        debug!("Returning empty result: {}", err);
        Ok(String::new())
    }
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("adapter", &self.adapter.name())
            .field("prefix", &self.prefix)
            .field("debug", &self.debug)
            .field("issuer", &self.issuer.is_some())
            .finish()
    }
}
