//! Storage backends behind one uniform interface.
//!
//! This module provides the [`StorageAdapter`] trait and its shipped
//! implementations:
//! - [`LocalAdapter`]: a directory on local disk
//! - [`ZipArchiveAdapter`]: entries inside a ZIP file
//! - [`MemoryAdapter`]: an in-process map
//!
//! Adapters receive keys that are already normalized. Optional capabilities
//! (checksums, native URL generation) are discovered at call time through the
//! `as_*` hooks, which return `None` unless the backend supports them.
//!
//! # Security
//!
//! A [`NormalizedPath`] can never name anything above the adapter root. The
//! local adapter additionally resolves symlinks and rejects any that point
//! outside its root.

pub mod archive;
pub mod local;
pub mod memory;
pub mod mime;
pub mod visibility;

use std::io::{Cursor, Read};
use std::str::FromStr;
use std::time::SystemTime;

use protocol::NormalizedPath;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use archive::ZipArchiveAdapter;
pub use local::LocalAdapter;
pub use memory::MemoryAdapter;
pub use visibility::{PortableVisibility, Visibility};

/// Buffer size used when hashing or copying streams.
pub(crate) const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Errors raised by storage operations.
///
/// Each variant names the operation that failed and carries the location
/// involved plus a backend-specific reason.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unable to read file from location: {location}. {reason}")]
    UnableToReadFile { location: String, reason: String },

    #[error("unable to write file at location: {location}. {reason}")]
    UnableToWriteFile { location: String, reason: String },

    #[error("unable to delete file located at: {location}. {reason}")]
    UnableToDeleteFile { location: String, reason: String },

    #[error("unable to delete directory located at: {location}. {reason}")]
    UnableToDeleteDirectory { location: String, reason: String },

    #[error("unable to create directory at location: {location}. {reason}")]
    UnableToCreateDirectory { location: String, reason: String },

    #[error("unable to move file from {source_location} to {destination}. {reason}")]
    UnableToMoveFile {
        source_location: String,
        destination: String,
        reason: String,
    },

    #[error("unable to copy file from {source_location} to {destination}. {reason}")]
    UnableToCopyFile {
        source_location: String,
        destination: String,
        reason: String,
    },

    #[error("unable to list contents of: {location}. {reason}")]
    UnableToListContents { location: String, reason: String },

    #[error("unable to retrieve the {metadata} for file at location: {location}. {reason}")]
    UnableToRetrieveMetadata {
        location: String,
        metadata: &'static str,
        reason: String,
    },

    #[error("unable to set visibility for file {location}. {reason}")]
    UnableToSetVisibility { location: String, reason: String },

    #[error("unable to check existence for: {location}. {reason}")]
    UnableToCheckExistence { location: String, reason: String },

    #[error("{backend} does not support checksums")]
    ChecksumUnsupported { backend: &'static str },

    #[error("checksum algorithm is not supported: {0}")]
    ChecksumAlgoUnsupported(String),

    #[error("{backend} does not support {operation}")]
    UnsupportedCapability {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("unable to generate {kind} URL for {location}. {reason}")]
    UnableToGenerateUrl {
        location: String,
        kind: &'static str,
        reason: String,
    },
}

impl StorageError {
    pub(crate) fn read(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToReadFile {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToWriteFile {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn delete(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToDeleteFile {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn delete_directory(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToDeleteDirectory {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn create_directory(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToCreateDirectory {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn move_file(
        source: &NormalizedPath,
        destination: &NormalizedPath,
        reason: impl ToString,
    ) -> Self {
        Self::UnableToMoveFile {
            source_location: source.to_string(),
            destination: destination.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn copy_file(
        source: &NormalizedPath,
        destination: &NormalizedPath,
        reason: impl ToString,
    ) -> Self {
        Self::UnableToCopyFile {
            source_location: source.to_string(),
            destination: destination.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn list(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToListContents {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn metadata(
        location: &NormalizedPath,
        metadata: &'static str,
        reason: impl ToString,
    ) -> Self {
        Self::UnableToRetrieveMetadata {
            location: location.to_string(),
            metadata,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn set_visibility(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToSetVisibility {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn existence(location: &NormalizedPath, reason: impl ToString) -> Self {
        Self::UnableToCheckExistence {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn url(location: &NormalizedPath, kind: &'static str, reason: impl ToString) -> Self {
        Self::UnableToGenerateUrl {
            location: location.to_string(),
            kind,
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata for one entry returned by [`StorageAdapter::list_contents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAttributes {
    /// Key of the entry.
    pub path: NormalizedPath,
    /// File or directory.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes (files only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Last modified time in Unix epoch seconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<u64>,
    /// Visibility, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl StorageAttributes {
    /// Attributes for a file entry.
    pub fn file(
        path: NormalizedPath,
        file_size: u64,
        last_modified: Option<u64>,
        visibility: Option<Visibility>,
    ) -> Self {
        Self {
            path,
            kind: EntryKind::File,
            file_size: Some(file_size),
            last_modified,
            visibility,
        }
    }

    /// Attributes for a directory entry.
    pub fn directory(
        path: NormalizedPath,
        last_modified: Option<u64>,
        visibility: Option<Visibility>,
    ) -> Self {
        Self {
            path,
            kind: EntryKind::Directory,
            file_size: None,
            last_modified,
            visibility,
        }
    }

    /// Returns true for file entries.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Returns true for directory entries.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Options for operations that create files or directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Visibility of the written file. Backend default when `None`.
    pub visibility: Option<Visibility>,
    /// Visibility of directories created along the way.
    pub directory_visibility: Option<Visibility>,
}

impl WriteOptions {
    /// Options with an explicit file visibility.
    pub fn with_visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
            directory_visibility: None,
        }
    }
}

/// Hash functions available for [`ChecksumProvider::checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Name as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }

    /// Hashes everything `reader` yields and returns lowercase hex.
    pub fn digest_reader<R: Read + ?Sized>(&self, reader: &mut R) -> std::io::Result<String> {
        let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
        match self {
            ChecksumAlgorithm::Md5 => {
                let mut context = md5::Context::new();
                loop {
                    let n = reader.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    context.consume(&buffer[..n]);
                }
                Ok(format!("{:x}", context.compute()))
            }
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let n = reader.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buffer[..n]);
                }
                Ok(hex::encode(hasher.finalize()))
            }
        }
    }

    /// Hashes a byte slice and returns lowercase hex.
    pub fn digest(&self, contents: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Md5 => format!("{:x}", md5::compute(contents)),
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(contents)),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(StorageError::ChecksumAlgoUnsupported(other.to_string())),
        }
    }
}

/// A backend that can compute content checksums.
pub trait ChecksumProvider {
    fn checksum(&self, path: &NormalizedPath, algorithm: ChecksumAlgorithm) -> Result<String>;
}

/// A backend with its own notion of a permanent public URL.
pub trait PublicUrlGenerator {
    fn public_url(&self, path: &NormalizedPath, config: &Map<String, Value>) -> Result<String>;
}

/// A backend with its own notion of an expiring URL.
pub trait TemporaryUrlGenerator {
    fn temporary_url(
        &self,
        path: &NormalizedPath,
        expires_at: SystemTime,
        config: &Map<String, Value>,
    ) -> Result<String>;
}

/// Uniform file operations over one storage backend.
///
/// All methods take keys relative to the adapter root. Implementations are
/// shared across threads and do their own locking.
pub trait StorageAdapter: Send + Sync {
    /// Short backend name used in logs and capability errors.
    fn name(&self) -> &'static str;

    fn file_exists(&self, path: &NormalizedPath) -> Result<bool>;

    fn directory_exists(&self, path: &NormalizedPath) -> Result<bool>;

    fn read(&self, path: &NormalizedPath) -> Result<Vec<u8>>;

    /// Opens the file for streaming reads.
    fn read_stream(&self, path: &NormalizedPath) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    /// Writes `contents`, creating parent directories and replacing any
    /// existing file.
    fn write(&self, path: &NormalizedPath, contents: &[u8], options: &WriteOptions) -> Result<()>;

    fn write_stream(
        &self,
        path: &NormalizedPath,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<()> {
        let mut buffer = Vec::new();
        contents
            .read_to_end(&mut buffer)
            .map_err(|e| StorageError::write(path, e))?;
        self.write(path, &buffer, options)
    }

    /// Deletes a file. Deleting a missing file is not an error.
    fn delete(&self, path: &NormalizedPath) -> Result<()>;

    /// Deletes a directory and everything below it.
    fn delete_directory(&self, path: &NormalizedPath) -> Result<()>;

    fn create_directory(&self, path: &NormalizedPath, options: &WriteOptions) -> Result<()>;

    /// Lists entries below `path`, sorted by key. With `deep`, the whole
    /// subtree is listed instead of direct children only.
    fn list_contents(&self, path: &NormalizedPath, deep: bool) -> Result<Vec<StorageAttributes>>;

    fn move_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()>;

    fn copy_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()>;

    /// Last modified time in Unix epoch seconds.
    fn last_modified(&self, path: &NormalizedPath) -> Result<u64>;

    fn file_size(&self, path: &NormalizedPath) -> Result<u64>;

    fn mime_type(&self, path: &NormalizedPath) -> Result<String>;

    fn visibility(&self, path: &NormalizedPath) -> Result<Visibility>;

    fn set_visibility(&self, path: &NormalizedPath, visibility: Visibility) -> Result<()>;

    /// Whether files in this backend can be served through signed delivery
    /// URLs.
    fn serves_signed_urls(&self) -> bool {
        true
    }

    fn as_checksum_provider(&self) -> Option<&dyn ChecksumProvider> {
        None
    }

    fn as_public_url_generator(&self) -> Option<&dyn PublicUrlGenerator> {
        None
    }

    fn as_temporary_url_generator(&self) -> Option<&dyn TemporaryUrlGenerator> {
        None
    }
}

/// Returns true if `candidate` belongs in a listing of `directory`: any
/// descendant when `deep`, direct children only otherwise.
pub(crate) fn is_listed(directory: &NormalizedPath, candidate: &NormalizedPath, deep: bool) -> bool {
    if candidate == directory {
        return false;
    }
    match candidate.strip_prefix(directory) {
        Some(rest) if !rest.is_root() => deep || rest.segments().count() == 1,
        _ => false,
    }
}
