//! File and directory visibility.
//!
//! Visibility is a portable two-level setting that backends with Unix-style
//! permissions map onto mode bits through [`PortableVisibility`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::StorageError;

/// Visibility of a stored file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Readable by everyone.
    #[default]
    Public,
    /// Readable by the owner only.
    Private,
}

impl Visibility {
    /// Check if this level grants access beyond the owner.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(StorageError::UnableToSetVisibility {
                location: String::new(),
                reason: format!("unknown visibility: {}", other),
            }),
        }
    }
}

/// Mapping between [`Visibility`] and Unix permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortableVisibility {
    pub file_public: u32,
    pub file_private: u32,
    pub directory_public: u32,
    pub directory_private: u32,
    /// Applied to new files when the caller does not choose.
    pub default_for_files: Visibility,
    /// Applied to new directories when the caller does not choose.
    pub default_for_directories: Visibility,
}

impl Default for PortableVisibility {
    fn default() -> Self {
        Self {
            file_public: 0o644,
            file_private: 0o600,
            directory_public: 0o755,
            directory_private: 0o700,
            default_for_files: Visibility::Public,
            default_for_directories: Visibility::Public,
        }
    }
}

impl PortableVisibility {
    /// Mode bits for a file.
    pub fn file_mode(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.file_public,
            Visibility::Private => self.file_private,
        }
    }

    /// Mode bits for a directory.
    pub fn directory_mode(&self, visibility: Visibility) -> u32 {
        match visibility {
            Visibility::Public => self.directory_public,
            Visibility::Private => self.directory_private,
        }
    }

    /// Visibility of a file with the given mode. Only the configured private
    /// mode reads as private.
    pub fn file_visibility(&self, mode: u32) -> Visibility {
        if mode & 0o777 == self.file_private {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }

    /// Visibility of a directory with the given mode.
    pub fn directory_visibility(&self, mode: u32) -> Visibility {
        if mode & 0o777 == self.directory_private {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}
