//! Storage inside a single ZIP archive.
//!
//! Reads open the archive on demand. Every mutation rewrites the whole
//! archive to a temporary sibling and renames it over the original, under a
//! lock so concurrent writers cannot lose each other's changes.
//!
//! The archive cannot compute checksums or serve signed URLs; callers see
//! the capability gaps through [`StorageAdapter::as_checksum_provider`]
//! returning `None` and [`StorageAdapter::serves_signed_urls`] returning
//! `false`.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use protocol::NormalizedPath;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{
    is_listed, mime, PortableVisibility, Result, StorageAdapter, StorageAttributes, StorageError,
    Visibility, WriteOptions,
};

/// Header information for one archive member.
#[derive(Debug, Clone)]
struct IndexEntry {
    path: NormalizedPath,
    is_dir: bool,
    size: u64,
    mode: Option<u32>,
    index: usize,
}

/// A fully loaded archive member, used while rewriting.
#[derive(Debug, Clone)]
struct ArchiveEntry {
    path: NormalizedPath,
    is_dir: bool,
    contents: Vec<u8>,
    mode: Option<u32>,
}

/// Storage backed by a ZIP file on local disk.
#[derive(Debug)]
pub struct ZipArchiveAdapter {
    archive: PathBuf,
    visibility: PortableVisibility,
    write_lock: Mutex<()>,
}

impl ZipArchiveAdapter {
    /// Create an adapter for the archive at `archive`. The file is created on
    /// first write.
    pub fn new<P: Into<PathBuf>>(archive: P) -> Self {
        Self {
            archive: archive.into(),
            visibility: PortableVisibility::default(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the archive file.
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    fn open(&self) -> io::Result<Option<ZipArchive<File>>> {
        let file = match File::open(&self.archive) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        ZipArchive::new(file)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn index(&self) -> io::Result<Vec<IndexEntry>> {
        let Some(mut archive) = self.open()? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive
                .by_index(index)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let path = NormalizedPath::new(file.name());
            if path.is_root() {
                continue;
            }
            entries.push(IndexEntry {
                path,
                is_dir: file.is_dir(),
                size: file.size(),
                mode: file.unix_mode(),
                index,
            });
        }
        Ok(entries)
    }

    fn find_file(&self, path: &NormalizedPath) -> io::Result<IndexEntry> {
        self.index()?
            .into_iter()
            .find(|entry| !entry.is_dir && entry.path == *path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found in archive"))
    }

    fn read_entry(&self, path: &NormalizedPath, limit: Option<u64>) -> io::Result<Vec<u8>> {
        let entry = self.find_file(path)?;
        let Some(mut archive) = self.open()? else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "archive does not exist"));
        };
        let file = archive
            .by_index(entry.index)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut contents = Vec::new();
        match limit {
            Some(limit) => file.take(limit).read_to_end(&mut contents)?,
            None => {
                let mut file = file;
                file.read_to_end(&mut contents)?
            }
        };
        Ok(contents)
    }

    fn archive_modified(&self) -> Option<u64> {
        fs::metadata(&self.archive)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }

    fn entry_visibility(&self, is_dir: bool, mode: Option<u32>) -> Visibility {
        match (is_dir, mode) {
            (_, None) => Visibility::Public,
            (true, Some(mode)) => self.visibility.directory_visibility(mode),
            (false, Some(mode)) => self.visibility.file_visibility(mode),
        }
    }

    fn load_all(&self) -> io::Result<Vec<ArchiveEntry>> {
        let Some(mut archive) = self.open()? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let path = NormalizedPath::new(file.name());
            if path.is_root() {
                continue;
            }
            let mut contents = Vec::new();
            if !file.is_dir() {
                file.read_to_end(&mut contents)?;
            }
            entries.push(ArchiveEntry {
                path,
                is_dir: file.is_dir(),
                contents,
                mode: file.unix_mode(),
            });
        }
        Ok(entries)
    }

    fn store_all(&self, entries: &[ArchiveEntry]) -> io::Result<()> {
        if let Some(parent) = self.archive.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file_name = self
            .archive
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive.zip".to_string());
        let temp_path = self.archive.with_file_name(format!(
            ".{}.{}.tmp",
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        let result = (|| {
            let file = File::create(&temp_path)?;
            let mut writer = ZipWriter::new(file);

            for entry in entries {
                let options =
                    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
                let options = match entry.mode {
                    Some(mode) => options.unix_permissions(mode & 0o777),
                    None => options,
                };
                if entry.is_dir {
                    writer
                        .add_directory(format!("{}/", entry.path), options)
                        .map_err(to_io)?;
                } else {
                    writer
                        .start_file(entry.path.to_string(), options)
                        .map_err(to_io)?;
                    writer.write_all(&entry.contents)?;
                }
            }

            let file = writer.finish().map_err(to_io)?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.archive)
        })();

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to clean up temp archive {:?}: {}", temp_path, e);
                }
            }
        }
        result
    }

    /// Load, mutate and store the archive while holding the write lock.
    fn rewrite<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<ArchiveEntry>) -> io::Result<T>,
    ) -> io::Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "archive lock poisoned"))?;
        let mut entries = self.load_all()?;
        let value = mutate(&mut entries)?;
        self.store_all(&entries)?;
        debug!("Rewrote archive {:?} with {} entries", self.archive, entries.len());
        Ok(value)
    }

    fn upsert_file(
        &self,
        entries: &mut Vec<ArchiveEntry>,
        path: &NormalizedPath,
        contents: Vec<u8>,
        mode: Option<u32>,
    ) -> io::Result<()> {
        if path.is_root() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "the storage root is not a file",
            ));
        }
        if entries
            .iter()
            .any(|e| e.path != *path && e.path.starts_with(path) || (e.is_dir && e.path == *path))
        {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory exists at this location",
            ));
        }
        entries.retain(|e| e.path != *path);
        entries.push(ArchiveEntry {
            path: path.clone(),
            is_dir: false,
            contents,
            mode,
        });
        Ok(())
    }
}

fn to_io(err: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

impl StorageAdapter for ZipArchiveAdapter {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn file_exists(&self, path: &NormalizedPath) -> Result<bool> {
        let index = self.index().map_err(|e| StorageError::existence(path, e))?;
        Ok(index.iter().any(|e| !e.is_dir && e.path == *path))
    }

    fn directory_exists(&self, path: &NormalizedPath) -> Result<bool> {
        if path.is_root() {
            return Ok(true);
        }
        let index = self.index().map_err(|e| StorageError::existence(path, e))?;
        Ok(index
            .iter()
            .any(|e| (e.is_dir && e.path == *path) || (e.path != *path && e.path.starts_with(path))))
    }

    fn read(&self, path: &NormalizedPath) -> Result<Vec<u8>> {
        self.read_entry(path, None)
            .map_err(|e| StorageError::read(path, e))
    }

    fn write(&self, path: &NormalizedPath, contents: &[u8], options: &WriteOptions) -> Result<()> {
        let visibility = options
            .visibility
            .unwrap_or(self.visibility.default_for_files);
        let mode = self.visibility.file_mode(visibility);
        self.rewrite(|entries| self.upsert_file(entries, path, contents.to_vec(), Some(mode)))
            .map_err(|e| StorageError::write(path, e))
    }

    fn delete(&self, path: &NormalizedPath) -> Result<()> {
        if !self.file_exists(path)? {
            return Ok(());
        }
        self.rewrite(|entries| {
            entries.retain(|e| e.is_dir || e.path != *path);
            Ok(())
        })
        .map_err(|e| StorageError::delete(path, e))
    }

    fn delete_directory(&self, path: &NormalizedPath) -> Result<()> {
        if path.is_root() {
            return Err(StorageError::delete_directory(
                path,
                "refusing to delete the storage root",
            ));
        }
        self.rewrite(|entries| {
            entries.retain(|e| !e.path.starts_with(path));
            Ok(())
        })
        .map_err(|e| StorageError::delete_directory(path, e))
    }

    fn create_directory(&self, path: &NormalizedPath, options: &WriteOptions) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        let visibility = options
            .directory_visibility
            .or(options.visibility)
            .unwrap_or(self.visibility.default_for_directories);
        let mode = self.visibility.directory_mode(visibility);
        self.rewrite(|entries| {
            if entries.iter().any(|e| !e.is_dir && e.path == *path) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "a file exists at this location",
                ));
            }
            if !entries.iter().any(|e| e.is_dir && e.path == *path) {
                entries.push(ArchiveEntry {
                    path: path.clone(),
                    is_dir: true,
                    contents: Vec::new(),
                    mode: Some(mode),
                });
            }
            Ok(())
        })
        .map_err(|e| StorageError::create_directory(path, e))
    }

    fn list_contents(&self, path: &NormalizedPath, deep: bool) -> Result<Vec<StorageAttributes>> {
        let index = self.index().map_err(|e| StorageError::list(path, e))?;
        let modified = self.archive_modified();

        let mut entries: Vec<StorageAttributes> = Vec::new();
        let mut seen_dirs: Vec<NormalizedPath> = Vec::new();

        for entry in &index {
            // Parents of every member are directories, listed or not.
            let mut parent = entry.path.parent();
            while let Some(dir) = parent {
                if dir.is_root() {
                    break;
                }
                parent = dir.parent();
                if !seen_dirs.contains(&dir) && !index.iter().any(|e| e.is_dir && e.path == dir) {
                    seen_dirs.push(dir);
                }
            }
        }

        for dir in seen_dirs.into_iter().filter(|d| is_listed(path, d, deep)) {
            entries.push(StorageAttributes::directory(dir, modified, None));
        }

        for entry in index.iter().filter(|e| is_listed(path, &e.path, deep)) {
            let visibility = Some(self.entry_visibility(entry.is_dir, entry.mode));
            if entry.is_dir {
                entries.push(StorageAttributes::directory(
                    entry.path.clone(),
                    modified,
                    visibility,
                ));
            } else {
                entries.push(StorageAttributes::file(
                    entry.path.clone(),
                    entry.size,
                    modified,
                    visibility,
                ));
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);
        Ok(entries)
    }

    fn move_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()> {
        self.rewrite(|entries| {
            let position = entries
                .iter()
                .position(|e| !e.is_dir && e.path == *source)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "source not found"))?;
            if source == destination {
                return Ok(());
            }
            let entry = entries.remove(position);
            let mode = options
                .visibility
                .map(|v| self.visibility.file_mode(v))
                .or(entry.mode);
            self.upsert_file(entries, destination, entry.contents, mode)
        })
        .map_err(|e| StorageError::move_file(source, destination, e))
    }

    fn copy_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()> {
        self.rewrite(|entries| {
            let entry = entries
                .iter()
                .find(|e| !e.is_dir && e.path == *source)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "source not found"))?;
            let mode = options
                .visibility
                .map(|v| self.visibility.file_mode(v))
                .or(entry.mode);
            self.upsert_file(entries, destination, entry.contents, mode)
        })
        .map_err(|e| StorageError::copy_file(source, destination, e))
    }

    fn last_modified(&self, path: &NormalizedPath) -> Result<u64> {
        self.find_file(path)
            .map_err(|e| StorageError::metadata(path, "last_modified", e))?;
        self.archive_modified()
            .ok_or_else(|| StorageError::metadata(path, "last_modified", "timestamp unavailable"))
    }

    fn file_size(&self, path: &NormalizedPath) -> Result<u64> {
        self.find_file(path)
            .map(|entry| entry.size)
            .map_err(|e| StorageError::metadata(path, "file_size", e))
    }

    fn mime_type(&self, path: &NormalizedPath) -> Result<String> {
        let head = self
            .read_entry(path, Some(512))
            .map_err(|e| StorageError::metadata(path, "mime_type", e))?;
        Ok(mime::detect(path.as_str(), &head).to_string())
    }

    fn visibility(&self, path: &NormalizedPath) -> Result<Visibility> {
        let index = self
            .index()
            .map_err(|e| StorageError::metadata(path, "visibility", e))?;
        index
            .iter()
            .find(|e| e.path == *path)
            .map(|e| self.entry_visibility(e.is_dir, e.mode))
            .ok_or_else(|| StorageError::metadata(path, "visibility", "file not found"))
    }

    fn set_visibility(&self, path: &NormalizedPath, visibility: Visibility) -> Result<()> {
        self.rewrite(|entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.path == *path)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))?;
            entry.mode = Some(if entry.is_dir {
                self.visibility.directory_mode(visibility)
            } else {
                self.visibility.file_mode(visibility)
            });
            Ok(())
        })
        .map_err(|e| StorageError::set_visibility(path, e))
    }

    fn serves_signed_urls(&self) -> bool {
        false
    }
}
