//! Local disk storage with boundary checks and atomic writes.
//!
//! Keys map onto paths below a root directory. Every existing path is
//! canonicalized before use so that symlinks cannot lead outside the root,
//! and files are written to a temporary sibling first and renamed into place.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use protocol::NormalizedPath;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use super::{
    is_listed, mime, ChecksumAlgorithm, ChecksumProvider, PortableVisibility, PublicUrlGenerator,
    Result, StorageAdapter, StorageAttributes, StorageError, Visibility, WriteOptions,
};

/// Number of leading bytes inspected when the extension gives no MIME type.
const MIME_SNIFF_LENGTH: usize = 512;

/// Storage backed by a directory on local disk.
#[derive(Debug)]
pub struct LocalAdapter {
    /// Canonical root directory.
    root: PathBuf,
    /// Mode bits used for each visibility.
    visibility: PortableVisibility,
    /// Base for native public URLs, when files are also served directly.
    public_base_url: Option<Url>,
}

impl LocalAdapter {
    /// Create an adapter rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .map_err(|e| StorageError::create_directory(&NormalizedPath::root(), e))?;
        let root = fs::canonicalize(root)
            .map_err(|e| StorageError::create_directory(&NormalizedPath::root(), e))?;

        Ok(Self {
            root,
            visibility: PortableVisibility::default(),
            public_base_url: None,
        })
    }

    /// Set the visibility to mode-bit mapping.
    pub fn with_visibility(mut self, visibility: PortableVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Serve public URLs directly from `base` instead of through signed
    /// delivery URLs.
    pub fn with_public_base_url(mut self, base: Url) -> Self {
        self.public_base_url = Some(base);
        self
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `path` on disk, without touching the filesystem.
    fn full_path(&self, path: &NormalizedPath) -> PathBuf {
        let mut full = self.root.clone();
        for segment in path.segments() {
            full.push(segment);
        }
        full
    }

    /// Resolve an existing path and ensure it stays within the root.
    fn resolve(&self, path: &NormalizedPath) -> io::Result<PathBuf> {
        let canonical = fs::canonicalize(self.full_path(path))?;
        if !canonical.starts_with(&self.root) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} resolves outside the storage root", path),
            ));
        }
        Ok(canonical)
    }

    /// Resolve a path that may not exist yet. Its parent must exist and lie
    /// within the root.
    fn resolve_for_creation(&self, path: &NormalizedPath) -> io::Result<PathBuf> {
        let name = path.basename();
        if name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "the storage root is not a file",
            ));
        }
        let parent = path.parent().unwrap_or_default();
        Ok(self.resolve(&parent)?.join(name))
    }

    /// Location to remove for `path`: ancestors are canonicalized and
    /// checked against the root, the last component is left as is so that a
    /// symlink there is removed rather than followed. `None` when the parent
    /// is missing or lies outside the root.
    fn removal_target(&self, path: &NormalizedPath) -> io::Result<Option<PathBuf>> {
        match self.resolve_for_creation(path) {
            Ok(full) => Ok(Some(full)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                ) =>
            {
                debug!("Nothing to remove at {}: {}", path, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn existing_metadata(&self, path: &NormalizedPath, what: &'static str) -> Result<fs::Metadata> {
        let resolved = self
            .resolve(path)
            .map_err(|e| StorageError::metadata(path, what, e))?;
        fs::metadata(resolved).map_err(|e| StorageError::metadata(path, what, e))
    }

    fn existing_file(&self, path: &NormalizedPath) -> io::Result<PathBuf> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "location is a directory",
            ));
        }
        Ok(resolved)
    }

    /// Create `path` and any missing ancestors as directories.
    fn ensure_directory(&self, path: &NormalizedPath, visibility: Visibility) -> io::Result<()> {
        let mut current = NormalizedPath::root();
        for segment in path.segments() {
            current = current.join(segment);
            let full = self.full_path(&current);
            match fs::symlink_metadata(&full) {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {
                    // Existing file or symlink: only acceptable if it
                    // resolves to a directory inside the root.
                    let resolved = self.resolve(&current)?;
                    if !resolved.is_dir() {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("{} exists and is not a directory", current),
                        ));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir(&full)?;
                    self.apply_mode(&full, self.visibility.directory_mode(visibility))?;
                    debug!("Created directory {:?}", full);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn apply_mode(&self, full: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(full, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn apply_mode(&self, _full: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn mode_of(meta: &fs::Metadata) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    }

    #[cfg(not(unix))]
    fn mode_of(meta: &fs::Metadata) -> u32 {
        if meta.permissions().readonly() {
            0o444
        } else {
            0o644
        }
    }

    fn visibility_of(&self, meta: &fs::Metadata) -> Visibility {
        let mode = Self::mode_of(meta);
        if meta.is_dir() {
            self.visibility.directory_visibility(mode)
        } else {
            self.visibility.file_visibility(mode)
        }
    }

    fn directory_visibility(options: &WriteOptions, fallback: Visibility) -> Visibility {
        options.directory_visibility.unwrap_or(fallback)
    }

    /// Write `contents` to a temporary sibling of `path` and rename it into
    /// place.
    fn write_atomic(
        &self,
        path: &NormalizedPath,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> io::Result<()> {
        let parent = path.parent().unwrap_or_default();
        self.ensure_directory(
            &parent,
            Self::directory_visibility(options, self.visibility.default_for_directories),
        )?;

        let destination = self.resolve_for_creation(path)?;
        if destination.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory exists at this location",
            ));
        }

        let temp_path = destination.with_file_name(format!(
            ".{}.{}.tmp",
            path.basename(),
            uuid::Uuid::new_v4().simple()
        ));

        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            io::copy(contents, &mut file)?;
            file.flush()?;
            file.sync_all()?;
            drop(file);

            let visibility = options
                .visibility
                .unwrap_or(self.visibility.default_for_files);
            self.apply_mode(&temp_path, self.visibility.file_mode(visibility))?;
            fs::rename(&temp_path, &destination)
        })();

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to clean up temp file {:?}: {}", temp_path, e);
                }
            }
        }
        result
    }

    fn attributes(&self, key: NormalizedPath, meta: &fs::Metadata) -> StorageAttributes {
        let modified = meta.modified().ok().and_then(epoch_seconds);
        let visibility = Some(self.visibility_of(meta));
        if meta.is_dir() {
            StorageAttributes::directory(key, modified, visibility)
        } else {
            StorageAttributes::file(key, meta.len(), modified, visibility)
        }
    }

    fn walk(
        &self,
        directory: &NormalizedPath,
        deep: bool,
        entries: &mut Vec<StorageAttributes>,
    ) -> io::Result<()> {
        let full = self.resolve(directory)?;
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                debug!("Skipping symlink {:?}", entry.path());
                continue;
            }

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("Skipping entry with non UTF-8 name in {:?}", full);
                continue;
            };
            let key = directory.join(name);
            if key.basename() != name {
                warn!("Skipping entry with unrepresentable name {:?}", name);
                continue;
            }

            let meta = entry.metadata()?;
            entries.push(self.attributes(key.clone(), &meta));
            if deep && meta.is_dir() {
                self.walk(&key, deep, entries)?;
            }
        }
        Ok(())
    }
}

impl StorageAdapter for LocalAdapter {
    fn name(&self) -> &'static str {
        "local"
    }

    fn file_exists(&self, path: &NormalizedPath) -> Result<bool> {
        match self.resolve(path) {
            Ok(resolved) => Ok(resolved.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("Treating {} as missing: {}", path, e);
                Ok(false)
            }
            Err(e) => Err(StorageError::existence(path, e)),
        }
    }

    fn directory_exists(&self, path: &NormalizedPath) -> Result<bool> {
        match self.resolve(path) {
            Ok(resolved) => Ok(resolved.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("Treating {} as missing: {}", path, e);
                Ok(false)
            }
            Err(e) => Err(StorageError::existence(path, e)),
        }
    }

    fn read(&self, path: &NormalizedPath) -> Result<Vec<u8>> {
        let resolved = self
            .existing_file(path)
            .map_err(|e| StorageError::read(path, e))?;
        fs::read(resolved).map_err(|e| StorageError::read(path, e))
    }

    fn read_stream(&self, path: &NormalizedPath) -> Result<Box<dyn Read + Send>> {
        let resolved = self
            .existing_file(path)
            .map_err(|e| StorageError::read(path, e))?;
        let file = File::open(resolved).map_err(|e| StorageError::read(path, e))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &NormalizedPath, contents: &[u8], options: &WriteOptions) -> Result<()> {
        let mut reader = contents;
        self.write_atomic(path, &mut reader, options)
            .map_err(|e| StorageError::write(path, e))
    }

    fn write_stream(
        &self,
        path: &NormalizedPath,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<()> {
        self.write_atomic(path, contents, options)
            .map_err(|e| StorageError::write(path, e))
    }

    fn delete(&self, path: &NormalizedPath) -> Result<()> {
        if path.is_root() {
            return Err(StorageError::delete(path, "location is a directory"));
        }
        let full = match self.removal_target(path) {
            Ok(Some(full)) => full,
            Ok(None) => return Ok(()),
            Err(e) => return Err(StorageError::delete(path, e)),
        };
        match fs::symlink_metadata(&full) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete(path, e)),
            Ok(meta) if meta.is_dir() => {
                Err(StorageError::delete(path, "location is a directory"))
            }
            // Removing a symlink never touches its target.
            Ok(_) => fs::remove_file(&full).map_err(|e| StorageError::delete(path, e)),
        }
    }

    fn delete_directory(&self, path: &NormalizedPath) -> Result<()> {
        if path.is_root() {
            return Err(StorageError::delete_directory(
                path,
                "refusing to delete the storage root",
            ));
        }
        let full = match self.removal_target(path) {
            Ok(Some(full)) => full,
            Ok(None) => return Ok(()),
            Err(e) => return Err(StorageError::delete_directory(path, e)),
        };
        match fs::symlink_metadata(&full) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_directory(path, e)),
            Ok(meta) if meta.file_type().is_symlink() => {
                fs::remove_file(&full).map_err(|e| StorageError::delete_directory(path, e))
            }
            Ok(meta) if !meta.is_dir() => Err(StorageError::delete_directory(
                path,
                "location is not a directory",
            )),
            Ok(_) => {
                fs::remove_dir_all(&full).map_err(|e| StorageError::delete_directory(path, e))
            }
        }
    }

    fn create_directory(&self, path: &NormalizedPath, options: &WriteOptions) -> Result<()> {
        let visibility = options
            .directory_visibility
            .or(options.visibility)
            .unwrap_or(self.visibility.default_for_directories);
        self.ensure_directory(path, visibility)
            .map_err(|e| StorageError::create_directory(path, e))
    }

    fn list_contents(&self, path: &NormalizedPath, deep: bool) -> Result<Vec<StorageAttributes>> {
        match self.resolve(path) {
            Ok(resolved) if resolved.is_dir() => {}
            Ok(_) => return Err(StorageError::list(path, "location is not a directory")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::list(path, e)),
        }

        let mut entries = Vec::new();
        self.walk(path, deep, &mut entries)
            .map_err(|e| StorageError::list(path, e))?;
        entries.retain(|entry| is_listed(path, &entry.path, deep));
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn move_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()> {
        let from = self
            .existing_file(source)
            .map_err(|e| StorageError::move_file(source, destination, e))?;

        let parent = destination.parent().unwrap_or_default();
        self.ensure_directory(
            &parent,
            Self::directory_visibility(options, self.visibility.default_for_directories),
        )
        .map_err(|e| StorageError::move_file(source, destination, e))?;

        let to = self
            .resolve_for_creation(destination)
            .map_err(|e| StorageError::move_file(source, destination, e))?;
        fs::rename(&from, &to).map_err(|e| StorageError::move_file(source, destination, e))?;

        if let Some(visibility) = options.visibility {
            self.apply_mode(&to, self.visibility.file_mode(visibility))
                .map_err(|e| StorageError::move_file(source, destination, e))?;
        }
        Ok(())
    }

    fn copy_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()> {
        let from = self
            .existing_file(source)
            .map_err(|e| StorageError::copy_file(source, destination, e))?;
        let source_visibility = fs::metadata(&from)
            .map(|meta| self.visibility_of(&meta))
            .map_err(|e| StorageError::copy_file(source, destination, e))?;

        let mut reader = File::open(&from).map_err(|e| StorageError::copy_file(source, destination, e))?;
        let options = WriteOptions {
            visibility: Some(options.visibility.unwrap_or(source_visibility)),
            directory_visibility: options.directory_visibility,
        };
        self.write_atomic(destination, &mut reader, &options)
            .map_err(|e| StorageError::copy_file(source, destination, e))
    }

    fn last_modified(&self, path: &NormalizedPath) -> Result<u64> {
        let meta = self.existing_metadata(path, "last_modified")?;
        meta.modified()
            .ok()
            .and_then(epoch_seconds)
            .ok_or_else(|| StorageError::metadata(path, "last_modified", "timestamp unavailable"))
    }

    fn file_size(&self, path: &NormalizedPath) -> Result<u64> {
        let meta = self.existing_metadata(path, "file_size")?;
        if meta.is_dir() {
            return Err(StorageError::metadata(path, "file_size", "location is a directory"));
        }
        Ok(meta.len())
    }

    fn mime_type(&self, path: &NormalizedPath) -> Result<String> {
        let resolved = self
            .existing_file(path)
            .map_err(|e| StorageError::metadata(path, "mime_type", e))?;
        if let Some(mime) = mime::from_path(path.as_str()) {
            return Ok(mime.to_string());
        }

        let mut head = Vec::with_capacity(MIME_SNIFF_LENGTH);
        File::open(resolved)
            .and_then(|file| file.take(MIME_SNIFF_LENGTH as u64).read_to_end(&mut head))
            .map_err(|e| StorageError::metadata(path, "mime_type", e))?;
        Ok(mime::detect(path.as_str(), &head).to_string())
    }

    fn visibility(&self, path: &NormalizedPath) -> Result<Visibility> {
        let meta = self.existing_metadata(path, "visibility")?;
        Ok(self.visibility_of(&meta))
    }

    fn set_visibility(&self, path: &NormalizedPath, visibility: Visibility) -> Result<()> {
        let resolved = self
            .resolve(path)
            .map_err(|e| StorageError::set_visibility(path, e))?;
        let mode = if resolved.is_dir() {
            self.visibility.directory_mode(visibility)
        } else {
            self.visibility.file_mode(visibility)
        };
        self.apply_mode(&resolved, mode)
            .map_err(|e| StorageError::set_visibility(path, e))
    }

    fn as_checksum_provider(&self) -> Option<&dyn ChecksumProvider> {
        Some(self)
    }

    fn as_public_url_generator(&self) -> Option<&dyn PublicUrlGenerator> {
        if self.public_base_url.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl ChecksumProvider for LocalAdapter {
    fn checksum(&self, path: &NormalizedPath, algorithm: ChecksumAlgorithm) -> Result<String> {
        let resolved = self
            .existing_file(path)
            .map_err(|e| StorageError::read(path, e))?;
        let mut file = File::open(resolved).map_err(|e| StorageError::read(path, e))?;
        algorithm
            .digest_reader(&mut file)
            .map_err(|e| StorageError::read(path, e))
    }
}

impl PublicUrlGenerator for LocalAdapter {
    fn public_url(&self, path: &NormalizedPath, _config: &Map<String, Value>) -> Result<String> {
        let base = self
            .public_base_url
            .as_ref()
            .ok_or_else(|| StorageError::url(path, "public", "no public base URL configured"))?;

        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::url(path, "public", "base URL cannot have a path"))?
            .pop_if_empty()
            .extend(path.segments());
        Ok(url.into())
    }
}

fn epoch_seconds(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalAdapter) {
        let temp = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(temp.path().join("storage")).unwrap();
        (temp, adapter)
    }

    fn key(raw: &str) -> NormalizedPath {
        NormalizedPath::new(raw)
    }

    #[test]
    fn test_new_creates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("a").join("b");
        let adapter = LocalAdapter::new(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(adapter.root(), fs::canonicalize(&root).unwrap());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_temp, adapter) = setup();
        adapter
            .write(&key("docs/report.txt"), b"hello", &WriteOptions::default())
            .unwrap();

        assert!(adapter.file_exists(&key("docs/report.txt")).unwrap());
        assert!(adapter.directory_exists(&key("docs")).unwrap());
        assert!(!adapter.file_exists(&key("docs")).unwrap());
        assert_eq!(adapter.read(&key("docs/report.txt")).unwrap(), b"hello");
        assert_eq!(adapter.file_size(&key("docs/report.txt")).unwrap(), 5);
    }

    #[test]
    fn test_write_replaces_and_leaves_no_temp_files() {
        let (_temp, adapter) = setup();
        let path = key("a.txt");
        adapter.write(&path, b"first", &WriteOptions::default()).unwrap();
        adapter.write(&path, b"second", &WriteOptions::default()).unwrap();
        assert_eq!(adapter.read(&path).unwrap(), b"second");

        let names: Vec<_> = fs::read_dir(adapter.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_write_stream() {
        let (_temp, adapter) = setup();
        let data = vec![42u8; 200_000];
        let mut reader = io::Cursor::new(data.clone());
        adapter
            .write_stream(&key("big.bin"), &mut reader, &WriteOptions::default())
            .unwrap();

        let mut stream = adapter.read_stream(&key("big.bin")).unwrap();
        let mut back = Vec::new();
        stream.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_write_over_directory_fails() {
        let (_temp, adapter) = setup();
        adapter
            .create_directory(&key("dir"), &WriteOptions::default())
            .unwrap();
        let err = adapter
            .write(&key("dir"), b"x", &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::UnableToWriteFile { .. }));
    }

    #[test]
    fn test_read_missing_file() {
        let (_temp, adapter) = setup();
        assert!(matches!(
            adapter.read(&key("nope.txt")),
            Err(StorageError::UnableToReadFile { .. })
        ));
        assert!(!adapter.file_exists(&key("nope.txt")).unwrap());
    }

    #[test]
    fn test_read_directory_fails() {
        let (_temp, adapter) = setup();
        adapter
            .create_directory(&key("d"), &WriteOptions::default())
            .unwrap();
        assert!(adapter.read(&key("d")).is_err());
    }

    #[test]
    fn test_delete() {
        let (_temp, adapter) = setup();
        let path = key("x/y.txt");
        adapter.write(&path, b"1", &WriteOptions::default()).unwrap();
        adapter.delete(&path).unwrap();
        assert!(!adapter.file_exists(&path).unwrap());
        // Deleting again is fine.
        adapter.delete(&path).unwrap();
        // Deleting a directory through delete() is not.
        assert!(adapter.delete(&key("x")).is_err());
    }

    #[test]
    fn test_delete_directory() {
        let (_temp, adapter) = setup();
        adapter
            .write(&key("d/e/f.txt"), b"1", &WriteOptions::default())
            .unwrap();
        adapter.delete_directory(&key("d")).unwrap();
        assert!(!adapter.directory_exists(&key("d")).unwrap());
        adapter.delete_directory(&key("d")).unwrap();
        assert!(adapter.delete_directory(&NormalizedPath::root()).is_err());
    }

    #[test]
    fn test_list_contents_shallow_and_deep() {
        let (_temp, adapter) = setup();
        let options = WriteOptions::default();
        adapter.write(&key("a.txt"), b"1", &options).unwrap();
        adapter.write(&key("d/b.txt"), b"22", &options).unwrap();
        adapter.write(&key("d/e/c.txt"), b"333", &options).unwrap();

        let shallow: Vec<_> = adapter
            .list_contents(&NormalizedPath::root(), false)
            .unwrap()
            .into_iter()
            .map(|e| e.path.into_string())
            .collect();
        assert_eq!(shallow, vec!["a.txt", "d"]);

        let deep = adapter.list_contents(&NormalizedPath::root(), true).unwrap();
        let paths: Vec<_> = deep.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "d", "d/b.txt", "d/e", "d/e/c.txt"]);

        let c = deep.iter().find(|e| e.path.as_str() == "d/e/c.txt").unwrap();
        assert!(c.is_file());
        assert_eq!(c.file_size, Some(3));
        assert!(deep.iter().find(|e| e.path.as_str() == "d/e").unwrap().is_dir());

        let sub: Vec<_> = adapter
            .list_contents(&key("d"), false)
            .unwrap()
            .into_iter()
            .map(|e| e.path.into_string())
            .collect();
        assert_eq!(sub, vec!["d/b.txt", "d/e"]);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let (_temp, adapter) = setup();
        assert!(adapter.list_contents(&key("ghost"), true).unwrap().is_empty());
    }

    #[test]
    fn test_move_and_copy() {
        let (_temp, adapter) = setup();
        let options = WriteOptions::default();
        adapter.write(&key("src.txt"), b"data", &options).unwrap();

        adapter
            .copy_file(&key("src.txt"), &key("copies/dst.txt"), &options)
            .unwrap();
        assert_eq!(adapter.read(&key("copies/dst.txt")).unwrap(), b"data");
        assert!(adapter.file_exists(&key("src.txt")).unwrap());

        adapter
            .move_file(&key("src.txt"), &key("moved/final.txt"), &options)
            .unwrap();
        assert!(!adapter.file_exists(&key("src.txt")).unwrap());
        assert_eq!(adapter.read(&key("moved/final.txt")).unwrap(), b"data");

        assert!(matches!(
            adapter.move_file(&key("missing"), &key("x"), &options),
            Err(StorageError::UnableToMoveFile { .. })
        ));
        assert!(matches!(
            adapter.copy_file(&key("missing"), &key("x"), &options),
            Err(StorageError::UnableToCopyFile { .. })
        ));
    }

    #[test]
    fn test_metadata() {
        let (_temp, adapter) = setup();
        adapter
            .write(&key("doc.pdf"), b"%PDF-1.4", &WriteOptions::default())
            .unwrap();
        adapter
            .write(&key("blob"), b"plain words", &WriteOptions::default())
            .unwrap();

        assert_eq!(adapter.mime_type(&key("doc.pdf")).unwrap(), "application/pdf");
        assert_eq!(adapter.mime_type(&key("blob")).unwrap(), "text/plain");
        assert!(adapter.last_modified(&key("doc.pdf")).unwrap() > 1_600_000_000);
        assert!(matches!(
            adapter.file_size(&key("missing")),
            Err(StorageError::UnableToRetrieveMetadata { metadata: "file_size", .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_visibility_modes() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, adapter) = setup();
        let path = key("secret.txt");
        adapter
            .write(&path, b"s", &WriteOptions::with_visibility(Visibility::Private))
            .unwrap();
        assert_eq!(adapter.visibility(&path).unwrap(), Visibility::Private);
        let mode = fs::metadata(adapter.root().join("secret.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        adapter.set_visibility(&path, Visibility::Public).unwrap();
        assert_eq!(adapter.visibility(&path).unwrap(), Visibility::Public);

        adapter
            .create_directory(
                &key("private-dir"),
                &WriteOptions {
                    visibility: None,
                    directory_visibility: Some(Visibility::Private),
                },
            )
            .unwrap();
        assert_eq!(adapter.visibility(&key("private-dir")).unwrap(), Visibility::Private);
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_outside_root_is_rejected() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside.txt");
        fs::write(&outside, b"top secret").unwrap();

        let adapter = LocalAdapter::new(temp.path().join("storage")).unwrap();
        std::os::unix::fs::symlink(&outside, adapter.root().join("link.txt")).unwrap();

        assert!(!adapter.file_exists(&key("link.txt")).unwrap());
        assert!(adapter.read(&key("link.txt")).is_err());
        assert!(adapter
            .list_contents(&NormalizedPath::root(), true)
            .unwrap()
            .is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_delete_through_symlinked_directory_stays_inside_root() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside");
        fs::create_dir_all(outside.join("victim_dir/nested")).unwrap();
        fs::write(outside.join("victim.txt"), b"keep me").unwrap();
        fs::write(outside.join("victim_dir/nested/f.txt"), b"keep me too").unwrap();

        let adapter = LocalAdapter::new(temp.path().join("storage")).unwrap();
        std::os::unix::fs::symlink(&outside, adapter.root().join("link")).unwrap();

        assert!(!adapter.file_exists(&key("link/victim.txt")).unwrap());
        adapter.delete(&key("link/victim.txt")).unwrap();
        adapter.delete_directory(&key("link/victim_dir")).unwrap();

        assert!(outside.join("victim.txt").exists());
        assert!(outside.join("victim_dir/nested/f.txt").exists());

        // The link itself can still be removed without touching its target.
        adapter.delete_directory(&key("link")).unwrap();
        assert!(!adapter.root().join("link").exists());
        assert!(outside.join("victim.txt").exists());
    }

    #[test]
    fn test_checksum() {
        let (_temp, adapter) = setup();
        adapter
            .write(&key("h.txt"), b"hello", &WriteOptions::default())
            .unwrap();
        let provider = adapter.as_checksum_provider().unwrap();
        assert_eq!(
            provider.checksum(&key("h.txt"), ChecksumAlgorithm::Md5).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_public_url_generator_only_when_configured() {
        let (_temp, adapter) = setup();
        assert!(adapter.as_public_url_generator().is_none());

        let adapter = adapter
            .with_public_base_url(Url::parse("https://cdn.example.com/files/").unwrap());
        let url = adapter
            .as_public_url_generator()
            .unwrap()
            .public_url(&key("docs/a b.pdf"), &Map::new())
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/files/docs/a%20b.pdf");
    }
}
