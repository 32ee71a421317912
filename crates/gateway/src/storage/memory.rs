//! In-process storage for tests and ephemeral serving.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use bytes::Bytes;
use protocol::{unix_now, NormalizedPath};

use super::{
    is_listed, mime, ChecksumAlgorithm, ChecksumProvider, Result, StorageAdapter,
    StorageAttributes, StorageError, Visibility, WriteOptions,
};

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Bytes,
    visibility: Visibility,
    last_modified: u64,
}

#[derive(Debug, Clone)]
struct MemoryDirectory {
    visibility: Visibility,
    last_modified: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<NormalizedPath, MemoryFile>,
    /// Explicitly created directories. Parents of files exist implicitly.
    directories: BTreeMap<NormalizedPath, MemoryDirectory>,
}

impl MemoryState {
    fn directory_exists(&self, path: &NormalizedPath) -> bool {
        if path.is_root() || self.directories.contains_key(path) {
            return true;
        }
        self.files.keys().any(|key| key != path && key.starts_with(path))
            || self.directories.keys().any(|key| key.starts_with(path))
    }

    fn create_parents(&mut self, path: &NormalizedPath, visibility: Visibility, now: u64) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.is_root() {
                break;
            }
            self.directories
                .entry(dir.clone())
                .or_insert(MemoryDirectory {
                    visibility,
                    last_modified: now,
                });
            current = dir.parent();
        }
    }
}

/// Storage held entirely in memory.
#[derive(Debug)]
pub struct MemoryAdapter {
    state: RwLock<MemoryState>,
    default_visibility: Visibility,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            default_visibility: Visibility::Public,
        }
    }

    /// Visibility applied when a write does not choose one.
    pub fn with_default_visibility(mut self, visibility: Visibility) -> Self {
        self.default_visibility = visibility;
        self
    }

    fn read_state(&self, path: &NormalizedPath) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| StorageError::read(path, "lock poisoned"))
    }

    fn write_state(&self, path: &NormalizedPath) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| StorageError::write(path, "lock poisoned"))
    }

    fn file(&self, path: &NormalizedPath) -> Result<MemoryFile> {
        let state = self.read_state(path)?;
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::read(path, "file not found"))
    }

    fn metadata_file(&self, path: &NormalizedPath, what: &'static str) -> Result<MemoryFile> {
        self.file(path)
            .map_err(|_| StorageError::metadata(path, what, "file not found"))
    }

    fn store(&self, path: &NormalizedPath, contents: Bytes, options: &WriteOptions) -> Result<()> {
        if path.is_root() {
            return Err(StorageError::write(path, "the storage root is not a file"));
        }
        let mut state = self.write_state(path)?;
        if state.directory_exists(path) {
            return Err(StorageError::write(path, "a directory exists at this location"));
        }
        let now = unix_now();
        let directory_visibility = options.directory_visibility.unwrap_or(self.default_visibility);
        state.create_parents(path, directory_visibility, now);
        state.files.insert(
            path.clone(),
            MemoryFile {
                contents,
                visibility: options.visibility.unwrap_or(self.default_visibility),
                last_modified: now,
            },
        );
        Ok(())
    }
}

impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn file_exists(&self, path: &NormalizedPath) -> Result<bool> {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::existence(path, "lock poisoned"))?;
        Ok(state.files.contains_key(path))
    }

    fn directory_exists(&self, path: &NormalizedPath) -> Result<bool> {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::existence(path, "lock poisoned"))?;
        Ok(state.directory_exists(path))
    }

    fn read(&self, path: &NormalizedPath) -> Result<Vec<u8>> {
        Ok(self.file(path)?.contents.to_vec())
    }

    fn write(&self, path: &NormalizedPath, contents: &[u8], options: &WriteOptions) -> Result<()> {
        self.store(path, Bytes::copy_from_slice(contents), options)
    }

    fn delete(&self, path: &NormalizedPath) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::delete(path, "lock poisoned"))?;
        state.files.remove(path);
        Ok(())
    }

    fn delete_directory(&self, path: &NormalizedPath) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::delete_directory(path, "lock poisoned"))?;
        if path.is_root() {
            return Err(StorageError::delete_directory(
                path,
                "refusing to delete the storage root",
            ));
        }
        state.files.retain(|key, _| !key.starts_with(path));
        state.directories.retain(|key, _| !key.starts_with(path));
        Ok(())
    }

    fn create_directory(&self, path: &NormalizedPath, options: &WriteOptions) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::create_directory(path, "lock poisoned"))?;
        if state.files.contains_key(path) {
            return Err(StorageError::create_directory(
                path,
                "a file exists at this location",
            ));
        }
        let visibility = options
            .directory_visibility
            .or(options.visibility)
            .unwrap_or(self.default_visibility);
        let now = unix_now();
        state.create_parents(path, visibility, now);
        state
            .directories
            .entry(path.clone())
            .or_insert(MemoryDirectory {
                visibility,
                last_modified: now,
            });
        Ok(())
    }

    fn list_contents(&self, path: &NormalizedPath, deep: bool) -> Result<Vec<StorageAttributes>> {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::list(path, "lock poisoned"))?;

        let mut directories: BTreeSet<NormalizedPath> = state.directories.keys().cloned().collect();
        for key in state.files.keys() {
            let mut parent = key.parent();
            while let Some(dir) = parent {
                if dir.is_root() {
                    break;
                }
                parent = dir.parent();
                directories.insert(dir);
            }
        }

        let mut entries: Vec<StorageAttributes> = directories
            .into_iter()
            .filter(|dir| is_listed(path, dir, deep))
            .map(|dir| {
                let meta = state.directories.get(&dir);
                StorageAttributes::directory(
                    dir.clone(),
                    meta.map(|m| m.last_modified),
                    meta.map(|m| m.visibility),
                )
            })
            .collect();

        entries.extend(
            state
                .files
                .iter()
                .filter(|(key, _)| is_listed(path, key, deep))
                .map(|(key, file)| {
                    StorageAttributes::file(
                        key.clone(),
                        file.contents.len() as u64,
                        Some(file.last_modified),
                        Some(file.visibility),
                    )
                }),
        );
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn move_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()> {
        let file = self
            .file(source)
            .map_err(|e| StorageError::move_file(source, destination, e))?;
        if source == destination {
            return Ok(());
        }
        let options = WriteOptions {
            visibility: Some(options.visibility.unwrap_or(file.visibility)),
            directory_visibility: options.directory_visibility,
        };
        self.store(destination, file.contents, &options)
            .map_err(|e| StorageError::move_file(source, destination, e))?;
        self.delete(source)
            .map_err(|e| StorageError::move_file(source, destination, e))
    }

    fn copy_file(
        &self,
        source: &NormalizedPath,
        destination: &NormalizedPath,
        options: &WriteOptions,
    ) -> Result<()> {
        let file = self
            .file(source)
            .map_err(|e| StorageError::copy_file(source, destination, e))?;
        let options = WriteOptions {
            visibility: Some(options.visibility.unwrap_or(file.visibility)),
            directory_visibility: options.directory_visibility,
        };
        self.store(destination, file.contents, &options)
            .map_err(|e| StorageError::copy_file(source, destination, e))
    }

    fn last_modified(&self, path: &NormalizedPath) -> Result<u64> {
        Ok(self.metadata_file(path, "last_modified")?.last_modified)
    }

    fn file_size(&self, path: &NormalizedPath) -> Result<u64> {
        Ok(self.metadata_file(path, "file_size")?.contents.len() as u64)
    }

    fn mime_type(&self, path: &NormalizedPath) -> Result<String> {
        let file = self.metadata_file(path, "mime_type")?;
        let head = &file.contents[..file.contents.len().min(512)];
        Ok(mime::detect(path.as_str(), head).to_string())
    }

    fn visibility(&self, path: &NormalizedPath) -> Result<Visibility> {
        let state = self
            .state
            .read()
            .map_err(|_| StorageError::metadata(path, "visibility", "lock poisoned"))?;
        if let Some(file) = state.files.get(path) {
            return Ok(file.visibility);
        }
        if let Some(dir) = state.directories.get(path) {
            return Ok(dir.visibility);
        }
        Err(StorageError::metadata(path, "visibility", "file not found"))
    }

    fn set_visibility(&self, path: &NormalizedPath, visibility: Visibility) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::set_visibility(path, "lock poisoned"))?;
        if let Some(file) = state.files.get_mut(path) {
            file.visibility = visibility;
            return Ok(());
        }
        if let Some(dir) = state.directories.get_mut(path) {
            dir.visibility = visibility;
            return Ok(());
        }
        Err(StorageError::set_visibility(path, "file not found"))
    }

    fn as_checksum_provider(&self) -> Option<&dyn ChecksumProvider> {
        Some(self)
    }
}

impl ChecksumProvider for MemoryAdapter {
    fn checksum(&self, path: &NormalizedPath, algorithm: ChecksumAlgorithm) -> Result<String> {
        Ok(algorithm.digest(&self.file(path)?.contents))
    }
}
