//! Durable byte-oriented key-value storage used by the cache store.
//!
//! Record names are `/`-separated paths such as `gen/g000003/entries/<digest>`.
//! The filesystem backend lays them out as a directory tree:
//! - `active`                      pointer to the active generation (JSON)
//! - `gen/<id>/meta`               generation metadata (JSON)
//! - `gen/<id>/entries/<digest>`   one postcard-encoded `CacheEntry`

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use spin::RwLock;

/// Byte-oriented durable store.
///
/// `put` must be atomic with respect to crashes: after it returns `Ok`, a
/// subsequent `get` (also after restart) yields the new value, and a crash
/// before it returns leaves either the old value or the new one.
pub trait StorageBackend: Send + Sync {
    fn get(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    fn put(&self, name: &str, value: &[u8]) -> io::Result<()>;

    /// Remove a record; removing a missing record is not an error.
    fn delete(&self, name: &str) -> io::Result<()>;

    /// Remove every record whose name starts with `prefix`.
    fn delete_prefix(&self, prefix: &str) -> io::Result<()>;

    /// List record names under `prefix`, sorted.
    fn list(&self, prefix: &str) -> io::Result<Vec<String>>;
}

// ── In-memory backend ───────────────────────────────────────────────

/// Ephemeral backend for tests and hosts without persistent storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if no records are stored
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.records.read().get(name).cloned())
    }

    fn put(&self, name: &str, value: &[u8]) -> io::Result<()> {
        self.records.write().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        self.records.write().remove(name);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> io::Result<()> {
        self.records.write().retain(|name, _| !name.starts_with(prefix));
        Ok(())
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

// ── Filesystem backend ──────────────────────────────────────────────

/// Suffix of in-progress writes; never visible as a record.
const TMP_SUFFIX: &str = ".tmp";

/// Directory-tree backend with write-temp / fsync / rename semantics.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding the records
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.ends_with(TMP_SUFFIX) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid record name: {name}"),
                ));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if file_name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{prefix}/{file_name}")
            };
            if entry.file_type()?.is_dir() {
                self.collect(&entry.path(), &name, out)?;
            } else {
                out.push(name);
            }
        }
        Ok(())
    }
}

impl StorageBackend for FsBackend {
    fn get(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write to a temp file in the same directory, fsync, rename over the
    /// target, then fsync the directory so the rename itself is durable.
    fn put(&self, name: &str, value: &[u8]) -> io::Result<()> {
        let path = self.path_for(name)?;
        let dir = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no parent directory for record")
        })?;
        fs::create_dir_all(dir)?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(TMP_SUFFIX);
        let tmp_path = dir.join(tmp_name);

        let result = (|| {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            sync_dir(dir)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> io::Result<()> {
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            for name in self.list("")? {
                self.delete(&name)?;
            }
            return Ok(());
        }
        let path = self.path_for(trimmed)?;
        if path.is_dir() && prefix.ends_with('/') {
            return match fs::remove_dir_all(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            };
        }
        for name in self.list(prefix)? {
            self.delete(&name)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        // Walk from the deepest directory fully named by the prefix.
        let dir_part = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };
        let mut names = Vec::new();
        self.collect(&start, dir_part, &mut names)?;
        names.retain(|name| name.starts_with(prefix));
        names.sort();
        Ok(names)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
