//! Hierarchical store backends.
//!
//! A store is a zarr v3 hierarchy. Groups carry the crate's JSON records in
//! their `spatialdata_attrs` attribute, arrays hold chunked payloads, and the
//! few payloads that are not arrays live as plain keys inside their group.
//! Group paths use `/` separators; the root is `""`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use walkdir::WalkDir;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::storage_adapter::performance_metrics::PerformanceMetricsStorageAdapter;
use zarrs::storage::store::MemoryStore as ZarrMemoryStore;
use zarrs::storage::{
    ListableStorageTraits, ReadableStorageTraits, ReadableWritableListableStorage, StoreKey, StorePrefix,
    WritableStorageTraits,
};

use crate::error::{Result, SpatialDataError};

/// Key of the zarr metadata document of every group and array.
pub const METADATA_KEY: &str = "zarr.json";

/// Group attribute holding the crate's own record.
pub const ATTRS_KEY: &str = "spatialdata_attrs";

/// A zarr hierarchy the container layer reads and writes.
///
/// Implementors only hand out their zarr storage; the group operations are
/// provided on top of it. Every operation takes `&self`, so one store can be
/// shared by scoped writer threads.
pub trait HierarchicalStore: fmt::Debug + Send + Sync {
    fn storage(&self) -> ReadableWritableListableStorage;

    /// Makes every write issued so far durable.
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Returns true if anything is stored at or below `path`.
    fn exists(&self, path: &str) -> Result<bool> {
        let keys = self
            .storage()
            .list_prefix(&store_prefix(path)?)
            .map_err(|e| SpatialDataError::zarr(location(path), e))?;
        Ok(!keys.is_empty())
    }

    /// Reads the record of the group at `path`. `None` if there is no group
    /// or the group carries no record.
    fn read_attrs(&self, path: &str) -> Result<Option<Value>> {
        let storage = self.storage();
        let key = store_key(path, METADATA_KEY)?;
        if storage
            .get(&key)
            .map_err(|e| SpatialDataError::zarr(location(path), e))?
            .is_none()
        {
            return Ok(None);
        }
        let group = Group::open(storage, &node_path(path)).map_err(|e| SpatialDataError::zarr(location(path), e))?;
        Ok(group.attributes().get(ATTRS_KEY).cloned())
    }

    /// Writes the group at `path` with `attrs` as its record, replacing any
    /// previous group metadata. Child nodes are untouched.
    fn write_attrs(&self, path: &str, attrs: &Value) -> Result<()> {
        let mut attributes = Map::new();
        attributes.insert(ATTRS_KEY.to_string(), attrs.clone());
        let group = GroupBuilder::new()
            .attributes(attributes)
            .build(self.storage(), &node_path(path))
            .map_err(|e| SpatialDataError::zarr(location(path), e))?;
        group
            .store_metadata()
            .map_err(|e| SpatialDataError::zarr(location(path), e))
    }

    /// Removes the metadata document of the node at `path`, leaving its
    /// children in place.
    fn remove_attrs(&self, path: &str) -> Result<()> {
        self.storage()
            .erase(&store_key(path, METADATA_KEY)?)
            .map_err(|e| SpatialDataError::zarr(location(path), e))?;
        Ok(())
    }

    /// Removes a node and everything below it. Missing nodes are fine.
    fn remove(&self, path: &str) -> Result<()> {
        self.storage()
            .erase_prefix(&store_prefix(path)?)
            .map_err(|e| SpatialDataError::zarr(location(path), e))?;
        Ok(())
    }

    fn read_blob(&self, path: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let bytes = self
            .storage()
            .get(&store_key(path, key)?)
            .map_err(|e| SpatialDataError::zarr(join(path, key), e))?;
        Ok(bytes.map(|b| b.to_vec()))
    }

    fn write_blob(&self, path: &str, key: &str, bytes: &[u8]) -> Result<()> {
        self.storage()
            .set(&store_key(path, key)?, bytes.to_vec().into())
            .map_err(|e| SpatialDataError::zarr(join(path, key), e))
    }
}

/// Joins a group path and a child name.
pub fn join(path: &str, child: &str) -> String {
    if path.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", path, child)
    }
}

/// Absolute zarr node path of a group path.
pub(crate) fn node_path(path: &str) -> String {
    format!("/{}", path)
}

/// Printable name of a group path.
pub(crate) fn location(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

fn store_key(path: &str, key: &str) -> Result<StoreKey> {
    let full = join(path, key);
    StoreKey::new(full.clone()).map_err(|e| SpatialDataError::zarr(full, e))
}

fn store_prefix(path: &str) -> Result<StorePrefix> {
    if path.is_empty() {
        return Ok(StorePrefix::root());
    }
    StorePrefix::new(format!("{}/", path)).map_err(|e| SpatialDataError::zarr(path, e))
}

/// A store laid out as a directory tree on the local filesystem.
#[derive(Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    storage: ReadableWritableListableStorage,
}

impl DirectoryStore {
    /// Opens an existing store directory.
    ///
    /// # Errors
    /// `StoreNotFound` if `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SpatialDataError::StoreNotFound(root));
        }
        Self::at(root)
    }

    /// Opens a store directory, creating it if needed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Self::at(root)
    }

    fn at(root: PathBuf) -> Result<Self> {
        let storage: ReadableWritableListableStorage = Arc::new(
            FilesystemStore::new(&root).map_err(|e| SpatialDataError::zarr(root.display().to_string(), e))?,
        );
        Ok(Self { root, storage })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl fmt::Debug for DirectoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryStore").field("root", &self.root).finish()
    }
}

impl HierarchicalStore for DirectoryStore {
    fn storage(&self) -> ReadableWritableListableStorage {
        Arc::clone(&self.storage)
    }

    /// Flushes every file and directory below the root to disk, children
    /// before their parents.
    fn sync(&self) -> Result<()> {
        for entry in WalkDir::new(&self.root).contents_first(true) {
            let entry = entry.map_err(|e| {
                SpatialDataError::Io(std::io::Error::other(format!(
                    "failed to walk {}: {}",
                    self.root.display(),
                    e
                )))
            })?;
            if entry.file_type().is_file() {
                fs::File::open(entry.path())?.sync_all()?;
            } else if entry.file_type().is_dir() {
                sync_dir(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

// Directory handles cannot be synced outside unix.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// A store held entirely in memory. Counts storage reads, which makes it
/// handy for checking how much data an operation touched.
pub struct MemoryStore {
    storage: Arc<PerformanceMetricsStorageAdapter<ZarrMemoryStore>>,
    reads_at_reset: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(PerformanceMetricsStorageAdapter::new(Arc::new(ZarrMemoryStore::new()))),
            reads_at_reset: AtomicUsize::new(0),
        }
    }

    /// Number of storage reads served since creation or the last
    /// [`MemoryStore::reset_reads`].
    pub fn reads(&self) -> usize {
        self.storage
            .reads()
            .saturating_sub(self.reads_at_reset.load(Ordering::Relaxed))
    }

    pub fn reset_reads(&self) {
        self.reads_at_reset.store(self.storage.reads(), Ordering::Relaxed);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").field("reads", &self.reads()).finish()
    }
}

impl HierarchicalStore for MemoryStore {
    fn storage(&self) -> ReadableWritableListableStorage {
        self.storage.clone()
    }
}
