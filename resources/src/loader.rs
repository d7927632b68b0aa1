//! Sources of resource data.
//!
//! A [`ResourceTypeLoader`] produces the bytes a resource is built from. The
//! manager calls [`ResourceTypeLoader::open_data_stream`] on a file access
//! worker (or in the content update task for types that need no file
//! access), hands the data to the resource, and then returns it through
//! [`ResourceTypeLoader::close_data_stream`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::resource::ResourceRecord;

/// Data produced by a loader for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderData {
    /// `None` if the resource does not exist.
    pub data: Option<Vec<u8>>,
    /// Stored as the resource description when set.
    pub description: Option<String>,
    /// Remembered to answer [`ResourceTypeLoader::is_resource_outdated`].
    pub modification_time: Option<SystemTime>,
}

impl LoaderData {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Some(bytes),
            ..Self::default()
        }
    }

    pub fn is_missing(&self) -> bool {
        self.data.is_none()
    }
}

pub trait ResourceTypeLoader: Send + Sync {
    /// Produces the data of `resource`. Blocking I/O is fine here.
    fn open_data_stream(&self, resource: &ResourceRecord) -> LoaderData;

    /// Called after the content update consumed `data`.
    fn close_data_stream(&self, _resource: &ResourceRecord, _data: LoaderData) {}

    /// Whether the source changed since `resource` was loaded.
    fn is_resource_outdated(&self, resource: &ResourceRecord) -> bool;
}

/// Reads `<root>/<id>` from disk.
#[derive(Debug, Clone)]
pub struct FileResourceLoader {
    root: PathBuf,
}

impl FileResourceLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the file backing `id`.
    pub fn resolve(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn modification_time(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }
}

impl ResourceTypeLoader for FileResourceLoader {
    fn open_data_stream(&self, resource: &ResourceRecord) -> LoaderData {
        let path = self.resolve(resource.id());
        match std::fs::read(&path) {
            Ok(bytes) => LoaderData {
                data: Some(bytes),
                description: Some(path.display().to_string()),
                modification_time: Self::modification_time(&path),
            },
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read {}: {err}", path.display());
                }
                LoaderData::missing()
            }
        }
    }

    fn is_resource_outdated(&self, resource: &ResourceRecord) -> bool {
        let Some(loaded) = resource.loaded_modification_time() else {
            return true;
        };
        Self::modification_time(&self.resolve(resource.id())) != Some(loaded)
    }
}

/// Serves resource data from memory, for tests, generated content and
/// [`ResourceManager::update_resource_with_custom_loader`](crate::ResourceManager::update_resource_with_custom_loader).
///
/// Clones share the same entries. Entries are matched by resource id; a
/// loader created with [`MemoryResourceLoader::from_bytes`] answers every id
/// with the same bytes.
#[derive(Clone, Default)]
pub struct MemoryResourceLoader {
    entries: Arc<RwLock<HashMap<String, (Vec<u8>, SystemTime)>>>,
    any: Option<(Arc<[u8]>, SystemTime)>,
}

impl MemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            entries: Arc::default(),
            any: Some((Arc::from(bytes), SystemTime::now())),
        }
    }

    /// Inserts or replaces the data of `id`. Replacing makes resources
    /// loaded from the old data outdated.
    pub fn insert(&self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries
            .write()
            .insert(id.into(), (bytes.into(), SystemTime::now()));
    }

    pub fn remove(&self, id: &str) -> Option<Vec<u8>> {
        self.entries.write().remove(id).map(|(bytes, _)| bytes)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.any.is_some() || self.entries.read().contains_key(id)
    }

    fn modification_time(&self, id: &str) -> Option<SystemTime> {
        self.entries
            .read()
            .get(id)
            .map(|(_, time)| *time)
            .or_else(|| self.any.as_ref().map(|(_, time)| *time))
    }
}

impl ResourceTypeLoader for MemoryResourceLoader {
    fn open_data_stream(&self, resource: &ResourceRecord) -> LoaderData {
        if let Some((bytes, time)) = self.entries.read().get(resource.id()) {
            return LoaderData {
                data: Some(bytes.clone()),
                description: Some(format!("memory:{}", resource.id())),
                modification_time: Some(*time),
            };
        }
        match &self.any {
            Some((bytes, time)) => LoaderData {
                data: Some(bytes.to_vec()),
                description: Some(format!("memory:{}", resource.id())),
                modification_time: Some(*time),
            },
            None => LoaderData::missing(),
        }
    }

    fn is_resource_outdated(&self, resource: &ResourceRecord) -> bool {
        match resource.loaded_modification_time() {
            Some(loaded) => self.modification_time(resource.id()) != Some(loaded),
            None => true,
        }
    }
}
