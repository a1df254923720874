//! Blob containers for snapshot storage
//!
//! `FsBlobStore` keeps one file per blob. Each file starts with a JSON
//! metadata line followed by the raw bytes:
//!
//! ```text
//! {"persistenceId":"p-1","sequenceNr":"4","timestamp":"1704067200000"}\n
//! <snapshot bytes>
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::ContinuationToken;
use crate::error::{JournalError, JournalResult};
use crate::utils::atomic::{atomic_write_with, cleanup_temp_files};

const BLOB_EXTENSION: &str = "blob";

/// Default number of names returned by one list call
pub const DEFAULT_LIST_PAGE_SIZE: usize = 5000;

/// Blob contents plus string metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

/// A listed blob; metadata is returned without the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: String,
    pub metadata: BTreeMap<String, String>,
}

/// One page of a listing, ascending by name
#[derive(Debug, Clone, Default)]
pub struct BlobPage {
    pub items: Vec<BlobItem>,
    pub continuation: Option<ContinuationToken>,
}

/// Named blob containers
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_container_if_not_exists(&self, container: &str) -> JournalResult<bool>;

    /// Create or replace a blob
    async fn put(&self, container: &str, name: &str, blob: Blob) -> JournalResult<()>;

    async fn get(&self, container: &str, name: &str) -> JournalResult<Option<Blob>>;

    /// Remove a blob; returns `false` if it did not exist
    async fn delete(&self, container: &str, name: &str) -> JournalResult<bool>;

    /// List blobs whose name starts with `prefix`
    async fn list(
        &self,
        container: &str,
        prefix: &str,
        continuation: Option<ContinuationToken>,
    ) -> JournalResult<BlobPage>;
}

fn missing_container(operation: &str, container: &str) -> JournalError {
    JournalError::storage(operation, format!("container '{}' does not exist", container))
}

/// Slice a sorted listing into one page
fn page_of(mut items: Vec<BlobItem>, after: Option<ContinuationToken>, size: usize) -> BlobPage {
    items.sort_by(|a, b| a.name.cmp(&b.name));
    let start = match after {
        Some(ContinuationToken(next)) => items.partition_point(|i| i.name < next),
        None => 0,
    };
    let mut rest = items.split_off(start);
    let continuation = rest.get(size).map(|next| ContinuationToken(next.name.clone()));
    rest.truncate(size);
    BlobPage {
        items: rest,
        continuation,
    }
}

/// Blob containers kept in memory
pub struct MemoryBlobStore {
    containers: RwLock<HashMap<String, BTreeMap<String, Blob>>>,
    page_size: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_LIST_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn blob_count(&self, container: &str) -> usize {
        self.containers
            .read()
            .get(container)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_container_if_not_exists(&self, container: &str) -> JournalResult<bool> {
        let mut containers = self.containers.write();
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(container.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn put(&self, container: &str, name: &str, blob: Blob) -> JournalResult<()> {
        self.containers
            .write()
            .get_mut(container)
            .ok_or_else(|| missing_container("put", container))?
            .insert(name.to_string(), blob);
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> JournalResult<Option<Blob>> {
        Ok(self
            .containers
            .read()
            .get(container)
            .ok_or_else(|| missing_container("get", container))?
            .get(name)
            .cloned())
    }

    async fn delete(&self, container: &str, name: &str) -> JournalResult<bool> {
        Ok(self
            .containers
            .write()
            .get_mut(container)
            .ok_or_else(|| missing_container("delete", container))?
            .remove(name)
            .is_some())
    }

    async fn list(
        &self,
        container: &str,
        prefix: &str,
        continuation: Option<ContinuationToken>,
    ) -> JournalResult<BlobPage> {
        let containers = self.containers.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| missing_container("list", container))?;
        let items = blobs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, blob)| BlobItem {
                name: name.clone(),
                metadata: blob.metadata.clone(),
            })
            .collect();
        Ok(page_of(items, continuation, self.page_size))
    }
}

/// Blob containers stored as directories of files
pub struct FsBlobStore {
    root: PathBuf,
    page_size: usize,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, removing temp files left by crashes
    pub fn open<P: AsRef<Path>>(root: P) -> JournalResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let cleaned = cleanup_temp_files(&root)?;
        if cleaned > 0 {
            tracing::info!(root = %root.display(), cleaned, "removed interrupted blob writes");
        }
        Ok(Self {
            root,
            page_size: DEFAULT_LIST_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(urlencoding::encode(container).into_owned())
    }

    fn blob_path(&self, container: &str, name: &str) -> PathBuf {
        self.container_dir(container)
            .join(format!("{}.{}", urlencoding::encode(name), BLOB_EXTENSION))
    }

    fn existing_container(&self, operation: &str, container: &str) -> JournalResult<PathBuf> {
        let dir = self.container_dir(container);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(missing_container(operation, container))
        }
    }
}

fn read_blob_file(path: &Path, with_body: bool) -> JournalResult<Option<Blob>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);

    // Listings stop after the header line
    let mut header = Vec::new();
    reader.read_until(b'\n', &mut header)?;
    if header.pop() != Some(b'\n') {
        return Err(JournalError::storage(
            "read_blob",
            format!("missing metadata header in {}", path.display()),
        ));
    }
    let metadata = serde_json::from_slice(&header)?;

    let mut data = Vec::new();
    if with_body {
        reader.read_to_end(&mut data)?;
    }
    Ok(Some(Blob { data, metadata }))
}

async fn blocking<T, F>(operation: &'static str, task: F) -> JournalResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> JournalResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| JournalError::Cancelled(format!("{}: {}", operation, e)))?
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn create_container_if_not_exists(&self, container: &str) -> JournalResult<bool> {
        let dir = self.container_dir(container);
        blocking("create_container", move || {
            if dir.is_dir() {
                return Ok(false);
            }
            std::fs::create_dir_all(&dir)?;
            Ok(true)
        })
        .await
    }

    async fn put(&self, container: &str, name: &str, blob: Blob) -> JournalResult<()> {
        self.existing_container("put", container)?;
        let path = self.blob_path(container, name);
        blocking("put", move || {
            let header = serde_json::to_vec(&blob.metadata)?;
            atomic_write_with(&path, |file| {
                file.write_all(&header)?;
                file.write_all(b"\n")?;
                file.write_all(&blob.data)
            })?;
            Ok(())
        })
        .await
    }

    async fn get(&self, container: &str, name: &str) -> JournalResult<Option<Blob>> {
        self.existing_container("get", container)?;
        let path = self.blob_path(container, name);
        blocking("get", move || read_blob_file(&path, true)).await
    }

    async fn delete(&self, container: &str, name: &str) -> JournalResult<bool> {
        self.existing_container("delete", container)?;
        let path = self.blob_path(container, name);
        blocking("delete", move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn list(
        &self,
        container: &str,
        prefix: &str,
        continuation: Option<ContinuationToken>,
    ) -> JournalResult<BlobPage> {
        let dir = self.existing_container("list", container)?;
        let prefix = prefix.to_string();
        let page_size = self.page_size;
        blocking("list", move || {
            let mut items = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e != BLOB_EXTENSION).unwrap_or(true) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let name = urlencoding::decode(stem)
                    .map_err(|e| JournalError::storage("list", e))?
                    .into_owned();
                if !name.starts_with(&prefix) {
                    continue;
                }
                if let Some(blob) = read_blob_file(&path, false)? {
                    items.push(BlobItem {
                        name,
                        metadata: blob.metadata,
                    });
                }
            }
            Ok(page_of(items, continuation, page_size))
        })
        .await
    }
}
