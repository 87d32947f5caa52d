//! Object storage for rendered snapshots.
//!
//! `ObjectStore` is the durable blob sink. `SnapshotPublisher` narrows it to
//! the single capability the detector needs: overwrite the one well-known
//! snapshot key with fresh PNG bytes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Fixed key the latency chart is published under.
pub const SNAPSHOT_KEY: &str = "ttl-latency.png";

/// Content type of the published snapshot.
pub const PNG_CONTENT_TYPE: &str = "image/png";

const CONTENT_TYPE_SUFFIX: &str = ".content-type";

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// Failed to acquire lock on the store.
    #[error("Failed to acquire lock on object store")]
    LockError,

    /// The key is empty or would escape the store.
    #[error("Invalid object key: '{0}'")]
    InvalidKey(String),

    /// Filesystem failure.
    #[error("Object store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// An object as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object contents.
    pub body: Vec<u8>,
    /// MIME type recorded at upload.
    pub content_type: String,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
}

/// Outcome of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// True if an existing object was overwritten.
    pub replaced: bool,
}

/// Trait for blob stores with last-write-wins keys.
pub trait ObjectStore: Send + Sync {
    /// Writes `body` under `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<PutOutcome, ObjectStoreError>;

    /// Reads the object stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the read fails.
    fn get_object(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError>;

    /// Lists all keys, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list_keys(&self) -> Result<Vec<String>, ObjectStoreError>;
}

fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let invalid = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\'])
        || key.ends_with(CONTENT_TYPE_SUFFIX);
    if invalid {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// In-memory object store implementation.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    /// Creates a new empty in-memory object store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory object store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<PutOutcome, ObjectStoreError> {
        validate_key(key)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| ObjectStoreError::LockError)?;
        let previous = objects.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(PutOutcome {
            replaced: previous.is_some(),
        })
    }

    fn get_object(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        validate_key(key)?;
        let objects = self
            .objects
            .read()
            .map_err(|_| ObjectStoreError::LockError)?;
        Ok(objects.get(key).cloned())
    }

    fn list_keys(&self) -> Result<Vec<String>, ObjectStoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| ObjectStoreError::LockError)?;
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Filesystem-backed object store.
///
/// Each object is a file in the root directory with its content type in a
/// `<key>.content-type` sidecar. Writes go to a temporary file that is then
/// renamed over the target, so readers never observe a partial object and
/// racing writers resolve to last-write-wins.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ObjectStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stages `contents` in a uniquely named hidden file and renames it over
    /// `name`, so concurrent writers never share a staging file.
    fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<(), ObjectStoreError> {
        let mut staging = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(&self.root)?;
        staging.write_all(contents)?;
        staging.as_file().sync_all()?;
        staging
            .persist(self.root.join(name))
            .map_err(|e| ObjectStoreError::Io(e.error))?;
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<PutOutcome, ObjectStoreError> {
        validate_key(key)?;
        let replaced = self.root.join(key).exists();
        self.write_atomic(&format!("{key}{CONTENT_TYPE_SUFFIX}"), content_type.as_bytes())?;
        self.write_atomic(key, body)?;
        Ok(PutOutcome { replaced })
    }

    fn get_object(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        validate_key(key)?;
        let path = self.root.join(key);

        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content_type = fs::read_to_string(self.root.join(format!("{key}{CONTENT_TYPE_SUFFIX}")))
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        let last_modified = fs::metadata(&path)?
            .modified()
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);

        Ok(Some(StoredObject {
            body,
            content_type,
            last_modified,
        }))
    }

    fn list_keys(&self) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_key(&name).is_ok() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Result of publishing a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Key the snapshot was written to.
    pub key: String,
    /// Size of the published image in bytes.
    pub size: usize,
    /// True if a previous snapshot was overwritten.
    pub replaced: bool,
}

/// Publishes the latency chart under the fixed snapshot key.
#[derive(Clone)]
pub struct SnapshotPublisher {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl SnapshotPublisher {
    /// Creates a publisher writing to [`SNAPSHOT_KEY`].
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            key: SNAPSHOT_KEY.to_string(),
        }
    }

    /// Returns the key snapshots are published under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Overwrites the snapshot with `image` (PNG bytes).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store rejects the write.
    pub fn publish(&self, image: &[u8]) -> Result<PublishOutcome, ObjectStoreError> {
        let outcome = self.store.put_object(&self.key, image, PNG_CONTENT_TYPE)?;
        Ok(PublishOutcome {
            key: self.key.clone(),
            size: image.len(),
            replaced: outcome.replaced,
        })
    }

    /// Reads back the current snapshot, if one has been published.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store read fails.
    pub fn latest(&self) -> Result<Option<StoredObject>, ObjectStoreError> {
        self.store.get_object(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_put_and_get() {
        let store = InMemoryObjectStore::new();
        let outcome = store.put_object("a.png", b"abc", PNG_CONTENT_TYPE).unwrap();
        assert!(!outcome.replaced);

        let object = store.get_object("a.png").unwrap().unwrap();
        assert_eq!(object.body, b"abc");
        assert_eq!(object.content_type, PNG_CONTENT_TYPE);
    }

    #[test]
    fn test_in_memory_overwrite_keeps_single_key() {
        let store = InMemoryObjectStore::new();
        store.put_object("a.png", b"one", PNG_CONTENT_TYPE).unwrap();
        let outcome = store.put_object("a.png", b"two", PNG_CONTENT_TYPE).unwrap();

        assert!(outcome.replaced);
        assert_eq!(store.list_keys().unwrap(), vec!["a.png".to_string()]);
        assert_eq!(store.get_object("a.png").unwrap().unwrap().body, b"two");
    }

    #[test]
    fn test_missing_object_is_none() {
        let store = InMemoryObjectStore::new();
        assert!(store.get_object("nope.png").unwrap().is_none());
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        let store = InMemoryObjectStore::new();
        for key in ["", "../escape.png", "dir/a.png", ".hidden", "a.png.content-type"] {
            assert!(
                matches!(
                    store.put_object(key, b"x", PNG_CONTENT_TYPE),
                    Err(ObjectStoreError::InvalidKey(_))
                ),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_fs_store_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(dir.path().join("snapshots")).unwrap();

        assert!(store.get_object(SNAPSHOT_KEY).unwrap().is_none());

        let first = store
            .put_object(SNAPSHOT_KEY, b"first", PNG_CONTENT_TYPE)
            .unwrap();
        let second = store
            .put_object(SNAPSHOT_KEY, b"second", PNG_CONTENT_TYPE)
            .unwrap();

        assert!(!first.replaced);
        assert!(second.replaced);

        let object = store.get_object(SNAPSHOT_KEY).unwrap().unwrap();
        assert_eq!(object.body, b"second");
        assert_eq!(object.content_type, PNG_CONTENT_TYPE);
        assert_eq!(store.list_keys().unwrap(), vec![SNAPSHOT_KEY.to_string()]);
    }

    #[test]
    fn test_publisher_is_idempotent_for_identical_images() {
        let store = InMemoryObjectStore::new_shared();
        let publisher = SnapshotPublisher::new(store.clone());

        let first = publisher.publish(b"\x89PNG-same").unwrap();
        let second = publisher.publish(b"\x89PNG-same").unwrap();

        assert_eq!(first.key, SNAPSHOT_KEY);
        assert!(!first.replaced);
        assert!(second.replaced);
        assert_eq!(store.list_keys().unwrap().len(), 1);
        assert_eq!(publisher.latest().unwrap().unwrap().body, b"\x89PNG-same");
    }

    #[test]
    fn test_fs_store_tolerates_concurrent_publishers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::open(dir.path()).unwrap());
        let publisher = SnapshotPublisher::new(store.clone());

        let bodies: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 64 * 1024]).collect();
        std::thread::scope(|scope| {
            for body in &bodies {
                let publisher = publisher.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        publisher.publish(body).unwrap();
                    }
                });
            }
        });

        let latest = publisher.latest().unwrap().unwrap();
        assert!(bodies.contains(&latest.body), "snapshot mixes writers");
        assert_eq!(latest.content_type, PNG_CONTENT_TYPE);
        assert_eq!(store.list_keys().unwrap(), vec![SNAPSHOT_KEY.to_string()]);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
