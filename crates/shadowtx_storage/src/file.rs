//! File-based document store for persistent, multi-process use.

use crate::document::{validate_collection_name, Document, DocumentId};
use crate::error::{StorageError, StorageResult};
use crate::store::DocumentStore;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-collection advisory lock file.
const LOCK_FILE: &str = "LOCK";
/// Extension of document files.
const DOC_EXT: &str = "doc";
/// Extension of in-flight temporary files.
const TMP_EXT: &str = "tmp";
/// File names are hex ids plus `.doc` and must fit common 255-byte limits.
pub const MAX_ID_BYTES: usize = 120;

/// On-disk representation of a document.
#[derive(Serialize, Deserialize)]
struct StoredDocument {
    id: DocumentId,
    body: Value,
}

/// A file-based document store.
///
/// Layout:
///
/// ```text
/// <root>/
/// ├─ orders/
/// │  ├─ LOCK            # Advisory lock serialising writers
/// │  ├─ 61.doc          # Document "a" (hex-encoded id), CBOR
/// │  ├─ 62.doc
/// │  └─ 4242-7.tmp      # In-flight write (pid-sequence)
/// └─ orders.tx/
///    └─ ...
/// ```
///
/// # Atomicity
///
/// Every mutating primitive runs while holding an exclusive advisory lock
/// on the collection's `LOCK` file, and writes go to a temporary file that
/// is renamed over the target. Conditional primitives are therefore atomic
/// across threads *and* processes sharing the directory. Readers take no
/// lock: they see either the old or the new file, never a partial one.
///
/// # Limits
///
/// Ids longer than [`MAX_ID_BYTES`] are rejected with
/// [`StorageError::InvalidId`], since their file names would not fit.
///
/// # Example
///
/// ```no_run
/// use shadowtx_storage::{Document, DocumentStore, FileStore};
/// use serde_json::json;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data")).unwrap();
/// store.put("orders", &Document::new("o1", json!({"qty": 3}))).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    sync_writes: bool,
    tmp_counter: AtomicU64,
}

impl FileStore {
    /// Opens or creates a store rooted at `root`.
    ///
    /// Writes are synced to disk before they are published.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `root` is
    /// not a directory.
    pub fn open(root: &Path) -> StorageResult<Self> {
        Self::open_with_sync(root, true)
    }

    /// Opens or creates a store, choosing whether writes are fsynced.
    ///
    /// Disabling sync is only sensible for tests and scratch data.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `root` is
    /// not a directory.
    pub fn open_with_sync(root: &Path, sync_writes: bool) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        if !root.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", root.display()),
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            sync_writes,
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> StorageResult<PathBuf> {
        validate_collection_name(collection)?;
        Ok(self.root.join(collection))
    }

    fn doc_path(dir: &Path, id: &DocumentId) -> StorageResult<PathBuf> {
        let len = id.as_str().len();
        if len > MAX_ID_BYTES {
            return Err(StorageError::InvalidId(format!(
                "{len} bytes, at most {MAX_ID_BYTES} fit in a file name"
            )));
        }
        Ok(dir.join(format!("{}.{DOC_EXT}", id.to_hex())))
    }

    /// Runs `f` while holding the collection's exclusive write lock.
    fn with_write_lock<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&Path) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let dir = self.collection_dir(collection)?;
        fs::create_dir_all(&dir)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        lock_file.lock_exclusive()?;
        let result = f(&dir);
        // Closing the handle drops the lock even if unlock fails.
        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn read_doc(path: &Path) -> StorageResult<Option<Document>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredDocument =
            ciborium::from_reader(bytes.as_slice()).map_err(|e| StorageError::Decoding {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(Document::new(stored.id, stored.body)))
    }

    /// Writes `doc` to a temporary file and renames it into place.
    fn write_doc(&self, dir: &Path, doc: &Document) -> StorageResult<()> {
        let stored = StoredDocument {
            id: doc.id.clone(),
            body: doc.body.clone(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&stored, &mut bytes)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let target = Self::doc_path(dir, &doc.id)?;
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!("{}-{seq}.{TMP_EXT}", std::process::id()));
        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            if self.sync_writes {
                file.sync_all()?;
            }
            fs::rename(&tmp, &target)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(StorageError::from)
    }

    fn remove_file(path: &Path) -> StorageResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn is_doc_file(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(DOC_EXT)
    }
}

impl DocumentStore for FileStore {
    fn insert(&self, collection: &str, doc: &Document) -> StorageResult<bool> {
        self.with_write_lock(collection, |dir| {
            if Self::doc_path(dir, &doc.id)?.exists() {
                return Ok(false);
            }
            self.write_doc(dir, doc)?;
            Ok(true)
        })
    }

    fn get(&self, collection: &str, id: &DocumentId) -> StorageResult<Option<Document>> {
        let dir = self.collection_dir(collection)?;
        Self::read_doc(&Self::doc_path(&dir, id)?)
    }

    fn put(&self, collection: &str, doc: &Document) -> StorageResult<()> {
        self.with_write_lock(collection, |dir| self.write_doc(dir, doc))
    }

    fn replace_if(
        &self,
        collection: &str,
        expected: &Document,
        new: &Document,
    ) -> StorageResult<bool> {
        if expected.id != new.id {
            return Ok(false);
        }
        self.with_write_lock(collection, |dir| {
            match Self::read_doc(&Self::doc_path(dir, &expected.id)?)? {
                Some(current) if current == *expected => {
                    self.write_doc(dir, new)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn remove(&self, collection: &str, id: &DocumentId) -> StorageResult<bool> {
        let dir = self.collection_dir(collection)?;
        if !dir.exists() {
            return Ok(false);
        }
        self.with_write_lock(collection, |dir| Self::remove_file(&Self::doc_path(dir, id)?))
    }

    fn remove_if(&self, collection: &str, expected: &Document) -> StorageResult<bool> {
        let dir = self.collection_dir(collection)?;
        if !dir.exists() {
            return Ok(false);
        }
        self.with_write_lock(collection, |dir| {
            let path = Self::doc_path(dir, &expected.id)?;
            match Self::read_doc(&path)? {
                Some(current) if current == *expected => Self::remove_file(&path),
                _ => Ok(false),
            }
        })
    }

    fn scan(&self, collection: &str) -> StorageResult<Vec<Document>> {
        let dir = self.collection_dir(collection)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut docs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !Self::is_doc_file(&path) {
                continue;
            }
            // A concurrent remove may win the race with this read.
            if let Some(doc) = Self::read_doc(&path)? {
                docs.push(doc);
            }
        }
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_collection_name(&name).is_err() {
                continue;
            }
            let has_docs = fs::read_dir(entry.path())?
                .filter_map(Result::ok)
                .any(|e| Self::is_doc_file(&e.path()));
            if has_docs {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
