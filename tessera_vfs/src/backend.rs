//! The backend capability set.

pub mod memory;

use std::fmt::Debug;

use crate::error::VfsError;
use crate::uri::Uri;

/// A held filelock, returned by [`Backend::filelock_lock`].
///
/// Local backends hold the locked file handle; backends whose locks are
/// no-ops hold nothing.
#[derive(Debug)]
pub struct FileLock {
    file: Option<std::fs::File>,
    shared: bool,
}

impl FileLock {
    /// A lock handle for backends where locking is a successful no-op.
    #[must_use]
    pub fn noop(shared: bool) -> Self {
        Self { file: None, shared }
    }

    /// A lock handle owning the locked `file`.
    #[must_use]
    pub fn from_file(file: std::fs::File, shared: bool) -> Self {
        Self {
            file: Some(file),
            shared,
        }
    }

    /// The locked file handle, if any.
    #[must_use]
    pub fn file(&self) -> Option<&std::fs::File> {
        self.file.as_ref()
    }

    /// Consume the lock, returning the locked file handle, if any.
    #[must_use]
    pub fn into_file(self) -> Option<std::fs::File> {
        self.file
    }

    /// Whether the lock was acquired shared.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.shared
    }
}

/// The per-scheme file operations behind the [`Vfs`](crate::Vfs).
///
/// A backend may declare any operation unsupported by returning
/// [`VfsError::Unsupported`]; the bucket operations do so by default since
/// they are meaningful only for object stores. Implementations must be
/// internally synchronised: the [`Vfs`](crate::Vfs) calls them from multiple
/// threads.
pub trait Backend: Debug + Send + Sync {
    /// A short name identifying the backend in errors and logs.
    fn name(&self) -> &'static str;

    /// True if files may be reopened for appending.
    ///
    /// Object stores reject append mode.
    fn supports_append(&self) -> bool {
        true
    }

    /// True if the backend has object store semantics.
    fn is_object_store(&self) -> bool {
        false
    }

    /// Create a directory. Fails if it already exists.
    fn create_dir(&self, uri: &Uri) -> Result<(), VfsError>;

    /// Create an empty file. Succeeds if the file already exists.
    fn touch(&self, uri: &Uri) -> Result<(), VfsError>;

    /// Remove a file or directory, recursively.
    fn remove_path(&self, uri: &Uri) -> Result<(), VfsError>;

    /// Remove a file. Fails if it does not exist.
    fn remove_file(&self, uri: &Uri) -> Result<(), VfsError>;

    /// Check whether `uri` is an existing directory.
    fn is_dir(&self, uri: &Uri) -> bool;

    /// Check whether `uri` is an existing file.
    fn is_file(&self, uri: &Uri) -> bool;

    /// The size of the file at `uri` in bytes.
    fn file_size(&self, uri: &Uri) -> Result<u64, VfsError>;

    /// The URIs that have `uri` as parent, sorted.
    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>, VfsError>;

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read(&self, uri: &Uri, offset: u64, buf: &mut [u8]) -> Result<(), VfsError>;

    /// Append `data` to the file at `uri`, creating it if absent.
    fn write(&self, uri: &Uri, data: &[u8]) -> Result<(), VfsError>;

    /// Flush buffered writes to persistent storage.
    ///
    /// A successful no-op on object stores.
    fn sync(&self, uri: &Uri) -> Result<(), VfsError>;

    /// Rename a file or directory within this backend.
    fn move_path(&self, from: &Uri, to: &Uri) -> Result<(), VfsError>;

    /// Acquire an advisory lock on the file at `uri`.
    ///
    /// Blocks until the lock is granted. Backends without lock support
    /// return a successful no-op handle.
    fn filelock_lock(&self, uri: &Uri, shared: bool) -> Result<FileLock, VfsError>;

    /// Release a lock acquired with [`Backend::filelock_lock`].
    fn filelock_unlock(&self, lock: FileLock) -> Result<(), VfsError>;

    /// Create a bucket.
    fn create_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        let _ = uri;
        Err(unsupported(self.name(), "create_bucket"))
    }

    /// Remove a bucket and its contents.
    fn remove_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        let _ = uri;
        Err(unsupported(self.name(), "remove_bucket"))
    }

    /// Remove every object in a bucket.
    fn empty_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        let _ = uri;
        Err(unsupported(self.name(), "empty_bucket"))
    }

    /// Check whether the bucket exists.
    fn is_bucket(&self, uri: &Uri) -> bool {
        let _ = uri;
        false
    }

    /// Check whether the bucket exists and holds no objects.
    fn is_empty_bucket(&self, uri: &Uri) -> Result<bool, VfsError> {
        let _ = uri;
        Err(unsupported(self.name(), "is_empty_bucket"))
    }
}

/// The error returned for operations a backend declares unsupported.
#[must_use]
pub fn unsupported(backend: &'static str, op: &'static str) -> VfsError {
    VfsError::Unsupported { op, backend }
}
