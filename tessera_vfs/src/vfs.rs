//! The virtual filesystem: URI-dispatched backend operations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{Backend, FileLock};
use crate::config::VfsConfig;
use crate::error::VfsError;
use crate::thread_pool::ThreadPool;
use crate::uri::{Scheme, Uri};

/// The mode a file is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsMode {
    /// Open an existing file for reading.
    Read,
    /// Open for writing, removing any existing file first.
    Write,
    /// Open for writing at the end of an existing file.
    ///
    /// Rejected by object store backends.
    Append,
}

/// Builds a [`Vfs`] from a configuration and a set of registered backends.
///
/// Only registered schemes are dispatchable; requesting an unregistered but
/// recognised scheme yields [`VfsError::BackendDisabled`].
#[derive(Debug, Default)]
pub struct VfsBuilder {
    config: VfsConfig,
    backends: HashMap<Scheme, Arc<dyn Backend>>,
}

impl VfsBuilder {
    /// Create a builder with a default configuration and no backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: VfsConfig) -> Self {
        self.config = config;
        self
    }

    /// Register `backend` for `scheme`, replacing any previous registration.
    #[must_use]
    pub fn register(mut self, scheme: Scheme, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(scheme, backend);
        self
    }

    /// Build the [`Vfs`], creating its thread pool.
    #[must_use]
    pub fn build(self) -> Vfs {
        let pool = ThreadPool::new(self.config.num_parallel_operations);
        Vfs {
            backends: self.backends,
            parallel_read_threshold: self.config.parallel_read_threshold,
            config: self.config,
            pool,
        }
    }
}

/// A virtual filesystem multiplexing per-scheme backends behind one URI-keyed
/// interface.
///
/// Every operation dispatches on the scheme of its URI argument. Reads of at
/// least the configured threshold are split into as many contiguous shards as
/// the pool has threads and executed in parallel.
#[derive(Debug)]
pub struct Vfs {
    backends: HashMap<Scheme, Arc<dyn Backend>>,
    pool: ThreadPool,
    parallel_read_threshold: u64,
    config: VfsConfig,
}

impl Vfs {
    /// Start building a [`Vfs`].
    #[must_use]
    pub fn builder() -> VfsBuilder {
        VfsBuilder::new()
    }

    /// The configuration the filesystem was built with.
    #[must_use]
    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// The thread pool used for parallel I/O.
    #[must_use]
    pub fn thread_pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Whether a backend is registered for `scheme`.
    #[must_use]
    pub fn supports_scheme(&self, scheme: Scheme) -> bool {
        self.backends.contains_key(&scheme)
    }

    fn backend(&self, uri: &Uri) -> Result<&Arc<dyn Backend>, VfsError> {
        match uri.scheme() {
            Scheme::Unsupported => Err(VfsError::UnsupportedScheme(uri.to_string())),
            scheme => self
                .backends
                .get(&scheme)
                .ok_or(VfsError::BackendDisabled(scheme)),
        }
    }

    /// Create a directory.
    pub fn create_dir(&self, uri: &Uri) -> Result<(), VfsError> {
        if self.is_dir(uri) {
            return Err(VfsError::Other(format!(
                "cannot create directory `{uri}`; it already exists"
            )));
        }
        self.backend(uri)?.create_dir(uri)
    }

    /// Create an empty file. Does nothing if the file exists.
    pub fn touch(&self, uri: &Uri) -> Result<(), VfsError> {
        if self.is_file(uri) {
            return Ok(());
        }
        self.backend(uri)?.touch(uri)
    }

    /// Remove a file or directory, recursively.
    pub fn remove_path(&self, uri: &Uri) -> Result<(), VfsError> {
        self.backend(uri)?.remove_path(uri)
    }

    /// Remove a file.
    pub fn remove_file(&self, uri: &Uri) -> Result<(), VfsError> {
        self.backend(uri)?.remove_file(uri)
    }

    /// Check whether `uri` is an existing directory.
    #[must_use]
    pub fn is_dir(&self, uri: &Uri) -> bool {
        self.backend(uri).is_ok_and(|backend| backend.is_dir(uri))
    }

    /// Check whether `uri` is an existing file.
    #[must_use]
    pub fn is_file(&self, uri: &Uri) -> bool {
        self.backend(uri).is_ok_and(|backend| backend.is_file(uri))
    }

    /// The size of the file at `uri`.
    pub fn file_size(&self, uri: &Uri) -> Result<u64, VfsError> {
        self.backend(uri)?.file_size(uri)
    }

    /// The URIs that have `uri` as parent, sorted.
    pub fn ls(&self, uri: &Uri) -> Result<Vec<Uri>, VfsError> {
        self.backend(uri)?.ls(uri)
    }

    /// Append `data` to the file at `uri`, creating it if absent.
    pub fn write(&self, uri: &Uri, data: &[u8]) -> Result<(), VfsError> {
        self.backend(uri)?.write(uri, data)
    }

    /// Flush buffered writes of `uri` to persistent storage.
    pub fn sync(&self, uri: &Uri) -> Result<(), VfsError> {
        self.backend(uri)?.sync(uri)
    }

    /// Read exactly `buf.len()` bytes from `uri` starting at `offset`.
    ///
    /// Reads of at least the configured parallel read threshold are split
    /// into `pool.num_threads()` contiguous shards, each read on the pool
    /// into its disjoint sub-slice of `buf`.
    ///
    /// # Errors
    /// Returns [`VfsError::ParallelRead`] wrapping the first shard failure if
    /// any shard of a parallel read fails.
    pub fn read(&self, uri: &Uri, offset: u64, buf: &mut [u8]) -> Result<(), VfsError> {
        let backend = self.backend(uri)?;
        if !backend.is_file(uri) {
            return Err(VfsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot read `{uri}`; file does not exist"),
            )));
        }

        let nbytes = buf.len() as u64;
        let num_threads = self.pool.num_threads() as u64;
        if nbytes == 0 || nbytes < self.parallel_read_threshold || num_threads == 1 {
            return backend.read(uri, offset, buf);
        }

        let shard_size = nbytes.div_ceil(num_threads);
        debug!("parallel read of {nbytes} bytes from `{uri}` in {num_threads} shards");
        let mut handles = Vec::with_capacity(num_threads as usize);
        for (index, shard) in buf.chunks_mut(shard_size as usize).enumerate() {
            let shard = SendSlice::new(shard);
            let backend = Arc::clone(backend);
            let uri = uri.clone();
            let shard_offset = offset + index as u64 * shard_size;
            handles.push(self.pool.enqueue(move || {
                // SAFETY: the shards are disjoint `chunks_mut` sub-slices of
                // the caller buffer and `read` does not return before every
                // handle has resolved, so each task holds the only live
                // reference to its shard for the duration of the borrow.
                let shard = unsafe { shard.as_mut_slice() };
                backend.read(&uri, shard_offset, shard)
            }));
        }

        let mut first_error = None;
        for handle in handles {
            if let Err(error) = handle.wait() {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            None => Ok(()),
            Some(error) => Err(VfsError::ParallelRead(Box::new(error))),
        }
    }

    /// Rename `from` to `to` within a single backend.
    ///
    /// With `force`, an existing destination is removed first.
    ///
    /// # Errors
    /// Returns [`VfsError::CrossBackendMove`] if the URIs name different
    /// schemes; neither side is touched in that case.
    pub fn move_path(&self, from: &Uri, to: &Uri, force: bool) -> Result<(), VfsError> {
        if from.scheme() != to.scheme() {
            return Err(VfsError::CrossBackendMove {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let backend = self.backend(from)?;
        if force {
            if backend.is_dir(to) {
                backend.remove_path(to)?;
            } else if backend.is_file(to) {
                backend.remove_file(to)?;
            }
        }
        backend.move_path(from, to)
    }

    /// Acquire an advisory filelock on `uri`, blocking until granted.
    ///
    /// The returned guard releases the lock when dropped; backends without
    /// lock support return a successful no-op guard.
    pub fn filelock_lock(&self, uri: &Uri, shared: bool) -> Result<VfsLockGuard, VfsError> {
        let backend = self.backend(uri)?;
        let lock = backend.filelock_lock(uri, shared)?;
        Ok(VfsLockGuard {
            backend: Arc::clone(backend),
            uri: uri.clone(),
            lock: Some(lock),
        })
    }

    /// Open the file at `uri` in `mode`.
    ///
    /// # Errors
    /// - [`VfsMode::Read`]: the file must exist.
    /// - [`VfsMode::Write`]: any existing file is removed first.
    /// - [`VfsMode::Append`]: rejected by backends without append support.
    pub fn open(&self, uri: &Uri, mode: VfsMode) -> Result<VfsFile<'_>, VfsError> {
        let backend = self.backend(uri)?;
        match mode {
            VfsMode::Read => {
                if !backend.is_file(uri) {
                    return Err(VfsError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("cannot open `{uri}`; file does not exist"),
                    )));
                }
            }
            VfsMode::Write => {
                if backend.is_file(uri) {
                    backend.remove_file(uri)?;
                }
            }
            VfsMode::Append => {
                if !backend.supports_append() {
                    return Err(VfsError::Other(format!(
                        "cannot open `{uri}`; the {} backend does not support append mode",
                        backend.name()
                    )));
                }
            }
        }
        Ok(VfsFile {
            vfs: self,
            uri: uri.clone(),
            mode,
            closed: false,
        })
    }

    /// Create a bucket.
    pub fn create_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        self.backend(uri)?.create_bucket(uri)
    }

    /// Remove a bucket and its contents.
    pub fn remove_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        self.backend(uri)?.remove_bucket(uri)
    }

    /// Remove every object in a bucket.
    pub fn empty_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        self.backend(uri)?.empty_bucket(uri)
    }

    /// Check whether the bucket at `uri` exists.
    #[must_use]
    pub fn is_bucket(&self, uri: &Uri) -> bool {
        self.backend(uri)
            .is_ok_and(|backend| backend.is_bucket(uri))
    }

    /// Check whether the bucket at `uri` exists and holds no objects.
    pub fn is_empty_bucket(&self, uri: &Uri) -> Result<bool, VfsError> {
        self.backend(uri)?.is_empty_bucket(uri)
    }
}

/// A raw shard of a caller buffer, movable into a thread pool task.
struct SendSlice {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the slice is only dereferenced inside the task owning the shard and
// the shards of one read never overlap.
unsafe impl Send for SendSlice {}

impl SendSlice {
    fn new(slice: &mut [u8]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    /// # Safety
    /// The originating slice must outlive every use and no other reference to
    /// it may be live.
    unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// An open file handle produced by [`Vfs::open`].
///
/// Writable handles append through the VFS; closing flushes buffered writes.
/// Dropping an unclosed handle flushes on a best-effort basis.
#[derive(Debug)]
pub struct VfsFile<'a> {
    vfs: &'a Vfs,
    uri: Uri,
    mode: VfsMode,
    closed: bool,
}

impl VfsFile<'_> {
    /// The URI the handle was opened on.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The mode the handle was opened in.
    #[must_use]
    pub fn mode(&self) -> VfsMode {
        self.mode
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), VfsError> {
        if self.mode != VfsMode::Read {
            return Err(VfsError::Other(format!(
                "file `{}` is not open for reading",
                self.uri
            )));
        }
        self.vfs.read(&self.uri, offset, buf)
    }

    /// Append `data` to the file.
    pub fn write(&mut self, data: &[u8]) -> Result<(), VfsError> {
        if self.mode == VfsMode::Read {
            return Err(VfsError::Other(format!(
                "file `{}` is not open for writing",
                self.uri
            )));
        }
        self.vfs.write(&self.uri, data)
    }

    /// Close the handle, flushing buffered writes.
    pub fn close(mut self) -> Result<(), VfsError> {
        self.closed = true;
        if self.mode == VfsMode::Read {
            return Ok(());
        }
        self.vfs.sync(&self.uri)
    }
}

impl Drop for VfsFile<'_> {
    fn drop(&mut self) {
        if !self.closed && self.mode != VfsMode::Read {
            if let Err(error) = self.vfs.sync(&self.uri) {
                warn!("failed to flush `{}` on drop: {error}", self.uri);
            }
        }
    }
}

/// A held filelock that releases on drop.
///
/// The guard owns a handle to its backend, so it may outlive the borrow it
/// was acquired through. Errors on the drop path are logged rather than
/// surfaced; call [`VfsLockGuard::unlock`] to observe them.
#[derive(Debug)]
pub struct VfsLockGuard {
    backend: Arc<dyn Backend>,
    uri: Uri,
    lock: Option<FileLock>,
}

impl VfsLockGuard {
    /// The URI the lock was acquired on.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Release the lock.
    pub fn unlock(mut self) -> Result<(), VfsError> {
        match self.lock.take() {
            Some(lock) => self.backend.filelock_unlock(lock),
            None => Ok(()),
        }
    }
}

impl Drop for VfsLockGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Err(error) = self.backend.filelock_unlock(lock) {
                warn!("failed to release filelock on `{}`: {error}", self.uri);
            }
        }
    }
}
