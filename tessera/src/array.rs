//! Arrays and their schemas.

pub mod attribute;
pub mod compressor;
pub mod datatype;
pub mod dimension;
pub mod layout;
pub mod schema;

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use tessera_vfs::{Uri, Vfs, VfsError, VfsLockGuard};

use crate::array::layout::{ArrayMode, Layout};
use crate::array::schema::{ArraySchema, SchemaError};
use crate::fragment::FragmentError;
use crate::query::{QueryError, ReadQuery, WriteQuery};
use crate::storage::{is_fragment_id, ARRAY_SCHEMA_FILE, FRAGMENT_METADATA_FILE, LOCK_FILE};
use crate::subarray::Subarray;

/// An array-level error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArrayError {
    /// The URI does not hold an array.
    #[error("`{0}` is not an array")]
    NotAnArray(String),
    /// An array already exists at the URI.
    #[error("an array already exists at `{0}`")]
    AlreadyExists(String),
    /// A schema error.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A query error.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// A fragment error.
    #[error(transparent)]
    Fragment(#[from] FragmentError),
    /// A filesystem error.
    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// An open array: a handle binding a checked [`ArraySchema`] to an array
/// directory and an I/O mode.
///
/// Opening takes a filelock on the array directory — shared for
/// [`ArrayMode::Read`], exclusive for [`ArrayMode::Write`] — which is
/// released by [`Array::close`] (or on drop). Queries borrow the handle:
/// reads resolve cells across the array's fragments, writes emit new
/// fragments and never modify existing ones.
#[derive(Debug)]
pub struct Array {
    vfs: Arc<Vfs>,
    uri: Uri,
    schema: Arc<ArraySchema>,
    mode: ArrayMode,
    lock: Option<VfsLockGuard>,
}

impl Array {
    /// Create an array directory at `uri`: persist the schema blob and the
    /// filelock sentinel.
    ///
    /// # Errors
    /// Fails if the schema is invalid or the URI already holds a directory.
    pub fn create(vfs: &Vfs, uri: &Uri, schema: &ArraySchema) -> Result<(), ArrayError> {
        schema.check()?;
        if vfs.is_dir(uri) {
            return Err(ArrayError::AlreadyExists(uri.to_string()));
        }
        debug!("creating array at `{uri}`");
        vfs.create_dir(uri)?;
        schema.save(vfs, &uri.join(ARRAY_SCHEMA_FILE)?)?;
        vfs.touch(&uri.join(LOCK_FILE)?)?;
        Ok(())
    }

    /// Open the array at `uri` in `mode`, loading and checking its schema.
    ///
    /// Blocks until the directory filelock is granted.
    pub fn open(vfs: Arc<Vfs>, uri: &Uri, mode: ArrayMode) -> Result<Self, ArrayError> {
        let schema_uri = uri.join(ARRAY_SCHEMA_FILE)?;
        if !vfs.is_file(&schema_uri) {
            return Err(ArrayError::NotAnArray(uri.to_string()));
        }
        let lock = vfs.filelock_lock(&uri.join(LOCK_FILE)?, mode == ArrayMode::Read)?;
        let schema = ArraySchema::load(&vfs, &schema_uri)?;
        schema.check()?;
        debug!("opened `{uri}` for {mode}");
        Ok(Self {
            vfs,
            uri: uri.clone(),
            schema: Arc::new(schema),
            mode,
            lock: Some(lock),
        })
    }

    /// The array URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The I/O mode the array was opened in.
    #[must_use]
    pub fn mode(&self) -> ArrayMode {
        self.mode
    }

    /// The array schema.
    #[must_use]
    pub fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    pub(crate) fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Start a read of `subarray` delivering cells in `layout`.
    pub fn read_query(
        &self,
        subarray: Subarray,
        layout: Layout,
        attrs: &[&str],
    ) -> Result<ReadQuery<'_>, QueryError> {
        ReadQuery::new(self, subarray, layout, attrs)
    }

    /// Start a write accepting cells in `layout`.
    pub fn write_query(&self, layout: Layout) -> Result<WriteQuery<'_>, QueryError> {
        WriteQuery::new(self, layout)
    }

    /// The committed fragment directories, oldest first.
    ///
    /// Fragment ids order lexicographically by write time; directories
    /// without a metadata blob are incomplete writes and are skipped.
    pub(crate) fn fragment_uris(&self) -> Result<Vec<Uri>, VfsError> {
        let mut fragments = Vec::new();
        for child in self.vfs.ls(&self.uri)? {
            if is_fragment_id(child.last_segment())
                && self.vfs.is_dir(&child)
                && self.vfs.is_file(&child.join(FRAGMENT_METADATA_FILE)?)
            {
                fragments.push(child);
            }
        }
        Ok(fragments)
    }

    /// Close the array, releasing its filelock.
    pub fn close(mut self) -> Result<(), ArrayError> {
        match self.lock.take() {
            Some(lock) => Ok(lock.unlock()?),
            None => Ok(()),
        }
    }
}
