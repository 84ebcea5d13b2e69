//! Read and write queries over an open array.

mod read;
mod write;

pub use read::ReadQuery;
pub use write::WriteQuery;

use derive_more::Display;
use thiserror::Error;

use tessera_vfs::VfsError;

use crate::array::layout::Layout;
use crate::fragment::FragmentError;

/// The lifecycle status of a query.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Created but never submitted.
    #[display("uninitialized")]
    Uninitialized,
    /// A submission is being processed.
    #[display("in-progress")]
    InProgress,
    /// The last submission filled a caller buffer before the result ended;
    /// the next submission resumes where it stopped.
    #[display("incomplete")]
    Incomplete,
    /// The result has been fully delivered.
    #[display("completed")]
    Completed,
    /// A submission failed; the query is unusable.
    #[display("failed")]
    Failed,
}

/// A query validation or execution error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueryError {
    /// The named attribute is not in the schema.
    #[error("no attribute named `{0}`")]
    AttributeNotFound(String),
    /// The coordinate attribute was requested on a dense array.
    #[error("`{0}` is only valid for sparse arrays")]
    CoordsOnDenseArray(String),
    /// The subarray does not fit the schema.
    #[error("invalid subarray: {0}")]
    InvalidSubarray(String),
    /// The layout is not valid for this query.
    #[error("invalid {1} layout {0}")]
    InvalidLayout(Layout, &'static str),
    /// The caller buffers do not match the query's attributes.
    #[error("buffer mismatch: {0}")]
    BufferMismatch(String),
    /// The array was opened in the wrong mode for this query.
    #[error("the array is not open for {0}")]
    WrongMode(&'static str),
    /// A global-order write subarray does not align to tile boundaries.
    #[error("global-order writes require a tile-aligned subarray")]
    UnalignedSubarray,
    /// A global-order write's cells are not in global order.
    #[error("cells of a global-order write must be in global order")]
    UnsortedGlobalOrder,
    /// The total written cell count does not match the subarray.
    #[error("wrote {written} cells but the subarray holds {expected}")]
    CellCountMismatch {
        /// Cells staged across all submissions.
        written: u64,
        /// Cells the subarray holds.
        expected: u64,
    },
    /// The query already failed; it cannot be resubmitted.
    #[error("the query has failed and cannot be resubmitted")]
    AlreadyFailed,
    /// A fragment error.
    #[error(transparent)]
    Fragment(#[from] FragmentError),
    /// A filesystem error.
    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// One attribute's data for a write submission.
///
/// Fixed-size attributes supply `data` only; variable-length attributes
/// additionally supply the per-cell start `offsets` into `data`. The
/// coordinate attribute of sparse arrays is supplied under its reserved name
/// with the dimension values interleaved in dimension order.
#[derive(Debug, Clone, Copy)]
pub struct AttributeData<'a> {
    /// The attribute name.
    pub name: &'a str,
    /// Cell values, or var-length values.
    pub data: &'a [u8],
    /// Per-cell start offsets into `data` (variable-length only).
    pub offsets: Option<&'a [u64]>,
}

impl<'a> AttributeData<'a> {
    /// Data for a fixed-size attribute.
    #[must_use]
    pub fn fixed(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            data,
            offsets: None,
        }
    }

    /// Data for a variable-length attribute.
    #[must_use]
    pub fn var(name: &'a str, offsets: &'a [u64], data: &'a [u8]) -> Self {
        Self {
            name,
            data,
            offsets: Some(offsets),
        }
    }
}

/// One attribute's caller buffer for a read submission.
#[derive(Debug)]
pub struct AttributeBuffer<'a> {
    /// The attribute name.
    pub name: &'a str,
    /// Receives cell values, or var-length values.
    pub data: &'a mut [u8],
    /// Receives per-cell start offsets into `data` (variable-length only).
    pub offsets: Option<&'a mut [u64]>,
}

impl<'a> AttributeBuffer<'a> {
    /// A buffer for a fixed-size attribute.
    #[must_use]
    pub fn fixed(name: &'a str, data: &'a mut [u8]) -> Self {
        Self {
            name,
            data,
            offsets: None,
        }
    }

    /// A buffer for a variable-length attribute.
    #[must_use]
    pub fn var(name: &'a str, offsets: &'a mut [u64], data: &'a mut [u8]) -> Self {
        Self {
            name,
            data,
            offsets: Some(offsets),
        }
    }
}

/// How much of a caller buffer a read submission filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferSizes {
    /// Bytes written into the data buffer.
    pub data_bytes: usize,
    /// Offsets written (variable-length attributes only).
    pub offsets: usize,
}
