//! `tessera` is a storage engine for dense and sparse n-dimensional arrays.
//!
//! Arrays persist as collections of fixed-capacity tiles inside an array
//! directory: a schema blob, a filelock sentinel, and one immutable fragment
//! directory per finalised write. Reads and writes travel through a
//! layout/coordinate translation pipeline — the schema's tile extents group
//! cells into tiles, tiles linearise over the domain in the tile order, and
//! cells linearise within a tile in the cell order.
//!
//! All I/O goes through the [`vfs`] virtual filesystem, which multiplexes
//! local, HDFS-style, and S3-style object store backends behind a uniform
//! URI-keyed interface and parallelises large range reads over its thread
//! pool.
//!
//! ## Example
//! ```
//! # use std::sync::Arc;
//! use tessera::array::datatype::Datatype;
//! use tessera::array::layout::{ArrayMode, ArrayType, Layout};
//! use tessera::array::schema::ArraySchema;
//! use tessera::array::Array;
//! use tessera::array::attribute::Attribute;
//! use tessera::array::dimension::Dimension;
//! use tessera::query::{AttributeBuffer, AttributeData};
//! use tessera::subarray::Subarray;
//! use tessera::vfs::{MemoryBackend, Scheme, Uri, Vfs};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let vfs = Arc::new(
//!     Vfs::builder()
//!         .register(Scheme::ObjectStore, Arc::new(MemoryBackend::new()))
//!         .build(),
//! );
//! vfs.create_bucket(&Uri::new("s3://demo")?)?;
//!
//! // A 4x4 dense array of 2x2 tiles with one int32 attribute.
//! let mut schema = ArraySchema::new(ArrayType::Dense);
//! schema
//!     .add_dimension(Dimension::new("rows", [1i64, 4], 2))
//!     .add_dimension(Dimension::new("cols", [1i64, 4], 2))
//!     .add_attribute(Attribute::new("a", Datatype::Int32));
//!
//! let uri = Uri::new("s3://demo/my_array")?;
//! Array::create(&vfs, &uri, &schema)?;
//!
//! // Write the cells 1..=16 in row-major order.
//! let values: Vec<i32> = (1..=16).collect();
//! let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
//! let array = Array::open(Arc::clone(&vfs), &uri, ArrayMode::Write)?;
//! let mut write = array.write_query(Layout::RowMajor)?;
//! write.submit(&[AttributeData::fixed("a", &bytes)])?;
//! write.finalize()?;
//! array.close()?;
//!
//! // Read them back.
//! let array = Array::open(vfs, &uri, ArrayMode::Read)?;
//! let mut out = vec![0u8; 64];
//! let mut read = array.read_query(
//!     Subarray::from_pairs(&[[1i64, 4], [1, 4]]),
//!     Layout::RowMajor,
//!     &["a"],
//! )?;
//! read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
//! # assert_eq!(out[..4], 1i32.to_le_bytes());
//! # Ok(())
//! # }
//! ```

pub mod array;
mod domain;
mod encoding;
pub mod fragment;
pub mod query;
pub mod storage;
pub mod subarray;

pub use tessera_vfs as vfs;

#[cfg(feature = "filesystem")]
pub use tessera_filesystem as filesystem;

pub use array::{Array, ArrayError};
pub use query::{QueryError, QueryStatus};
pub use subarray::Subarray;

use std::sync::Arc;

use tessera_vfs::{Vfs, VfsConfig};

/// Build a [`Vfs`] with the backends enabled at compile time registered for
/// their schemes.
///
/// The local filesystem backend is registered under the default
/// `filesystem` feature. Remote backends from `tessera_opendal` are
/// registered per array by the caller; see that crate's constructors.
#[must_use]
pub fn default_vfs(config: VfsConfig) -> Arc<Vfs> {
    let builder = Vfs::builder().config(config);
    #[cfg(feature = "filesystem")]
    let builder = builder.register(
        tessera_vfs::Scheme::File,
        Arc::new(tessera_filesystem::PosixBackend::new()),
    );
    Arc::new(builder.build())
}
