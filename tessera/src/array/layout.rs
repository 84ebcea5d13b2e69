//! Cell and tile orders.

use derive_more::Display;

use crate::array::schema::SchemaError;

/// The traversal order of tiles over the domain, or of cells within a tile.
///
/// [`Layout::RowMajor`] treats dimension `0` as most significant;
/// [`Layout::ColMajor`] treats the last dimension as most significant. The
/// remaining variants are meaningful only as write-time layouts: a
/// [`Layout::GlobalOrder`] buffer is already in on-disk order and
/// [`Layout::Unordered`] cells are sorted before they are tiled. On disk,
/// cells are always stored in the schema's row- or column-major cell order.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Dimension `0` most significant.
    #[display("row-major")]
    RowMajor,
    /// The last dimension most significant.
    #[display("col-major")]
    ColMajor,
    /// Tile-by-tile in tile order, cells in cell order within each tile.
    #[display("global-order")]
    GlobalOrder,
    /// No order; sorted into global order before tiling.
    #[display("unordered")]
    Unordered,
}

impl Layout {
    /// The serialized layout code.
    #[must_use]
    pub(crate) const fn code(&self) -> u8 {
        match self {
            Self::RowMajor => 0,
            Self::ColMajor => 1,
            Self::GlobalOrder => 2,
            Self::Unordered => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, SchemaError> {
        Ok(match code {
            0 => Self::RowMajor,
            1 => Self::ColMajor,
            2 => Self::GlobalOrder,
            3 => Self::Unordered,
            _ => return Err(SchemaError::Corrupt(format!("unknown layout code {code}"))),
        })
    }
}

/// Whether an array is dense or sparse.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayType {
    /// Every cell of the domain exists.
    #[display("dense")]
    Dense,
    /// Only written cells exist; tiles hold a fixed cell capacity.
    #[display("sparse")]
    Sparse,
}

impl ArrayType {
    pub(crate) const fn code(&self) -> u8 {
        match self {
            Self::Dense => 0,
            Self::Sparse => 1,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, SchemaError> {
        Ok(match code {
            0 => Self::Dense,
            1 => Self::Sparse,
            _ => {
                return Err(SchemaError::Corrupt(format!(
                    "unknown array type code {code}"
                )))
            }
        })
    }
}

/// The I/O mode an array is opened in.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMode {
    /// Queries may read; the array directory is locked shared.
    #[display("read")]
    Read,
    /// Queries may write new fragments; the directory is locked exclusively.
    #[display("write")]
    Write,
}
