//! Array attributes.

use crate::array::compressor::Compressor;
use crate::array::datatype::Datatype;

/// The cell value count of variable-length attributes.
pub const VAR_NUM: u32 = u32::MAX;

/// The reserved name of the coordinate attribute of sparse arrays.
pub const COORDS_NAME: &str = "__coords";

/// A named per-cell field with a datatype and cell value count.
///
/// A cell holds `cell_val_num` values of the datatype, or a variable number
/// when the count is [`VAR_NUM`]. Attribute insertion order is preserved by
/// the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    cell_val_num: u32,
    compressor: Compressor,
    compression_level: i32,
}

impl Attribute {
    /// Create an attribute with one value per cell and no compression.
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            cell_val_num: 1,
            compressor: Compressor::None,
            compression_level: -1,
        }
    }

    /// Set the number of values per cell ([`VAR_NUM`] for variable length).
    #[must_use]
    pub fn with_cell_val_num(mut self, cell_val_num: u32) -> Self {
        self.cell_val_num = cell_val_num;
        self
    }

    /// Set the tile compressor and level.
    #[must_use]
    pub fn with_compressor(mut self, compressor: Compressor, level: i32) -> Self {
        self.compressor = compressor;
        self.compression_level = level;
        self
    }

    /// The attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value datatype.
    #[must_use]
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// The number of values per cell ([`VAR_NUM`] for variable length).
    #[must_use]
    pub fn cell_val_num(&self) -> u32 {
        self.cell_val_num
    }

    /// True if cells hold a variable number of values.
    #[must_use]
    pub fn var_sized(&self) -> bool {
        self.cell_val_num == VAR_NUM
    }

    /// The fixed cell size in bytes, or [`None`] for variable-length cells.
    #[must_use]
    pub fn cell_size(&self) -> Option<u64> {
        if self.var_sized() {
            None
        } else {
            Some(self.datatype.size() * u64::from(self.cell_val_num))
        }
    }

    /// The tile compressor.
    #[must_use]
    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    /// The tile compression level.
    #[must_use]
    pub fn compression_level(&self) -> i32 {
        self.compression_level
    }

    /// One fill cell: the datatype's fill element repeated per value.
    ///
    /// Variable-length cells fill empty.
    #[must_use]
    pub(crate) fn fill_cell(&self) -> Vec<u8> {
        if self.var_sized() {
            return Vec::new();
        }
        self.datatype
            .fill_element()
            .repeat(self.cell_val_num as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_and_var_cells() {
        let fixed = Attribute::new("a", Datatype::Int32).with_cell_val_num(3);
        assert_eq!(fixed.cell_size(), Some(12));
        assert!(!fixed.var_sized());
        assert_eq!(fixed.fill_cell().len(), 12);

        let var = Attribute::new("s", Datatype::Char).with_cell_val_num(VAR_NUM);
        assert!(var.var_sized());
        assert_eq!(var.cell_size(), None);
        assert!(var.fill_cell().is_empty());
    }
}
