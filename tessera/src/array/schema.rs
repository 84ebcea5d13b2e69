//! The array schema: dimensions, attributes, and tiling parameters.

use thiserror::Error;
use tracing::debug;

use tessera_vfs::{Uri, Vfs, VfsError};

use crate::array::attribute::{Attribute, COORDS_NAME};
use crate::array::compressor::Compressor;
use crate::array::datatype::Datatype;
use crate::array::dimension::{Coord, Dimension};
use crate::array::layout::{ArrayType, Layout};
use crate::encoding::{Decoder, Encoder};

/// The current schema blob version.
pub const SCHEMA_VERSION: u32 = 1;

/// The default sparse tile cell capacity.
pub const DEFAULT_CAPACITY: u64 = 10_000;

/// A schema validation or serialization error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchemaError {
    /// The schema has no dimensions.
    #[error("the schema has no dimensions")]
    NoDimensions,
    /// A dimension or attribute has an empty name.
    #[error("empty dimension or attribute name")]
    EmptyName,
    /// Two dimensions or attributes share a name.
    #[error("duplicate dimension or attribute name `{0}`")]
    DuplicateName(String),
    /// The name is reserved.
    #[error("the name `{0}` is reserved")]
    ReservedName(String),
    /// The datatype is not valid for a dimension.
    #[error("invalid datatype {1} for dimension `{0}`")]
    InvalidDimensionDatatype(String, Datatype),
    /// Dense arrays require uniform integral dimension datatypes.
    #[error("dense arrays require uniform integral dimension datatypes")]
    NonUniformDenseDomain,
    /// The dimension's domain bounds are inverted or not finite.
    #[error("invalid domain for dimension `{0}`")]
    InvalidDomain(String),
    /// The tile extent is not positive.
    #[error("tile extent of dimension `{0}` must be positive")]
    InvalidTileExtent(String),
    /// The dense domain is not a whole number of tiles.
    #[error("domain of dimension `{0}` is not a multiple of its tile extent")]
    ExtentNotDividing(String),
    /// The sparse tile capacity is zero.
    #[error("tile capacity must be positive")]
    ZeroCapacity,
    /// The layout is not a valid cell order.
    #[error("invalid cell order {0}")]
    InvalidCellOrder(Layout),
    /// The layout is not a valid tile order.
    #[error("invalid tile order {0}")]
    InvalidTileOrder(Layout),
    /// An attribute's cell value count is zero.
    #[error("cell value count of attribute `{0}` must be positive")]
    ZeroCellValNum(String),
    /// The schema blob failed to parse.
    #[error("corrupt schema blob: {0}")]
    Corrupt(String),
    /// A filesystem error while saving or loading.
    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// The schema of an array: its type, ordered dimensions and attributes, and
/// tiling parameters.
///
/// A schema is mutable while being composed; [`ArraySchema::check`] validates
/// the invariants and an array only ever binds a checked schema. After that
/// the schema is read-only and may be shared across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct ArraySchema {
    array_type: ArrayType,
    capacity: u64,
    cell_order: Layout,
    tile_order: Layout,
    dimensions: Vec<Dimension>,
    attributes: Vec<Attribute>,
}

impl ArraySchema {
    /// Create an empty schema of the given array type.
    ///
    /// Defaults: row-major cell and tile orders, sparse tile capacity
    /// [`DEFAULT_CAPACITY`].
    #[must_use]
    pub fn new(array_type: ArrayType) -> Self {
        Self {
            array_type,
            capacity: DEFAULT_CAPACITY,
            cell_order: Layout::RowMajor,
            tile_order: Layout::RowMajor,
            dimensions: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Append a dimension. Dimension order is significant.
    pub fn add_dimension(&mut self, dimension: Dimension) -> &mut Self {
        self.dimensions.push(dimension);
        self
    }

    /// Append an attribute. Insertion order is preserved.
    pub fn add_attribute(&mut self, attribute: Attribute) -> &mut Self {
        self.attributes.push(attribute);
        self
    }

    /// Set the sparse tile cell capacity.
    pub fn set_capacity(&mut self, capacity: u64) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Set the order of cells within a tile.
    pub fn set_cell_order(&mut self, cell_order: Layout) -> &mut Self {
        self.cell_order = cell_order;
        self
    }

    /// Set the order of tiles over the domain.
    pub fn set_tile_order(&mut self, tile_order: Layout) -> &mut Self {
        self.tile_order = tile_order;
        self
    }

    /// Set the array type.
    pub fn set_array_type(&mut self, array_type: ArrayType) -> &mut Self {
        self.array_type = array_type;
        self
    }

    /// The array type.
    #[must_use]
    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// The sparse tile cell capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// The order of cells within a tile.
    #[must_use]
    pub fn cell_order(&self) -> Layout {
        self.cell_order
    }

    /// The order of tiles over the domain.
    #[must_use]
    pub fn tile_order(&self) -> Layout {
        self.tile_order
    }

    /// The ordered dimensions.
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// The ordered attributes.
    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// The number of dimensions.
    #[must_use]
    pub fn dim_num(&self) -> usize {
        self.dimensions.len()
    }

    /// Look up a dimension by name.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.name() == name)
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name() == name)
    }

    /// The byte size of one interleaved coordinate tuple.
    #[must_use]
    pub fn coords_cell_size(&self) -> u64 {
        self.dimensions
            .iter()
            .map(|dim| dim.datatype().size())
            .sum()
    }

    /// The number of cells per tile of a dense array.
    #[must_use]
    pub fn cells_per_tile(&self) -> u64 {
        self.dimensions
            .iter()
            .map(|dim| match dim.tile_extent() {
                Coord::Int(extent) => extent.max(0) as u64,
                Coord::Float(_) => 0,
            })
            .product()
    }

    /// Validate the schema invariants.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn check(&self) -> Result<(), SchemaError> {
        if self.dimensions.is_empty() {
            return Err(SchemaError::NoDimensions);
        }

        let mut names = std::collections::HashSet::new();
        for name in self
            .dimensions
            .iter()
            .map(Dimension::name)
            .chain(self.attributes.iter().map(Attribute::name))
        {
            if name.is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if name == COORDS_NAME {
                return Err(SchemaError::ReservedName(name.to_string()));
            }
            if !names.insert(name) {
                return Err(SchemaError::DuplicateName(name.to_string()));
            }
        }

        for attribute in &self.attributes {
            if attribute.cell_val_num() == 0 {
                return Err(SchemaError::ZeroCellValNum(attribute.name().to_string()));
            }
        }

        for dimension in &self.dimensions {
            let datatype = dimension.datatype();
            if datatype == Datatype::Char {
                return Err(SchemaError::InvalidDimensionDatatype(
                    dimension.name().to_string(),
                    datatype,
                ));
            }
            match (dimension.domain(), dimension.tile_extent()) {
                ((Coord::Int(low), Coord::Int(high)), Coord::Int(extent)) => {
                    if high < low {
                        return Err(SchemaError::InvalidDomain(dimension.name().to_string()));
                    }
                    if extent <= 0 {
                        return Err(SchemaError::InvalidTileExtent(dimension.name().to_string()));
                    }
                    if self.array_type == ArrayType::Dense && (high - low + 1) % extent != 0 {
                        return Err(SchemaError::ExtentNotDividing(dimension.name().to_string()));
                    }
                }
                ((Coord::Float(low), Coord::Float(high)), Coord::Float(extent)) => {
                    if !low.is_finite() || !high.is_finite() || high < low {
                        return Err(SchemaError::InvalidDomain(dimension.name().to_string()));
                    }
                    if !(extent.is_finite() && extent > 0.0) {
                        return Err(SchemaError::InvalidTileExtent(dimension.name().to_string()));
                    }
                }
                _ => return Err(SchemaError::InvalidDomain(dimension.name().to_string())),
            }
        }

        if self.array_type == ArrayType::Dense {
            let first = self.dimensions[0].datatype();
            if !first.is_integral()
                || self
                    .dimensions
                    .iter()
                    .any(|dimension| dimension.datatype() != first)
            {
                return Err(SchemaError::NonUniformDenseDomain);
            }
        } else if self.capacity == 0 {
            return Err(SchemaError::ZeroCapacity);
        }

        if !matches!(self.cell_order, Layout::RowMajor | Layout::ColMajor) {
            return Err(SchemaError::InvalidCellOrder(self.cell_order));
        }
        if !matches!(self.tile_order, Layout::RowMajor | Layout::ColMajor) {
            return Err(SchemaError::InvalidTileOrder(self.tile_order));
        }

        Ok(())
    }

    /// Serialize into the versioned little-endian schema blob.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_u32(SCHEMA_VERSION);
        encoder.put_u8(self.array_type.code());
        encoder.put_u64(self.capacity);
        encoder.put_u8(self.cell_order.code());
        encoder.put_u8(self.tile_order.code());

        encoder.put_u32(self.dimensions.len() as u32);
        for dimension in &self.dimensions {
            let datatype = dimension.datatype();
            encoder.put_str(dimension.name());
            encoder.put_u8(datatype.code());
            let (low, high) = dimension.domain();
            encoder.put_u64(datatype.coord_to_bits(low));
            encoder.put_u64(datatype.coord_to_bits(high));
            encoder.put_u64(datatype.coord_to_bits(dimension.tile_extent()));
            encoder.put_u8(dimension.compressor().code());
            encoder.put_i32(dimension.compression_level());
        }

        encoder.put_u32(self.attributes.len() as u32);
        for attribute in &self.attributes {
            encoder.put_str(attribute.name());
            encoder.put_u8(attribute.datatype().code());
            encoder.put_u32(attribute.cell_val_num());
            encoder.put_u8(attribute.compressor().code());
            encoder.put_i32(attribute.compression_level());
        }

        encoder.into_bytes()
    }

    /// Parse a schema blob produced by [`ArraySchema::to_bytes`].
    ///
    /// # Errors
    /// Returns [`SchemaError::Corrupt`] on truncation, trailing bytes, or an
    /// unknown version or code.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SchemaError> {
        let mut decoder = Decoder::new(bytes);
        fn parse<T>(result: Result<T, String>) -> Result<T, SchemaError> {
            result.map_err(SchemaError::Corrupt)
        }

        let version = parse(decoder.get_u32())?;
        if version != SCHEMA_VERSION {
            return Err(SchemaError::Corrupt(format!(
                "unsupported schema version {version}"
            )));
        }
        let array_type = ArrayType::from_code(parse(decoder.get_u8())?)?;
        let capacity = parse(decoder.get_u64())?;
        let cell_order = Layout::from_code(parse(decoder.get_u8())?)?;
        let tile_order = Layout::from_code(parse(decoder.get_u8())?)?;

        let dim_count = parse(decoder.get_u32())?;
        let mut dimensions = Vec::with_capacity(dim_count as usize);
        for _ in 0..dim_count {
            let name = parse(decoder.get_str())?;
            let datatype = Datatype::from_code(parse(decoder.get_u8())?)?;
            let low = parse(decoder.get_u64())?;
            let high = parse(decoder.get_u64())?;
            let extent = parse(decoder.get_u64())?;
            let compressor = Compressor::from_code(parse(decoder.get_u8())?)?;
            let level = parse(decoder.get_i32())?;
            dimensions.push(Dimension::from_raw(
                name,
                datatype,
                (low, high),
                extent,
                compressor,
                level,
            ));
        }

        let attr_count = parse(decoder.get_u32())?;
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            let name = parse(decoder.get_str())?;
            let datatype = Datatype::from_code(parse(decoder.get_u8())?)?;
            let cell_val_num = parse(decoder.get_u32())?;
            let compressor = Compressor::from_code(parse(decoder.get_u8())?)?;
            let level = parse(decoder.get_i32())?;
            attributes.push(
                Attribute::new(name, datatype)
                    .with_cell_val_num(cell_val_num)
                    .with_compressor(compressor, level),
            );
        }

        if !decoder.is_empty() {
            return Err(SchemaError::Corrupt(
                "trailing bytes after schema".to_string(),
            ));
        }

        Ok(Self {
            array_type,
            capacity,
            cell_order,
            tile_order,
            dimensions,
            attributes,
        })
    }

    /// Persist the schema blob at `uri`, replacing any existing blob.
    pub fn save(&self, vfs: &Vfs, uri: &Uri) -> Result<(), SchemaError> {
        debug!("saving array schema to `{uri}`");
        if vfs.is_file(uri) {
            vfs.remove_file(uri)?;
        }
        vfs.write(uri, &self.to_bytes())?;
        vfs.sync(uri)?;
        Ok(())
    }

    /// Load a schema blob from `uri`.
    pub fn load(vfs: &Vfs, uri: &Uri) -> Result<Self, SchemaError> {
        let size = vfs.file_size(uri)?;
        let mut bytes = vec![
            0;
            usize::try_from(size)
                .map_err(|_| SchemaError::Corrupt("schema blob too large".to_string()))?
        ];
        vfs.read(uri, 0, &mut bytes)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::attribute::VAR_NUM;

    fn dense_2x2() -> ArraySchema {
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema
            .add_dimension(Dimension::new("rows", [1i64, 4], 2))
            .add_dimension(Dimension::new("cols", [1i64, 4], 2))
            .add_attribute(Attribute::new("a", Datatype::Int32));
        schema
    }

    #[test]
    fn check_valid_dense() {
        assert!(dense_2x2().check().is_ok());
        assert_eq!(dense_2x2().cells_per_tile(), 4);
        assert_eq!(dense_2x2().coords_cell_size(), 16);
    }

    #[test]
    fn check_rejects_no_dimensions() {
        let schema = ArraySchema::new(ArrayType::Dense);
        assert!(matches!(schema.check(), Err(SchemaError::NoDimensions)));
    }

    #[test]
    fn check_rejects_duplicate_names() {
        let mut schema = dense_2x2();
        schema.add_attribute(Attribute::new("rows", Datatype::Int32));
        assert!(matches!(
            schema.check(),
            Err(SchemaError::DuplicateName(name)) if name == "rows"
        ));
    }

    #[test]
    fn check_rejects_reserved_name() {
        let mut schema = dense_2x2();
        schema.add_attribute(Attribute::new(COORDS_NAME, Datatype::Int32));
        assert!(matches!(schema.check(), Err(SchemaError::ReservedName(_))));
    }

    #[test]
    fn check_rejects_non_dividing_extent() {
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema
            .add_dimension(Dimension::new("d", [0i32, 9], 3))
            .add_attribute(Attribute::new("a", Datatype::Int32));
        assert!(matches!(
            schema.check(),
            Err(SchemaError::ExtentNotDividing(_))
        ));
    }

    #[test]
    fn check_rejects_mixed_dense_datatypes() {
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema
            .add_dimension(Dimension::new("d0", [0i32, 9], 5))
            .add_dimension(Dimension::new("d1", [0i64, 9], 5))
            .add_attribute(Attribute::new("a", Datatype::Int32));
        assert!(matches!(
            schema.check(),
            Err(SchemaError::NonUniformDenseDomain)
        ));
    }

    #[test]
    fn check_rejects_global_order_on_disk() {
        let mut schema = dense_2x2();
        schema.set_tile_order(Layout::GlobalOrder);
        assert!(matches!(
            schema.check(),
            Err(SchemaError::InvalidTileOrder(Layout::GlobalOrder))
        ));

        let mut schema = dense_2x2();
        schema.set_cell_order(Layout::Unordered);
        assert!(matches!(
            schema.check(),
            Err(SchemaError::InvalidCellOrder(Layout::Unordered))
        ));
    }

    #[test]
    fn check_rejects_zero_capacity() {
        let mut schema = ArraySchema::new(ArrayType::Sparse);
        schema
            .add_dimension(Dimension::new("d", [0i64, 99], 10))
            .set_capacity(0);
        assert!(matches!(schema.check(), Err(SchemaError::ZeroCapacity)));
    }

    #[test]
    fn sparse_float_dimensions_allowed() {
        let mut schema = ArraySchema::new(ArrayType::Sparse);
        schema
            .add_dimension(Dimension::new("x", [0.0f64, 100.0], 10.0))
            .add_attribute(Attribute::new("a", Datatype::Int32));
        assert!(schema.check().is_ok());
    }

    #[test]
    fn blob_round_trip_is_byte_exact() -> Result<(), SchemaError> {
        let mut schema = ArraySchema::new(ArrayType::Sparse);
        schema
            .add_dimension(
                Dimension::new("x", [-100i64, 99], 10).with_compressor(Compressor::Zstd, 3),
            )
            .add_dimension(Dimension::new("y", [0i64, 7], 4))
            .add_attribute(
                Attribute::new("a", Datatype::Float32)
                    .with_cell_val_num(2)
                    .with_compressor(Compressor::Gzip, 6),
            )
            .add_attribute(Attribute::new("s", Datatype::Char).with_cell_val_num(VAR_NUM))
            .set_capacity(512)
            .set_cell_order(Layout::ColMajor)
            .set_tile_order(Layout::RowMajor);
        schema.check()?;

        let bytes = schema.to_bytes();
        let reloaded = ArraySchema::from_bytes(&bytes)?;
        assert_eq!(reloaded, schema);
        assert_eq!(reloaded.to_bytes(), bytes);
        Ok(())
    }

    #[test]
    fn corrupt_blobs_rejected() {
        assert!(matches!(
            ArraySchema::from_bytes(&[1, 2, 3]),
            Err(SchemaError::Corrupt(_))
        ));
        let mut bytes = dense_2x2().to_bytes();
        bytes.push(0);
        assert!(matches!(
            ArraySchema::from_bytes(&bytes),
            Err(SchemaError::Corrupt(_))
        ));
    }
}
