//! The write path: staging caller buffers and emitting a fragment.

use tracing::debug;

use crate::array::attribute::COORDS_NAME;
use crate::array::compressor::Compressor;
use crate::array::dimension::Coord;
use crate::array::layout::{ArrayMode, ArrayType, Layout};
use crate::array::schema::ArraySchema;
use crate::array::Array;
use crate::domain::{cmp_coords, ravel, unravel, Domain};
use crate::fragment::{self, ColumnData, TileData};
use crate::query::{AttributeData, QueryError, QueryStatus};
use crate::storage::new_fragment_id;
use crate::subarray::Subarray;

struct StagedColumn {
    name: String,
    var: bool,
    /// Fixed cell size in bytes; `0` for variable-length columns.
    cell_size: u64,
    compressor: Compressor,
    level: i32,
    fill: Vec<u8>,
    data: Vec<u8>,
    offsets: Vec<u64>,
}

impl StagedColumn {
    /// The byte range of the `index`-th staged variable-length value.
    fn value_range(&self, index: usize) -> (usize, usize) {
        let start = self.offsets[index] as usize;
        let end = self
            .offsets
            .get(index + 1)
            .map_or(self.data.len(), |offset| *offset as usize);
        (start, end)
    }

    /// The bytes of the `index`-th staged fixed-size cell.
    fn fixed_cell(&self, index: usize) -> &[u8] {
        let start = index * self.cell_size as usize;
        &self.data[start..start + self.cell_size as usize]
    }
}

/// A stateful write that stages caller buffers and emits one fragment when
/// finalised.
///
/// Dense writes accept row-major, column-major, or global-order buffers over
/// the write subarray; sparse writes accept global-order or unordered cells
/// with interleaved coordinates under the reserved coordinate attribute
/// name. Submissions accumulate; [`WriteQuery::finalize`] sorts and tiles
/// the staged cells, compresses the tiles, and commits the fragment.
pub struct WriteQuery<'a> {
    array: &'a Array,
    layout: Layout,
    subarray: Subarray,
    status: QueryStatus,
    staged: Vec<StagedColumn>,
    staged_cells: u64,
}

impl<'a> WriteQuery<'a> {
    pub(crate) fn new(array: &'a Array, layout: Layout) -> Result<Self, QueryError> {
        if array.mode() != ArrayMode::Write {
            return Err(QueryError::WrongMode("writing"));
        }
        let schema = array.schema();
        let layout_ok = match schema.array_type() {
            ArrayType::Dense => matches!(
                layout,
                Layout::RowMajor | Layout::ColMajor | Layout::GlobalOrder
            ),
            ArrayType::Sparse => matches!(layout, Layout::GlobalOrder | Layout::Unordered),
        };
        if !layout_ok {
            return Err(QueryError::InvalidLayout(layout, "write"));
        }

        let mut staged = Vec::new();
        if schema.array_type() == ArrayType::Sparse {
            let first_dim = &schema.dimensions()[0];
            staged.push(StagedColumn {
                name: COORDS_NAME.to_string(),
                var: false,
                cell_size: schema.coords_cell_size(),
                compressor: first_dim.compressor(),
                level: first_dim.compression_level(),
                fill: Vec::new(),
                data: Vec::new(),
                offsets: Vec::new(),
            });
        }
        for attribute in schema.attributes() {
            staged.push(StagedColumn {
                name: attribute.name().to_string(),
                var: attribute.var_sized(),
                cell_size: attribute.cell_size().unwrap_or(0),
                compressor: attribute.compressor(),
                level: attribute.compression_level(),
                fill: attribute.fill_cell(),
                data: Vec::new(),
                offsets: Vec::new(),
            });
        }

        Ok(Self {
            array,
            layout,
            subarray: Subarray::full_domain(schema),
            status: QueryStatus::Uninitialized,
            staged,
            staged_cells: 0,
        })
    }

    /// The query status after the last submission.
    #[must_use]
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Bound a dense write to `subarray` instead of the full domain.
    ///
    /// Must precede the first submission. Sparse writes span the full
    /// domain.
    pub fn set_subarray(&mut self, subarray: Subarray) -> Result<(), QueryError> {
        if self.array.schema().array_type() == ArrayType::Sparse {
            return Err(QueryError::InvalidSubarray(
                "sparse writes span the full domain".to_string(),
            ));
        }
        if self.staged_cells > 0 {
            return Err(QueryError::InvalidSubarray(
                "cannot change the subarray after cells were staged".to_string(),
            ));
        }
        subarray
            .check_against(self.array.schema())
            .map_err(QueryError::InvalidSubarray)?;
        self.subarray = subarray;
        Ok(())
    }

    /// Stage one batch of cells from per-attribute buffers.
    ///
    /// Every attribute (plus the coordinate attribute for sparse arrays)
    /// must be supplied with the same cell count.
    pub fn submit(&mut self, data: &[AttributeData<'_>]) -> Result<QueryStatus, QueryError> {
        if self.status == QueryStatus::Failed {
            return Err(QueryError::AlreadyFailed);
        }
        self.status = QueryStatus::InProgress;
        match self.submit_inner(data) {
            Ok(()) => {
                self.status = QueryStatus::Completed;
                Ok(self.status)
            }
            Err(error) => {
                self.status = QueryStatus::Failed;
                Err(error)
            }
        }
    }

    fn submit_inner(&mut self, data: &[AttributeData<'_>]) -> Result<(), QueryError> {
        if data.len() != self.staged.len() {
            return Err(QueryError::BufferMismatch(format!(
                "{} buffers supplied for {} columns",
                data.len(),
                self.staged.len()
            )));
        }

        let mut batch_cells: Option<u64> = None;
        for column in &self.staged {
            let supplied = data
                .iter()
                .find(|buffer| buffer.name == column.name)
                .ok_or_else(|| QueryError::BufferMismatch(format!("missing `{}`", column.name)))?;
            let cells = column_cells(column, supplied)?;
            if *batch_cells.get_or_insert(cells) != cells {
                return Err(QueryError::BufferMismatch(format!(
                    "`{}` holds a different cell count than the other buffers",
                    column.name
                )));
            }
        }
        let batch_cells = batch_cells.unwrap_or(0);

        for column in &mut self.staged {
            let supplied = data
                .iter()
                .find(|buffer| buffer.name == column.name)
                .expect("validated above");
            if let Some(offsets) = supplied.offsets {
                let base = column.data.len() as u64;
                column
                    .offsets
                    .extend(offsets.iter().map(|offset| base + offset));
            }
            column.data.extend_from_slice(supplied.data);
        }
        self.staged_cells += batch_cells;
        debug!(
            "staged {batch_cells} cells ({} total) for `{}`",
            self.staged_cells,
            self.array.uri()
        );
        Ok(())
    }

    /// Tile, compress, and commit the staged cells as one fragment.
    ///
    /// A query with no staged cells finalises without producing a fragment.
    pub fn finalize(self) -> Result<(), QueryError> {
        if self.staged_cells == 0 {
            return Ok(());
        }
        let schema = self.array.schema();
        let columns = match schema.array_type() {
            ArrayType::Dense => self.build_dense(schema)?,
            ArrayType::Sparse => self.build_sparse(schema)?,
        };

        let subarray_bits = std::iter::zip(self.subarray.ranges(), schema.dimensions())
            .map(|((low, high), dimension)| {
                (
                    dimension.datatype().coord_to_bits(*low),
                    dimension.datatype().coord_to_bits(*high),
                )
            })
            .collect();
        let fragment_uri = self.array.uri().join(&new_fragment_id())?;
        fragment::write_fragment(
            self.array.vfs(),
            &fragment_uri,
            schema,
            schema.array_type() == ArrayType::Dense,
            subarray_bits,
            self.staged_cells,
            columns,
        )?;
        Ok(())
    }

    fn build_dense(&self, schema: &ArraySchema) -> Result<Vec<ColumnData>, QueryError> {
        let domain = Domain::new(schema);
        let non_integral = || QueryError::InvalidSubarray("non-integral bounds".to_string());
        let expected = self.subarray.int_num_cells().ok_or_else(non_integral)?;
        if self.layout == Layout::GlobalOrder
            && domain.expand_to_tiles(&self.subarray) != self.subarray
        {
            return Err(QueryError::UnalignedSubarray);
        }
        if self.staged_cells != expected {
            return Err(QueryError::CellCountMismatch {
                written: self.staged_cells,
                expected,
            });
        }

        let sub_lows = self.subarray.int_lows().ok_or_else(non_integral)?;
        let sub_shape = self.subarray.int_shape().ok_or_else(non_integral)?;
        let extents = domain.int_extents().ok_or_else(non_integral)?;
        let cells_per_tile = schema.cells_per_tile();
        let tile_range = domain.tile_range(&self.subarray);

        // The staged index of the cell at `coords`, per the write layout.
        let source_index = |coords: &[i128], tile_pos: u64, cell_index: u64| -> usize {
            match self.layout {
                Layout::GlobalOrder => (tile_pos * cells_per_tile + cell_index) as usize,
                _ => {
                    let offsets: Vec<u64> = std::iter::zip(coords, &sub_lows)
                        .map(|(coord, low)| (coord - low) as u64)
                        .collect();
                    ravel(&offsets, &sub_shape, self.layout) as usize
                }
            }
        };

        let in_subarray = |coords: &[i128]| {
            itertools::izip!(coords, &sub_lows, &sub_shape)
                .all(|(coord, low, size)| (0..i128::from(*size)).contains(&(coord - low)))
        };

        let mut columns = Vec::with_capacity(self.staged.len());
        for column in &self.staged {
            let mut tiles = Vec::with_capacity(tile_range.len() as usize);
            for tile_pos in 0..tile_range.len() {
                let tile_coords = tile_range.tile_at(tile_pos);
                let tile_lows: Vec<i128> = (0..domain.dim_num())
                    .map(|d| match domain.tile_low(d, tile_coords[d]) {
                        Coord::Int(low) => low,
                        Coord::Float(_) => 0,
                    })
                    .collect();

                let tile = if column.var {
                    let mut offsets_tile = Vec::with_capacity(cells_per_tile as usize * 8);
                    let mut values = Vec::new();
                    for cell_index in 0..cells_per_tile {
                        offsets_tile.extend_from_slice(&(values.len() as u64).to_le_bytes());
                        let cell_offsets = unravel(cell_index, &extents, domain.cell_order());
                        let coords: Vec<i128> = std::iter::zip(&tile_lows, cell_offsets)
                            .map(|(low, offset)| low + i128::from(offset))
                            .collect();
                        if in_subarray(&coords) {
                            let source = source_index(&coords, tile_pos, cell_index);
                            let (start, end) = column.value_range(source);
                            values.extend_from_slice(&column.data[start..end]);
                        }
                    }
                    TileData {
                        data: offsets_tile,
                        var: Some(values),
                        cell_num: cells_per_tile,
                        mbr: None,
                    }
                } else {
                    let mut data = column.fill.repeat(cells_per_tile as usize);
                    let cell_size = column.cell_size as usize;
                    for cell_index in 0..cells_per_tile {
                        let cell_offsets = unravel(cell_index, &extents, domain.cell_order());
                        let coords: Vec<i128> = std::iter::zip(&tile_lows, cell_offsets)
                            .map(|(low, offset)| low + i128::from(offset))
                            .collect();
                        if in_subarray(&coords) {
                            let source = source_index(&coords, tile_pos, cell_index);
                            let dest = cell_index as usize * cell_size;
                            data[dest..dest + cell_size]
                                .copy_from_slice(column.fixed_cell(source));
                        }
                    }
                    TileData {
                        data,
                        var: None,
                        cell_num: cells_per_tile,
                        mbr: None,
                    }
                };
                tiles.push(tile);
            }
            columns.push(ColumnData {
                name: column.name.clone(),
                compressor: column.compressor,
                level: column.level,
                tiles,
            });
        }
        Ok(columns)
    }

    fn build_sparse(&self, schema: &ArraySchema) -> Result<Vec<ColumnData>, QueryError> {
        let domain = Domain::new(schema);
        let cell_count = self.staged_cells as usize;
        let coords_column = &self.staged[0];

        // Decode every staged coordinate tuple.
        let coords_size = schema.coords_cell_size() as usize;
        let mut coords = Vec::with_capacity(cell_count);
        for index in 0..cell_count {
            let mut offset = index * coords_size;
            let mut cell = Vec::with_capacity(schema.dim_num());
            for dimension in schema.dimensions() {
                let size = dimension.datatype().size() as usize;
                let raw = coords_column.data.get(offset..offset + size).ok_or_else(|| {
                    QueryError::BufferMismatch("truncated coordinate buffer".to_string())
                })?;
                cell.push(dimension.datatype().read_coord(raw));
                offset += size;
            }
            coords.push(cell);
        }

        // Global order: tiles in tile order, cells in cell order within a
        // tile.
        let global_cmp = |a: usize, b: usize| {
            let tile_a = domain.tile_linear(&domain.tile_coords(&coords[a]));
            let tile_b = domain.tile_linear(&domain.tile_coords(&coords[b]));
            tile_a
                .cmp(&tile_b)
                .then_with(|| cmp_coords(&coords[a], &coords[b], domain.cell_order()))
        };

        let mut permutation: Vec<usize> = (0..cell_count).collect();
        match self.layout {
            Layout::Unordered => permutation.sort_by(|&a, &b| global_cmp(a, b)),
            Layout::GlobalOrder => {
                let sorted = permutation
                    .windows(2)
                    .all(|pair| global_cmp(pair[0], pair[1]) != std::cmp::Ordering::Greater);
                if !sorted {
                    return Err(QueryError::UnsortedGlobalOrder);
                }
            }
            _ => unreachable!("validated at query creation"),
        }

        let capacity = schema.capacity() as usize;
        let mut columns = Vec::with_capacity(self.staged.len());
        for (column_index, column) in self.staged.iter().enumerate() {
            let is_coords = column_index == 0;
            let mut tiles = Vec::new();
            for chunk in permutation.chunks(capacity) {
                let tile = if column.var {
                    let mut offsets_tile = Vec::with_capacity(chunk.len() * 8);
                    let mut values = Vec::new();
                    for &cell in chunk {
                        offsets_tile.extend_from_slice(&(values.len() as u64).to_le_bytes());
                        let (start, end) = column.value_range(cell);
                        values.extend_from_slice(&column.data[start..end]);
                    }
                    TileData {
                        data: offsets_tile,
                        var: Some(values),
                        cell_num: chunk.len() as u64,
                        mbr: None,
                    }
                } else {
                    let mut data = Vec::with_capacity(chunk.len() * column.cell_size as usize);
                    for &cell in chunk {
                        data.extend_from_slice(column.fixed_cell(cell));
                    }
                    let mbr = is_coords.then(|| {
                        (0..schema.dim_num())
                            .map(|d| {
                                let mut low = coords[chunk[0]][d];
                                let mut high = low;
                                for &cell in chunk {
                                    let coord = coords[cell][d];
                                    if coord.total_cmp(&low) == std::cmp::Ordering::Less {
                                        low = coord;
                                    }
                                    if coord.total_cmp(&high) == std::cmp::Ordering::Greater {
                                        high = coord;
                                    }
                                }
                                (low, high)
                            })
                            .collect()
                    });
                    TileData {
                        data,
                        var: None,
                        cell_num: chunk.len() as u64,
                        mbr,
                    }
                };
                tiles.push(tile);
            }
            columns.push(ColumnData {
                name: column.name.clone(),
                compressor: column.compressor,
                level: column.level,
                tiles,
            });
        }
        Ok(columns)
    }
}

/// The cell count a buffer holds for `column`, validating its shape.
fn column_cells(column: &StagedColumn, data: &AttributeData<'_>) -> Result<u64, QueryError> {
    if column.var != data.offsets.is_some() {
        return Err(QueryError::BufferMismatch(format!(
            "`{}` needs {} buffer",
            column.name,
            if column.var {
                "an offsets"
            } else {
                "a data-only"
            }
        )));
    }
    match data.offsets {
        Some(offsets) => {
            let monotonic = offsets.windows(2).all(|pair| pair[0] <= pair[1]);
            let in_range = offsets.last().is_none_or(|last| *last <= data.data.len() as u64);
            let starts_at_zero = offsets.first().is_none_or(|first| *first == 0);
            if !(monotonic && in_range && starts_at_zero) {
                return Err(QueryError::BufferMismatch(format!(
                    "invalid offsets for `{}`",
                    column.name
                )));
            }
            Ok(offsets.len() as u64)
        }
        None => {
            if column.cell_size == 0 || data.data.len() as u64 % column.cell_size != 0 {
                return Err(QueryError::BufferMismatch(format!(
                    "`{}` buffer is not a whole number of cells",
                    column.name
                )));
            }
            Ok(data.data.len() as u64 / column.cell_size)
        }
    }
}
