//! The read path: tile selection, fetch, and buffer filling.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::debug;

use tessera_vfs::{Uri, Vfs};

use crate::array::attribute::{Attribute, COORDS_NAME};
use crate::array::dimension::Coord;
use crate::array::layout::{ArrayMode, ArrayType, Layout};
use crate::array::schema::ArraySchema;
use crate::array::Array;
use crate::domain::{cmp_coords, unravel, Domain, TileRange};
use crate::fragment::{self, FragmentError, FragmentMetadata};
use crate::query::{AttributeBuffer, BufferSizes, QueryError, QueryStatus};
use crate::subarray::Subarray;

/// `(fragment, column, tile, is_var_tile)`.
type TileKey = (usize, String, u64, bool);

struct FragmentState {
    uri: Uri,
    metadata: FragmentMetadata,
    subarray: Subarray,
    tile_range: TileRange,
}

struct SparseCell {
    coords: Vec<Coord>,
    fragment: usize,
    tile: u64,
    cell: u64,
}

enum Cursor {
    Dense {
        lows: Vec<i128>,
        shape: Vec<u64>,
        total: u64,
        pos: u64,
    },
    Sparse {
        cells: Vec<SparseCell>,
        pos: usize,
    },
}

struct ReadState {
    fragments: Vec<FragmentState>,
    tiles: HashMap<TileKey, Vec<u8>>,
    cursor: Cursor,
}

/// A stateful read of a subarray into caller buffers.
///
/// A submission fills as many whole cells as the buffers hold, in the query
/// layout over the subarray. When a buffer fills before the result ends the
/// query turns [`QueryStatus::Incomplete`] and remembers its position; the
/// next submission resumes from it. Cell values resolve to the newest
/// fragment that wrote them; dense cells never written read back as fill
/// values.
pub struct ReadQuery<'a> {
    array: &'a Array,
    subarray: Subarray,
    layout: Layout,
    attrs: Vec<String>,
    status: QueryStatus,
    sizes: Vec<BufferSizes>,
    state: Option<ReadState>,
}

impl<'a> ReadQuery<'a> {
    pub(crate) fn new(
        array: &'a Array,
        subarray: Subarray,
        layout: Layout,
        attrs: &[&str],
    ) -> Result<Self, QueryError> {
        if array.mode() != ArrayMode::Read {
            return Err(QueryError::WrongMode("reading"));
        }
        if !matches!(layout, Layout::RowMajor | Layout::ColMajor) {
            return Err(QueryError::InvalidLayout(layout, "read"));
        }
        let schema = array.schema();
        subarray
            .check_against(schema)
            .map_err(QueryError::InvalidSubarray)?;
        for name in attrs {
            if *name == COORDS_NAME {
                if schema.array_type() == ArrayType::Dense {
                    return Err(QueryError::CoordsOnDenseArray(COORDS_NAME.to_string()));
                }
            } else if schema.attribute(name).is_none() {
                return Err(QueryError::AttributeNotFound((*name).to_string()));
            }
        }
        Ok(Self {
            array,
            subarray,
            layout,
            attrs: attrs.iter().map(|name| (*name).to_string()).collect(),
            status: QueryStatus::Uninitialized,
            sizes: vec![BufferSizes::default(); attrs.len()],
            state: None,
        })
    }

    /// The query status after the last submission.
    #[must_use]
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// How much of each caller buffer the last submission filled, in
    /// attribute order.
    #[must_use]
    pub fn buffer_sizes(&self) -> &[BufferSizes] {
        &self.sizes
    }

    /// Restart the query over a new subarray.
    pub fn reset_subarray(&mut self, subarray: Subarray) -> Result<(), QueryError> {
        subarray
            .check_against(self.array.schema())
            .map_err(QueryError::InvalidSubarray)?;
        self.subarray = subarray;
        self.restart();
        Ok(())
    }

    /// Restart the query over a new attribute set.
    pub fn reset_attributes(&mut self, attrs: &[&str]) -> Result<(), QueryError> {
        let schema = self.array.schema();
        for name in attrs {
            if *name == COORDS_NAME {
                if schema.array_type() == ArrayType::Dense {
                    return Err(QueryError::CoordsOnDenseArray(COORDS_NAME.to_string()));
                }
            } else if schema.attribute(name).is_none() {
                return Err(QueryError::AttributeNotFound((*name).to_string()));
            }
        }
        self.attrs = attrs.iter().map(|name| (*name).to_string()).collect();
        self.restart();
        Ok(())
    }

    fn restart(&mut self) {
        self.state = None;
        self.status = QueryStatus::Uninitialized;
        self.sizes = vec![BufferSizes::default(); self.attrs.len()];
    }

    /// Submit the query, filling `buffers` from the current position.
    ///
    /// Buffers must match the query's attributes in order and kind. Returns
    /// the resulting status; on error the query is [`QueryStatus::Failed`]
    /// and cannot be resubmitted.
    pub fn submit(
        &mut self,
        buffers: &mut [AttributeBuffer<'_>],
    ) -> Result<QueryStatus, QueryError> {
        match self.status {
            QueryStatus::Failed => return Err(QueryError::AlreadyFailed),
            QueryStatus::Completed => {
                self.sizes = vec![BufferSizes::default(); self.attrs.len()];
                return Ok(QueryStatus::Completed);
            }
            _ => {}
        }
        self.status = QueryStatus::InProgress;
        match self.submit_inner(buffers) {
            Ok(status) => {
                self.status = status;
                Ok(status)
            }
            Err(error) => {
                self.status = QueryStatus::Failed;
                Err(error)
            }
        }
    }

    fn submit_inner(
        &mut self,
        buffers: &mut [AttributeBuffer<'_>],
    ) -> Result<QueryStatus, QueryError> {
        let schema = self.array.schema();
        let columns = self.columns(schema)?;
        check_buffers(&columns, buffers)?;
        if self.state.is_none() {
            self.state = Some(self.init_state(schema)?);
        }
        for sizes in &mut self.sizes {
            *sizes = BufferSizes::default();
        }

        let domain = Domain::new(schema);
        let vfs = self.array.vfs();
        let state = self.state.as_mut().expect("state initialised above");
        let ReadState {
            fragments,
            tiles,
            cursor,
        } = state;

        match cursor {
            Cursor::Dense {
                lows,
                shape,
                total,
                pos,
            } => {
                while *pos < *total {
                    let offsets = unravel(*pos, shape, self.layout);
                    let cell: Vec<i128> = std::iter::zip(lows.iter(), offsets)
                        .map(|(low, offset)| low + i128::from(offset))
                        .collect();
                    let coords: Vec<Coord> = cell.iter().map(|&c| Coord::Int(c)).collect();
                    let source = fragments
                        .iter()
                        .enumerate()
                        .rev()
                        .find(|(_, fragment)| fragment.subarray.contains(&coords))
                        .map(|(index, _)| index);

                    let mut values = Vec::with_capacity(columns.len());
                    for column in &columns {
                        let Column::Attr(attribute) = column else {
                            unreachable!("coords rejected for dense reads");
                        };
                        let value = match source {
                            None => attribute.fill_cell(),
                            Some(fragment_index) => {
                                let fragment = &fragments[fragment_index];
                                let tile_coords = domain.tile_coords(&coords);
                                let tile_pos = fragment
                                    .tile_range
                                    .position_of(&tile_coords)
                                    .ok_or_else(|| missing_tile(&fragment.uri))?;
                                let cell_index = domain.cell_in_tile(&cell, &tile_coords);
                                read_cell_value(
                                    vfs,
                                    tiles,
                                    fragment_index,
                                    fragment,
                                    attribute,
                                    tile_pos,
                                    cell_index,
                                )?
                            }
                        };
                        values.push(value);
                    }

                    if !fits(&columns, &values, &self.sizes, buffers) {
                        return Ok(QueryStatus::Incomplete);
                    }
                    store_cell(&values, &mut self.sizes, buffers);
                    *pos += 1;
                }
                debug!("dense read completed after {total} cells");
                Ok(QueryStatus::Completed)
            }
            Cursor::Sparse { cells, pos } => {
                while *pos < cells.len() {
                    let sparse_cell = &cells[*pos];
                    let fragment = &fragments[sparse_cell.fragment];

                    let mut values = Vec::with_capacity(columns.len());
                    for column in &columns {
                        let value = match column {
                            Column::Coords => {
                                let mut encoded = Vec::new();
                                for (dimension, coord) in
                                    std::iter::zip(schema.dimensions(), &sparse_cell.coords)
                                {
                                    dimension.datatype().write_coord(*coord, &mut encoded);
                                }
                                encoded
                            }
                            Column::Attr(attribute) => read_cell_value(
                                vfs,
                                tiles,
                                sparse_cell.fragment,
                                fragment,
                                attribute,
                                sparse_cell.tile,
                                sparse_cell.cell,
                            )?,
                        };
                        values.push(value);
                    }

                    if !fits(&columns, &values, &self.sizes, buffers) {
                        return Ok(QueryStatus::Incomplete);
                    }
                    store_cell(&values, &mut self.sizes, buffers);
                    *pos += 1;
                }
                debug!("sparse read completed after {} cells", cells.len());
                Ok(QueryStatus::Completed)
            }
        }
    }

    /// Resolve the requested attribute names against the schema.
    fn columns<'s>(&self, schema: &'s ArraySchema) -> Result<Vec<Column<'s>>, QueryError> {
        self.attrs
            .iter()
            .map(|name| {
                if name == COORDS_NAME {
                    Ok(Column::Coords)
                } else {
                    schema
                        .attribute(name)
                        .map(Column::Attr)
                        .ok_or_else(|| QueryError::AttributeNotFound(name.clone()))
                }
            })
            .collect()
    }

    fn init_state(&self, schema: &ArraySchema) -> Result<ReadState, QueryError> {
        let vfs = self.array.vfs();
        let domain = Domain::new(schema);

        let mut fragments = Vec::new();
        for uri in self.array.fragment_uris()? {
            let metadata = fragment::load_metadata(vfs, &uri)?;
            let subarray = metadata.subarray(schema);
            if metadata.dense && !subarray.intersects(&self.subarray) {
                continue;
            }
            let tile_range = domain.tile_range(&subarray);
            fragments.push(FragmentState {
                uri,
                metadata,
                subarray,
                tile_range,
            });
        }
        debug!(
            "read over {} fragment(s) of `{}`",
            fragments.len(),
            self.array.uri()
        );

        let mut tiles = HashMap::new();
        let cursor = match schema.array_type() {
            ArrayType::Dense => {
                // Fetch every intersecting tile of every fragment up front;
                // each fetch is a VFS range read, which parallelises
                // internally.
                let query_range = domain.tile_range(&self.subarray);
                for (fragment_index, fragment) in fragments.iter().enumerate() {
                    for (tile_pos, tile_coords) in fragment.tile_range.iter().enumerate() {
                        if query_range.position_of(&tile_coords).is_none() {
                            continue;
                        }
                        for name in &self.attrs {
                            let attribute = schema
                                .attribute(name)
                                .ok_or_else(|| QueryError::AttributeNotFound(name.clone()))?;
                            load_tile(
                                vfs,
                                &mut tiles,
                                (fragment_index, name.clone(), tile_pos as u64, false),
                                fragment,
                                attribute,
                                false,
                            )?;
                            if attribute.var_sized() {
                                load_tile(
                                    vfs,
                                    &mut tiles,
                                    (fragment_index, name.clone(), tile_pos as u64, true),
                                    fragment,
                                    attribute,
                                    true,
                                )?;
                            }
                        }
                    }
                }

                let lows = self
                    .subarray
                    .int_lows()
                    .ok_or_else(|| QueryError::InvalidSubarray("non-integral bounds".to_string()))?;
                let shape = self
                    .subarray
                    .int_shape()
                    .ok_or_else(|| QueryError::InvalidSubarray("non-integral bounds".to_string()))?;
                let total = shape.iter().product();
                Cursor::Dense {
                    lows,
                    shape,
                    total,
                    pos: 0,
                }
            }
            ArrayType::Sparse => Cursor::Sparse {
                cells: self.collect_sparse_cells(schema, vfs, &fragments)?,
                pos: 0,
            },
        };

        Ok(ReadState {
            fragments,
            tiles,
            cursor,
        })
    }

    /// Gather the in-range cells of every fragment, sorted in the query
    /// layout. The sort is stable, so duplicate coordinates keep fragment
    /// order and then write order.
    fn collect_sparse_cells(
        &self,
        schema: &ArraySchema,
        vfs: &Vfs,
        fragments: &[FragmentState],
    ) -> Result<Vec<SparseCell>, QueryError> {
        let coords_compressor = schema.dimensions()[0].compressor();
        let cell_size = schema.coords_cell_size() as usize;
        let mut cells = Vec::new();
        for (fragment_index, fragment) in fragments.iter().enumerate() {
            let column = fragment.metadata.column(COORDS_NAME)?;
            for (tile_index, tile) in column.tiles.iter().enumerate() {
                if let Some(mbr) = column.mbrs.get(tile_index) {
                    let bounds = FragmentMetadata::mbr_subarray(mbr, schema);
                    if !bounds.intersects(&self.subarray) {
                        continue;
                    }
                }
                let bytes = fragment::read_tile(
                    vfs,
                    &fragment.uri,
                    column,
                    coords_compressor,
                    tile_index as u64,
                    false,
                )?;
                for cell_index in 0..tile.cell_num {
                    let mut offset = cell_index as usize * cell_size;
                    let mut coords = Vec::with_capacity(schema.dim_num());
                    for dimension in schema.dimensions() {
                        let size = dimension.datatype().size() as usize;
                        let raw = bytes
                            .get(offset..offset + size)
                            .ok_or_else(|| truncated_tile(&fragment.uri))?;
                        coords.push(dimension.datatype().read_coord(raw));
                        offset += size;
                    }
                    if self.subarray.contains(&coords) {
                        cells.push(SparseCell {
                            coords,
                            fragment: fragment_index,
                            tile: tile_index as u64,
                            cell: cell_index,
                        });
                    }
                }
            }
        }
        cells.sort_by(|a, b| cmp_coords(&a.coords, &b.coords, self.layout));
        Ok(cells)
    }
}

enum Column<'s> {
    Coords,
    Attr(&'s Attribute),
}

impl Column<'_> {
    fn var_sized(&self) -> bool {
        match self {
            Column::Coords => false,
            Column::Attr(attribute) => attribute.var_sized(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Column::Coords => COORDS_NAME,
            Column::Attr(attribute) => attribute.name(),
        }
    }
}

fn check_buffers(
    columns: &[Column<'_>],
    buffers: &[AttributeBuffer<'_>],
) -> Result<(), QueryError> {
    if columns.len() != buffers.len() {
        return Err(QueryError::BufferMismatch(format!(
            "{} buffers supplied for {} attributes",
            buffers.len(),
            columns.len()
        )));
    }
    for (column, buffer) in std::iter::zip(columns, buffers) {
        if column.name() != buffer.name {
            return Err(QueryError::BufferMismatch(format!(
                "buffer `{}` does not match attribute `{}`",
                buffer.name,
                column.name()
            )));
        }
        if column.var_sized() != buffer.offsets.is_some() {
            return Err(QueryError::BufferMismatch(format!(
                "attribute `{}` needs {} buffer",
                column.name(),
                if column.var_sized() {
                    "an offsets"
                } else {
                    "a data-only"
                }
            )));
        }
    }
    Ok(())
}

/// True if one more cell with the given per-attribute `values` fits every
/// buffer.
fn fits(
    columns: &[Column<'_>],
    values: &[Vec<u8>],
    sizes: &[BufferSizes],
    buffers: &[AttributeBuffer<'_>],
) -> bool {
    itertools::izip!(columns, values, sizes, buffers).all(|(column, value, size, buffer)| {
        let data_fits = size.data_bytes + value.len() <= buffer.data.len();
        if column.var_sized() {
            let offsets_len = buffer.offsets.as_ref().map_or(0, |offsets| offsets.len());
            data_fits && size.offsets < offsets_len
        } else {
            data_fits
        }
    })
}

fn store_cell(values: &[Vec<u8>], sizes: &mut [BufferSizes], buffers: &mut [AttributeBuffer<'_>]) {
    for (value, size, buffer) in itertools::izip!(values, sizes, buffers) {
        if let Some(offsets) = buffer.offsets.as_mut() {
            offsets[size.offsets] = size.data_bytes as u64;
            size.offsets += 1;
        }
        buffer.data[size.data_bytes..size.data_bytes + value.len()].copy_from_slice(value);
        size.data_bytes += value.len();
    }
}

fn missing_tile(uri: &Uri) -> QueryError {
    FragmentError::Corrupt(format!("fragment `{uri}` lacks a tile it claims to cover")).into()
}

fn truncated_tile(uri: &Uri) -> QueryError {
    FragmentError::Corrupt(format!("truncated coordinate tile in `{uri}`")).into()
}

/// Fetch one cell's value bytes from a fragment tile, loading and caching
/// the decompressed tile on first use.
fn read_cell_value(
    vfs: &Vfs,
    tiles: &mut HashMap<TileKey, Vec<u8>>,
    fragment_index: usize,
    fragment: &FragmentState,
    attribute: &Attribute,
    tile_pos: u64,
    cell_index: u64,
) -> Result<Vec<u8>, QueryError> {
    let column = fragment.metadata.column(attribute.name())?;

    let (start, end) = {
        let data_tile = load_tile(
            vfs,
            tiles,
            (fragment_index, attribute.name().to_string(), tile_pos, false),
            fragment,
            attribute,
            false,
        )?;
        if let Some(cell_size) = attribute.cell_size() {
            let start = (cell_index * cell_size) as usize;
            let value = data_tile
                .get(start..start + cell_size as usize)
                .ok_or_else(|| truncated_value(&fragment.uri, attribute))?;
            return Ok(value.to_vec());
        }
        // Variable length: the data tile holds per-cell start offsets into
        // the values tile.
        let tile_meta = column
            .tiles
            .get(tile_pos as usize)
            .ok_or_else(|| missing_tile(&fragment.uri))?;
        let var_meta = column
            .var_tiles
            .get(tile_pos as usize)
            .ok_or_else(|| missing_tile(&fragment.uri))?;
        let start = read_offset(data_tile, cell_index)
            .ok_or_else(|| truncated_value(&fragment.uri, attribute))?;
        let end = if cell_index + 1 < tile_meta.cell_num {
            read_offset(data_tile, cell_index + 1)
                .ok_or_else(|| truncated_value(&fragment.uri, attribute))?
        } else {
            var_meta.original_size
        };
        (start as usize, end as usize)
    };

    let var_tile = load_tile(
        vfs,
        tiles,
        (fragment_index, attribute.name().to_string(), tile_pos, true),
        fragment,
        attribute,
        true,
    )?;
    Ok(var_tile
        .get(start..end)
        .ok_or_else(|| truncated_value(&fragment.uri, attribute))?
        .to_vec())
}

fn truncated_value(uri: &Uri, attribute: &Attribute) -> QueryError {
    FragmentError::Corrupt(format!(
        "truncated tile for attribute `{}` in `{uri}`",
        attribute.name()
    ))
    .into()
}

fn read_offset(tile: &[u8], cell_index: u64) -> Option<u64> {
    let start = usize::try_from(cell_index).ok()? * 8;
    let bytes = tile.get(start..start + 8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

fn load_tile<'t>(
    vfs: &Vfs,
    tiles: &'t mut HashMap<TileKey, Vec<u8>>,
    key: TileKey,
    fragment: &FragmentState,
    attribute: &Attribute,
    var: bool,
) -> Result<&'t Vec<u8>, QueryError> {
    match tiles.entry(key) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let column = fragment.metadata.column(attribute.name())?;
            let bytes = fragment::read_tile(
                vfs,
                &fragment.uri,
                column,
                attribute.compressor(),
                entry.key().2,
                var,
            )?;
            Ok(entry.insert(bytes))
        }
    }
}
