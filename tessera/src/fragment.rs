//! Fragments: immutable sets of tiles produced by a single finalised write.
//!
//! A fragment directory holds one tile file per column (attribute or
//! coordinates), a values file per variable-length column, and the
//! `__offsets` metadata blob recording every tile's byte range. The metadata
//! blob is written last: a fragment directory without it is incomplete and
//! invisible to reads.

use thiserror::Error;
use tracing::debug;

use tessera_vfs::{Uri, Vfs, VfsError};

use crate::array::compressor::Compressor;
use crate::array::schema::ArraySchema;
use crate::array::dimension::Coord;
use crate::encoding::{Decoder, Encoder};
use crate::storage::{column_file_name, column_var_file_name, FRAGMENT_METADATA_FILE};
use crate::subarray::Subarray;

/// The current fragment metadata blob version.
pub(crate) const FRAGMENT_METADATA_VERSION: u32 = 1;

/// A fragment I/O error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FragmentError {
    /// The metadata blob failed to parse.
    #[error("corrupt fragment metadata: {0}")]
    Corrupt(String),
    /// A requested column is not present in the fragment.
    #[error("missing column `{0}` in fragment")]
    MissingColumn(String),
    /// A requested tile index is out of range.
    #[error("tile {1} out of range for column `{0}`")]
    TileOutOfRange(String, u64),
    /// A filesystem error.
    #[error(transparent)]
    Vfs(#[from] VfsError),
    /// A compression error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The byte range and cell count of one stored tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TileMeta {
    pub offset: u64,
    pub stored_size: u64,
    pub original_size: u64,
    pub cell_num: u64,
}

/// The tile table of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnMeta {
    pub name: String,
    pub tiles: Vec<TileMeta>,
    /// Tile table of the `.var` values file; empty for fixed-size columns.
    pub var_tiles: Vec<TileMeta>,
    /// Per-tile coordinate bounding rectangles (coordinate columns only),
    /// as 8-byte coordinate patterns per dimension.
    pub mbrs: Vec<Vec<(u64, u64)>>,
}

/// The `__offsets` metadata of a fragment.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FragmentMetadata {
    pub dense: bool,
    /// The written subarray as 8-byte coordinate patterns per dimension.
    pub subarray_bits: Vec<(u64, u64)>,
    pub cell_num: u64,
    pub columns: Vec<ColumnMeta>,
}

impl FragmentMetadata {
    pub(crate) fn column(&self, name: &str) -> Result<&ColumnMeta, FragmentError> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .ok_or_else(|| FragmentError::MissingColumn(name.to_string()))
    }

    /// Decode the written subarray with the schema's dimension datatypes.
    pub(crate) fn subarray(&self, schema: &ArraySchema) -> Subarray {
        let ranges = std::iter::zip(&self.subarray_bits, schema.dimensions())
            .map(|((low, high), dimension)| {
                (
                    dimension.datatype().coord_from_bits(*low),
                    dimension.datatype().coord_from_bits(*high),
                )
            })
            .collect();
        Subarray::new(ranges)
    }

    /// Decode a tile's bounding rectangle with the schema's dimension
    /// datatypes.
    pub(crate) fn mbr_subarray(mbr: &[(u64, u64)], schema: &ArraySchema) -> Subarray {
        let ranges = std::iter::zip(mbr, schema.dimensions())
            .map(|((low, high), dimension)| {
                (
                    dimension.datatype().coord_from_bits(*low),
                    dimension.datatype().coord_from_bits(*high),
                )
            })
            .collect();
        Subarray::new(ranges)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.put_u32(FRAGMENT_METADATA_VERSION);
        encoder.put_u8(u8::from(self.dense));
        encoder.put_u32(self.subarray_bits.len() as u32);
        for (low, high) in &self.subarray_bits {
            encoder.put_u64(*low);
            encoder.put_u64(*high);
        }
        encoder.put_u64(self.cell_num);
        encoder.put_u32(self.columns.len() as u32);
        for column in &self.columns {
            encoder.put_str(&column.name);
            for table in [&column.tiles, &column.var_tiles] {
                encoder.put_u64(table.len() as u64);
                for tile in table {
                    encoder.put_u64(tile.offset);
                    encoder.put_u64(tile.stored_size);
                    encoder.put_u64(tile.original_size);
                    encoder.put_u64(tile.cell_num);
                }
            }
            encoder.put_u64(column.mbrs.len() as u64);
            for mbr in &column.mbrs {
                for (low, high) in mbr {
                    encoder.put_u64(*low);
                    encoder.put_u64(*high);
                }
            }
        }
        encoder.into_bytes()
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, FragmentError> {
        let mut decoder = Decoder::new(bytes);
        fn parse<T>(result: Result<T, String>) -> Result<T, FragmentError> {
            result.map_err(FragmentError::Corrupt)
        }

        let version = parse(decoder.get_u32())?;
        if version != FRAGMENT_METADATA_VERSION {
            return Err(FragmentError::Corrupt(format!(
                "unsupported fragment metadata version {version}"
            )));
        }
        let dense = parse(decoder.get_u8())? != 0;
        let dim_count = parse(decoder.get_u32())? as usize;
        let mut subarray_bits = Vec::with_capacity(dim_count);
        for _ in 0..dim_count {
            let low = parse(decoder.get_u64())?;
            let high = parse(decoder.get_u64())?;
            subarray_bits.push((low, high));
        }
        let cell_num = parse(decoder.get_u64())?;
        let column_count = parse(decoder.get_u32())?;
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let name = parse(decoder.get_str())?;
            let mut tables = [Vec::new(), Vec::new()];
            for table in &mut tables {
                let tile_count = parse(decoder.get_u64())?;
                for _ in 0..tile_count {
                    table.push(TileMeta {
                        offset: parse(decoder.get_u64())?,
                        stored_size: parse(decoder.get_u64())?,
                        original_size: parse(decoder.get_u64())?,
                        cell_num: parse(decoder.get_u64())?,
                    });
                }
            }
            let [tiles, var_tiles] = tables;
            let mbr_count = parse(decoder.get_u64())?;
            let mut mbrs = Vec::with_capacity(mbr_count as usize);
            for _ in 0..mbr_count {
                let mut mbr = Vec::with_capacity(dim_count);
                for _ in 0..dim_count {
                    let low = parse(decoder.get_u64())?;
                    let high = parse(decoder.get_u64())?;
                    mbr.push((low, high));
                }
                mbrs.push(mbr);
            }
            columns.push(ColumnMeta {
                name,
                tiles,
                var_tiles,
                mbrs,
            });
        }
        if !decoder.is_empty() {
            return Err(FragmentError::Corrupt(
                "trailing bytes after fragment metadata".to_string(),
            ));
        }
        Ok(Self {
            dense,
            subarray_bits,
            cell_num,
            columns,
        })
    }
}

/// One tile of a column staged for writing.
#[derive(Debug)]
pub(crate) struct TileData {
    pub data: Vec<u8>,
    /// Variable-length values, for var-sized columns.
    pub var: Option<Vec<u8>>,
    pub cell_num: u64,
    /// Coordinate bounding rectangle (coordinate columns only).
    pub mbr: Option<Vec<(Coord, Coord)>>,
}

/// A column staged for writing.
#[derive(Debug)]
pub(crate) struct ColumnData {
    pub name: String,
    pub compressor: Compressor,
    pub level: i32,
    pub tiles: Vec<TileData>,
}

/// Write a fragment directory: compress and append every tile, then commit
/// by writing the metadata blob.
pub(crate) fn write_fragment(
    vfs: &Vfs,
    fragment_uri: &Uri,
    schema: &ArraySchema,
    dense: bool,
    subarray_bits: Vec<(u64, u64)>,
    cell_num: u64,
    columns: Vec<ColumnData>,
) -> Result<FragmentMetadata, FragmentError> {
    debug!("writing fragment `{fragment_uri}` with {cell_num} cells");
    vfs.create_dir(fragment_uri)?;

    let dimensions = schema.dimensions();
    let mut column_metas = Vec::with_capacity(columns.len());
    for column in columns {
        let file = fragment_uri.join(&column_file_name(&column.name))?;
        let var_file = fragment_uri.join(&column_var_file_name(&column.name))?;
        let mut meta = ColumnMeta {
            name: column.name,
            tiles: Vec::with_capacity(column.tiles.len()),
            var_tiles: Vec::new(),
            mbrs: Vec::new(),
        };
        let mut offset = 0;
        let mut var_offset = 0;
        let mut wrote_var = false;
        for tile in column.tiles {
            let compressed = column.compressor.compress(&tile.data, column.level)?;
            vfs.write(&file, &compressed)?;
            meta.tiles.push(TileMeta {
                offset,
                stored_size: compressed.len() as u64,
                original_size: tile.data.len() as u64,
                cell_num: tile.cell_num,
            });
            offset += compressed.len() as u64;

            if let Some(var) = tile.var {
                let compressed = column.compressor.compress(&var, column.level)?;
                vfs.write(&var_file, &compressed)?;
                meta.var_tiles.push(TileMeta {
                    offset: var_offset,
                    stored_size: compressed.len() as u64,
                    original_size: var.len() as u64,
                    cell_num: tile.cell_num,
                });
                var_offset += compressed.len() as u64;
                wrote_var = true;
            }

            if let Some(mbr) = tile.mbr {
                meta.mbrs.push(
                    std::iter::zip(mbr, dimensions)
                        .map(|((low, high), dimension)| {
                            (
                                dimension.datatype().coord_to_bits(low),
                                dimension.datatype().coord_to_bits(high),
                            )
                        })
                        .collect(),
                );
            }
        }
        vfs.sync(&file)?;
        if wrote_var {
            vfs.sync(&var_file)?;
        }
        column_metas.push(meta);
    }

    let metadata = FragmentMetadata {
        dense,
        subarray_bits,
        cell_num,
        columns: column_metas,
    };
    let metadata_uri = fragment_uri.join(FRAGMENT_METADATA_FILE)?;
    vfs.write(&metadata_uri, &metadata.to_bytes())?;
    vfs.sync(&metadata_uri)?;
    Ok(metadata)
}

/// Load the metadata blob of a fragment.
pub(crate) fn load_metadata(vfs: &Vfs, fragment_uri: &Uri) -> Result<FragmentMetadata, FragmentError> {
    let metadata_uri = fragment_uri.join(FRAGMENT_METADATA_FILE)?;
    let size = vfs.file_size(&metadata_uri)?;
    let mut bytes = vec![
        0;
        usize::try_from(size)
            .map_err(|_| FragmentError::Corrupt("metadata blob too large".to_string()))?
    ];
    vfs.read(&metadata_uri, 0, &mut bytes)?;
    FragmentMetadata::from_bytes(&bytes)
}

/// Read and decompress one tile of a column.
pub(crate) fn read_tile(
    vfs: &Vfs,
    fragment_uri: &Uri,
    column: &ColumnMeta,
    compressor: Compressor,
    tile_index: u64,
    var: bool,
) -> Result<Vec<u8>, FragmentError> {
    let table = if var { &column.var_tiles } else { &column.tiles };
    let tile = table
        .get(usize::try_from(tile_index).unwrap_or(usize::MAX))
        .ok_or_else(|| FragmentError::TileOutOfRange(column.name.clone(), tile_index))?;
    let file = if var {
        fragment_uri.join(&column_var_file_name(&column.name))?
    } else {
        fragment_uri.join(&column_file_name(&column.name))?
    };
    let mut stored = vec![0; tile.stored_size as usize];
    vfs.read(&file, tile.offset, &mut stored)?;
    Ok(compressor.decompress(&stored, tile.original_size as usize)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trip() -> Result<(), FragmentError> {
        let metadata = FragmentMetadata {
            dense: true,
            subarray_bits: vec![(1, 4), (1, 4)],
            cell_num: 16,
            columns: vec![
                ColumnMeta {
                    name: "a".to_string(),
                    tiles: vec![
                        TileMeta {
                            offset: 0,
                            stored_size: 10,
                            original_size: 16,
                            cell_num: 4,
                        },
                        TileMeta {
                            offset: 10,
                            stored_size: 12,
                            original_size: 16,
                            cell_num: 4,
                        },
                    ],
                    var_tiles: Vec::new(),
                    mbrs: Vec::new(),
                },
                ColumnMeta {
                    name: "__coords".to_string(),
                    tiles: vec![TileMeta {
                        offset: 0,
                        stored_size: 64,
                        original_size: 64,
                        cell_num: 4,
                    }],
                    var_tiles: Vec::new(),
                    mbrs: vec![vec![(5, 88), (0, 3)]],
                },
            ],
        };
        let bytes = metadata.to_bytes();
        assert_eq!(FragmentMetadata::from_bytes(&bytes)?, metadata);
        Ok(())
    }

    #[test]
    fn corrupt_metadata_rejected() {
        assert!(matches!(
            FragmentMetadata::from_bytes(&[0, 1]),
            Err(FragmentError::Corrupt(_))
        ));
    }
}
