//! Coordinate ↔ tile ↔ cell-within-tile translation.
//!
//! Every read and write agrees on this mapping: a cell's coordinates select
//! a tile via the per-dimension tile extents, tiles linearise over the domain
//! in the schema's tile order, and cells linearise within a tile in the
//! schema's cell order. Row-major treats dimension `0` as most significant;
//! column-major treats the last dimension as most significant.

use crate::array::dimension::Coord;
use crate::array::layout::Layout;
use crate::array::schema::ArraySchema;
use crate::subarray::Subarray;

/// Linearise `indices` over `shape` in `order`.
///
/// `order` must be row- or column-major.
pub(crate) fn ravel(indices: &[u64], shape: &[u64], order: Layout) -> u64 {
    debug_assert_eq!(indices.len(), shape.len());
    match order {
        Layout::RowMajor => std::iter::zip(indices, shape).fold(0, |acc, (i, s)| acc * s + i),
        Layout::ColMajor => std::iter::zip(indices, shape)
            .rev()
            .fold(0, |acc, (i, s)| acc * s + i),
        Layout::GlobalOrder | Layout::Unordered => unreachable!("not a storage order"),
    }
}

/// Invert [`ravel`]: the multi-index of `index` over `shape` in `order`.
pub(crate) fn unravel(mut index: u64, shape: &[u64], order: Layout) -> Vec<u64> {
    let mut indices = vec![0; shape.len()];
    match order {
        Layout::RowMajor => {
            for d in (0..shape.len()).rev() {
                indices[d] = index % shape[d];
                index /= shape[d];
            }
        }
        Layout::ColMajor => {
            for d in 0..shape.len() {
                indices[d] = index % shape[d];
                index /= shape[d];
            }
        }
        Layout::GlobalOrder | Layout::Unordered => unreachable!("not a storage order"),
    }
    indices
}

/// Compare two coordinate tuples in a cell order.
///
/// Row-major compares dimension `0` first; column-major compares the last
/// dimension first.
pub(crate) fn cmp_coords(a: &[Coord], b: &[Coord], order: Layout) -> std::cmp::Ordering {
    debug_assert_eq!(a.len(), b.len());
    let pairs: Box<dyn Iterator<Item = (&Coord, &Coord)>> = match order {
        Layout::ColMajor => Box::new(std::iter::zip(a, b).rev()),
        _ => Box::new(std::iter::zip(a, b)),
    };
    for (coord_a, coord_b) in pairs {
        let ordering = coord_a.total_cmp(coord_b);
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

/// The tiling geometry of a schema's domain.
#[derive(Debug, Clone)]
pub(crate) struct Domain {
    lows: Vec<Coord>,
    extents: Vec<Coord>,
    tiles_per_dim: Vec<u64>,
    tile_order: Layout,
    cell_order: Layout,
}

impl Domain {
    /// Build the domain geometry of a checked schema.
    pub(crate) fn new(schema: &ArraySchema) -> Self {
        let dimensions = schema.dimensions();
        let tiles_per_dim = dimensions
            .iter()
            .map(|dimension| {
                match (dimension.domain(), dimension.tile_extent()) {
                    ((Coord::Int(low), Coord::Int(high)), Coord::Int(extent)) => {
                        let cells = (high - low + 1).max(0) as u128;
                        cells.div_ceil(extent.max(1) as u128) as u64
                    }
                    ((Coord::Float(low), Coord::Float(high)), Coord::Float(extent)) => {
                        (((high - low) / extent).floor() as u64) + 1
                    }
                    _ => 1,
                }
                .max(1)
            })
            .collect();
        Self {
            lows: dimensions.iter().map(|d| d.domain().0).collect(),
            extents: dimensions.iter().map(|d| d.tile_extent()).collect(),
            tiles_per_dim,
            tile_order: schema.tile_order(),
            cell_order: schema.cell_order(),
        }
    }

    pub(crate) fn dim_num(&self) -> usize {
        self.lows.len()
    }

    pub(crate) fn cell_order(&self) -> Layout {
        self.cell_order
    }

    /// The tile extents of the integral dimensions.
    pub(crate) fn int_extents(&self) -> Option<Vec<u64>> {
        self.extents
            .iter()
            .map(|extent| extent.as_int().and_then(|e| u64::try_from(e).ok()))
            .collect()
    }

    /// The tile index of `coord` along dimension `d`.
    pub(crate) fn tile_index(&self, d: usize, coord: Coord) -> u64 {
        match (self.lows[d], self.extents[d], coord) {
            (Coord::Int(low), Coord::Int(extent), Coord::Int(x)) => {
                ((x - low) / extent).max(0) as u64
            }
            (Coord::Float(low), Coord::Float(extent), Coord::Float(x)) => {
                ((x - low) / extent).floor().max(0.0) as u64
            }
            _ => 0,
        }
    }

    /// The per-dimension tile indices of a cell.
    pub(crate) fn tile_coords(&self, coords: &[Coord]) -> Vec<u64> {
        coords
            .iter()
            .enumerate()
            .map(|(d, coord)| self.tile_index(d, *coord))
            .collect()
    }

    /// The global tile id: the tile coordinates linearised in tile order.
    pub(crate) fn tile_linear(&self, tile_coords: &[u64]) -> u64 {
        ravel(tile_coords, &self.tiles_per_dim, self.tile_order)
    }

    /// The low cell coordinate of tile `tile_index` along dimension `d`.
    pub(crate) fn tile_low(&self, d: usize, tile_index: u64) -> Coord {
        match (self.lows[d], self.extents[d]) {
            (Coord::Int(low), Coord::Int(extent)) => {
                Coord::Int(low + i128::from(tile_index) * extent)
            }
            (Coord::Float(low), Coord::Float(extent)) => {
                Coord::Float((tile_index as f64).mul_add(extent, low))
            }
            _ => self.lows[d],
        }
    }

    /// The cell's linear index within its tile, in the cell order.
    ///
    /// Integral dimensions only.
    pub(crate) fn cell_in_tile(&self, coords: &[i128], tile_coords: &[u64]) -> u64 {
        let offsets: Vec<u64> = (0..self.dim_num())
            .map(|d| {
                let Coord::Int(tile_low) = self.tile_low(d, tile_coords[d]) else {
                    return 0;
                };
                (coords[d] - tile_low).max(0) as u64
            })
            .collect();
        let extents = self.int_extents().unwrap_or_else(|| vec![1; self.dim_num()]);
        ravel(&offsets, &extents, self.cell_order)
    }

    /// The rectangular range of tiles intersecting `subarray`, iterated in
    /// tile order.
    pub(crate) fn tile_range(&self, subarray: &Subarray) -> TileRange {
        let mut lo = Vec::with_capacity(self.dim_num());
        let mut shape = Vec::with_capacity(self.dim_num());
        for (d, (low, high)) in subarray.ranges().iter().enumerate() {
            let tile_lo = self.tile_index(d, *low);
            let tile_hi = self.tile_index(d, *high).max(tile_lo);
            lo.push(tile_lo);
            shape.push(tile_hi - tile_lo + 1);
        }
        TileRange {
            lo,
            shape,
            order: self.tile_order,
        }
    }

    /// Expand `subarray` to the tile boundaries containing it.
    ///
    /// Integral dimensions only.
    pub(crate) fn expand_to_tiles(&self, subarray: &Subarray) -> Subarray {
        let ranges = subarray
            .ranges()
            .iter()
            .enumerate()
            .map(|(d, (low, high))| {
                match (self.lows[d], self.extents[d], low, high) {
                    (Coord::Int(domain_low), Coord::Int(extent), Coord::Int(lo), Coord::Int(hi)) => {
                        let tile_lo = (lo - domain_low) / extent;
                        let tile_hi = (hi - domain_low) / extent;
                        (
                            Coord::Int(domain_low + tile_lo * extent),
                            Coord::Int(domain_low + (tile_hi + 1) * extent - 1),
                        )
                    }
                    _ => (*low, *high),
                }
            })
            .collect();
        Subarray::new(ranges)
    }
}

/// A rectangular range of tile coordinates with positional access in a tile
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TileRange {
    lo: Vec<u64>,
    shape: Vec<u64>,
    order: Layout,
}

impl TileRange {
    /// The number of tiles in the range.
    pub(crate) fn len(&self) -> u64 {
        self.shape.iter().product()
    }

    /// The tile coordinates of the `position`-th tile of the range.
    pub(crate) fn tile_at(&self, position: u64) -> Vec<u64> {
        let offsets = unravel(position, &self.shape, self.order);
        std::iter::zip(&self.lo, offsets)
            .map(|(lo, offset)| lo + offset)
            .collect()
    }

    /// The position of `tile_coords` within the range, if contained.
    pub(crate) fn position_of(&self, tile_coords: &[u64]) -> Option<u64> {
        let mut offsets = Vec::with_capacity(self.lo.len());
        for (d, coord) in tile_coords.iter().enumerate() {
            let offset = coord.checked_sub(self.lo[d])?;
            if offset >= self.shape[d] {
                return None;
            }
            offsets.push(offset);
        }
        Some(ravel(&offsets, &self.shape, self.order))
    }

    /// Iterate the tile coordinates of the range in order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = Vec<u64>> + '_ {
        (0..self.len()).map(|position| self.tile_at(position))
    }
}
