//! Subarrays: hyper-rectangles of dimension ranges bounding reads and
//! writes.

use crate::array::dimension::{Coord, CoordElem};
use crate::array::schema::ArraySchema;

/// An inclusive range per dimension.
///
/// Subarrays are validated against a schema when a query is created: the
/// dimensionality, coordinate datatypes, and domain bounds must all agree.
#[derive(Debug, Clone, PartialEq)]
pub struct Subarray {
    ranges: Vec<(Coord, Coord)>,
}

impl Subarray {
    /// Create a subarray from per-dimension inclusive ranges.
    #[must_use]
    pub fn new(ranges: Vec<(Coord, Coord)>) -> Self {
        Self { ranges }
    }

    /// Create a subarray from `[low, high]` pairs of one coordinate type.
    #[must_use]
    pub fn from_pairs<T: CoordElem>(pairs: &[[T; 2]]) -> Self {
        Self {
            ranges: pairs
                .iter()
                .map(|pair| (pair[0].to_coord(), pair[1].to_coord()))
                .collect(),
        }
    }

    /// The subarray covering the whole domain of `schema`.
    #[must_use]
    pub fn full_domain(schema: &ArraySchema) -> Self {
        Self {
            ranges: schema
                .dimensions()
                .iter()
                .map(|dimension| dimension.domain())
                .collect(),
        }
    }

    /// The per-dimension inclusive ranges.
    #[must_use]
    pub fn ranges(&self) -> &[(Coord, Coord)] {
        &self.ranges
    }

    /// The number of dimensions.
    #[must_use]
    pub fn dim_num(&self) -> usize {
        self.ranges.len()
    }

    /// True if the cell at `coords` lies inside the subarray.
    #[must_use]
    pub(crate) fn contains(&self, coords: &[Coord]) -> bool {
        self.ranges.len() == coords.len()
            && std::iter::zip(&self.ranges, coords).all(|((low, high), coord)| {
                low.total_cmp(coord) != std::cmp::Ordering::Greater
                    && coord.total_cmp(high) != std::cmp::Ordering::Greater
            })
    }

    /// True if the subarray shares at least one cell with `other`.
    #[must_use]
    pub(crate) fn intersects(&self, other: &Self) -> bool {
        self.ranges.len() == other.ranges.len()
            && std::iter::zip(&self.ranges, &other.ranges).all(
                |((low_a, high_a), (low_b, high_b))| {
                    low_a.total_cmp(high_b) != std::cmp::Ordering::Greater
                        && low_b.total_cmp(high_a) != std::cmp::Ordering::Greater
                },
            )
    }

    /// The integral low bound per dimension.
    pub(crate) fn int_lows(&self) -> Option<Vec<i128>> {
        self.ranges.iter().map(|(low, _)| low.as_int()).collect()
    }

    /// The per-dimension cell counts, for integral subarrays.
    pub(crate) fn int_shape(&self) -> Option<Vec<u64>> {
        self.ranges
            .iter()
            .map(|(low, high)| match (low, high) {
                (Coord::Int(low), Coord::Int(high)) if high >= low => {
                    u64::try_from(high - low + 1).ok()
                }
                _ => None,
            })
            .collect()
    }

    /// The total cell count, for integral subarrays.
    pub(crate) fn int_num_cells(&self) -> Option<u64> {
        self.int_shape()?
            .iter()
            .try_fold(1u64, |acc, size| acc.checked_mul(*size))
    }

    /// Validate against `schema`: dimensionality, coordinate families, bound
    /// order, and domain containment.
    ///
    /// Returns a description of the first violation.
    pub(crate) fn check_against(&self, schema: &ArraySchema) -> Result<(), String> {
        if self.ranges.len() != schema.dim_num() {
            return Err(format!(
                "subarray has {} ranges but the schema has {} dimensions",
                self.ranges.len(),
                schema.dim_num()
            ));
        }
        for (range, dimension) in std::iter::zip(&self.ranges, schema.dimensions()) {
            let (low, high) = range;
            let family_matches = match (low, high) {
                (Coord::Int(_), Coord::Int(_)) => dimension.datatype().is_integral(),
                (Coord::Float(_), Coord::Float(_)) => dimension.datatype().is_float(),
                _ => false,
            };
            if !family_matches {
                return Err(format!(
                    "subarray range type does not match dimension `{}`",
                    dimension.name()
                ));
            }
            if low.total_cmp(high) == std::cmp::Ordering::Greater {
                return Err(format!(
                    "inverted subarray range on dimension `{}`",
                    dimension.name()
                ));
            }
            let (domain_low, domain_high) = dimension.domain();
            if domain_low.total_cmp(low) == std::cmp::Ordering::Greater
                || high.total_cmp(&domain_high) == std::cmp::Ordering::Greater
            {
                return Err(format!(
                    "subarray exceeds the domain of dimension `{}`",
                    dimension.name()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::attribute::Attribute;
    use crate::array::datatype::Datatype;
    use crate::array::dimension::Dimension;
    use crate::array::layout::ArrayType;

    fn schema() -> ArraySchema {
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema
            .add_dimension(Dimension::new("rows", [1i64, 4], 2))
            .add_dimension(Dimension::new("cols", [1i64, 4], 2))
            .add_attribute(Attribute::new("a", Datatype::Int32));
        schema
    }

    #[test]
    fn geometry() {
        let subarray = Subarray::from_pairs(&[[3i64, 4], [2, 4]]);
        assert_eq!(subarray.int_shape(), Some(vec![2, 3]));
        assert_eq!(subarray.int_num_cells(), Some(6));
        assert!(subarray.contains(&[Coord::Int(3), Coord::Int(4)]));
        assert!(!subarray.contains(&[Coord::Int(2), Coord::Int(2)]));
        assert!(subarray.intersects(&Subarray::from_pairs(&[[4i64, 9], [1, 2]])));
        assert!(!subarray.intersects(&Subarray::from_pairs(&[[1i64, 2], [1, 1]])));
    }

    #[test]
    fn validation() {
        let schema = schema();
        assert!(Subarray::from_pairs(&[[1i64, 4], [1, 4]])
            .check_against(&schema)
            .is_ok());
        assert!(Subarray::from_pairs(&[[1i64, 4]])
            .check_against(&schema)
            .is_err());
        assert!(Subarray::from_pairs(&[[1i64, 5], [1, 4]])
            .check_against(&schema)
            .is_err());
        assert!(Subarray::from_pairs(&[[4i64, 1], [1, 4]])
            .check_against(&schema)
            .is_err());
        assert!(Subarray::from_pairs(&[[1.0f64, 2.0], [1.0, 2.0]])
            .check_against(&schema)
            .is_err());
    }

    #[test]
    fn full_domain_covers_schema() {
        let subarray = Subarray::full_domain(&schema());
        assert_eq!(subarray.int_num_cells(), Some(16));
    }
}
