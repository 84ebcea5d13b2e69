//! On-disk naming of the array directory.
//!
//! ```text
//! <array_uri>/
//!   __array_schema        # schema blob
//!   __lock                # filelock sentinel
//!   <fragment_id>/
//!     __coords.tdb        # sparse coordinate tiles
//!     <attr>.tdb          # fixed data or var-length offsets tiles
//!     <attr>.tdb.var      # var-length values tiles
//!     __offsets           # fragment metadata
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::array::attribute::COORDS_NAME;

/// The schema blob file name.
pub const ARRAY_SCHEMA_FILE: &str = "__array_schema";

/// The filelock sentinel file name.
pub const LOCK_FILE: &str = "__lock";

/// The fragment metadata file name.
pub const FRAGMENT_METADATA_FILE: &str = "__offsets";

/// The extension of tile data files.
pub const TILE_FILE_SUFFIX: &str = ".tdb";

/// The extension of variable-length value files.
pub const VAR_FILE_SUFFIX: &str = ".tdb.var";

/// The tile data file name of a column (`__coords.tdb`, `<attr>.tdb`).
#[must_use]
pub(crate) fn column_file_name(column: &str) -> String {
    format!("{column}{TILE_FILE_SUFFIX}")
}

/// The variable-length values file name of a column.
#[must_use]
pub(crate) fn column_var_file_name(column: &str) -> String {
    format!("{column}{VAR_FILE_SUFFIX}")
}

static FRAGMENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A fresh fragment id: a zero-padded millisecond timestamp with a process
/// and sequence suffix, so ids order lexicographically by write time and
/// never collide within or across processes.
#[must_use]
pub(crate) fn new_fragment_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let seq = FRAGMENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("__{millis:020}_{}_{seq:06}", std::process::id())
}

/// True for directory names that hold a fragment.
#[must_use]
pub(crate) fn is_fragment_id(name: &str) -> bool {
    name.starts_with("__") && name != ARRAY_SCHEMA_FILE && name != LOCK_FILE && name != COORDS_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_ids_are_unique_and_ordered() {
        let a = new_fragment_id();
        let b = new_fragment_id();
        assert_ne!(a, b);
        assert!(a < b);
        assert!(is_fragment_id(&a));
        assert!(!is_fragment_id(ARRAY_SCHEMA_FILE));
        assert!(!is_fragment_id(LOCK_FILE));
    }

    #[test]
    fn column_files() {
        assert_eq!(column_file_name("a"), "a.tdb");
        assert_eq!(column_file_name(COORDS_NAME), "__coords.tdb");
        assert_eq!(column_var_file_name("s"), "s.tdb.var");
    }
}
