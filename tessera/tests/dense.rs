#![allow(missing_docs)]

use std::error::Error;
use std::sync::Arc;

use tessera::array::attribute::{Attribute, VAR_NUM};
use tessera::array::compressor::Compressor;
use tessera::array::datatype::Datatype;
use tessera::array::dimension::Dimension;
use tessera::array::layout::{ArrayMode, ArrayType, Layout};
use tessera::array::schema::ArraySchema;
use tessera::array::Array;
use tessera::query::{AttributeBuffer, AttributeData, QueryStatus};
use tessera::vfs::{MemoryBackend, Scheme, Uri, Vfs};
use tessera::Subarray;

fn memory_vfs() -> Result<Arc<Vfs>, Box<dyn Error>> {
    let vfs = Arc::new(
        Vfs::builder()
            .register(Scheme::ObjectStore, Arc::new(MemoryBackend::new()))
            .build(),
    );
    vfs.create_bucket(&Uri::new("s3://test")?)?;
    Ok(vfs)
}

fn int32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn int32_values(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// 4x4 int32 array of 2x2 tiles: `rows: [1, 4] extent 2`, `cols: [1, 4]
/// extent 2`, one attribute `a`.
fn schema_4x4() -> ArraySchema {
    let mut schema = ArraySchema::new(ArrayType::Dense);
    schema
        .add_dimension(Dimension::new("rows", [1i64, 4], 2))
        .add_dimension(Dimension::new("cols", [1i64, 4], 2))
        .add_attribute(Attribute::new("a", Datatype::Int32));
    schema
}

fn create_4x4(vfs: &Arc<Vfs>, uri: &Uri) -> Result<(), Box<dyn Error>> {
    Array::create(vfs, uri, &schema_4x4())?;
    Ok(())
}

fn write_row_major(vfs: &Arc<Vfs>, uri: &Uri, values: &[i32]) -> Result<(), Box<dyn Error>> {
    let array = Array::open(Arc::clone(vfs), uri, ArrayMode::Write)?;
    let mut write = array.write_query(Layout::RowMajor)?;
    write.submit(&[AttributeData::fixed("a", &int32_bytes(values))])?;
    write.finalize()?;
    array.close()?;
    Ok(())
}

#[test]
fn write_then_read_full_domain() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    let uri = Uri::new("s3://test/dense_full")?;
    create_4x4(&vfs, &uri)?;

    let values: Vec<i32> = (1..=16).collect();
    write_row_major(&vfs, &uri, &values)?;

    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    let mut out = vec![0u8; 16 * 4];
    let mut read = array.read_query(
        Subarray::from_pairs(&[[1i64, 4], [1, 4]]),
        Layout::RowMajor,
        &["a"],
    )?;
    let status = read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
    assert_eq!(status, QueryStatus::Completed);
    assert_eq!(read.buffer_sizes()[0].data_bytes, 64);
    assert_eq!(int32_values(&out), values);
    Ok(())
}

#[test]
fn incomplete_read_resumes() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    let uri = Uri::new("s3://test/dense_incomplete")?;
    create_4x4(&vfs, &uri)?;

    // Write 0..16 in global order: tile by tile, row-major inside tiles.
    let array = Array::open(Arc::clone(&vfs), &uri, ArrayMode::Write)?;
    let mut write = array.write_query(Layout::GlobalOrder)?;
    let values: Vec<i32> = (0..16).collect();
    write.submit(&[AttributeData::fixed("a", &int32_bytes(&values))])?;
    write.finalize()?;
    array.close()?;

    // Column-major read of rows [3, 4], cols [2, 4] into a two-cell buffer:
    // three submissions, resuming where the buffer filled.
    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    let mut read = array.read_query(
        Subarray::from_pairs(&[[3i64, 4], [2, 4]]),
        Layout::ColMajor,
        &["a"],
    )?;
    let mut results = Vec::new();
    let mut statuses = Vec::new();
    loop {
        let mut out = vec![0u8; 2 * 4];
        let status = read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
        let filled = read.buffer_sizes()[0].data_bytes;
        results.push(int32_values(&out[..filled]));
        statuses.push(status);
        if status != QueryStatus::Incomplete {
            break;
        }
    }
    assert_eq!(results, vec![vec![9, 11], vec![12, 14], vec![13, 15]]);
    assert_eq!(
        statuses,
        vec![
            QueryStatus::Incomplete,
            QueryStatus::Incomplete,
            QueryStatus::Completed
        ]
    );
    Ok(())
}

#[test]
fn partial_write_fills_unwritten_cells() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    let uri = Uri::new("s3://test/dense_partial")?;
    create_4x4(&vfs, &uri)?;

    // Write only the lower-right 2x3 region.
    let array = Array::open(Arc::clone(&vfs), &uri, ArrayMode::Write)?;
    let mut write = array.write_query(Layout::RowMajor)?;
    write.set_subarray(Subarray::from_pairs(&[[3i64, 4], [2, 4]]))?;
    write.submit(&[AttributeData::fixed("a", &int32_bytes(&[1, 2, 3, 4, 5, 6]))])?;
    write.finalize()?;
    array.close()?;

    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    let mut out = vec![0u8; 16 * 4];
    let mut read = array.read_query(
        Subarray::from_pairs(&[[1i64, 4], [1, 4]]),
        Layout::RowMajor,
        &["a"],
    )?;
    read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
    let fill = i32::MIN;
    assert_eq!(
        int32_values(&out),
        vec![
            fill, fill, fill, fill, //
            fill, fill, fill, fill, //
            fill, 1, 2, 3, //
            fill, 4, 5, 6,
        ]
    );
    Ok(())
}

#[test]
fn newest_fragment_wins() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    let uri = Uri::new("s3://test/dense_overwrite")?;
    create_4x4(&vfs, &uri)?;

    write_row_major(&vfs, &uri, &(1..=16).collect::<Vec<i32>>())?;

    // A second fragment overwriting one tile's worth of cells.
    let array = Array::open(Arc::clone(&vfs), &uri, ArrayMode::Write)?;
    let mut write = array.write_query(Layout::RowMajor)?;
    write.set_subarray(Subarray::from_pairs(&[[1i64, 2], [1, 2]]))?;
    write.submit(&[AttributeData::fixed("a", &int32_bytes(&[-1, -2, -3, -4]))])?;
    write.finalize()?;
    array.close()?;

    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    let mut out = vec![0u8; 16 * 4];
    let mut read = array.read_query(
        Subarray::from_pairs(&[[1i64, 4], [1, 4]]),
        Layout::RowMajor,
        &["a"],
    )?;
    read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
    assert_eq!(
        int32_values(&out),
        vec![
            -1, -2, 3, 4, //
            -3, -4, 7, 8, //
            9, 10, 11, 12, //
            13, 14, 15, 16,
        ]
    );
    Ok(())
}

#[test]
fn col_major_write_row_major_read() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    let uri = Uri::new("s3://test/dense_colmajor")?;
    create_4x4(&vfs, &uri)?;

    // Column-major buffer of the full domain: cell (r, c) = r * 10 + c.
    let mut values = Vec::new();
    for c in 1..=4 {
        for r in 1..=4 {
            values.push(r * 10 + c);
        }
    }
    let array = Array::open(Arc::clone(&vfs), &uri, ArrayMode::Write)?;
    let mut write = array.write_query(Layout::ColMajor)?;
    write.submit(&[AttributeData::fixed("a", &int32_bytes(&values))])?;
    write.finalize()?;
    array.close()?;

    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    let mut out = vec![0u8; 16 * 4];
    let mut read = array.read_query(
        Subarray::from_pairs(&[[1i64, 4], [1, 4]]),
        Layout::RowMajor,
        &["a"],
    )?;
    read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
    let expected: Vec<i32> = (1..=4)
        .flat_map(|r| (1..=4).map(move |c| r * 10 + c))
        .collect();
    assert_eq!(int32_values(&out), expected);
    Ok(())
}

#[test]
fn var_length_attribute_round_trip() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    let uri = Uri::new("s3://test/dense_var")?;
    let mut schema = ArraySchema::new(ArrayType::Dense);
    schema
        .add_dimension(Dimension::new("d", [0i64, 3], 2))
        .add_attribute(
            Attribute::new("s", Datatype::Char)
                .with_cell_val_num(VAR_NUM)
                .with_compressor(Compressor::Gzip, -1),
        );
    Array::create(&vfs, &uri, &schema)?;

    let values = b"abbcccdddd";
    let offsets = [0u64, 1, 3, 6];
    let array = Array::open(Arc::clone(&vfs), &uri, ArrayMode::Write)?;
    let mut write = array.write_query(Layout::RowMajor)?;
    write.submit(&[AttributeData::var("s", &offsets, values)])?;
    write.finalize()?;
    array.close()?;

    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    let mut data = vec![0u8; 64];
    let mut out_offsets = vec![0u64; 8];
    let mut read = array.read_query(
        Subarray::from_pairs(&[[0i64, 3]]),
        Layout::RowMajor,
        &["s"],
    )?;
    let status = read.submit(&mut [AttributeBuffer::var("s", &mut out_offsets, &mut data)])?;
    assert_eq!(status, QueryStatus::Completed);
    let sizes = read.buffer_sizes()[0];
    assert_eq!(sizes.offsets, 4);
    assert_eq!(&data[..sizes.data_bytes], values);
    assert_eq!(&out_offsets[..4], &offsets);
    Ok(())
}

#[test]
fn compressed_attribute_round_trip() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    for (name, compressor) in [("gz", Compressor::Gzip), ("zs", Compressor::Zstd)] {
        let uri = Uri::new(&format!("s3://test/dense_{name}"))?;
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema
            .add_dimension(Dimension::new("rows", [1i64, 4], 2))
            .add_dimension(Dimension::new("cols", [1i64, 4], 2))
            .add_attribute(Attribute::new("a", Datatype::Int32).with_compressor(compressor, -1));
        Array::create(&vfs, &uri, &schema)?;

        let values: Vec<i32> = (1..=16).collect();
        write_row_major(&vfs, &uri, &values)?;

        let array = Array::open(Arc::clone(&vfs), &uri, ArrayMode::Read)?;
        let mut out = vec![0u8; 16 * 4];
        let mut read = array.read_query(
            Subarray::from_pairs(&[[1i64, 4], [1, 4]]),
            Layout::RowMajor,
            &["a"],
        )?;
        read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
        assert_eq!(int32_values(&out), values);
        array.close()?;
    }
    Ok(())
}

#[test]
fn schema_round_trips_through_create_open() -> Result<(), Box<dyn Error>> {
    let vfs = memory_vfs()?;
    let uri = Uri::new("s3://test/dense_schema")?;
    let schema = schema_4x4();
    Array::create(&vfs, &uri, &schema)?;

    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    assert_eq!(array.schema(), &schema);
    // tile_count * cells_per_tile covers the domain exactly.
    assert_eq!(array.schema().cells_per_tile() * 4, 16);
    array.close()?;
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn dense_round_trip_on_filesystem() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let vfs = tessera::default_vfs(tessera::vfs::VfsConfig::default());
    let uri = Uri::new(&dir.path().join("array").to_string_lossy())?;
    create_4x4(&vfs, &uri)?;

    let values: Vec<i32> = (1..=16).collect();
    write_row_major(&vfs, &uri, &values)?;

    let array = Array::open(vfs, &uri, ArrayMode::Read)?;
    let mut out = vec![0u8; 16 * 4];
    let mut read = array.read_query(
        Subarray::from_pairs(&[[1i64, 4], [1, 4]]),
        Layout::RowMajor,
        &["a"],
    )?;
    read.submit(&mut [AttributeBuffer::fixed("a", &mut out)])?;
    assert_eq!(int32_values(&out), values);
    array.close()?;
    Ok(())
}
