#![allow(missing_docs)]

use std::sync::Arc;

use tessera_vfs::{
    MemoryBackend, Scheme, Uri, Vfs, VfsBuilder, VfsConfig, VfsError, VfsMode,
};

fn object_store_vfs(config: VfsConfig) -> Vfs {
    VfsBuilder::new()
        .config(config)
        .register(Scheme::ObjectStore, Arc::new(MemoryBackend::new()))
        .build()
}

fn uri(s: &str) -> Uri {
    Uri::new(s).unwrap()
}

#[test]
fn append_rejected_on_object_store() -> Result<(), VfsError> {
    let vfs = object_store_vfs(VfsConfig::default());
    vfs.create_bucket(&uri("s3://b"))?;

    let error = vfs.open(&uri("s3://b/k"), VfsMode::Append).unwrap_err();
    assert!(error.to_string().contains("append"));
    assert!(!vfs.is_file(&uri("s3://b/k")));
    Ok(())
}

#[test]
fn write_then_read_object() -> Result<(), VfsError> {
    let vfs = object_store_vfs(VfsConfig::default());
    vfs.create_bucket(&uri("s3://b"))?;

    let mut file = vfs.open(&uri("s3://b/k"), VfsMode::Write)?;
    file.write(b"0123456789")?;
    file.close()?;

    let mut buf = vec![0; 4];
    vfs.read(&uri("s3://b/k"), 3, &mut buf)?;
    assert_eq!(&buf, b"3456");
    Ok(())
}

#[test]
fn open_write_truncates() -> Result<(), VfsError> {
    let vfs = object_store_vfs(VfsConfig::default());
    vfs.create_bucket(&uri("s3://b"))?;
    vfs.write(&uri("s3://b/k"), b"old contents")?;

    let mut file = vfs.open(&uri("s3://b/k"), VfsMode::Write)?;
    file.write(b"new")?;
    file.close()?;
    assert_eq!(vfs.file_size(&uri("s3://b/k"))?, 3);
    Ok(())
}

#[test]
fn cross_scheme_move_rejected_and_untouched() -> Result<(), VfsError> {
    let vfs = object_store_vfs(VfsConfig::default());
    vfs.create_bucket(&uri("s3://b"))?;
    vfs.write(&uri("s3://b/c"), b"payload")?;

    let error = vfs
        .move_path(&uri("file:///a"), &uri("s3://b/c"), true)
        .unwrap_err();
    assert!(matches!(error, VfsError::CrossBackendMove { .. }));
    // The destination still exists with its original contents.
    assert_eq!(vfs.file_size(&uri("s3://b/c"))?, 7);
    Ok(())
}

#[test]
fn move_with_force_overwrites() -> Result<(), VfsError> {
    let vfs = object_store_vfs(VfsConfig::default());
    vfs.create_bucket(&uri("s3://b"))?;
    vfs.write(&uri("s3://b/src"), b"source")?;
    vfs.write(&uri("s3://b/dst"), b"stale destination")?;

    assert!(vfs
        .move_path(&uri("s3://b/src"), &uri("s3://b/dst"), false)
        .is_err());
    vfs.move_path(&uri("s3://b/src"), &uri("s3://b/dst"), true)?;
    assert_eq!(vfs.file_size(&uri("s3://b/dst"))?, 6);
    assert!(!vfs.is_file(&uri("s3://b/src")));
    Ok(())
}

#[test]
fn unregistered_scheme_is_disabled() {
    let vfs = object_store_vfs(VfsConfig::default());
    let error = vfs.file_size(&uri("hdfs://namenode:9000/f")).unwrap_err();
    assert!(matches!(error, VfsError::BackendDisabled(Scheme::Hdfs)));

    let error = vfs.file_size(&uri("ftp://host/f")).unwrap_err();
    assert!(matches!(error, VfsError::UnsupportedScheme(_)));
}

#[test]
fn parallel_read_matches_serial_read() -> Result<(), VfsError> {
    let mut config = VfsConfig::default();
    config.set("vfs.num_parallel_operations", "8")?;
    config.set("vfs.parallel_read_threshold_bytes", "65536")?;
    let vfs = object_store_vfs(config);
    vfs.create_bucket(&uri("s3://b"))?;

    // 1 MiB of deterministic noise.
    let mut seed = 0x2545_f491_4f6c_dd1du64;
    let contents: Vec<u8> = (0..1024 * 1024)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed & 0xff) as u8
        })
        .collect();
    vfs.write(&uri("s3://b/blob"), &contents)?;

    let mut buf = vec![0; contents.len()];
    vfs.read(&uri("s3://b/blob"), 0, &mut buf)?;
    assert_eq!(buf, contents);

    // An unaligned sub-range crossing shard boundaries.
    let mut buf = vec![0; 300_000];
    vfs.read(&uri("s3://b/blob"), 123_457, &mut buf)?;
    assert_eq!(buf, &contents[123_457..123_457 + 300_000]);
    Ok(())
}

#[test]
fn parallel_read_failure_carries_first_error() -> Result<(), VfsError> {
    let mut config = VfsConfig::default();
    config.set("vfs.num_parallel_operations", "4")?;
    config.set("vfs.parallel_read_threshold_bytes", "1024")?;
    let vfs = object_store_vfs(config);
    vfs.create_bucket(&uri("s3://b"))?;
    vfs.write(&uri("s3://b/short"), &vec![7u8; 2048])?;

    // Shards past the object end fail; the surfaced error wraps the cause.
    let mut buf = vec![0; 8192];
    let error = vfs.read(&uri("s3://b/short"), 0, &mut buf).unwrap_err();
    match error {
        VfsError::ParallelRead(source) => {
            assert!(matches!(*source, VfsError::ObjectStore(_)));
        }
        other => panic!("expected a parallel read error, got {other}"),
    }
    Ok(())
}
