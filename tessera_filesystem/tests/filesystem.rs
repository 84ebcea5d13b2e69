#![allow(missing_docs)]

use std::error::Error;
use std::sync::Arc;

use tessera_filesystem::PosixBackend;
use tessera_vfs::{Scheme, Uri, Vfs, VfsBuilder, VfsConfig, VfsMode};

fn local_vfs(config: VfsConfig) -> Vfs {
    VfsBuilder::new()
        .config(config)
        .register(Scheme::File, Arc::new(PosixBackend::new()))
        .build()
}

fn noise(len: usize) -> Vec<u8> {
    let mut seed = 0x9e37_79b9_7f4a_7c15u64;
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed & 0xff) as u8
        })
        .collect()
}

#[test]
#[cfg_attr(miri, ignore)]
fn parallel_read_full_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let mut config = VfsConfig::default();
    config.set("vfs.num_parallel_operations", "8")?;
    config.set("vfs.parallel_read_threshold_bytes", "65536")?;
    let vfs = local_vfs(config);

    let file = Uri::new(&dir.path().join("blob").to_string_lossy())?;
    let contents = noise(1024 * 1024);
    vfs.write(&file, &contents)?;

    let mut buf = vec![0; contents.len()];
    vfs.read(&file, 0, &mut buf)?;
    assert_eq!(buf, contents);
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn small_reads_run_serially() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let vfs = local_vfs(VfsConfig::default());

    let file = Uri::new(&dir.path().join("small").to_string_lossy())?;
    vfs.write(&file, b"0123456789")?;

    let mut buf = vec![0; 4];
    vfs.read(&file, 2, &mut buf)?;
    assert_eq!(&buf, b"2345");
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn append_mode_allowed_locally() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let vfs = local_vfs(VfsConfig::default());
    let file = Uri::new(&dir.path().join("log").to_string_lossy())?;

    let mut handle = vfs.open(&file, VfsMode::Write)?;
    handle.write(b"first")?;
    handle.close()?;

    let mut handle = vfs.open(&file, VfsMode::Append)?;
    handle.write(b" second")?;
    handle.close()?;

    assert_eq!(vfs.file_size(&file)?, 12);
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn filelock_guard_releases_on_drop() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::TempDir::new()?;
    let vfs = local_vfs(VfsConfig::default());
    let lockfile = Uri::new(&dir.path().join("__lock").to_string_lossy())?;
    vfs.touch(&lockfile)?;

    {
        let _guard = vfs.filelock_lock(&lockfile, false)?;
    }
    // The exclusive lock was released by the guard; relocking succeeds.
    let guard = vfs.filelock_lock(&lockfile, false)?;
    guard.unlock()?;
    Ok(())
}
