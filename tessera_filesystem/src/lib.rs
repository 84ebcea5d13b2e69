//! The local filesystem backend for the [`tessera`](https://docs.rs/tessera/latest/tessera/index.html) array storage engine.
//!
//! [`PosixBackend`] implements the `tessera_vfs` backend capability set on
//! top of the local filesystem: offset reads, append writes, fsync, and
//! blocking advisory `flock` filelocks (unix only; elsewhere locks degrade to
//! successful no-ops).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tessera_vfs::{Backend, FileLock, Uri, VfsError};

/// The local filesystem backend.
///
/// Registered for `file://` URIs. All operations resolve the URI to an
/// absolute local path; the backend itself is stateless and may be shared
/// freely across threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixBackend;

impl PosixBackend {
    /// Create the backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn path(uri: &Uri) -> Result<PathBuf, VfsError> {
        uri.to_path()
    }
}

impl Backend for PosixBackend {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn create_dir(&self, uri: &Uri) -> Result<(), VfsError> {
        std::fs::create_dir_all(Self::path(uri)?)?;
        Ok(())
    }

    fn touch(&self, uri: &Uri) -> Result<(), VfsError> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(Self::path(uri)?)?;
        Ok(())
    }

    fn remove_path(&self, uri: &Uri) -> Result<(), VfsError> {
        let path = Self::path(uri)?;
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn remove_file(&self, uri: &Uri) -> Result<(), VfsError> {
        std::fs::remove_file(Self::path(uri)?)?;
        Ok(())
    }

    fn is_dir(&self, uri: &Uri) -> bool {
        Self::path(uri).is_ok_and(|path| path.is_dir())
    }

    fn is_file(&self, uri: &Uri) -> bool {
        Self::path(uri).is_ok_and(|path| path.is_file())
    }

    fn file_size(&self, uri: &Uri) -> Result<u64, VfsError> {
        Ok(std::fs::metadata(Self::path(uri)?)?.len())
    }

    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>, VfsError> {
        let mut names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(Self::path(uri)?)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names.into_iter().map(|name| uri.join(&name)).collect()
    }

    fn read(&self, uri: &Uri, offset: u64, buf: &mut [u8]) -> Result<(), VfsError> {
        let mut file = File::open(Self::path(uri)?)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&self, uri: &Uri, data: &[u8]) -> Result<(), VfsError> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(Self::path(uri)?)?;
        file.write_all(data)?;
        Ok(())
    }

    fn sync(&self, uri: &Uri) -> Result<(), VfsError> {
        let path = Self::path(uri)?;
        let file = if path.is_dir() {
            File::open(&path)?
        } else {
            OpenOptions::new().write(true).open(&path)?
        };
        file.sync_all()?;
        Ok(())
    }

    fn move_path(&self, from: &Uri, to: &Uri) -> Result<(), VfsError> {
        std::fs::rename(Self::path(from)?, Self::path(to)?)?;
        Ok(())
    }

    fn filelock_lock(&self, uri: &Uri, shared: bool) -> Result<FileLock, VfsError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(Self::path(uri)?)?;
        tracing::debug!(
            "acquiring {} filelock on `{uri}`",
            if shared { "shared" } else { "exclusive" }
        );
        flock(&file, shared)?;
        Ok(FileLock::from_file(file, shared))
    }

    fn filelock_unlock(&self, lock: FileLock) -> Result<(), VfsError> {
        if let Some(file) = lock.into_file() {
            funlock(&file)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn flock(file: &File, shared: bool) -> Result<(), VfsError> {
    use std::os::unix::io::AsRawFd;
    let operation = if shared { libc::LOCK_SH } else { libc::LOCK_EX };
    // SAFETY: `flock` is called on a valid open file descriptor.
    if unsafe { libc::flock(file.as_raw_fd(), operation) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(unix)]
fn funlock(file: &File) -> Result<(), VfsError> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: `flock` is called on a valid open file descriptor.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn flock(_file: &File, _shared: bool) -> Result<(), VfsError> {
    tracing::warn!("advisory filelocks are not supported on this platform");
    Ok(())
}

#[cfg(not(unix))]
fn funlock(_file: &File) -> Result<(), VfsError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn uri_for(path: &Path) -> Uri {
        Uri::new(&path.to_string_lossy()).unwrap()
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn file_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let backend = PosixBackend::new();
        let file = uri_for(&dir.path().join("data"));

        backend.write(&file, b"hello ")?;
        backend.write(&file, b"world")?;
        assert!(backend.is_file(&file));
        assert_eq!(backend.file_size(&file)?, 11);

        let mut buf = vec![0; 5];
        backend.read(&file, 6, &mut buf)?;
        assert_eq!(&buf, b"world");

        backend.sync(&file)?;
        backend.remove_file(&file)?;
        assert!(!backend.is_file(&file));
        Ok(())
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn list_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let backend = PosixBackend::new();
        let parent = uri_for(dir.path());
        for name in ["b", "a", "c"] {
            backend.touch(&parent.join(name)?)?;
        }
        let names: Vec<String> = backend
            .ls(&parent)?
            .iter()
            .map(|child| child.last_segment().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        Ok(())
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn move_and_remove_recursively() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let backend = PosixBackend::new();
        let parent = uri_for(dir.path());
        backend.create_dir(&parent.join("sub")?)?;
        backend.touch(&parent.join("sub")?.join("f")?)?;

        backend.move_path(&parent.join("sub")?, &parent.join("moved")?)?;
        assert!(backend.is_file(&parent.join("moved")?.join("f")?));

        backend.remove_path(&parent.join("moved")?)?;
        assert!(!backend.is_dir(&parent.join("moved")?));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    #[cfg_attr(miri, ignore)]
    fn filelock_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let backend = PosixBackend::new();
        let lockfile = uri_for(&dir.path().join("__lock"));

        let shared_a = backend.filelock_lock(&lockfile, true)?;
        let shared_b = backend.filelock_lock(&lockfile, true)?;
        backend.filelock_unlock(shared_a)?;
        backend.filelock_unlock(shared_b)?;

        let exclusive = backend.filelock_lock(&lockfile, false)?;
        assert!(!exclusive.is_shared());
        backend.filelock_unlock(exclusive)?;
        Ok(())
    }
}
