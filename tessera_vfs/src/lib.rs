//! The virtual filesystem layer of the [`tessera`](https://docs.rs/tessera/latest/tessera/index.html) array storage engine.
//!
//! A [`Vfs`] multiplexes per-scheme [`Backend`]s — local filesystems,
//! HDFS-style distributed filesystems, and S3-style object stores — behind a
//! uniform [`Uri`]-keyed interface, and parallelises large range reads over a
//! bounded [`ThreadPool`].
//!
//! Backend semantic divergences are part of the contract rather than hidden:
//! object stores reject append-mode opens, moves never cross backends, sync
//! on an object store is a successful no-op, and filelocks are advisory on
//! local filesystems and no-op successes elsewhere.
//!
//! This crate ships the in-memory object store backend
//! [`MemoryBackend`](backend::memory::MemoryBackend). The local filesystem
//! backend lives in `tessera_filesystem` and remote backends in
//! `tessera_opendal`.

pub mod backend;
pub mod config;
mod error;
pub mod thread_pool;
mod uri;
mod vfs;

pub use backend::{memory::MemoryBackend, Backend, FileLock};
pub use config::{HdfsConfig, S3Config, VfsConfig};
pub use error::VfsError;
pub use thread_pool::{TaskHandle, ThreadPool};
pub use uri::{Scheme, Uri};
pub use vfs::{Vfs, VfsBuilder, VfsFile, VfsLockGuard, VfsMode};
