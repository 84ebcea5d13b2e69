//! Virtual filesystem configuration.

use std::collections::BTreeMap;

use crate::error::VfsError;

/// Default parallel read threshold: 1 MiB.
pub const DEFAULT_PARALLEL_READ_THRESHOLD: u64 = 1024 * 1024;
/// Default object store file buffer size: 5 MiB.
pub const DEFAULT_S3_FILE_BUFFER_SIZE: u64 = 5 * 1024 * 1024;
/// Default object store connect timeout in milliseconds.
pub const DEFAULT_S3_CONNECT_TIMEOUT_MS: u64 = 3000;
/// Default object store request timeout in milliseconds.
pub const DEFAULT_S3_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Object store backend parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// Request scheme, `http` or `https`.
    pub scheme: String,
    /// Bucket region.
    pub region: String,
    /// Endpoint override for S3-compatible services; empty for the default.
    pub endpoint_override: String,
    /// Address buckets as virtual hosts rather than path components.
    pub use_virtual_addressing: bool,
    /// Size of the write buffer flushed as one multipart part.
    pub file_buffer_size: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Unrecognised `vfs.s3.*` options, passed through to the backend.
    pub extra: BTreeMap<String, String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            region: String::new(),
            endpoint_override: String::new(),
            use_virtual_addressing: true,
            file_buffer_size: DEFAULT_S3_FILE_BUFFER_SIZE,
            connect_timeout_ms: DEFAULT_S3_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_S3_REQUEST_TIMEOUT_MS,
            extra: BTreeMap::new(),
        }
    }
}

/// HDFS backend parameters, passed through to the HDFS client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HdfsConfig {
    /// `vfs.hdfs.*` options keyed without the prefix.
    pub options: BTreeMap<String, String>,
}

/// Configuration for a [`Vfs`](crate::Vfs).
///
/// Options may be set programmatically through the public fields or through
/// the string interface of [`VfsConfig::set`], which accepts the
/// `vfs.`-prefixed option names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsConfig {
    /// Thread pool size for parallel backend I/O.
    pub num_parallel_operations: usize,
    /// Reads below this many bytes run serially.
    pub parallel_read_threshold: u64,
    /// Object store parameters.
    pub s3: S3Config,
    /// HDFS parameters.
    pub hdfs: HdfsConfig,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            num_parallel_operations: std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get),
            parallel_read_threshold: DEFAULT_PARALLEL_READ_THRESHOLD,
            s3: S3Config::default(),
            hdfs: HdfsConfig::default(),
        }
    }
}

impl VfsConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option by its string name.
    ///
    /// Unrecognised `vfs.s3.*` and `vfs.hdfs.*` options are stored and passed
    /// through to the corresponding backend.
    ///
    /// # Errors
    /// Returns [`VfsError::Config`] if the option name is unknown or the
    /// value fails to parse.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), VfsError> {
        let invalid = || VfsError::Config {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "vfs.num_parallel_operations" => {
                self.num_parallel_operations = value.parse().map_err(|_| invalid())?;
            }
            "vfs.parallel_read_threshold_bytes" => {
                self.parallel_read_threshold = value.parse().map_err(|_| invalid())?;
            }
            "vfs.s3.scheme" => match value {
                "http" | "https" => self.s3.scheme = value.to_string(),
                _ => return Err(invalid()),
            },
            "vfs.s3.region" => self.s3.region = value.to_string(),
            "vfs.s3.endpoint_override" => self.s3.endpoint_override = value.to_string(),
            "vfs.s3.use_virtual_addressing" => {
                self.s3.use_virtual_addressing = parse_bool(value).ok_or_else(invalid)?;
            }
            "vfs.s3.file_buffer_size" => {
                self.s3.file_buffer_size = value.parse().map_err(|_| invalid())?;
            }
            "vfs.s3.connect_timeout_ms" => {
                self.s3.connect_timeout_ms = value.parse().map_err(|_| invalid())?;
            }
            "vfs.s3.request_timeout_ms" => {
                self.s3.request_timeout_ms = value.parse().map_err(|_| invalid())?;
            }
            _ => {
                if let Some(suffix) = key.strip_prefix("vfs.s3.") {
                    self.s3.extra.insert(suffix.to_string(), value.to_string());
                } else if let Some(suffix) = key.strip_prefix("vfs.hdfs.") {
                    self.hdfs
                        .options
                        .insert(suffix.to_string(), value.to_string());
                } else {
                    return Err(invalid());
                }
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_known_options() -> Result<(), VfsError> {
        let mut config = VfsConfig::new();
        config.set("vfs.num_parallel_operations", "8")?;
        config.set("vfs.parallel_read_threshold_bytes", "65536")?;
        config.set("vfs.s3.scheme", "http")?;
        config.set("vfs.s3.use_virtual_addressing", "false")?;
        assert_eq!(config.num_parallel_operations, 8);
        assert_eq!(config.parallel_read_threshold, 65536);
        assert_eq!(config.s3.scheme, "http");
        assert!(!config.s3.use_virtual_addressing);
        Ok(())
    }

    #[test]
    fn passthrough_options() -> Result<(), VfsError> {
        let mut config = VfsConfig::new();
        config.set("vfs.hdfs.name_node_uri", "namenode:9000")?;
        config.set("vfs.s3.multipart_part_size", "1048576")?;
        assert_eq!(
            config.hdfs.options.get("name_node_uri").map(String::as_str),
            Some("namenode:9000")
        );
        assert_eq!(
            config.s3.extra.get("multipart_part_size").map(String::as_str),
            Some("1048576")
        );
        Ok(())
    }

    #[test]
    fn reject_bad_options() {
        let mut config = VfsConfig::new();
        assert!(config.set("vfs.num_parallel_operations", "lots").is_err());
        assert!(config.set("vfs.s3.scheme", "gopher").is_err());
        assert!(config.set("no.such.option", "1").is_err());
    }
}
