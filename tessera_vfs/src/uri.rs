//! URI parsing, classification, and normalisation.

use std::fmt::{Debug, Display};
use std::path::PathBuf;

use derive_more::Display as DeriveDisplay;

use crate::error::VfsError;

/// The scheme prefix of local filesystem URIs.
pub const FILE_SCHEME: &str = "file://";
/// The scheme prefix of HDFS URIs.
pub const HDFS_SCHEME: &str = "hdfs://";
/// The scheme prefix of object store URIs.
pub const OBJECT_STORE_SCHEME: &str = "s3://";

/// The filesystem family a URI addresses.
#[derive(Debug, DeriveDisplay, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// A local filesystem path (`file://`, or a bare path).
    #[display("file")]
    File,
    /// A distributed filesystem path (`hdfs://host:port/path`).
    #[display("hdfs")]
    Hdfs,
    /// An object store path (`s3://bucket/key`).
    #[display("s3")]
    ObjectStore,
    /// Any other `<scheme>://` prefix.
    #[display("unsupported")]
    Unsupported,
}

/// A normalised URI addressing a file, directory, object, or bucket.
///
/// Construction classifies the input by scheme prefix and normalises the path
/// component: duplicate separators and `.` segments are dropped, `..`
/// segments collapse their parent, and a trailing separator is preserved iff
/// the input had one. Bare paths are resolved against the current directory
/// and become `file://` URIs. Embedded NUL bytes are rejected.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    uri: String,
    scheme: Scheme,
}

impl Uri {
    /// Parse and normalise `uri`.
    ///
    /// # Errors
    /// Returns [`VfsError::InvalidUri`] if `uri` is empty, contains a NUL
    /// byte, or names a remote scheme with an empty authority.
    pub fn new(uri: &str) -> Result<Self, VfsError> {
        let invalid = |reason: &str| VfsError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };
        if uri.is_empty() {
            return Err(invalid("empty"));
        }
        if uri.contains('\0') {
            return Err(invalid("embedded NUL byte"));
        }

        if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
            let path = absolute_local_path(path);
            let normalized = normalize_path(&path, true);
            return Ok(Self {
                uri: format!("{FILE_SCHEME}{normalized}"),
                scheme: Scheme::File,
            });
        }
        for (prefix, scheme) in [
            (HDFS_SCHEME, Scheme::Hdfs),
            (OBJECT_STORE_SCHEME, Scheme::ObjectStore),
        ] {
            if let Some(rest) = uri.strip_prefix(prefix) {
                let (authority, path) = match rest.find('/') {
                    Some(pos) => (&rest[..pos], &rest[pos..]),
                    None => (rest, ""),
                };
                if authority.is_empty() {
                    return Err(invalid("empty authority"));
                }
                let normalized = normalize_path(path, false);
                return Ok(Self {
                    uri: format!("{prefix}{authority}{normalized}"),
                    scheme,
                });
            }
        }
        if uri.contains("://") {
            return Ok(Self {
                uri: uri.to_string(),
                scheme: Scheme::Unsupported,
            });
        }

        // A bare path is a local path.
        let path = absolute_local_path(uri);
        let normalized = normalize_path(&path, true);
        Ok(Self {
            uri: format!("{FILE_SCHEME}{normalized}"),
            scheme: Scheme::File,
        })
    }

    /// The scheme the URI was classified into.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns true if this is a local filesystem URI.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.scheme == Scheme::File
    }

    /// Returns true if this is an HDFS URI.
    #[must_use]
    pub fn is_hdfs(&self) -> bool {
        self.scheme == Scheme::Hdfs
    }

    /// Returns true if this is an object store URI.
    #[must_use]
    pub fn is_object_store(&self) -> bool {
        self.scheme == Scheme::ObjectStore
    }

    /// The full URI string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// The local filesystem path of a `file://` URI.
    ///
    /// # Errors
    /// Returns [`VfsError::Other`] if the URI is not a local URI.
    pub fn to_path(&self) -> Result<PathBuf, VfsError> {
        match self.uri.strip_prefix(FILE_SCHEME) {
            Some(path) if self.is_file() => Ok(PathBuf::from(path)),
            _ => Err(VfsError::Other(format!(
                "URI `{}` is not a local filesystem path",
                self.uri
            ))),
        }
    }

    /// The authority component (HDFS `host:port` or object store bucket).
    ///
    /// Returns [`None`] for local and unsupported URIs.
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        let rest = match self.scheme {
            Scheme::Hdfs => self.uri.strip_prefix(HDFS_SCHEME),
            Scheme::ObjectStore => self.uri.strip_prefix(OBJECT_STORE_SCHEME),
            Scheme::File | Scheme::Unsupported => None,
        }?;
        Some(rest.find('/').map_or(rest, |pos| &rest[..pos]))
    }

    /// The path component: everything after the scheme (and authority, for
    /// remote URIs), without a leading separator.
    #[must_use]
    pub fn path(&self) -> &str {
        let rest = match self.scheme {
            Scheme::File => self.uri.strip_prefix(FILE_SCHEME),
            Scheme::Hdfs => self.uri.strip_prefix(HDFS_SCHEME),
            Scheme::ObjectStore => self.uri.strip_prefix(OBJECT_STORE_SCHEME),
            Scheme::Unsupported => None,
        }
        .unwrap_or(&self.uri);
        match self.scheme {
            Scheme::File => rest.trim_start_matches('/'),
            _ => rest
                .find('/')
                .map_or("", |pos| rest[pos..].trim_start_matches('/')),
        }
    }

    /// The last path segment (the file or directory name).
    #[must_use]
    pub fn last_segment(&self) -> &str {
        self.uri
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }

    /// Append `segment` as a child path component.
    ///
    /// # Errors
    /// Returns [`VfsError::InvalidUri`] if the resulting URI is invalid.
    pub fn join(&self, segment: &str) -> Result<Self, VfsError> {
        Self::new(&format!("{}/{segment}", self.uri.trim_end_matches('/')))
    }
}

impl Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

impl Debug for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

impl TryFrom<&str> for Uri {
    type Error = VfsError;

    fn try_from(uri: &str) -> Result<Self, Self::Error> {
        Self::new(uri)
    }
}

fn absolute_local_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        format!("{}/{path}", cwd.to_string_lossy().trim_end_matches('/'))
    }
}

/// Collapse `.`/`..`/duplicate separators in `path`, preserving a trailing
/// separator. `rooted` paths keep a leading separator.
fn normalize_path(path: &str, rooted: bool) -> String {
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    let mut normalized = String::new();
    if rooted || !segments.is_empty() {
        normalized.push('/');
    }
    normalized.push_str(&segments.join("/"));
    if trailing && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify() -> Result<(), VfsError> {
        assert!(Uri::new("file:///a/b")?.is_file());
        assert!(Uri::new("hdfs://namenode:9000/a")?.is_hdfs());
        assert!(Uri::new("s3://bucket/key")?.is_object_store());
        assert_eq!(Uri::new("ftp://host/a")?.scheme(), Scheme::Unsupported);
        Ok(())
    }

    #[test]
    fn normalize() -> Result<(), VfsError> {
        assert_eq!(Uri::new("file:///a/./b/../c")?.as_str(), "file:///a/c");
        assert_eq!(Uri::new("file:///a//b/")?.as_str(), "file:///a/b/");
        assert_eq!(Uri::new("s3://bucket/a/../b")?.as_str(), "s3://bucket/b");
        assert_eq!(Uri::new("s3://bucket")?.as_str(), "s3://bucket");
        Ok(())
    }

    #[test]
    fn bare_paths_become_absolute_file_uris() -> Result<(), VfsError> {
        let uri = Uri::new("some/relative/path")?;
        assert!(uri.is_file());
        assert!(uri.as_str().starts_with("file:///"));
        assert!(uri.as_str().ends_with("some/relative/path"));
        Ok(())
    }

    #[test]
    fn reject_nul_and_empty() {
        assert!(Uri::new("").is_err());
        assert!(Uri::new("file:///a\0b").is_err());
        assert!(Uri::new("s3://").is_err());
    }

    #[test]
    fn components() -> Result<(), VfsError> {
        let uri = Uri::new("s3://bucket/a/b")?;
        assert_eq!(uri.authority(), Some("bucket"));
        assert_eq!(uri.path(), "a/b");
        assert_eq!(uri.last_segment(), "b");
        assert_eq!(uri.join("c")?.as_str(), "s3://bucket/a/b/c");

        let uri = Uri::new("file:///a/b")?;
        assert_eq!(uri.authority(), None);
        assert_eq!(uri.to_path()?, PathBuf::from("/a/b"));
        Ok(())
    }
}
