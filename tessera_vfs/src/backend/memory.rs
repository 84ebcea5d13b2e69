//! An in-memory backend with object store semantics.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::backend::{Backend, FileLock};
use crate::error::VfsError;
use crate::uri::Uri;

type Objects = BTreeMap<String, Vec<u8>>;

/// An in-memory bucket/object map with object store semantics.
///
/// The keyspace is flat: directories exist only as key prefixes, created as
/// zero-length `<prefix>/` marker objects. Append-mode opens are rejected,
/// sync is a successful no-op, and filelocks are no-op successes, matching
/// the semantics of a remote object store. Buckets must be created before
/// objects are written to them.
///
/// Intended as the registered object store backend in tests and as the
/// reference for object store semantic divergences.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buckets: RwLock<BTreeMap<String, Objects>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn parts(uri: &Uri) -> Result<(String, String), VfsError> {
        let bucket = uri
            .authority()
            .ok_or_else(|| VfsError::ObjectStore(format!("URI `{uri}` has no bucket")))?;
        Ok((bucket.to_string(), uri.path().to_string()))
    }

    fn missing_bucket(bucket: &str) -> VfsError {
        VfsError::ObjectStore(format!("bucket `{bucket}` does not exist"))
    }

    fn missing_object(uri: &Uri) -> VfsError {
        VfsError::ObjectStore(format!("object `{uri}` does not exist"))
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports_append(&self) -> bool {
        false
    }

    fn is_object_store(&self) -> bool {
        true
    }

    fn create_dir(&self, uri: &Uri) -> Result<(), VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(&bucket)
            .ok_or_else(|| Self::missing_bucket(&bucket))?;
        objects.insert(format!("{}/", key.trim_end_matches('/')), Vec::new());
        Ok(())
    }

    fn touch(&self, uri: &Uri) -> Result<(), VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(&bucket)
            .ok_or_else(|| Self::missing_bucket(&bucket))?;
        objects.entry(key).or_default();
        Ok(())
    }

    fn remove_path(&self, uri: &Uri) -> Result<(), VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(&bucket)
            .ok_or_else(|| Self::missing_bucket(&bucket))?;
        let before = objects.len();
        objects.retain(|object, _| object != &key && !object.starts_with(&prefix));
        if objects.len() == before {
            return Err(Self::missing_object(uri));
        }
        Ok(())
    }

    fn remove_file(&self, uri: &Uri) -> Result<(), VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(&bucket)
            .ok_or_else(|| Self::missing_bucket(&bucket))?;
        objects
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Self::missing_object(uri))
    }

    fn is_dir(&self, uri: &Uri) -> bool {
        let Ok((bucket, key)) = Self::parts(uri) else {
            return false;
        };
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let buckets = self.buckets.read();
        buckets.get(&bucket).is_some_and(|objects| {
            objects
                .range(prefix.clone()..)
                .next()
                .is_some_and(|(object, _)| object.starts_with(&prefix))
        })
    }

    fn is_file(&self, uri: &Uri) -> bool {
        let Ok((bucket, key)) = Self::parts(uri) else {
            return false;
        };
        !key.is_empty()
            && !key.ends_with('/')
            && self
                .buckets
                .read()
                .get(&bucket)
                .is_some_and(|objects| objects.contains_key(&key))
    }

    fn file_size(&self, uri: &Uri) -> Result<u64, VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let buckets = self.buckets.read();
        buckets
            .get(&bucket)
            .and_then(|objects| objects.get(&key))
            .map(|object| object.len() as u64)
            .ok_or_else(|| Self::missing_object(uri))
    }

    fn ls(&self, uri: &Uri) -> Result<Vec<Uri>, VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key.trim_end_matches('/'))
        };
        let buckets = self.buckets.read();
        let objects = buckets
            .get(&bucket)
            .ok_or_else(|| Self::missing_bucket(&bucket))?;
        let mut children = std::collections::BTreeSet::new();
        for object in objects.keys() {
            let Some(rest) = object.strip_prefix(&prefix) else {
                continue;
            };
            let child = rest.split('/').next().unwrap_or("");
            if !child.is_empty() {
                children.insert(child.to_string());
            }
        }
        children
            .into_iter()
            .map(|child| Uri::new(&format!("s3://{bucket}/{prefix}{child}")))
            .collect()
    }

    fn read(&self, uri: &Uri, offset: u64, buf: &mut [u8]) -> Result<(), VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let buckets = self.buckets.read();
        let object = buckets
            .get(&bucket)
            .and_then(|objects| objects.get(&key))
            .ok_or_else(|| Self::missing_object(uri))?;
        let offset = usize::try_from(offset)
            .map_err(|_| VfsError::ObjectStore(format!("read offset overflow for `{uri}`")))?;
        let end = offset + buf.len();
        if end > object.len() {
            return Err(VfsError::ObjectStore(format!(
                "read past the end of `{uri}` ({end} > {})",
                object.len()
            )));
        }
        buf.copy_from_slice(&object[offset..end]);
        Ok(())
    }

    fn write(&self, uri: &Uri, data: &[u8]) -> Result<(), VfsError> {
        let (bucket, key) = Self::parts(uri)?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(&bucket)
            .ok_or_else(|| Self::missing_bucket(&bucket))?;
        objects.entry(key).or_default().extend_from_slice(data);
        Ok(())
    }

    fn sync(&self, _uri: &Uri) -> Result<(), VfsError> {
        Ok(())
    }

    fn move_path(&self, from: &Uri, to: &Uri) -> Result<(), VfsError> {
        let (from_bucket, from_key) = Self::parts(from)?;
        let (to_bucket, to_key) = Self::parts(to)?;
        let mut buckets = self.buckets.write();
        if !buckets.contains_key(&to_bucket) {
            return Err(Self::missing_bucket(&to_bucket));
        }
        let source = buckets
            .get_mut(&from_bucket)
            .ok_or_else(|| Self::missing_bucket(&from_bucket))?;

        let from_prefix = format!("{}/", from_key.trim_end_matches('/'));
        let mut moved: Vec<(String, Vec<u8>)> = Vec::new();
        if let Some(data) = source.remove(&from_key) {
            moved.push((to_key.clone(), data));
        }
        let nested: Vec<String> = source
            .keys()
            .filter(|object| object.starts_with(&from_prefix))
            .cloned()
            .collect();
        for object in nested {
            let data = source.remove(&object).expect("key was just listed");
            let suffix = &object[from_prefix.len()..];
            moved.push((format!("{}/{suffix}", to_key.trim_end_matches('/')), data));
        }
        if moved.is_empty() {
            return Err(Self::missing_object(from));
        }
        let destination = buckets
            .get_mut(&to_bucket)
            .expect("destination bucket exists");
        destination.extend(moved);
        Ok(())
    }

    fn filelock_lock(&self, _uri: &Uri, shared: bool) -> Result<FileLock, VfsError> {
        Ok(FileLock::noop(shared))
    }

    fn filelock_unlock(&self, _lock: FileLock) -> Result<(), VfsError> {
        Ok(())
    }

    fn create_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        let (bucket, _) = Self::parts(uri)?;
        let mut buckets = self.buckets.write();
        if buckets.contains_key(&bucket) {
            return Err(VfsError::ObjectStore(format!(
                "bucket `{bucket}` already exists"
            )));
        }
        buckets.insert(bucket, Objects::new());
        Ok(())
    }

    fn remove_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        let (bucket, _) = Self::parts(uri)?;
        self.buckets
            .write()
            .remove(&bucket)
            .map(|_| ())
            .ok_or_else(|| Self::missing_bucket(&bucket))
    }

    fn empty_bucket(&self, uri: &Uri) -> Result<(), VfsError> {
        let (bucket, _) = Self::parts(uri)?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(&bucket)
            .ok_or_else(|| Self::missing_bucket(&bucket))?;
        objects.clear();
        Ok(())
    }

    fn is_bucket(&self, uri: &Uri) -> bool {
        Self::parts(uri).is_ok_and(|(bucket, _)| self.buckets.read().contains_key(&bucket))
    }

    fn is_empty_bucket(&self, uri: &Uri) -> Result<bool, VfsError> {
        let (bucket, _) = Self::parts(uri)?;
        let buckets = self.buckets.read();
        buckets
            .get(&bucket)
            .map(Objects::is_empty)
            .ok_or_else(|| Self::missing_bucket(&bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        Uri::new(s).unwrap()
    }

    fn backend_with_bucket() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_bucket(&uri("s3://bucket")).unwrap();
        backend
    }

    #[test]
    fn object_lifecycle() -> Result<(), VfsError> {
        let backend = backend_with_bucket();
        let key = uri("s3://bucket/a/b");
        assert!(!backend.is_file(&key));
        backend.write(&key, b"hello ")?;
        backend.write(&key, b"world")?;
        assert!(backend.is_file(&key));
        assert_eq!(backend.file_size(&key)?, 11);

        let mut buf = vec![0; 5];
        backend.read(&key, 6, &mut buf)?;
        assert_eq!(&buf, b"world");
        assert!(backend.read(&key, 8, &mut buf).is_err());

        backend.remove_file(&key)?;
        assert!(!backend.is_file(&key));
        Ok(())
    }

    #[test]
    fn directories_are_prefixes() -> Result<(), VfsError> {
        let backend = backend_with_bucket();
        backend.create_dir(&uri("s3://bucket/dir"))?;
        assert!(backend.is_dir(&uri("s3://bucket/dir")));
        assert!(!backend.is_file(&uri("s3://bucket/dir")));

        backend.write(&uri("s3://bucket/dir/x"), b"1")?;
        backend.write(&uri("s3://bucket/dir/sub/y"), b"2")?;
        let children = backend.ls(&uri("s3://bucket/dir"))?;
        let names: Vec<&str> = children.iter().map(Uri::last_segment).collect();
        assert_eq!(names, vec!["sub", "x"]);

        backend.remove_path(&uri("s3://bucket/dir"))?;
        assert!(!backend.is_dir(&uri("s3://bucket/dir")));
        Ok(())
    }

    #[test]
    fn move_renames_prefix() -> Result<(), VfsError> {
        let backend = backend_with_bucket();
        backend.write(&uri("s3://bucket/dir/x"), b"1")?;
        backend.move_path(&uri("s3://bucket/dir"), &uri("s3://bucket/moved"))?;
        assert!(backend.is_file(&uri("s3://bucket/moved/x")));
        assert!(!backend.is_dir(&uri("s3://bucket/dir")));
        Ok(())
    }

    #[test]
    fn bucket_operations() -> Result<(), VfsError> {
        let backend = MemoryBackend::new();
        let bucket = uri("s3://b");
        assert!(!backend.is_bucket(&bucket));
        assert!(backend.write(&uri("s3://b/k"), b"x").is_err());

        backend.create_bucket(&bucket)?;
        assert!(backend.create_bucket(&bucket).is_err());
        assert!(backend.is_empty_bucket(&bucket)?);

        backend.write(&uri("s3://b/k"), b"x")?;
        assert!(!backend.is_empty_bucket(&bucket)?);
        backend.empty_bucket(&bucket)?;
        assert!(backend.is_empty_bucket(&bucket)?);

        backend.remove_bucket(&bucket)?;
        assert!(!backend.is_bucket(&bucket));
        Ok(())
    }
}
