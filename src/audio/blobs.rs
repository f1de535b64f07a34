//! Filesystem storage for recording bytes.
//!
//! Blocking `std::fs` calls; async callers run them through `spawn_blocking`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to `name` under the root, creating the directory on first use.
    pub fn put(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Read a blob back. A missing file is `None`, not an error.
    pub fn get(&self, location: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(location) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_get() {
        let dir = std::env::temp_dir().join(format!("relay-blobs-{}", uuid::Uuid::new_v4()));
        let blobs = BlobStore::new(&dir);

        let path = blobs.put("ABCD_round1_p1.pcm", &[1, 2, 3]).unwrap();
        assert_eq!(path, dir.join("ABCD_round1_p1.pcm"));
        assert_eq!(blobs.get(&path).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(blobs.get(&dir.join("missing.pcm")).unwrap(), None);

        fs::remove_dir_all(&dir).unwrap();
    }
}
