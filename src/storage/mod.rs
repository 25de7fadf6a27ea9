//! Local-disk blob storage
//!
//! Stores uploaded document bytes under `<blob_dir>/<workspace_id>/` and
//! hands back `local://` URIs. Writes stream through a caller-supplied
//! block size; combined with [`crate::hash::HashingWriter`] the upload path
//! hashes and persists in a single pass over the bytes.

use crate::error::{Error, Result};
use crate::hash::HashingWriter;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const URI_SCHEME: &str = "local://";

/// A stored blob: where it lives and what it hashed to
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub uri: String,
    pub content_hash: String,
    pub size: u64,
}

/// Local filesystem blob store
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_dir: PathBuf,
}

impl BlobStore {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Stream a reader to storage, computing the content hash as bytes are
    /// written. A mid-stream failure removes the partial file.
    pub fn put<R: Read>(
        &self,
        workspace_id: &str,
        name: &str,
        mut reader: R,
        block_size: usize,
    ) -> Result<StoredBlob> {
        let workspace_dir = self.base_dir.join(sanitize_component(workspace_id));
        std::fs::create_dir_all(&workspace_dir)?;

        let file_name = sanitize_component(name);
        let path = workspace_dir.join(&file_name);
        debug!("Writing blob to {:?}", path);

        let file = File::create(&path)?;
        let mut writer = HashingWriter::new(BufWriter::new(file));
        let mut buf = vec![0u8; block_size];

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(writer);
                    let _ = std::fs::remove_file(&path);
                    return Err(Error::Io(e));
                }
            };
            if let Err(e) = writer.write_all(&buf[..n]) {
                drop(writer);
                let _ = std::fs::remove_file(&path);
                return Err(Error::Io(e));
            }
        }

        writer.flush()?;
        let (mut inner, content_hash, size) = writer.finalize();
        inner.flush()?;

        let relative = format!("{}/{}", sanitize_component(workspace_id), file_name);
        Ok(StoredBlob {
            uri: format!("{}{}", URI_SCHEME, relative),
            content_hash,
            size,
        })
    }

    /// Read a stored blob fully into memory
    pub fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.resolve(uri)?;
        if !path.exists() {
            return Err(Error::Storage(format!("blob not found: {}", uri)));
        }
        Ok(std::fs::read(path)?)
    }

    /// Delete a stored blob (e.g. after a dedup short-circuit)
    pub fn delete(&self, uri: &str) -> Result<bool> {
        let path = self.resolve(uri)?;
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Resolve a `local://` URI to an absolute path under the base directory
    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let relative = uri
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| Error::Storage(format!("unsupported storage URI: {}", uri)))?;

        if relative.split('/').any(|c| c == ".." || c.is_empty()) {
            return Err(Error::Storage(format!("invalid storage URI: {}", uri)));
        }

        Ok(self.base_dir.join(relative))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

/// Keep path components filesystem-safe
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path().to_path_buf()).unwrap();

        let data = b"%PDF-1.7 pretend pdf bytes".repeat(100);
        let blob = store
            .put("ws1", "doc1_paper.pdf", Cursor::new(&data), 64)
            .unwrap();

        assert!(blob.uri.starts_with("local://ws1/"));
        assert_eq!(blob.size, data.len() as u64);
        assert_eq!(blob.content_hash, hash_bytes(&data));
        assert_eq!(store.get(&blob.uri).unwrap(), data);
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path().to_path_buf()).unwrap();

        let blob = store
            .put("ws1", "gone.pdf", Cursor::new(b"%PDF-x".to_vec()), 16)
            .unwrap();
        assert!(store.delete(&blob.uri).unwrap());
        assert!(!store.delete(&blob.uri).unwrap());
        assert!(store.get(&blob.uri).is_err());
    }

    #[test]
    fn test_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path().to_path_buf()).unwrap();
        assert!(store.get("local://../etc/passwd").is_err());
        assert!(store.get("s3://bucket/key").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_component("my paper (v2).pdf"), "my_paper__v2_.pdf");
        assert_eq!(sanitize_component("../../evil"), ".._.._evil");
        assert_eq!(sanitize_component(""), "unnamed");
    }
}
