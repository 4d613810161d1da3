//! Filesystem blob store
//!
//! Blobs are content addressed: a handle is `<kind>/<sha256 hex>` and the
//! bytes live at `<root>/<kind>/<first two hex chars>/<sha256 hex>`.

use crate::storage::traits::{BlobStore, StorageError, StorageResult};
use crate::storage::BlobHandle;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Blob store backed by a directory tree
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Opens a blob store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn blob_path(&self, kind: &str, digest: &str) -> PathBuf {
        self.root.join(kind).join(&digest[..2]).join(digest)
    }
}

fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

impl BlobStore for FsBlobStore {
    fn write(&self, kind: &str, content: &[u8]) -> StorageResult<BlobHandle> {
        if !is_valid_kind(kind) {
            return Err(StorageError::InvalidKind(kind.to_string()));
        }

        let digest = hex::encode(Sha256::digest(content));
        let path = self.blob_path(kind, &digest);

        // Identical content already stored under the same handle
        if !path.exists() {
            let parent = path
                .parent()
                .ok_or_else(|| StorageError::InvalidHandle(digest.clone()))?;
            fs::create_dir_all(parent)?;

            // Each writer stages into its own temp file; concurrent writers of
            // the same content all persist identical bytes onto one path.
            let mut staged = NamedTempFile::new_in(parent)?;
            staged.write_all(content)?;
            if let Err(e) = staged.persist(&path) {
                if !path.exists() {
                    return Err(e.error.into());
                }
            }
        }

        Ok(BlobHandle::from(format!("{}/{}", kind, digest)))
    }

    fn read(&self, handle: &BlobHandle) -> StorageResult<Vec<u8>> {
        let (kind, digest) = handle
            .as_str()
            .split_once('/')
            .filter(|(kind, digest)| is_valid_kind(kind) && is_valid_digest(digest))
            .ok_or_else(|| StorageError::InvalidHandle(handle.to_string()))?;

        match fs::read(self.blob_path(kind, digest)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::BlobNotFound(handle.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
