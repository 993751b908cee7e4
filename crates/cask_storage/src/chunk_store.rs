//! Content-addressed chunk persistence.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cask_core::hashes::ChunkHash;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::StoreError;

/// Chunk files under `<root>/<hh>/<62 hex>`, keyed by the SHA-256 of their
/// contents. The two-character fan-out keeps per-directory entry counts
/// manageable.
#[derive(Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path a chunk lives at.
    pub fn chunk_path(&self, hash: &ChunkHash) -> PathBuf {
        let hex = hash.to_string();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Persist a chunk. A chunk already present with non-zero size is left
    /// untouched: bytes under the same digest are the same bytes, so the
    /// write is skipped and both of two racing identical puts succeed. A
    /// zero-length file is a leftover from an interrupted write and gets
    /// rewritten.
    pub async fn put(&self, hash: &ChunkHash, data: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.chunk_path(hash);
        match fs::metadata(&path).await {
            Ok(meta) if meta.len() > 0 => {
                debug!("Chunk {hash} already stored");
                return Ok(path);
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true).mode(0o700);
            builder.create(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        Ok(path)
    }

    /// Stat-only existence check.
    pub async fn has(&self, hash: &ChunkHash) -> bool {
        fs::metadata(self.chunk_path(hash)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use rand::RngCore;

    use super::*;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }

    #[tokio::test]
    async fn test_put_and_stat_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        let data = random_bytes(1024);
        let hash = ChunkHash::digest(&data);

        assert!(!store.has(&hash).await);
        let path = store.put(&hash, &data).await.unwrap();
        assert!(store.has(&hash).await);
        assert_eq!(std::fs::read(&path).unwrap(), data);

        let hex = hash.to_string();
        assert_eq!(path, dir.path().join(&hex[..2]).join(&hex[2..]));
    }

    #[tokio::test]
    async fn test_put_skips_existing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        let data = random_bytes(512);
        let hash = ChunkHash::digest(&data);

        let path = store.put(&hash, &data).await.unwrap();
        // A second put under the same digest must not rewrite the file;
        // feeding different bytes makes a rewrite observable.
        store.put(&hash, b"different").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_put_rewrites_truncated_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        let data = random_bytes(512);
        let hash = ChunkHash::digest(&data);

        // Simulate a crash that left an empty chunk file behind.
        let path = store.chunk_path(&hash);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();

        store.put(&hash, &data).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }
}
