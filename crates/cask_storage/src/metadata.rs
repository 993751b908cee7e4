//! Per-upload metadata records.
//!
//! A record lives at `<root>/<rid[0:2]>/<rid[2:64]>/<basename>` where `rid`
//! is a fresh random 256-bit identifier. The file body is the upload's
//! ordered chunk digest list, one lowercase hex digest per line with no
//! trailing newline, and the file's mtime is the upload's modification
//! time. The record is the upload: a post that dies before writing it never
//! happened, and deleting it removes the upload without touching chunks.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cask_core::hashes::{ChunkHash, UploadId};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{leaf_name, parse_handle, prune_record, record_path, StoreError};

pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Write a record binding `name`'s basename and `mtime` to the ordered
    /// digest list, under a freshly minted identifier. Returns the handle.
    ///
    /// The identifier is 256 random bits, so an existing file at the target
    /// path means the RNG is broken; that is treated as fatal for the post
    /// rather than papered over.
    pub async fn put(
        &self,
        name: &str,
        chunks: &[ChunkHash],
        mtime: SystemTime,
    ) -> Result<String, StoreError> {
        let basename = leaf_name(name)?;
        let id = UploadId::generate();
        let path = record_path(&self.root, &id, basename);

        if let Some(parent) = path.parent() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true).mode(0o700);
            builder.create(parent).await?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists)
            }
            Err(e) => return Err(e.into()),
        };

        let body = chunks
            .iter()
            .map(ChunkHash::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;

        let file = file.into_std().await;
        let times = std::fs::FileTimes::new()
            .set_accessed(mtime)
            .set_modified(mtime);
        file.set_times(times)?;

        let handle = format!("{id}/{basename}");
        debug!("Stored record {handle} with {} chunks", chunks.len());
        Ok(handle)
    }

    /// Read back a record's digest list and the mtime stored on its inode.
    /// Every line is revalidated as a digest; a record that fails to parse
    /// is corrupt, not absent.
    pub async fn load(&self, handle: &str) -> Result<(Vec<ChunkHash>, SystemTime), StoreError> {
        let (id, basename) = parse_handle(handle)?;
        let path = record_path(&self.root, &id, basename);

        let body = match fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let mtime = fs::metadata(&path).await?.modified()?;

        let chunks = body
            .split('\n')
            .map(ChunkHash::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((chunks, mtime))
    }

    /// Remove a record and prune its now-unused directories.
    pub async fn delete(&self, handle: &str) -> Result<(), StoreError> {
        let (id, basename) = parse_handle(handle)?;
        let path = record_path(&self.root, &id, basename);
        prune_record(&path).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn some_chunks() -> Vec<ChunkHash> {
        vec![
            ChunkHash::digest(b"first"),
            ChunkHash::digest(b"second"),
            ChunkHash::digest(b"third"),
        ]
    }

    #[tokio::test]
    async fn test_put_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let chunks = some_chunks();
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let handle = store.put("docs/x.txt", &chunks, mtime).await.unwrap();
        assert!(handle.ends_with("/x.txt"));
        assert_eq!(handle.len(), 64 + 1 + "x.txt".len());

        let (loaded, loaded_mtime) = store.load(&handle).await.unwrap();
        assert_eq!(loaded, chunks);
        assert_eq!(loaded_mtime, mtime);
    }

    #[tokio::test]
    async fn test_record_body_is_newline_joined_hex() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let chunks = some_chunks();

        let handle = store
            .put("docs/x.txt", &chunks, SystemTime::now())
            .await
            .unwrap();

        let (id, basename) = handle.split_once('/').unwrap();
        let path = dir.path().join(&id[..2]).join(&id[2..]).join(basename);
        let body = std::fs::read_to_string(path).unwrap();
        let expected = chunks
            .iter()
            .map(ChunkHash::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(body, expected);
        assert!(!body.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let chunks = some_chunks();
        let mtime = SystemTime::now();

        let a = store.put("docs/x.txt", &chunks, mtime).await.unwrap();
        let b = store.put("docs/x.txt", &chunks, mtime).await.unwrap();
        assert_ne!(a, b);

        store.load(&a).await.unwrap();
        store.load(&b).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let handle = format!("{}/x.txt", UploadId::generate());
        assert!(matches!(
            store.load(&handle).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        assert!(matches!(
            store.load("x").await,
            Err(StoreError::BadHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_prunes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());

        let handle = store
            .put("docs/x.txt", &some_chunks(), SystemTime::now())
            .await
            .unwrap();
        let (id, _) = handle.split_once('/').unwrap();
        let fanout = dir.path().join(&id[..2]);
        assert!(fanout.join(&id[2..]).is_dir());

        store.delete(&handle).await.unwrap();
        assert!(!fanout.exists());
        assert!(matches!(
            store.load(&handle).await,
            Err(StoreError::NotFound)
        ));

        // Deleting again reports the record as gone.
        assert!(matches!(
            store.delete(&handle).await,
            Err(StoreError::NotFound)
        ));
    }
}
