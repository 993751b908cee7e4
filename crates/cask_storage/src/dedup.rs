//! The deduplicating backend.
//!
//! A post runs as a two-task pipeline: a producer drives the upload body
//! through the chunker and hands sealed chunks to the calling task over a
//! bounded channel, which persists them in input order. The metadata record
//! is written only after every chunk write has succeeded; until that commit
//! the upload does not exist. Chunks written by a post that then fails are
//! left behind — they are content-addressed, so a later post of the same
//! content simply finds them already stored.

use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use cask_core::chunker::{Chunk, Chunker};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task;
use tracing::debug;

use crate::chunk_store::ChunkStore;
use crate::metadata::MetadataStore;
use crate::reader::ChunkedReader;
use crate::{ByteStream, Object, ObjectStore, StoreError};

/// Handoff capacity between the chunk producer and the persisting consumer.
/// Bounds post memory to roughly this many in-flight chunks.
const CHUNK_CHANNEL_CAPACITY: usize = 8;

/// Content-addressed store with chunk-level dedup across uploads.
pub struct DedupStore {
    chunks: ChunkStore,
    metadata: MetadataStore,
}

impl DedupStore {
    /// Open a store rooted at `root`, creating the root directory if
    /// needed. Chunk files and metadata records share the same fan-out
    /// namespace under it.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true).mode(0o700);
        builder.create(root)?;
        Ok(Self {
            chunks: ChunkStore::new(root),
            metadata: MetadataStore::new(root),
        })
    }
}

/// Chunk the upload body and feed sealed chunks into `tx`, ending with the
/// unconditional final chunk. A body read error is returned without
/// emitting anything further; a closed channel means the consumer gave up,
/// and its error takes precedence.
async fn produce_chunks(mut body: ByteStream, tx: mpsc::Sender<Chunk>) -> Result<(), StoreError> {
    let mut chunker = Chunker::new();
    while let Some(block) = body.next().await {
        let block = block?;
        for &b in block.iter() {
            if let Some(chunk) = chunker.push(b) {
                if tx.send(chunk).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
    let _ = tx.send(chunker.finish()).await;
    Ok(())
}

#[async_trait]
impl ObjectStore for DedupStore {
    async fn post(
        &self,
        name: &str,
        body: ByteStream,
        mtime: SystemTime,
    ) -> Result<String, StoreError> {
        let (tx, mut rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let producer = tokio::spawn(produce_chunks(body, tx));

        let mut manifest = Vec::new();
        let mut write_error = None;
        while let Some(chunk) = rx.recv().await {
            match self.chunks.put(&chunk.hash, &chunk.data).await {
                Ok(_) => manifest.push(chunk.hash),
                Err(e) => {
                    write_error = Some(e);
                    break;
                }
            }
        }
        // Dropping the receiver cancels a still-running producer at its
        // next send.
        drop(rx);

        let produced = producer
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        if let Some(e) = write_error {
            return Err(e);
        }
        produced?;

        let handle = self.metadata.put(name, &manifest, mtime).await?;
        debug!("Posted {handle}: {} chunks", manifest.len());
        Ok(handle)
    }

    async fn get(&self, handle: &str) -> Result<Object, StoreError> {
        let (chunks, mtime) = self.metadata.load(handle).await?;
        let store = self.chunks.clone();
        // Construction stats every referenced chunk; keep that off the
        // reactor.
        let reader = task::spawn_blocking(move || ChunkedReader::new(store, chunks))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        let size = reader.len();
        Ok(Object {
            reader: Box::new(reader),
            size,
            mtime,
        })
    }

    async fn delete(&self, handle: &str) -> Result<(), StoreError> {
        self.metadata.delete(handle).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Read;
    use std::time::{Duration, UNIX_EPOCH};

    use bytes::Bytes;
    use cask_core::hashes::ChunkHash;
    use futures::stream;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    use super::*;

    fn body_of(data: Vec<u8>) -> ByteStream {
        stream::once(async move { Ok(Bytes::from(data)) }).boxed()
    }

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut buf);
        buf
    }

    fn read_all(mut object: Object) -> Vec<u8> {
        let mut out = Vec::new();
        object.reader.read_to_end(&mut out).unwrap();
        out
    }

    /// Chunk files are the depth-two files under the root; metadata records
    /// sit one directory deeper.
    fn census(root: &Path) -> (usize, usize) {
        let mut chunk_files = 0;
        let mut records = 0;
        for fanout in std::fs::read_dir(root).unwrap() {
            for entry in std::fs::read_dir(fanout.unwrap().path()).unwrap() {
                let entry = entry.unwrap();
                if entry.file_type().unwrap().is_dir() {
                    records += std::fs::read_dir(entry.path()).unwrap().count();
                } else {
                    chunk_files += 1;
                }
            }
        }
        (chunk_files, records)
    }

    #[tokio::test]
    async fn test_post_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path()).unwrap();
        let data = random_bytes(100 * 1024, 31);
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let handle = store
            .post("docs/report.bin", body_of(data.clone()), mtime)
            .await
            .unwrap();
        assert!(handle.ends_with("/report.bin"));

        let object = store.get(&handle).await.unwrap();
        assert_eq!(object.size, data.len() as u64);
        assert_eq!(object.mtime, mtime);
        assert_eq!(read_all(object), data);
    }

    #[tokio::test]
    async fn test_empty_upload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path()).unwrap();

        let handle = store
            .post("docs/empty", body_of(Vec::new()), SystemTime::now())
            .await
            .unwrap();

        let object = store.get(&handle).await.unwrap();
        assert_eq!(object.size, 0);
        assert!(read_all(object).is_empty());

        // The record must reference exactly the digest of the empty string.
        let (chunks, _) = MetadataStore::new(dir.path()).load(&handle).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(store.chunks.has(&chunks[0]).await);
    }

    #[tokio::test]
    async fn test_reposting_adds_no_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path()).unwrap();
        let data = random_bytes(200 * 1024, 32);

        let first = store
            .post("docs/a.bin", body_of(data.clone()), SystemTime::now())
            .await
            .unwrap();
        let (chunks_before, records_before) = census(dir.path());
        assert!(chunks_before > 1);
        assert_eq!(records_before, 1);

        let second = store
            .post("docs/a.bin", body_of(data.clone()), SystemTime::now())
            .await
            .unwrap();
        assert_ne!(first, second);

        let (chunks_after, records_after) = census(dir.path());
        assert_eq!(chunks_after, chunks_before);
        assert_eq!(records_after, 2);

        assert_eq!(read_all(store.get(&first).await.unwrap()), data);
        assert_eq!(read_all(store.get(&second).await.unwrap()), data);
    }

    #[tokio::test]
    async fn test_insertion_adds_few_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path()).unwrap();
        let data = random_bytes(256 * 1024, 33);

        store
            .post("docs/v1", body_of(data.clone()), SystemTime::now())
            .await
            .unwrap();
        let (chunks_before, _) = census(dir.path());

        let mut edited = data[..data.len() / 2].to_vec();
        edited.extend_from_slice(&random_bytes(1024, 34));
        edited.extend_from_slice(&data[data.len() / 2..]);
        let handle = store
            .post("docs/v2", body_of(edited.clone()), SystemTime::now())
            .await
            .unwrap();

        let (chunks_after, _) = census(dir.path());
        assert!(
            chunks_after - chunks_before <= 4,
            "insertion created {} new chunk files",
            chunks_after - chunks_before
        );
        assert_eq!(read_all(store.get(&handle).await.unwrap()), edited);
    }

    #[tokio::test]
    async fn test_delete_leaves_shared_chunks_intact() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path()).unwrap();
        let data = random_bytes(64 * 1024, 35);

        let doomed = store
            .post("docs/a", body_of(data.clone()), SystemTime::now())
            .await
            .unwrap();
        let survivor = store
            .post("docs/b", body_of(data.clone()), SystemTime::now())
            .await
            .unwrap();

        store.delete(&doomed).await.unwrap();
        assert!(matches!(
            store.get(&doomed).await,
            Err(StoreError::NotFound)
        ));
        assert_eq!(read_all(store.get(&survivor).await.unwrap()), data);
    }

    #[tokio::test]
    async fn test_body_error_aborts_post_without_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path()).unwrap();

        let body: ByteStream = stream::iter(vec![
            Ok(Bytes::from(random_bytes(32 * 1024, 36))),
            Err(std::io::Error::other("connection reset")),
        ])
        .boxed();

        assert!(store
            .post("docs/broken", body, SystemTime::now())
            .await
            .is_err());

        // No record was committed; leaked chunks are fine.
        let (_, records) = census(dir.path());
        assert_eq!(records, 0);
    }

    #[tokio::test]
    async fn test_reposts_share_chunk_digests_not_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(dir.path()).unwrap();
        let data = random_bytes(32 * 1024, 37);
        let mtime = SystemTime::now();

        let a = store
            .post("docs/same", body_of(data.clone()), mtime)
            .await
            .unwrap();
        let b = store
            .post("docs/same", body_of(data.clone()), mtime)
            .await
            .unwrap();
        assert_ne!(a, b);

        let meta = MetadataStore::new(dir.path());
        let (chunks_a, _) = meta.load(&a).await.unwrap();
        let (chunks_b, _) = meta.load(&b).await.unwrap();
        let set_a: HashSet<String> = chunks_a.iter().map(ChunkHash::to_string).collect();
        let set_b: HashSet<String> = chunks_b.iter().map(ChunkHash::to_string).collect();
        assert_eq!(set_a, set_b);
    }
}
