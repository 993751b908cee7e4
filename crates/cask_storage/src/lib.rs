//! Storage backends for cask.
//!
//! Two backends satisfy the same [`ObjectStore`] facade: [`DedupStore`]
//! splits every upload into content-defined chunks and stores each chunk
//! once per SHA-256 digest, while [`FsStore`] writes the payload as a single
//! file. A deployment picks one at startup; their on-disk layouts are not
//! interchangeable.
//!
//! Both address uploads by an opaque handle `"<64 hex chars>/<basename>"`
//! minted at post time. The hex half is a random 256-bit identifier whose
//! first two characters fan out to a top-level directory, so the handle
//! fully determines the filesystem path of the upload's record.

use std::io::{self, ErrorKind, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use cask_core::hashes::{ChunkHash, HashError, UploadId};
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::fs;

pub mod chunk_store;
pub mod dedup;
pub mod fs_store;
pub mod metadata;
pub mod reader;

pub use chunk_store::ChunkStore;
pub use dedup::DedupStore;
pub use fs_store::FsStore;
pub use metadata::MetadataStore;
pub use reader::ChunkedReader;

/// An upload body: a fallible stream of byte blocks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid handle: {0}")]
    BadHandle(String),

    #[error("Object not found")]
    NotFound,

    #[error("Object already exists")]
    AlreadyExists,

    #[error("Chunk {0} is referenced but missing from the store")]
    MissingChunk(ChunkHash),

    #[error("Invalid metadata record: {0}")]
    InvalidRecord(#[from] HashError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Random-access view of a stored object's bytes.
pub trait ObjectRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> ObjectRead for T {}

/// A retrieved object: its reconstructed byte stream, total size and the
/// modification time recorded at upload.
pub struct Object {
    pub reader: Box<dyn ObjectRead>,
    pub size: u64,
    pub mtime: SystemTime,
}

/// The facade the transport consumes. One implementation is constructed per
/// process and threaded through explicitly.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Consume `body` to completion and store it under `name`. Returns the
    /// handle future `get`/`delete` calls address the upload by.
    async fn post(
        &self,
        name: &str,
        body: ByteStream,
        mtime: SystemTime,
    ) -> Result<String, StoreError>;

    /// Look up an upload by handle.
    async fn get(&self, handle: &str) -> Result<Object, StoreError>;

    /// Remove an upload's record. Chunks referenced by it are left in
    /// place: other uploads may share them, and nothing tracks that here.
    async fn delete(&self, handle: &str) -> Result<(), StoreError>;
}

/// Split a handle into its random identifier and basename, revalidating
/// both. Handles come straight off the wire; nothing that fails this parse
/// ever touches the filesystem.
pub(crate) fn parse_handle(handle: &str) -> Result<(UploadId, &str), StoreError> {
    let bad = || StoreError::BadHandle(handle.to_string());
    let (id, basename) = handle.split_once('/').ok_or_else(bad)?;
    let id = UploadId::try_from(id).map_err(|_| bad())?;
    if basename.is_empty() || basename == "." || basename == ".." || basename.contains('/') {
        return Err(bad());
    }
    Ok((id, basename))
}

/// The trailing file component of a client-supplied name. Any directory
/// prefix is informational only.
pub(crate) fn leaf_name(name: &str) -> Result<&str, StoreError> {
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        return Err(StoreError::BadHandle(name.to_string()));
    }
    Ok(base)
}

/// Filesystem path of an upload record: `<root>/<hh>/<62 hex>/<basename>`.
pub(crate) fn record_path(root: &Path, id: &UploadId, basename: &str) -> PathBuf {
    let hex = id.to_string();
    root.join(&hex[..2]).join(&hex[2..]).join(basename)
}

/// Remove an upload record and prune its directories: the record's own
/// directory always (it only ever held this one file), the fan-out
/// directory above it only once it is empty.
pub(crate) async fn prune_record(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
        Err(e) => return Err(e.into()),
    }

    let record_dir = match path.parent() {
        Some(dir) => dir,
        None => return Ok(()),
    };
    fs::remove_dir(record_dir).await?;

    let fanout_dir = match record_dir.parent() {
        Some(dir) => dir,
        None => return Ok(()),
    };
    let mut entries = fs::read_dir(fanout_dir).await?;
    if entries.next_entry().await?.is_none() {
        let _ = fs::remove_dir(fanout_dir).await;
    }
    Ok(())
}
