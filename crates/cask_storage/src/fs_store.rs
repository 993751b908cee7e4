//! The simple backend: one file per upload, no chunking.
//!
//! Kept as the plainest possible implementation of the facade. It shares
//! the handle shape and fan-out layout with the deduplicating backend, but
//! the leaf file is the payload itself rather than a digest list, so the
//! two layouts cannot be mixed under one root. Every upload costs its full
//! size on disk, and serving keeps the file open for the reader's lifetime;
//! prefer [`crate::DedupStore`] beyond toy volumes.

use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use cask_core::hashes::UploadId;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{
    leaf_name, parse_handle, prune_record, record_path, ByteStream, Object, ObjectStore,
    StoreError,
};

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the root directory if
    /// needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true).mode(0o700);
        builder.create(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn post(
        &self,
        name: &str,
        mut body: ByteStream,
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

        let stored = async {
            while let Some(block) = body.next().await {
                file.write_all(&block?).await?;
            }
            file.sync_all().await?;

            let file = file.into_std().await;
            let times = std::fs::FileTimes::new()
                .set_accessed(mtime)
                .set_modified(mtime);
            file.set_times(times)?;
            Ok::<_, StoreError>(())
        }
        .await;

        if let Err(e) = stored {
            // A half-written payload at this path is garbage nothing will
            // ever reference; drop it before surfacing the failure.
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }

        Ok(format!("{id}/{basename}"))
    }

    async fn get(&self, handle: &str) -> Result<Object, StoreError> {
        let (id, basename) = parse_handle(handle)?;
        let path = record_path(&self.root, &id, basename);

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;

        Ok(Object {
            reader: Box::new(file.into_std().await),
            size: meta.len(),
            mtime: meta.modified()?,
        })
    }

    async fn delete(&self, handle: &str) -> Result<(), StoreError> {
        let (id, basename) = parse_handle(handle)?;
        prune_record(&record_path(&self.root, &id, basename)).await
    }
}
