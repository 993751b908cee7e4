//! Random-access reconstruction of a chunked upload.

use std::io::{self, Read, Seek, SeekFrom};

use cask_core::hashes::ChunkHash;

use crate::chunk_store::ChunkStore;
use crate::StoreError;

/// Reads a logical byte stream spread over an ordered list of chunks,
/// loading chunks on demand and keeping only the most recently used one in
/// memory.
///
/// Construction stats every referenced chunk to build a prefix-sum offset
/// table (`offsets[i]` = logical position where chunk `i` starts,
/// `offsets[n]` = total size), which buys O(log n) position-to-chunk lookup
/// for seeks. A chunk missing at construction time fails the whole reader:
/// a record pointing at absent chunks is an integrity problem, not an
/// empty read.
pub struct ChunkedReader {
    store: ChunkStore,
    chunks: Vec<ChunkHash>,
    offsets: Vec<u64>,
    pos: u64,
    cached: Option<(usize, Vec<u8>)>,
}

impl ChunkedReader {
    pub fn new(store: ChunkStore, chunks: Vec<ChunkHash>) -> Result<Self, StoreError> {
        let mut offsets = Vec::with_capacity(chunks.len() + 1);
        offsets.push(0u64);
        let mut total = 0u64;
        for hash in &chunks {
            let meta = std::fs::metadata(store.chunk_path(hash)).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    StoreError::MissingChunk(*hash)
                } else {
                    StoreError::Io(e)
                }
            })?;
            total += meta.len();
            offsets.push(total);
        }
        Ok(Self {
            store,
            chunks,
            offsets,
            pos: 0,
            cached: None,
        })
    }

    /// Total size of the reconstructed stream.
    pub fn len(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            // Largest i with offsets[i] <= pos is the chunk holding pos.
            // Zero-length chunks collapse to equal adjacent offsets and are
            // skipped over by the search.
            let index = match self
                .offsets
                .partition_point(|&off| off <= self.pos)
                .checked_sub(1)
            {
                Some(i) if i < self.chunks.len() => i,
                _ => break, // at or past end of stream
            };

            let cache_hit = matches!(&self.cached, Some((i, _)) if *i == index);
            if !cache_hit {
                let data = std::fs::read(self.store.chunk_path(&self.chunks[index]))?;
                self.cached = Some((index, data));
            }
            let Some((_, data)) = &self.cached else {
                break;
            };

            let within = (self.pos - self.offsets[index]) as usize;
            if within >= data.len() {
                // Chunk shorter than its recorded size; treat as end.
                break;
            }
            let take = (buf.len() - n).min(data.len() - within);
            buf[n..n + take].copy_from_slice(&data[within..within + take]);
            n += take;
            self.pos += take as u64;
        }
        Ok(n)
    }
}

impl Seek for ChunkedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len()) + i128::from(delta),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        // Seeking past the end is allowed; reads there just hit
        // end-of-stream.
        self.pos = target as u64;
        Ok(self.pos)
    }
}
