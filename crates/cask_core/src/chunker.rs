use crate::hashes::ChunkHash;
use crate::rollsum::RollSum;

/// A sealed chunk: the bytes between two content-defined boundaries and
/// their SHA-256 digest.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub hash: ChunkHash,
    pub data: Vec<u8>,
}

impl Chunk {
    fn seal(data: Vec<u8>) -> Self {
        Self {
            hash: ChunkHash::digest(&data),
            data,
        }
    }
}

/// Splits a byte stream into content-defined chunks, one pushed byte at a
/// time. Only the in-flight chunk is buffered, so memory stays bounded by
/// the largest chunk the input produces.
///
/// The rolling checksum state carries across chunk boundaries: the window at
/// the start of a chunk still covers the tail of the previous one, which is
/// what keeps boundaries stable when content shifts.
pub struct Chunker {
    rollsum: RollSum,
    pending: Vec<u8>,
}

impl Chunker {
    pub fn new() -> Self {
        Self {
            rollsum: RollSum::new(),
            pending: Vec::new(),
        }
    }

    /// Feed one byte. Returns the sealed chunk when the checksum marks a
    /// boundary at this byte.
    pub fn push(&mut self, b: u8) -> Option<Chunk> {
        self.pending.push(b);
        self.rollsum.roll(b);
        if self.rollsum.on_split() {
            Some(Chunk::seal(std::mem::take(&mut self.pending)))
        } else {
            None
        }
    }

    /// Seal whatever is in flight as the final chunk. Always emits, even
    /// when nothing is pending: an upload's digest list must have at least
    /// one entry, and the empty input round-trips as a single zero-length
    /// chunk.
    pub fn finish(self) -> Chunk {
        Chunk::seal(self.pending)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk a fully in-memory byte slice.
pub fn split(data: &[u8]) -> Vec<Chunk> {
    let mut chunker = Chunker::new();
    let mut chunks = Vec::new();
    for &b in data {
        if let Some(chunk) = chunker.push(b) {
            chunks.push(chunk);
        }
    }
    chunks.push(chunker.finish());
    chunks
}
