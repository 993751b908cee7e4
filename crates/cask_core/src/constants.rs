/// Width of the rolling-checksum window in bytes.
///
/// The four constants in this module are part of the on-disk format:
/// changing any of them moves chunk boundaries, which makes every digest
/// list written by an older deployment irreconstructible. Treat them as
/// frozen.
pub const WINDOW_SIZE: usize = 64;

/// Offset added to every byte before it enters the checksum accumulators.
pub const CHAR_OFFSET: u32 = 31;

/// Number of low digest bits tested by the split predicate. A 13-bit mask
/// over uniformly random input gives a mean chunk size of about 8 KiB.
pub const SPLIT_BITS: u32 = 13;

/// The split pattern: a boundary is declared when the low [`SPLIT_BITS`]
/// bits of the digest are all ones.
pub const SPLIT_MASK: u32 = (1 << SPLIT_BITS) - 1;
