//! Core building blocks for the cask store: the rolling checksum that picks
//! chunk boundaries, the chunker that drives it over a byte stream, and the
//! typed 32-byte identifiers everything is addressed by.

pub mod chunker;
pub mod constants;
pub mod hashes;
pub mod rollsum;
