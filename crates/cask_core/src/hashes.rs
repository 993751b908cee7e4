use std::fmt::{self, Display, Formatter};
use std::hash::Hash;
use std::marker::PhantomData;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// SHA-256 digest of a chunk's bytes. The sole identity of a chunk.
pub type ChunkHash = TypedHash<private::ChunkHashType>;

/// Random 256-bit identifier minted for every upload. Unguessable, and it
/// lets uploads with the same name coexist.
pub type UploadId = TypedHash<private::UploadIdType>;

type Hash32 = [u8; 32];

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Invalid hash length, expected 64 characters")]
    InvalidStringLength,

    #[error("Invalid hash length, expected 32 bytes")]
    InvalidVecLength,

    #[error("Invalid hex string: {0}")]
    InvalidHexString(#[from] hex::FromHexError),
}

/// A 32-byte identifier tagged with what it identifies, rendered as 64
/// lowercase hex characters. The phantom type keeps a chunk digest from
/// being used where an upload id is expected and vice versa.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct TypedHash<T: HashType> {
    bytes: Hash32,
    _hash_type: PhantomData<T>,
}

pub trait HashType: Clone + Copy + PartialEq + Eq + Hash {}

impl<T: HashType> TypedHash<T> {
    /// Create a new 32-byte hash.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self {
            bytes,
            _hash_type: PhantomData,
        }
    }

    /// Returns the underlying hash as a `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

impl ChunkHash {
    /// Digest of a chunk's bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self::new(Sha256::digest(data).into())
    }
}

impl UploadId {
    /// Mint a fresh random identifier. `thread_rng` is a CSPRNG, which the
    /// unguessable-URL property depends on.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl<T> Display for TypedHash<T>
where
    T: HashType,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.bytes))
    }
}

impl<T> TryFrom<&str> for TypedHash<T>
where
    T: HashType,
{
    type Error = HashError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != 64 {
            return Err(HashError::InvalidStringLength);
        }

        let bytes = hex::decode(value)?;
        let mut hash = Hash32::default();
        hash.copy_from_slice(&bytes);
        Ok(Self::new(hash))
    }
}

impl<T> TryFrom<String> for TypedHash<T>
where
    T: HashType,
{
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl<T> TryFrom<Vec<u8>> for TypedHash<T>
where
    T: HashType,
{
    type Error = HashError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() != 32 {
            Err(HashError::InvalidVecLength)
        } else {
            let mut hash = Hash32::default();
            hash.copy_from_slice(&value);
            Ok(Self::new(hash))
        }
    }
}

impl<T> AsRef<[u8]> for TypedHash<T>
where
    T: HashType,
{
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

mod private {
    use serde::{Deserialize, Serialize};

    use super::HashType;

    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
    pub struct ChunkHashType;
    impl HashType for ChunkHashType {}

    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
    pub struct UploadIdType;
    impl HashType for UploadIdType {}
}
