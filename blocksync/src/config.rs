//! Choosing the block size and hashes of a signature.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hash::{StrongHashType, WeakHashType};
use crate::signature::SignatureHeader;
use crate::{Error, Result};

/// The largest block size accepted, both when creating and when reading signatures.
pub const MAX_BLOCK_SIZE: usize = 256 * 1024;
/// The block size used when nothing is known about the input.
pub const DEFAULT_BLOCK_SIZE: usize = 6 * 1024;

/// How the block size of a signature is chosen.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[must_use]
pub enum BlockSize {
    /// Use [`DEFAULT_BLOCK_SIZE`].
    #[default]
    Default,
    /// Derive the block size from the expected length of the input.
    ///
    /// See [`block_size_for`].
    ExpectedSize(u64),
    /// Use exactly this block size. It still has to be in the range `1..=MAX_BLOCK_SIZE`.
    Exact(usize),
}

/// Settings for creating a signature.
///
/// The side which only consumes a signature doesn't need one: the header of the signature
/// carries the block size and hash algorithms.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[must_use]
pub struct Config {
    block_size: BlockSize,
    strong_hash: StrongHashType,
    weak_hash: WeakHashType,
}
impl Config {
    /// The default configuration: [`DEFAULT_BLOCK_SIZE`], [`StrongHashType::Xxh3_64`] and
    /// [`WeakHashType::Beta`].
    pub fn new() -> Self {
        Self::default()
    }
    /// Pick the block size from the `expected_size` of the input.
    ///
    /// The table of block hashes is also preallocated for that many bytes.
    pub fn for_expected_size(expected_size: u64) -> Self {
        Self {
            block_size: BlockSize::ExpectedSize(expected_size),
            ..Self::default()
        }
    }
    /// Use a fixed `block_size`.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: BlockSize::Exact(block_size),
            ..Self::default()
        }
    }
    /// Set the strong hash algorithm.
    pub fn strong_hash(mut self, strong_hash: StrongHashType) -> Self {
        self.strong_hash = strong_hash;
        self
    }
    /// Set the weak hash algorithm.
    pub fn weak_hash(mut self, weak_hash: WeakHashType) -> Self {
        self.weak_hash = weak_hash;
        self
    }
    /// Get the strong hash algorithm.
    pub fn strong(&self) -> StrongHashType {
        self.strong_hash
    }
    /// Get the weak hash algorithm.
    pub fn weak(&self) -> WeakHashType {
        self.weak_hash
    }
    /// The expected input size, if one was given.
    #[must_use]
    pub fn expected_size(&self) -> Option<u64> {
        match self.block_size {
            BlockSize::ExpectedSize(size) => Some(size),
            BlockSize::Default | BlockSize::Exact(_) => None,
        }
    }
    /// Resolve the block size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroBlockSize`] or [`Error::BlockSizeTooLarge`] if an
    /// [exact](BlockSize::Exact) block size is out of range.
    pub fn block_size(&self) -> Result<usize> {
        match self.block_size {
            BlockSize::Default => Ok(DEFAULT_BLOCK_SIZE),
            BlockSize::ExpectedSize(size) => Ok(block_size_for(size, self.strong_hash)),
            BlockSize::Exact(size) => check_block_size(size),
        }
    }
    /// The header of signatures created with this configuration.
    ///
    /// # Errors
    ///
    /// See [`Self::block_size`].
    #[allow(clippy::cast_possible_truncation)] // `MAX_BLOCK_SIZE` fits in a u32
    pub fn header(&self) -> Result<SignatureHeader> {
        let block_size = self.block_size()?;
        Ok(SignatureHeader::new(
            self.strong_hash,
            self.weak_hash,
            block_size as u32,
        ))
    }
}

/// Check that `block_size` is in the range `1..=MAX_BLOCK_SIZE`.
///
/// # Errors
///
/// Returns [`Error::ZeroBlockSize`] or [`Error::BlockSizeTooLarge`].
pub fn check_block_size(block_size: usize) -> Result<usize> {
    match block_size {
        0 => Err(Error::ZeroBlockSize),
        1..=MAX_BLOCK_SIZE => Ok(block_size),
        _ => Err(Error::BlockSizeTooLarge(block_size)),
    }
}

/// Get a block size suitable for input of `expected_size` bytes.
///
/// This is the square root of the size, clamped to `1..=MAX_BLOCK_SIZE`. If the `strong`
/// hash processes data in blocks smaller than that, the result is rounded down to a multiple
/// of that block. An `expected_size` of `0` gives [`DEFAULT_BLOCK_SIZE`].
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn block_size_for(expected_size: u64, strong: StrongHashType) -> usize {
    if expected_size == 0 {
        return DEFAULT_BLOCK_SIZE;
    }
    let mut block_size = ((expected_size as f64).sqrt().round() as usize).clamp(1, MAX_BLOCK_SIZE);
    if let Some(hash_block) = strong.internal_block_size() {
        if hash_block > 0 && hash_block < block_size {
            block_size = block_size / hash_block * hash_block;
        }
    }
    block_size
}

/// The number of blocks input of `len` bytes is split into.
#[must_use]
pub fn block_count(len: u64, block_size: usize) -> u64 {
    let block_size = block_size as u64;
    len / block_size + u64::from(len % block_size != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_block_size() {
        let strong = StrongHashType::Xxh3_128;
        assert_eq!(block_size_for(0, strong), DEFAULT_BLOCK_SIZE);
        assert_eq!(block_size_for(1, strong), 1);
        // sqrt(1000) = 31.6, below the hash block
        assert_eq!(block_size_for(1000, strong), 32);
        // sqrt(1_000_000) = 1000, rounded down to a multiple of 64
        assert_eq!(block_size_for(1_000_000, strong), 960);
        assert_eq!(block_size_for(u64::MAX, strong), MAX_BLOCK_SIZE);
    }
    #[test]
    fn exact_block_size() {
        assert_eq!(Config::with_block_size(4).block_size().unwrap(), 4);
        assert!(matches!(
            Config::with_block_size(0).block_size(),
            Err(Error::ZeroBlockSize)
        ));
        assert!(matches!(
            Config::with_block_size(MAX_BLOCK_SIZE + 1).block_size(),
            Err(Error::BlockSizeTooLarge(_))
        ));
        assert_eq!(
            Config::with_block_size(MAX_BLOCK_SIZE).block_size().unwrap(),
            MAX_BLOCK_SIZE
        );
    }
    #[test]
    fn header_from_config() {
        let header = Config::with_block_size(100)
            .weak_hash(WeakHashType::Adler32)
            .strong_hash(StrongHashType::Xxh3_128)
            .header()
            .unwrap();
        assert_eq!(header.block_size(), 100);
        assert_eq!(header.weak(), WeakHashType::Adler32);
        assert_eq!(header.strong(), StrongHashType::Xxh3_128);
    }
    #[test]
    fn counts() {
        assert_eq!(block_count(0, 4), 0);
        assert_eq!(block_count(16, 4), 4);
        assert_eq!(block_count(17, 4), 5);
    }
}
