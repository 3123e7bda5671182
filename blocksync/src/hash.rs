//! Weak (rolling) and strong hashes, identified by the tags used on the wire.
//!
//! The weak hash is cheap and can be slid over data one byte at a time. It's only used to
//! prune candidates. The strong hash confirms a candidate before any bytes are copied.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::{Error, Result};

/// Used to make the weak hashes generic.
///
/// This is implemented by the rsync-style [`Beta`] checksum, the
/// [Adler32](https://docs.rs/adler32/latest/adler32/) algorithm and the
/// [cyclic poly 32](https://docs.rs/cyclic-poly-23/latest/cyclic_poly_23/) algorithm. The
/// implementation of cyclic poly 23 is in a [`Box`] due to the large size of the struct.
pub trait RollingHasher {
    /// Create a new hasher.
    fn new(block_size: usize) -> Self;
    /// Reset the inner state. If the struct provides no such functionality, consider overriding
    /// the current value with a `new` instance.
    fn reset(&mut self, block_size: usize);
    /// Append `block` to the hashed window.
    fn update(&mut self, block: &[u8], block_size: usize);
    /// Remove `old` and add `new`. The window keeps the length `block_size`.
    fn rotate(&mut self, old: u8, new: u8, block_size: usize);
    /// Get the current internal hash.
    fn value(&self) -> u32;
}

/// The rsync rolling checksum.
///
/// `alpha` is the sum of the bytes in the window and `beta` the sum of the bytes weighted by
/// their distance to the end of the window, both modulo 2^16.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Beta {
    alpha: u32,
    beta: u32,
}
impl RollingHasher for Beta {
    fn new(_: usize) -> Self {
        Self::default()
    }
    fn reset(&mut self, _: usize) {
        *self = Self::default();
    }
    fn update(&mut self, block: &[u8], _: usize) {
        for byte in block {
            self.alpha = self.alpha.wrapping_add(u32::from(*byte));
            self.beta = self.beta.wrapping_add(self.alpha);
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    fn rotate(&mut self, old: u8, new: u8, block_size: usize) {
        let old = u32::from(old);
        self.alpha = self.alpha.wrapping_sub(old).wrapping_add(u32::from(new));
        // only the lower 16 bits are kept, truncating `block_size` doesn't change them.
        self.beta = self
            .beta
            .wrapping_sub((block_size as u32).wrapping_mul(old))
            .wrapping_add(self.alpha);
    }
    fn value(&self) -> u32 {
        (self.alpha & 0xffff) | (self.beta << 16)
    }
}
impl RollingHasher for adler32::RollingAdler32 {
    fn new(_: usize) -> Self {
        Self::new()
    }
    fn reset(&mut self, _: usize) {
        *self = Self::new();
    }
    fn update(&mut self, block: &[u8], _: usize) {
        self.update_buffer(block);
    }
    fn rotate(&mut self, old: u8, new: u8, block_size: usize) {
        self.remove(block_size, old);
        self.update(new);
    }
    fn value(&self) -> u32 {
        self.hash()
    }
}
impl RollingHasher for Box<cyclic_poly_23::CyclicPoly32> {
    fn new(block_size: usize) -> Self {
        Box::new(cyclic_poly_23::CyclicPoly32::new(block_size))
    }
    fn reset(&mut self, _: usize) {
        self.reset_hash();
    }
    fn update(&mut self, block: &[u8], _: usize) {
        (**self).update(block);
    }
    fn rotate(&mut self, old: u8, new: u8, _: usize) {
        (**self).rotate(old, new);
    }
    fn value(&self) -> u32 {
        (**self).value()
    }
}

/// The weak hash algorithms which can be declared in a signature header.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
#[must_use]
pub enum WeakHashType {
    /// The rsync rolling checksum. Tag `0`.
    #[default]
    Beta,
    /// Adler-32. Tag `1`.
    Adler32,
    /// 32-bit cyclic polynomial (buzhash). Tag `2`.
    CyclicPoly32,
}
impl WeakHashType {
    /// The tag written in the signature header.
    #[must_use]
    pub const fn tag(self) -> u16 {
        match self {
            Self::Beta => 0,
            Self::Adler32 => 1,
            Self::CyclicPoly32 => 2,
        }
    }
    /// Get the algorithm from the header `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownWeakHash`] for tags not listed on [`Self`].
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(Self::Beta),
            1 => Ok(Self::Adler32),
            2 => Ok(Self::CyclicPoly32),
            _ => Err(Error::UnknownWeakHash(tag)),
        }
    }
    #[inline]
    pub(crate) fn hasher(self, block_size: usize) -> WeakHasher {
        match self {
            Self::Beta => WeakHasher::Beta(Beta::new(block_size)),
            Self::Adler32 => WeakHasher::Adler32(RollingHasher::new(block_size)),
            Self::CyclicPoly32 => WeakHasher::CyclicPoly32(RollingHasher::new(block_size)),
        }
    }
}

/// The strong hash algorithms which can be declared in a signature header.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
#[must_use]
#[allow(non_camel_case_types)]
pub enum StrongHashType {
    /// 64-bit XXH3. Tag `0`.
    #[default]
    Xxh3_64,
    /// 128-bit XXH3. Tag `1`.
    Xxh3_128,
}
impl StrongHashType {
    /// The tag written in the signature header.
    #[must_use]
    pub const fn tag(self) -> u16 {
        match self {
            Self::Xxh3_64 => 0,
            Self::Xxh3_128 => 1,
        }
    }
    /// Get the algorithm from the header `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStrongHash`] for tags not listed on [`Self`].
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(Self::Xxh3_64),
            1 => Ok(Self::Xxh3_128),
            _ => Err(Error::UnknownStrongHash(tag)),
        }
    }
    /// Length of the digest in bytes.
    #[must_use]
    pub const fn digest_size(self) -> usize {
        match self {
            Self::Xxh3_128 => 16,
            Self::Xxh3_64 => 8,
        }
    }
    /// The size of the chunks the algorithm processes internally, if it has any.
    ///
    /// Block sizes derived from an expected input size are rounded down to a multiple of this.
    #[must_use]
    pub const fn internal_block_size(self) -> Option<usize> {
        match self {
            // the XXH3 stripe
            Self::Xxh3_128 | Self::Xxh3_64 => Some(64),
        }
    }
    /// Hash `data`.
    #[inline]
    pub fn hash(self, data: &[u8]) -> StrongHash {
        match self {
            Self::Xxh3_128 => StrongHash::B16(xxhash_rust::xxh3::xxh3_128(data).to_le_bytes()),
            Self::Xxh3_64 => StrongHash::B8(xxhash_rust::xxh3::xxh3_64(data).to_le_bytes()),
        }
    }
}

/// A digest from a [`StrongHashType`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
#[must_use]
pub enum StrongHash {
    /// 64-bit digest.
    B8([u8; 8]),
    /// 128-bit digest.
    B16([u8; 16]),
}
impl StrongHash {
    /// Read a digest of `ty` from the start of `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`StrongHashType::digest_size`].
    pub(crate) fn from_slice(ty: StrongHashType, bytes: &[u8]) -> Self {
        match ty {
            StrongHashType::Xxh3_128 => {
                let mut digest = [0; 16];
                digest.copy_from_slice(&bytes[..16]);
                Self::B16(digest)
            }
            StrongHashType::Xxh3_64 => {
                let mut digest = [0; 8];
                digest.copy_from_slice(&bytes[..8]);
                Self::B8(digest)
            }
        }
    }
    /// The digest as written on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::B8(bytes) => bytes,
            Self::B16(bytes) => bytes,
        }
    }
}
impl Debug for StrongHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StrongHash(")?;
        for byte in self.as_bytes() {
            write!(f, "{byte:02X}")?;
        }
        f.write_str(")")
    }
}

/// A weak hasher of the algorithm chosen at runtime.
pub(crate) enum WeakHasher {
    Beta(Beta),
    Adler32(adler32::RollingAdler32),
    CyclicPoly32(Box<cyclic_poly_23::CyclicPoly32>),
}
impl WeakHasher {
    /// Hash `window` from scratch.
    #[inline]
    pub(crate) fn hash_window(&mut self, window: &[u8], block_size: usize) -> u32 {
        self.reset(block_size);
        self.update(window, block_size);
        self.value()
    }
    #[inline]
    pub(crate) fn reset(&mut self, block_size: usize) {
        match self {
            Self::Beta(h) => h.reset(block_size),
            Self::Adler32(h) => h.reset(block_size),
            Self::CyclicPoly32(h) => h.reset(block_size),
        }
    }
    #[inline]
    pub(crate) fn update(&mut self, block: &[u8], block_size: usize) {
        match self {
            Self::Beta(h) => h.update(block, block_size),
            Self::Adler32(h) => RollingHasher::update(h, block, block_size),
            Self::CyclicPoly32(h) => RollingHasher::update(h, block, block_size),
        }
    }
    #[inline]
    pub(crate) fn rotate(&mut self, old: u8, new: u8, block_size: usize) {
        match self {
            Self::Beta(h) => h.rotate(old, new, block_size),
            Self::Adler32(h) => h.rotate(old, new, block_size),
            Self::CyclicPoly32(h) => h.rotate(old, new, block_size),
        }
    }
    #[inline]
    pub(crate) fn value(&self) -> u32 {
        match self {
            Self::Beta(h) => h.value(),
            Self::Adler32(h) => RollingHasher::value(h),
            Self::CyclicPoly32(h) => RollingHasher::value(h),
        }
    }
}
impl Debug for WeakHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakHasher (internal hasher data)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &[u8] = b"The quick brown fox jumps over the lazy dog, again and again.";

    fn check_rolling(ty: WeakHashType, block_size: usize) {
        let mut rolling = ty.hasher(block_size);
        let mut fresh = ty.hasher(block_size);
        rolling.hash_window(&DATA[..block_size], block_size);
        for start in 1..=DATA.len() - block_size {
            rolling.rotate(DATA[start - 1], DATA[start + block_size - 1], block_size);
            let expected = fresh.hash_window(&DATA[start..start + block_size], block_size);
            assert_eq!(rolling.value(), expected, "{ty:?} at {start}");
        }
    }

    #[test]
    fn beta_rolls() {
        check_rolling(WeakHashType::Beta, 1);
        check_rolling(WeakHashType::Beta, 7);
        check_rolling(WeakHashType::Beta, 16);
    }
    #[test]
    fn adler32_rolls() {
        check_rolling(WeakHashType::Adler32, 8);
    }
    #[test]
    fn cyclic_poly_rolls() {
        check_rolling(WeakHashType::CyclicPoly32, 8);
    }
    #[test]
    fn beta_known_value() {
        let mut h = Beta::default();
        h.update(&[1, 2, 3], 3);
        // alpha = 6, beta = 3*1 + 2*2 + 1*3
        assert_eq!(h.value(), 6 | (10 << 16));
    }
    #[test]
    fn beta_update_is_incremental() {
        let mut whole = Beta::default();
        whole.update(DATA, DATA.len());
        let mut parts = Beta::default();
        parts.update(&DATA[..10], DATA.len());
        parts.update(&DATA[10..], DATA.len());
        assert_eq!(whole, parts);
    }
    #[test]
    fn tags() {
        for ty in [
            WeakHashType::Beta,
            WeakHashType::Adler32,
            WeakHashType::CyclicPoly32,
        ] {
            assert_eq!(WeakHashType::from_tag(ty.tag()).unwrap(), ty);
        }
        for ty in [StrongHashType::Xxh3_128, StrongHashType::Xxh3_64] {
            assert_eq!(StrongHashType::from_tag(ty.tag()).unwrap(), ty);
            assert_eq!(ty.hash(DATA).as_bytes().len(), ty.digest_size());
        }
        assert!(matches!(
            WeakHashType::from_tag(3),
            Err(Error::UnknownWeakHash(3))
        ));
        assert!(matches!(
            StrongHashType::from_tag(9),
            Err(Error::UnknownStrongHash(9))
        ));
    }
    #[test]
    fn strong_from_slice() {
        let digest = StrongHashType::Xxh3_128.hash(DATA);
        let read = StrongHash::from_slice(StrongHashType::Xxh3_128, digest.as_bytes());
        assert_eq!(digest, read);
        assert_ne!(digest, StrongHashType::Xxh3_128.hash(b"other"));
    }
}
