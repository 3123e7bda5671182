//! The hashes of every block of a reference and the index used to find them again.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use rustc_hash::FxHashMap;
use std::slice;

use crate::hash::{StrongHash, StrongHashType};
use crate::signature::SignatureHeader;
use crate::{Decode, Error, Result};

/// The size of the fixed part of a [`BlockHash`] on the wire.
/// The strong hash follows.
pub const BLOCK_HASH_FIXED_LEN: usize = 12;

/// The hashes of one block of the reference.
///
/// All blocks except the last one are exactly [`SignatureHeader::block_size`] long.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[must_use]
pub struct BlockHash {
    weak: u32,
    strong: StrongHash,
    index: u32,
    length: u32,
}
impl BlockHash {
    /// Create a record for block `index` of `length` bytes.
    pub fn new(weak: u32, strong: StrongHash, index: u32, length: u32) -> Self {
        Self {
            weak,
            strong,
            index,
            length,
        }
    }
    /// The weak hash of the block.
    #[must_use]
    pub fn weak(&self) -> u32 {
        self.weak
    }
    /// The strong hash of the block.
    pub fn strong(&self) -> &StrongHash {
        &self.strong
    }
    /// The position of the block in the reference, counted in blocks.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
    /// The number of bytes in the block.
    #[must_use]
    #[allow(clippy::len_without_is_empty)] // blocks are never empty
    pub fn len(&self) -> usize {
        self.length as usize
    }
    /// The length of a serialized record with a `strong` hash.
    #[must_use]
    pub const fn serialized_len(strong: StrongHashType) -> usize {
        BLOCK_HASH_FIXED_LEN + strong.digest_size()
    }
    /// Append the wire representation to `out`.
    ///
    /// `weak_hash | block_index | block_length | strong_hash`, integers as little endian u32s.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.weak.to_le_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(self.strong.as_bytes());
    }
    /// Read a record with a `strong` hash from the start of `data`.
    pub fn decode(data: &[u8], strong: StrongHashType) -> Decode<Self> {
        let len = Self::serialized_len(strong);
        if data.len() < len {
            return Decode::NeedMoreData;
        }
        let block = Self {
            weak: read_u32(data, 0),
            index: read_u32(data, 4),
            length: read_u32(data, 8),
            strong: StrongHash::from_slice(strong, &data[BLOCK_HASH_FIXED_LEN..len]),
        };
        Decode::Consumed(len, block)
    }
}

pub(crate) fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

/// The blocks which share a weak hash.
///
/// Most weak hashes belong to a single block. Don't allocate a [`Vec`] for those.
#[derive(Debug, PartialEq, Eq, Clone)]
enum Candidates {
    Single(u32),
    Multiple(Vec<u32>),
}
impl Candidates {
    fn as_slice(&self) -> &[u32] {
        match self {
            Self::Single(index) => slice::from_ref(index),
            Self::Multiple(list) => list,
        }
    }
    fn push(&mut self, index: u32) {
        match self {
            Self::Single(first) => {
                let first = *first;
                *self = Self::Multiple(vec![first, index]);
            }
            Self::Multiple(list) => list.push(index),
        }
    }
}

/// The ordered [`BlockHash`]es of a reference, with an index on the weak hash.
///
/// Created by [`crate::SignatureBuilder`] on the side that has the reference,
/// or decoded from a signature on the other side.
#[derive(Debug, PartialEq, Eq, Clone)]
#[must_use]
pub struct BlockHashTable {
    header: SignatureHeader,
    blocks: Vec<BlockHash>,
    lookup: FxHashMap<u32, Candidates>,
    total_len: u64,
}
impl BlockHashTable {
    /// Create an empty table for blocks described by `header`.
    pub fn new(header: SignatureHeader) -> Self {
        Self::with_capacity(header, 0)
    }
    /// Create an empty table with room for `capacity` blocks.
    pub fn with_capacity(header: SignatureHeader, capacity: usize) -> Self {
        Self {
            header,
            blocks: Vec::with_capacity(capacity),
            lookup: FxHashMap::default(),
            total_len: 0,
        }
    }
    /// The header this table was created with.
    pub fn header(&self) -> &SignatureHeader {
        &self.header
    }
    /// The length of all blocks except the last.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.header.block_size()
    }
    /// All the blocks, in the order of the reference.
    pub fn blocks(&self) -> &[BlockHash] {
        &self.blocks
    }
    /// The number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }
    /// If the reference was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
    /// The length of the reference, the sum of the lengths of all blocks.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        self.total_len
    }
    /// Add the next block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if the index isn't the next one, if the length is `0` or
    /// larger than the block size, or if the previous block was shorter than the block size.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, block: BlockHash) -> Result<()> {
        let expected_index = self.blocks.len() as u32;
        let previous_short = self
            .blocks
            .last()
            .map_or(false, |last| last.len() < self.block_size());
        if block.index != expected_index
            || block.length == 0
            || block.len() > self.block_size()
            || previous_short
        {
            return Err(Error::InvalidBlock {
                expected_index,
                index: block.index,
                length: block.length,
            });
        }

        match self.lookup.get_mut(&block.weak) {
            Some(candidates) => candidates.push(block.index),
            None => {
                self.lookup.insert(block.weak, Candidates::Single(block.index));
            }
        }
        self.total_len += u64::from(block.length);
        self.blocks.push(block);
        Ok(())
    }
    /// The blocks with the `weak` hash, in the order of the reference.
    pub fn candidates(&self, weak: u32) -> impl Iterator<Item = &BlockHash> + '_ {
        self.lookup
            .get(&weak)
            .map_or(&[][..], Candidates::as_slice)
            .iter()
            .map(|index| &self.blocks[*index as usize])
    }
    /// Find the first block with the `weak` hash which has the same contents as `window`.
    ///
    /// The strong hash of `window` is only computed if any block has the weak hash.
    /// A block with a matching weak hash but different strong hash or length is no match.
    pub fn find(&self, weak: u32, window: &[u8]) -> Option<&BlockHash> {
        let mut candidates = self.candidates(weak).peekable();
        candidates.peek()?;
        let strong = self.header.strong().hash(window);
        candidates.find(|block| block.len() == window.len() && block.strong == strong)
    }
    /// The start of `block` in the reference.
    #[must_use]
    pub fn offset_of(&self, block: &BlockHash) -> u64 {
        u64::from(block.index) * self.block_size() as u64
    }
    /// The last block, if it's shorter than the block size.
    ///
    /// It's the only block which can match a window shorter than the block size.
    pub fn short_tail(&self) -> Option<&BlockHash> {
        self.blocks
            .last()
            .filter(|block| block.len() < self.block_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::WeakHashType;

    fn header(block_size: u32) -> SignatureHeader {
        SignatureHeader::new(StrongHashType::Xxh3_128, WeakHashType::Beta, block_size)
    }
    #[allow(clippy::cast_possible_truncation)]
    fn block(data: &[u8], index: u32, weak: u32) -> BlockHash {
        BlockHash::new(
            weak,
            StrongHashType::Xxh3_128.hash(data),
            index,
            data.len() as u32,
        )
    }

    #[test]
    fn lookup() {
        let mut table = BlockHashTable::new(header(4));
        table.push(block(b"AAAA", 0, 1)).unwrap();
        table.push(block(b"BBBB", 1, 2)).unwrap();
        table.push(block(b"CCCC", 2, 1)).unwrap();

        assert_eq!(table.candidates(1).count(), 2);
        assert_eq!(table.candidates(3).count(), 0);
        assert_eq!(table.find(1, b"CCCC").map(BlockHash::index), Some(2));
        // weak collision
        assert!(table.find(1, b"BBBB").is_none());
        assert!(table.find(7, b"AAAA").is_none());
        assert_eq!(table.total_len(), 12);
        assert_eq!(table.offset_of(&table.blocks()[2]), 8);
    }
    #[test]
    fn duplicate_blocks_pick_first() {
        let mut table = BlockHashTable::new(header(2));
        table.push(block(b"ab", 0, 5)).unwrap();
        table.push(block(b"ab", 1, 5)).unwrap();
        assert_eq!(table.find(5, b"ab").map(BlockHash::index), Some(0));
    }
    #[test]
    fn rejects_bad_blocks() {
        let mut table = BlockHashTable::new(header(4));
        assert!(table.push(block(b"AAAA", 1, 0)).is_err());
        assert!(table.push(block(b"", 0, 0)).is_err());
        assert!(table.push(block(b"AAAAA", 0, 0)).is_err());
        table.push(block(b"AA", 0, 0)).unwrap();
        assert_eq!(table.short_tail().map(BlockHash::len), Some(2));
        // nothing may follow a short block
        assert!(matches!(
            table.push(block(b"AAAA", 1, 0)),
            Err(Error::InvalidBlock {
                expected_index: 1,
                ..
            })
        ));
    }
    #[test]
    fn record_layout() {
        let block = block(b"AAAA", 3, 0x0102_0304);
        let mut bytes = Vec::new();
        block.serialize_into(&mut bytes);
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[..12], &[4, 3, 2, 1, 3, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(
            BlockHash::decode(&bytes, StrongHashType::Xxh3_128),
            Decode::Consumed(28, block)
        );
        assert_eq!(
            BlockHash::decode(&bytes[..27], StrongHashType::Xxh3_128),
            Decode::NeedMoreData
        );
    }
}
