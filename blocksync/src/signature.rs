//! Creating and reading signatures.
//!
//! A signature is a 12 byte [`SignatureHeader`] followed by one [`BlockHash`] record per
//! block of the reference. Both are written and read incrementally.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

use log::debug;

use crate::config::{block_count, check_block_size};
use crate::hash::{StrongHashType, WeakHashType, WeakHasher};
use crate::table::{read_u32, BlockHash, BlockHashTable};
use crate::{Config, Decode, Error, Result};

/// The only signature format version.
pub const VERSION: u32 = 0;
/// The length of a serialized [`SignatureHeader`].
pub const HEADER_LEN: usize = 12;

/// The first bytes of a signature, describing how the blocks were hashed.
///
/// `version: u32 | strong_tag: u16 | weak_tag: u16 | block_size: u32`, little endian.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[must_use]
pub struct SignatureHeader {
    strong: StrongHashType,
    weak: WeakHashType,
    block_size: u32,
}
impl SignatureHeader {
    /// Describe a signature. Use [`Config::header`] to check the `block_size`.
    pub fn new(strong: StrongHashType, weak: WeakHashType, block_size: u32) -> Self {
        Self {
            strong,
            weak,
            block_size,
        }
    }
    /// The strong hash of the blocks.
    pub fn strong(&self) -> StrongHashType {
        self.strong
    }
    /// The weak hash of the blocks.
    pub fn weak(&self) -> WeakHashType {
        self.weak
    }
    /// The length of all blocks but the last.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }
    /// The length of every record following the header.
    #[must_use]
    pub fn record_len(&self) -> usize {
        BlockHash::serialized_len(self.strong)
    }
    /// The wire representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0; HEADER_LEN];
        bytes[..4].copy_from_slice(&VERSION.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.strong.tag().to_le_bytes());
        bytes[6..8].copy_from_slice(&self.weak.tag().to_le_bytes());
        bytes[8..].copy_from_slice(&self.block_size.to_le_bytes());
        bytes
    }
    /// Read a header from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`], [`Error::UnknownStrongHash`],
    /// [`Error::UnknownWeakHash`], [`Error::ZeroBlockSize`] and [`Error::BlockSizeTooLarge`]
    /// for headers we can't use.
    pub fn decode(data: &[u8]) -> Result<Decode<Self>> {
        if data.len() < HEADER_LEN {
            return Ok(Decode::NeedMoreData);
        }
        let version = read_u32(data, 0);
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let strong = StrongHashType::from_tag(u16::from_le_bytes([data[4], data[5]]))?;
        let weak = WeakHashType::from_tag(u16::from_le_bytes([data[6], data[7]]))?;
        let block_size = read_u32(data, 8);
        check_block_size(block_size as usize)?;
        Ok(Decode::Consumed(HEADER_LEN, Self::new(strong, weak, block_size)))
    }
}

/// Builder of a [`BlockHashTable`] from the reference.
///
/// You [`Self::write`] data and then [`Self::finish`] to get the table.
/// Every completed block is passed to the `emit` callback as soon as it's hashed, so the
/// signature can be sent while the reference is still being read.
#[derive(Debug)]
#[must_use]
pub struct SignatureBuilder {
    table: BlockHashTable,
    weak: WeakHasher,
    /// The start of a block which didn't fit in the last write.
    partial: Vec<u8>,
}
impl SignatureBuilder {
    /// Create a builder for blocks described by `header`.
    pub fn new(header: SignatureHeader) -> Self {
        Self::with_capacity(header, 0)
    }
    /// Create a builder using the block size and hashes of `config`.
    ///
    /// If the config has an expected size, the table is preallocated for that.
    ///
    /// # Errors
    ///
    /// Returns an error if the block size of `config` is invalid.
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_config(config: &Config) -> Result<Self> {
        let header = config.header()?;
        let capacity = config
            .expected_size()
            .map_or(0, |size| block_count(size, header.block_size()) as usize);
        Ok(Self::with_capacity(header, capacity))
    }
    fn with_capacity(header: SignatureHeader, capacity: usize) -> Self {
        Self {
            weak: header.weak().hasher(header.block_size()),
            partial: Vec::with_capacity(header.block_size()),
            table: BlockHashTable::with_capacity(header, capacity),
        }
    }
    /// The header of the signature being built.
    pub fn header(&self) -> &SignatureHeader {
        self.table.header()
    }
    #[allow(clippy::cast_possible_truncation)]
    fn hash_block(
        table: &mut BlockHashTable,
        weak: &mut WeakHasher,
        block: &[u8],
        emit: &mut impl FnMut(&BlockHash) -> Result<()>,
    ) -> Result<()> {
        let block_size = table.block_size();
        let hash = BlockHash::new(
            weak.hash_window(block, block_size),
            table.header().strong().hash(block),
            table.len() as u32,
            block.len() as u32,
        );
        table.push(hash)?;
        emit(&hash)
    }
    /// Appends data to the hasher.
    ///
    /// This can be called multiple times to write the reference bit-by-bit.
    ///
    /// # Errors
    ///
    /// Passes on errors from `emit`.
    pub fn write(
        &mut self,
        data: &[u8],
        mut emit: impl FnMut(&BlockHash) -> Result<()>,
    ) -> Result<()> {
        let block_size = self.table.block_size();
        let mut data = data;

        if !self.partial.is_empty() {
            let available = block_size - self.partial.len();
            if data.len() < available {
                self.partial.extend_from_slice(data);
                return Ok(());
            }
            self.partial.extend_from_slice(&data[..available]);
            data = &data[available..];
            Self::hash_block(&mut self.table, &mut self.weak, &self.partial, &mut emit)?;
            self.partial.clear();
        }

        let mut blocks = data.chunks_exact(block_size);
        for block in &mut blocks {
            Self::hash_block(&mut self.table, &mut self.weak, block, &mut emit)?;
        }
        self.partial.extend_from_slice(blocks.remainder());
        Ok(())
    }
    /// Hashes the last, short, block and returns the complete table.
    ///
    /// # Errors
    ///
    /// Passes on errors from `emit`.
    pub fn finish(
        mut self,
        mut emit: impl FnMut(&BlockHash) -> Result<()>,
    ) -> Result<BlockHashTable> {
        if !self.partial.is_empty() {
            Self::hash_block(&mut self.table, &mut self.weak, &self.partial, &mut emit)?;
        }
        debug!(
            "Created signature of {} blocks ({} bytes, block size {})",
            self.table.len(),
            self.table.total_len(),
            self.table.block_size()
        );
        Ok(self.table)
    }
}

/// Read all of `source` and hash it with `builder`.
///
/// Every record is passed to `emit` in its serialized form. The header is not emitted.
///
/// # Errors
///
/// Returns [`Error::Io`] if reading `source` or `emit` fails.
pub fn compute_signature(
    mut source: impl Read,
    builder: SignatureBuilder,
    mut emit: impl FnMut(&[u8]) -> io::Result<()>,
) -> Result<BlockHashTable> {
    let mut builder = builder;
    let mut record = Vec::with_capacity(builder.header().record_len());
    let mut emit = |block: &BlockHash| {
        record.clear();
        block.serialize_into(&mut record);
        emit(&record).map_err(Error::Io)
    };
    let mut buf = vec![0; read_buffer_len(builder.header().block_size())];
    loop {
        let read = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        builder.write(&buf[..read], &mut emit)?;
    }
    builder.finish(emit)
}

/// Read whole multiples of the block size, at least 64KiB.
pub(crate) fn read_buffer_len(block_size: usize) -> usize {
    const MIN: usize = 64 * 1024;
    if block_size >= MIN {
        block_size
    } else {
        MIN / block_size * block_size
    }
}

/// Decode as much of `data` as possible into `table`, creating the table from the header
/// if there is none yet.
///
/// Returns the number of bytes consumed. The rest has to be passed again, together with more
/// data.
pub(crate) fn decode_signature(table: &mut Option<BlockHashTable>, data: &[u8]) -> Result<usize> {
    let mut consumed = 0;
    if table.is_none() {
        match SignatureHeader::decode(data)? {
            Decode::NeedMoreData => return Ok(0),
            Decode::Consumed(n, header) => {
                debug!(
                    "Read signature header: {:?}/{:?}, block size {}",
                    header.strong(),
                    header.weak(),
                    header.block_size()
                );
                consumed += n;
                *table = Some(BlockHashTable::new(header));
            }
        }
    }
    if let Some(table) = table {
        let strong = table.header().strong();
        while let Decode::Consumed(n, block) = BlockHash::decode(&data[consumed..], strong) {
            table.push(block)?;
            consumed += n;
        }
    }
    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SignatureHeader {
        SignatureHeader::new(StrongHashType::Xxh3_128, WeakHashType::Beta, 4)
    }

    #[test]
    fn header_layout() {
        let bytes = SignatureHeader::new(StrongHashType::Xxh3_128, WeakHashType::Adler32, 6144)
            .to_bytes();
        assert_eq!(bytes, [0, 0, 0, 0, 1, 0, 1, 0, 0, 0x18, 0, 0]);
        assert_eq!(
            SignatureHeader::decode(&bytes).unwrap(),
            Decode::Consumed(
                12,
                SignatureHeader::new(StrongHashType::Xxh3_128, WeakHashType::Adler32, 6144)
            )
        );
        assert_eq!(
            SignatureHeader::decode(&bytes[..11]).unwrap(),
            Decode::NeedMoreData
        );
    }
    #[test]
    fn invalid_headers() {
        let good = header().to_bytes();

        let mut bytes = good;
        bytes[0] = 1;
        assert!(matches!(
            SignatureHeader::decode(&bytes),
            Err(Error::UnsupportedVersion(1))
        ));
        let mut bytes = good;
        bytes[4] = 7;
        assert!(matches!(
            SignatureHeader::decode(&bytes),
            Err(Error::UnknownStrongHash(7))
        ));
        let mut bytes = good;
        bytes[6] = 7;
        assert!(matches!(
            SignatureHeader::decode(&bytes),
            Err(Error::UnknownWeakHash(7))
        ));
        let mut bytes = good;
        bytes[8..].copy_from_slice(&0_u32.to_le_bytes());
        assert!(matches!(
            SignatureHeader::decode(&bytes),
            Err(Error::ZeroBlockSize)
        ));
        let mut bytes = good;
        bytes[8..].copy_from_slice(&(1_u32 << 20).to_le_bytes());
        assert!(matches!(
            SignatureHeader::decode(&bytes),
            Err(Error::BlockSizeTooLarge(_))
        ));
    }
    #[test]
    fn builder_splits_writes() {
        let data = b"AAAABBBBCCCCDD";
        let mut whole = SignatureBuilder::new(header());
        whole.write(data, |_| Ok(())).unwrap();
        let whole = whole.finish(|_| Ok(())).unwrap();

        let mut emitted = Vec::new();
        let mut parts = SignatureBuilder::new(header());
        for byte in data.chunks(3) {
            parts
                .write(byte, |block| {
                    emitted.push(block.index());
                    Ok(())
                })
                .unwrap();
        }
        let parts = parts
            .finish(|block| {
                emitted.push(block.index());
                Ok(())
            })
            .unwrap();

        assert_eq!(whole, parts);
        assert_eq!(emitted, [0, 1, 2, 3]);
        assert_eq!(parts.blocks()[3].len(), 2);
        assert_eq!(parts.total_len(), 14);
    }
    #[test]
    fn emit_error_stops() {
        let mut builder = SignatureBuilder::new(header());
        let result = builder.write(b"AAAABBBB", |_| {
            Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed")))
        });
        assert!(matches!(result, Err(Error::Io(_))));
    }
    #[test]
    fn decode_in_parts() {
        let mut bytes = header().to_bytes().to_vec();
        let table = compute_signature(
            &b"AAAABBBBCC"[..],
            SignatureBuilder::new(header()),
            |record| {
                bytes.extend_from_slice(record);
                Ok(())
            },
        )
        .unwrap();

        let mut decoded = None;
        assert_eq!(decode_signature(&mut decoded, &bytes[..5]).unwrap(), 0);
        assert!(decoded.is_none());
        // header and one record
        assert_eq!(decode_signature(&mut decoded, &bytes[..45]).unwrap(), 40);
        assert_eq!(decoded.as_ref().map(BlockHashTable::len), Some(1));
        assert_eq!(decode_signature(&mut decoded, &bytes[40..]).unwrap(), 56);
        assert_eq!(decoded, Some(table));
    }
    #[test]
    fn buffer_len() {
        assert_eq!(read_buffer_len(4), 64 * 1024);
        assert_eq!(read_buffer_len(1000), 65000);
        assert_eq!(read_buffer_len(256 * 1024), 256 * 1024);
    }
}
