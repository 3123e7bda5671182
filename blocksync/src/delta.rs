//! Finding the blocks of a reference in the target and describing the target as
//! [`Operation`]s.

use std::fmt::{self, Display};
use std::io::{self, Read};

use log::{debug, trace};

use crate::hash::WeakHasher;
use crate::operation::MAX_DATA_BLOCKS;
use crate::signature::read_buffer_len;
use crate::table::{BlockHash, BlockHashTable};
use crate::{Operation, Result};

/// Counters of the operations in a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[must_use]
pub struct DeltaStats {
    /// Number of [`Operation::Copy`].
    pub copy_ops: u64,
    /// Bytes covered by [`Operation::Copy`].
    pub copied_bytes: u64,
    /// Number of [`Operation::Data`].
    pub data_ops: u64,
    /// Bytes sent in [`Operation::Data`].
    pub literal_bytes: u64,
}
impl DeltaStats {
    /// Count `op`.
    pub fn record(&mut self, op: &Operation<'_>) {
        match op {
            Operation::Copy { length, .. } => {
                self.copy_ops += 1;
                self.copied_bytes += length;
            }
            Operation::Data(data) => {
                self.data_ops += 1;
                self.literal_bytes += data.len() as u64;
            }
        }
    }
    /// The length of the target.
    #[must_use]
    pub fn output_len(&self) -> u64 {
        self.copied_bytes + self.literal_bytes
    }
}
impl Display for DeltaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} copies ({} bytes), {} literals ({} bytes)",
            self.copy_ops, self.copied_bytes, self.data_ops, self.literal_bytes
        )
    }
}

/// Builds a delta from the target, against a [`BlockHashTable`] of the reference.
///
/// A window of one block is slid over the target. When its weak hash is in the table and the
/// strong hash confirms it, the pending literal bytes are sent as [`Operation::Data`], then
/// the block is sent as [`Operation::Copy`] and the window jumps past it. Otherwise the window
/// moves one byte and the rolling hash is updated.
///
/// Feed the target with [`Self::update`], in chunks of any size, and end with [`Self::finish`].
/// The operations are identical whatever the chunk sizes.
#[derive(Debug)]
#[must_use]
pub struct DeltaBuilder<'t> {
    table: &'t BlockHashTable,
    weak: WeakHasher,
    /// Target bytes from the first not yet sent, or from `hashed` if that's earlier.
    buf: Vec<u8>,
    /// Start of the pending literal run in `buf`.
    literal_start: usize,
    /// Start of the next window to check in `buf`.
    window_start: usize,
    /// Start of the window `weak` holds the hash of.
    hashed: Option<usize>,
    max_data: usize,
    stats: DeltaStats,
}
impl<'t> DeltaBuilder<'t> {
    /// Create a builder matching against `table`.
    pub fn new(table: &'t BlockHashTable) -> Self {
        let block_size = table.block_size();
        Self {
            table,
            weak: table.header().weak().hasher(block_size),
            buf: Vec::new(),
            literal_start: 0,
            window_start: 0,
            hashed: None,
            max_data: MAX_DATA_BLOCKS * block_size,
            stats: DeltaStats::default(),
        }
    }
    /// The table this builder matches against.
    pub fn table(&self) -> &'t BlockHashTable {
        self.table
    }
    /// The operations emitted so far.
    pub fn stats(&self) -> DeltaStats {
        self.stats
    }
    /// Drop the bytes which are already sent.
    ///
    /// The first byte of the hashed window is kept, [`WeakHasher::rotate`] needs it.
    fn compact(&mut self) {
        let drop = self
            .hashed
            .map_or(self.literal_start, |hashed| hashed.min(self.literal_start));
        if drop == 0 {
            return;
        }
        self.buf.drain(..drop);
        self.literal_start -= drop;
        self.window_start -= drop;
        self.hashed = self.hashed.map(|hashed| hashed - drop);
    }
    fn flush_literal(
        &mut self,
        end: usize,
        emit: &mut impl FnMut(Operation<'_>) -> Result<()>,
    ) -> Result<()> {
        if end == self.literal_start {
            return Ok(());
        }
        for chunk in self.buf[self.literal_start..end].chunks(self.max_data) {
            let op = Operation::data(chunk);
            trace!("Data of {} bytes", chunk.len());
            self.stats.record(&op);
            emit(op)?;
        }
        self.literal_start = end;
        Ok(())
    }
    fn emit_copy(
        &mut self,
        block: &BlockHash,
        emit: &mut impl FnMut(Operation<'_>) -> Result<()>,
    ) -> Result<()> {
        let op = Operation::Copy {
            offset: self.table.offset_of(block),
            length: block.len() as u64,
        };
        trace!("Copy of block {}", block.index());
        self.stats.record(&op);
        emit(op)
    }
    /// Append `data` to the target.
    ///
    /// Operations are passed to `emit` as soon as they are known. A trailing window shorter
    /// than the block size is kept until more data arrives or [`Self::finish`] is called.
    ///
    /// # Errors
    ///
    /// Passes on errors from `emit`. The builder shouldn't be used after that.
    pub fn update(
        &mut self,
        data: &[u8],
        mut emit: impl FnMut(Operation<'_>) -> Result<()>,
    ) -> Result<()> {
        self.compact();
        self.buf.extend_from_slice(data);

        let table = self.table;
        let block_size = table.block_size();
        while self.buf.len() - self.window_start >= block_size {
            let start = self.window_start;
            let weak = match self.hashed {
                Some(previous) if previous + 1 == start => {
                    self.weak.rotate(
                        self.buf[previous],
                        self.buf[previous + block_size],
                        block_size,
                    );
                    self.weak.value()
                }
                _ => self
                    .weak
                    .hash_window(&self.buf[start..start + block_size], block_size),
            };
            self.hashed = Some(start);

            if let Some(block) = table.find(weak, &self.buf[start..start + block_size]) {
                self.flush_literal(start, &mut emit)?;
                self.emit_copy(block, &mut emit)?;
                self.window_start = start + block_size;
                self.literal_start = self.window_start;
                self.hashed = None;
            } else {
                self.window_start += 1;
                if self.window_start - self.literal_start >= self.max_data {
                    self.flush_literal(self.window_start, &mut emit)?;
                }
            }
        }
        Ok(())
    }
    /// End the target and send what's left.
    ///
    /// If the reference ends with a block shorter than the block size, the end of the target
    /// with that length is checked against it. Everything else not yet sent becomes
    /// [`Operation::Data`].
    ///
    /// # Errors
    ///
    /// Passes on errors from `emit`.
    pub fn finish(mut self, mut emit: impl FnMut(Operation<'_>) -> Result<()>) -> Result<DeltaStats> {
        let table = self.table;
        let len = self.buf.len();
        if let Some(tail) = table.short_tail() {
            let start = len
                .checked_sub(tail.len())
                .filter(|start| *start >= self.literal_start);
            if let Some(start) = start {
                let window = &self.buf[start..];
                let weak = self.weak.hash_window(window, table.block_size());
                if let Some(block) = table.find(weak, window) {
                    self.flush_literal(start, &mut emit)?;
                    self.emit_copy(block, &mut emit)?;
                    self.literal_start = len;
                }
            }
        }
        self.flush_literal(len, &mut emit)?;

        debug!("Created delta: {}", self.stats);
        Ok(self.stats)
    }
}

/// Read all of `target` and pass the operations which rebuild it from the reference of
/// `table` to `emit`.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if reading fails and passes on errors from `emit`.
pub fn compute_delta(
    mut target: impl Read,
    table: &BlockHashTable,
    mut emit: impl FnMut(Operation<'_>) -> Result<()>,
) -> Result<DeltaStats> {
    let mut builder = DeltaBuilder::new(table);
    let mut buf = vec![0; read_buffer_len(table.block_size())];
    loop {
        let read = match target.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        builder.update(&buf[..read], &mut emit)?;
    }
    builder.finish(emit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{StrongHashType, WeakHashType};
    use crate::{SignatureBuilder, SignatureHeader};

    fn table(reference: &[u8], block_size: u32) -> BlockHashTable {
        let header = SignatureHeader::new(StrongHashType::Xxh3_64, WeakHashType::Beta, block_size);
        let mut builder = SignatureBuilder::new(header);
        builder.write(reference, |_| Ok(())).unwrap();
        builder.finish(|_| Ok(())).unwrap()
    }
    fn delta(table: &BlockHashTable, target: &[u8]) -> Vec<Operation<'static>> {
        let mut ops = Vec::new();
        compute_delta(target, table, |op| {
            ops.push(op.into_owned());
            Ok(())
        })
        .unwrap();
        ops
    }

    #[test]
    fn shifted_target() {
        let table = table(b"0123456789abcdef", 4);
        let ops = delta(&table, b"xx0123456789abcdef");
        assert_eq!(
            ops,
            [
                Operation::data(b"xx").into_owned(),
                Operation::Copy {
                    offset: 0,
                    length: 4
                },
                Operation::Copy {
                    offset: 4,
                    length: 4
                },
                Operation::Copy {
                    offset: 8,
                    length: 4
                },
                Operation::Copy {
                    offset: 12,
                    length: 4
                },
            ]
        );
    }
    #[test]
    fn short_tail_matches_at_end() {
        let table = table(b"AAAABB", 4);
        let ops = delta(&table, b"xAAAAyBB");
        assert_eq!(
            ops,
            [
                Operation::data(b"x").into_owned(),
                Operation::Copy {
                    offset: 0,
                    length: 4
                },
                Operation::data(b"y").into_owned(),
                Operation::Copy {
                    offset: 4,
                    length: 2
                },
            ]
        );
        // the short block only matches the very end
        let ops = delta(&table, b"BBxx");
        assert_eq!(ops, [Operation::data(b"BBxx").into_owned()]);
    }
    #[test]
    fn empty_inputs() {
        let empty = table(b"", 4);
        assert!(empty.is_empty());
        assert_eq!(delta(&empty, b"abc"), [Operation::data(b"abc").into_owned()]);
        assert!(delta(&table(b"abcd", 4), b"").is_empty());
    }
    #[test]
    fn literal_runs_are_capped() {
        let table = table(b"AAAA", 2);
        let target = vec![b'z'; 45];
        let ops = delta(&table, &target);
        let lens: Vec<_> = ops.iter().map(Operation::output_len).collect();
        assert_eq!(lens, [20, 20, 5]);
    }
    #[test]
    fn update_after_capped_literal() {
        let table = table(b"AAAA", 2);
        let mut ops = Vec::new();
        let mut builder = DeltaBuilder::new(&table);
        // the cap is reached by the last window of the first chunk
        builder
            .update(&[b'z'; 21], |op| {
                ops.push(op.into_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!(ops, [Operation::data(&[b'z'; 20]).into_owned()]);
        builder
            .update(&[b'z'; 19], |op| {
                ops.push(op.into_owned());
                Ok(())
            })
            .unwrap();
        builder
            .update(b"AA", |op| {
                ops.push(op.into_owned());
                Ok(())
            })
            .unwrap();
        let stats = builder
            .finish(|op| {
                ops.push(op.into_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!(ops, delta(&table, &[&[b'z'; 40][..], &b"AA"[..]].concat()));
        assert_eq!(stats.output_len(), 42);
        assert_eq!(
            ops.last(),
            Some(&Operation::Copy {
                offset: 0,
                length: 2
            })
        );
    }
    #[test]
    fn chunks_give_same_operations() {
        let reference: Vec<u8> = (0..200_u8).cycle().take(3000).collect();
        let mut target = reference.clone();
        target.splice(700..710, *b"inserted!!");
        target.drain(2000..2100);
        let table = table(&reference, 64);
        let whole = delta(&table, &target);

        let mut parts = Vec::new();
        let mut builder = DeltaBuilder::new(&table);
        for chunk in target.chunks(7) {
            builder
                .update(chunk, |op| {
                    parts.push(op.into_owned());
                    Ok(())
                })
                .unwrap();
        }
        let stats = builder
            .finish(|op| {
                parts.push(op.into_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!(whole, parts);
        assert_eq!(stats.output_len(), target.len() as u64);
        assert!(stats.copy_ops > 0);
    }
}
