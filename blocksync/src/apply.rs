//! Rebuilding the target from the reference and a delta.

use std::fmt::{self, Debug};
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{debug, trace};

use crate::delta::DeltaStats;
use crate::{Decode, Error, Operation, Result};

/// A reference which can be read at any offset.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Execute `op`, writing the result to `output`.
///
/// `reference_size` is the length of `reference`. A [`Operation::Copy`] reading past it is
/// rejected before anything is written.
///
/// # Errors
///
/// Returns [`Error::RefOutOfBounds`] if a copy isn't inside the reference (or the reference
/// ended early) and [`Error::Io`] if reading or writing fails.
pub fn apply_operation<W: Write + ?Sized, R: ReadSeek + ?Sized>(
    output: &mut W,
    reference: &mut R,
    reference_size: u64,
    op: &Operation<'_>,
) -> Result<()> {
    match op {
        Operation::Copy { offset, length } => {
            let (offset, length) = (*offset, *length);
            let out_of_bounds = Error::RefOutOfBounds {
                offset,
                length,
                reference_size,
            };
            match offset.checked_add(length) {
                Some(end) if end <= reference_size => {}
                _ => return Err(out_of_bounds),
            }
            reference.seek(SeekFrom::Start(offset))?;
            let copied = io::copy(&mut Read::take(&mut *reference, length), output)?;
            if copied != length {
                return Err(out_of_bounds);
            }
        }
        Operation::Data(data) => output.write_all(data)?,
    }
    Ok(())
}

/// Applies a delta arriving in chunks of any size.
///
/// Complete operations are applied as soon as they're read. The rest is kept until the next
/// [`Self::update`].
#[must_use]
pub struct Patcher<W, R> {
    output: W,
    reference: R,
    reference_size: u64,
    /// Start of an incomplete operation.
    leftover: Vec<u8>,
    stats: DeltaStats,
}
impl<W: Write, R: ReadSeek> Patcher<W, R> {
    /// Write the target to `output`, copying from `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the size of `reference` can't be determined.
    pub fn new(output: W, mut reference: R) -> Result<Self> {
        let reference_size = reference.seek(SeekFrom::End(0))?;
        debug!("Applying delta to reference of {reference_size} bytes");
        Ok(Self {
            output,
            reference,
            reference_size,
            leftover: Vec::new(),
            stats: DeltaStats::default(),
        })
    }
    /// The length of the reference.
    #[must_use]
    pub fn reference_size(&self) -> u64 {
        self.reference_size
    }
    /// The operations applied so far.
    pub fn stats(&self) -> DeltaStats {
        self.stats
    }
    /// Apply one decoded operation.
    ///
    /// # Errors
    ///
    /// See [`apply_operation`].
    pub fn apply(&mut self, op: &Operation<'_>) -> Result<()> {
        trace!("Applying {op:?}");
        apply_operation(
            &mut self.output,
            &mut self.reference,
            self.reference_size,
            op,
        )?;
        self.stats.record(op);
        Ok(())
    }
    /// Apply all complete operations of `data`, returning how many bytes were consumed.
    fn apply_all(&mut self, data: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        while let Decode::Consumed(n, op) = Operation::decode(&data[consumed..])? {
            self.apply(&op)?;
            consumed += n;
        }
        Ok(consumed)
    }
    /// Decode and apply the operations in the next chunk of the delta.
    ///
    /// # Errors
    ///
    /// Returns protocol errors for malformed operations and errors from [`Self::apply`].
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.leftover.is_empty() {
            let consumed = self.apply_all(data)?;
            self.leftover.extend_from_slice(&data[consumed..]);
        } else {
            let mut pending = std::mem::take(&mut self.leftover);
            pending.extend_from_slice(data);
            let consumed = self.apply_all(&pending)?;
            pending.drain(..consumed);
            self.leftover = pending;
        }
        Ok(())
    }
    /// End the delta and flush the output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeftoverDeltaData`] if the delta ended inside an operation and
    /// [`Error::Io`] if flushing fails.
    pub fn finish(mut self) -> Result<(W, DeltaStats)> {
        if !self.leftover.is_empty() {
            return Err(Error::LeftoverDeltaData(self.leftover.len()));
        }
        self.output.flush()?;
        debug!("Applied delta: {}", self.stats);
        Ok((self.output, self.stats))
    }
}
impl<W, R> Debug for Patcher<W, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patcher")
            .field("reference_size", &self.reference_size)
            .field("leftover", &self.leftover.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
