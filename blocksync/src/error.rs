//! The error type of all fallible operations in this crate.

use std::error;
use std::fmt::{self, Display};
use std::io;

use crate::session::SessionState;

/// A [`std::result::Result`] with [`Error`] as the error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from building, decoding and applying signatures and deltas.
///
/// All of these are hard errors: the session which returned one should be discarded.
/// Running out of input in the middle of a record is not an error, see [`crate::Decode`].
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The signature header declares a format version we don't speak.
    UnsupportedVersion(u32),
    /// The strong hash tag is unknown.
    UnknownStrongHash(u16),
    /// The weak hash tag is unknown.
    UnknownWeakHash(u16),
    /// A block size of 0 was requested or received.
    ZeroBlockSize,
    /// The block size is larger than [`crate::MAX_BLOCK_SIZE`].
    BlockSizeTooLarge(usize),
    /// A block record doesn't fit in the table it's added to.
    ///
    /// Out of order indices, empty blocks, blocks larger than the block size or any block
    /// after a short block.
    InvalidBlock {
        /// The index we expected next.
        expected_index: u32,
        /// The index of the received record.
        index: u32,
        /// The length of the received record.
        length: u32,
    },
    /// The signature input was finished without a complete header.
    MissingSignatureHeader,
    /// Bytes were left in the signature input when it was finished.
    LeftoverSignatureData(usize),
    /// Bytes were left in the delta input when it was finished.
    LeftoverDeltaData(usize),
    /// The operation type byte is unknown.
    UnknownOperation(u8),
    /// A data operation declares more bytes than any builder emits.
    DataTooLarge(u64),
    /// A copy operation points outside of the reference.
    ///
    /// The reference changed between creating the signature and applying the delta,
    /// or the delta is corrupt.
    RefOutOfBounds {
        /// Start of the copy in the reference.
        offset: u64,
        /// Length of the copy.
        length: u64,
        /// The actual size of the reference.
        reference_size: u64,
    },
    /// A method was called when the session was in a phase that doesn't allow it.
    OutOfOrder {
        /// The phase the session was in.
        state: SessionState,
        /// The method which was called.
        operation: &'static str,
    },
    /// A delta was requested before any signature was loaded.
    NoSignature,
    /// An earlier call on this session failed.
    SessionFailed,
    /// Reading the source, writing the output or an output callback failed.
    Io(io::Error),
}
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(v) => write!(f, "invalid version in signature header: {v}"),
            Self::UnknownStrongHash(tag) => {
                write!(f, "invalid strong hash in signature header: {tag}")
            }
            Self::UnknownWeakHash(tag) => write!(f, "invalid weak hash in signature header: {tag}"),
            Self::ZeroBlockSize => write!(f, "block size is zero"),
            Self::BlockSizeTooLarge(size) => write!(
                f,
                "block size is too large: {size} > {}",
                crate::MAX_BLOCK_SIZE
            ),
            Self::InvalidBlock {
                expected_index,
                index,
                length,
            } => write!(
                f,
                "invalid block in signature: index {index} (expected {expected_index}) \
                with length {length}"
            ),
            Self::MissingSignatureHeader => write!(f, "no header was found in the signature data"),
            Self::LeftoverSignatureData(n) => {
                write!(f, "there were {n} leftover bytes in the signature data")
            }
            Self::LeftoverDeltaData(n) => write!(f, "there were {n} leftover bytes in the delta"),
            Self::UnknownOperation(ty) => write!(f, "unknown operation type in delta: {ty}"),
            Self::DataTooLarge(len) => write!(f, "data operation is too large: {len} bytes"),
            Self::RefOutOfBounds {
                offset,
                length,
                reference_size,
            } => write!(
                f,
                "copy of {length} bytes at {offset} is outside of the reference \
                ({reference_size} bytes)"
            ),
            Self::OutOfOrder { state, operation } => {
                write!(f, "cannot call {operation} while {state}")
            }
            Self::NoSignature => write!(f, "cannot create a delta before loading a signature"),
            Self::SessionFailed => write!(f, "the session failed earlier and can't be reused"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_source() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert!(error::Error::source(&err).is_some());
        assert!(error::Error::source(&Error::ZeroBlockSize).is_none());
    }
    #[test]
    fn messages() {
        assert_eq!(
            Error::LeftoverDeltaData(3).to_string(),
            "there were 3 leftover bytes in the delta"
        );
        let err = Error::OutOfOrder {
            state: SessionState::Idle,
            operation: "update_delta",
        };
        assert_eq!(err.to_string(), "cannot call update_delta while idle");
    }
}
