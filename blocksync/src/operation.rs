//! The instructions of a delta and their wire format.
//!
//! Every operation starts with a type byte, integers are little endian:
//!
//! - `Copy`: `0x00 | offset: u64 | length: u64`
//! - `Data`: `0x01 | length: u32 | bytes`

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{self, Debug};

use crate::table::read_u32;
use crate::{Decode, Error, Result, MAX_BLOCK_SIZE};

/// The type byte of [`Operation::Copy`].
pub const OP_COPY: u8 = 0;
/// The type byte of [`Operation::Data`].
pub const OP_DATA: u8 = 1;
/// The length of a serialized [`Operation::Copy`].
pub const COPY_LEN: usize = 17;
/// The length of the prefix of a serialized [`Operation::Data`].
pub const DATA_PREFIX_LEN: usize = 5;
/// The largest literal run a [`crate::DeltaBuilder`] puts in one [`Operation::Data`],
/// as a multiple of the block size.
pub const MAX_DATA_BLOCKS: usize = 10;
/// The largest [`Operation::Data`] accepted when decoding.
pub const MAX_DATA_LEN: usize = MAX_DATA_BLOCKS * MAX_BLOCK_SIZE;

/// One instruction of a delta.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(PartialEq, Eq, Clone)]
#[must_use]
pub enum Operation<'a> {
    /// Copy `length` bytes starting at `offset` from the reference.
    Copy {
        /// Start in the reference.
        offset: u64,
        /// Number of bytes.
        length: u64,
    },
    /// Bytes which aren't in the reference.
    Data(Cow<'a, [u8]>),
}
impl<'a> Operation<'a> {
    /// Create a [`Self::Data`] borrowing `data`.
    pub fn data(data: &'a [u8]) -> Self {
        Self::Data(Cow::Borrowed(data))
    }
    /// Detach from the buffer this was decoded from.
    pub fn into_owned(self) -> Operation<'static> {
        match self {
            Self::Copy { offset, length } => Operation::Copy { offset, length },
            Self::Data(data) => Operation::Data(Cow::Owned(data.into_owned())),
        }
    }
    /// The number of bytes this adds to the output.
    #[must_use]
    pub fn output_len(&self) -> u64 {
        match self {
            Self::Copy { length, .. } => *length,
            Self::Data(data) => data.len() as u64,
        }
    }
    /// The length of the wire representation.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        match self {
            Self::Copy { .. } => COPY_LEN,
            Self::Data(data) => DATA_PREFIX_LEN + data.len(),
        }
    }
    /// Append the wire representation to `out`.
    ///
    /// # Panics
    ///
    /// Panics if a [`Self::Data`] is longer than [`u32::MAX`].
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.serialized_len());
        match self {
            Self::Copy { offset, length } => {
                out.push(OP_COPY);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&length.to_le_bytes());
            }
            Self::Data(data) => {
                let len = u32::try_from(data.len()).expect("data operation longer than u32::MAX");
                out.push(OP_DATA);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(data);
            }
        }
    }
    /// Get the wire representation.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.serialized_len());
        self.serialize_into(&mut bytes);
        bytes
    }
    /// Read one operation from the start of `data`. [`Self::Data`] borrows from `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOperation`] if the type byte is unknown and
    /// [`Error::DataTooLarge`] if a data operation is longer than [`MAX_DATA_LEN`].
    pub fn decode(data: &'a [u8]) -> Result<Decode<Self>> {
        let Some(&ty) = data.first() else {
            return Ok(Decode::NeedMoreData);
        };
        match ty {
            OP_COPY => {
                if data.len() < COPY_LEN {
                    return Ok(Decode::NeedMoreData);
                }
                Ok(Decode::Consumed(
                    COPY_LEN,
                    Self::Copy {
                        offset: read_u64(data, 1),
                        length: read_u64(data, 9),
                    },
                ))
            }
            OP_DATA => {
                if data.len() < DATA_PREFIX_LEN {
                    return Ok(Decode::NeedMoreData);
                }
                let len = read_u32(data, 1) as usize;
                if len > MAX_DATA_LEN {
                    return Err(Error::DataTooLarge(len as u64));
                }
                let end = DATA_PREFIX_LEN + len;
                if data.len() < end {
                    return Ok(Decode::NeedMoreData);
                }
                Ok(Decode::Consumed(
                    end,
                    Self::data(&data[DATA_PREFIX_LEN..end]),
                ))
            }
            _ => Err(Error::UnknownOperation(ty)),
        }
    }
}
impl Debug for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { offset, length } => f
                .debug_struct("Copy")
                .field("offset", offset)
                .field("length", length)
                .finish(),
            Self::Data(data) => f
                .debug_tuple("Data")
                .field(&String::from_utf8_lossy(data))
                .finish(),
        }
    }
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_layout() {
        let op = Operation::Copy {
            offset: 0x0102,
            length: 4,
        };
        let bytes = op.to_bytes();
        assert_eq!(
            bytes,
            [0, 2, 1, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            Operation::decode(&bytes).unwrap(),
            Decode::Consumed(17, op)
        );
    }
    #[test]
    fn data_layout() {
        let op = Operation::data(b"XXXX");
        let bytes = op.to_bytes();
        assert_eq!(bytes, b"\x01\x04\x00\x00\x00XXXX");
        assert_eq!(op.serialized_len(), 9);
        assert_eq!(
            Operation::decode(&bytes).unwrap(),
            Decode::Consumed(9, op)
        );
    }
    #[test]
    fn partial_records() {
        let mut bytes = Operation::Copy {
            offset: 7,
            length: 9,
        }
        .to_bytes();
        Operation::data(b"hello").serialize_into(&mut bytes);
        for end in 0..17 {
            assert_eq!(
                Operation::decode(&bytes[..end]).unwrap(),
                Decode::NeedMoreData
            );
        }
        for end in 17..bytes.len() {
            assert_eq!(
                Operation::decode(&bytes[17..end]).unwrap(),
                Decode::NeedMoreData
            );
        }
    }
    #[test]
    fn bad_records() {
        assert!(matches!(
            Operation::decode(&[9, 0, 0]),
            Err(Error::UnknownOperation(9))
        ));
        assert!(matches!(
            Operation::decode(&[1, 0xff, 0xff, 0xff, 0xff]),
            Err(Error::DataTooLarge(_))
        ));
    }
    #[test]
    fn owned() {
        let bytes = Operation::data(b"abc").to_bytes();
        let op = match Operation::decode(&bytes).unwrap() {
            Decode::Consumed(_, op) => op.into_owned(),
            Decode::NeedMoreData => panic!("complete record"),
        };
        drop(bytes);
        assert_eq!(op.output_len(), 3);
        assert_eq!(format!("{op:?}"), "Data(\"abc\")");
    }
}
