//! A streaming difference library similar to `rsync`.
//!
//! Two parties each have a version of some data: the *reference* and the *target*. The side
//! with the reference sends a small signature of it. The side with the target uses the
//! signature to find which parts it already has and sends back a delta: copies of reference
//! blocks and the bytes the reference doesn't have. The first side then rebuilds the target.
//!
//! Everything is incremental. Sources are [`Read`](std::io::Read)ers, the outputs are
//! callbacks or [`Write`](std::io::Write)rs and received signatures and deltas can be fed in
//! chunks split anywhere. Memory use is bounded by the block size, not the data size.
//!
//! Keep in mind this only detects changes through hashes.
//! Please check the data with a secure hashing algorithm (e.g. SHA-3) to ensure consistency.
//!
//! # Wire format
//!
//! All integers are little endian.
//!
//! - Signature header: `version: u32 = 0 | strong_hash: u16 | weak_hash: u16 | block_size: u32`.
//!   See [`SignatureHeader`].
//! - Signature record, one per block: `weak: u32 | index: u32 | length: u32 | strong`.
//!   See [`BlockHash`].
//! - Delta: a sequence of [`Operation`]s, `0x00 | offset: u64 | length: u64` for copies and
//!   `0x01 | length: u32 | bytes` for literal data.
//!
//! # How-to & examples
//!
//! ```
//! # use blocksync::*;
//! # fn main() -> Result<()> {
//! let reference = b"This is a document everyone has. It's about some new difference library.";
//! let target = b"This is a document only I have. It's about some new difference library.";
//!
//! let mut rebuilt = Vec::new();
//! // The side with the reference creates the signature.
//! let mut sender = Session::new(Config::with_block_size(8))?;
//! let mut signature = Vec::new();
//! sender.create_signature(&reference[..], |bytes| {
//!     signature.extend_from_slice(bytes);
//!     Ok(())
//! })?;
//!
//! // The side with the target reads it and creates a delta.
//! let mut receiver = Session::default();
//! receiver.feed_signature_bytes(&signature)?;
//! receiver.finish_signature_input()?;
//! let mut delta = Vec::new();
//! receiver.compute_delta(&target[..], |bytes| {
//!     delta.extend_from_slice(bytes);
//!     Ok(())
//! })?;
//! assert!(delta.len() < target.len());
//!
//! // The delta is applied to the reference.
//! sender.start_delta(&mut rebuilt, std::io::Cursor::new(&reference[..]))?;
//! sender.update_delta(&delta)?;
//! sender.finish_delta()?;
//! drop(sender);
//! assert_eq!(rebuilt, target);
//! # Ok(())
//! # }
//! ```
//!
//! Without a [`Session`], use [`SignatureBuilder`], [`DeltaBuilder`] and [`Patcher`] directly.

#![deny(
    clippy::all,
    clippy::pedantic,
    unreachable_pub,
    missing_debug_implementations,
    missing_docs
)]

pub mod apply;
pub mod config;
pub mod delta;
mod error;
pub mod hash;
pub mod operation;
pub mod session;
pub mod signature;
pub mod table;

pub use apply::{apply_operation, Patcher, ReadSeek};
pub use config::{BlockSize, Config, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
pub use delta::{compute_delta, DeltaBuilder, DeltaStats};
pub use error::{Error, Result};
pub use hash::{StrongHash, StrongHashType, WeakHashType};
pub use operation::Operation;
pub use session::{Session, SessionState};
pub use signature::{compute_signature, SignatureBuilder, SignatureHeader};
pub use table::{BlockHash, BlockHashTable};

/// The result of reading a record from the start of a buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
#[must_use]
pub enum Decode<T> {
    /// A record was read from the first `usize` bytes.
    Consumed(usize, T),
    /// The buffer ends inside the record. Call again with more data.
    NeedMoreData,
}
impl<T> Decode<T> {
    /// Get the value, if a record was read.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Consumed(_, value) => Some(value),
            Self::NeedMoreData => None,
        }
    }
}
