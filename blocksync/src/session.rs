//! A stateful front end which runs one side of a transfer.
//!
//! # Phases
//!
//! - The side with the reference creates a signature ([`Session::begin_signature`] and
//!   [`Session::compute_signature`], or [`Session::create_signature`]) and can then apply the
//!   delta it gets back ([`Session::start_delta`]).
//! - The side with the target reads the signature ([`Session::feed_signature_bytes`] and
//!   [`Session::finish_signature_input`]) and then builds a delta ([`Session::compute_delta`]).
//! - A session which only patches starts with [`Session::start_delta`].
//!
//! Calling a method in the wrong phase returns [`Error::OutOfOrder`]. After any error, the
//! session only returns [`Error::SessionFailed`].

use std::fmt::{self, Debug, Display};
use std::io::{self, Read, Write};

use log::debug;

use crate::apply::{Patcher, ReadSeek};
use crate::delta::{compute_delta, DeltaStats};
use crate::signature::{compute_signature, decode_signature, HEADER_LEN};
use crate::table::BlockHashTable;
use crate::{Config, Error, Result, SignatureBuilder};

/// The phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SessionState {
    /// Nothing has been done yet.
    Idle,
    /// A signature of the reference is being created.
    BuildingSignature,
    /// A signature from the other side is being read.
    ConsumingSignatureInput,
    /// A delta of the target is being created.
    BuildingDelta,
    /// A delta is being applied to the reference.
    ApplyingDelta,
}
impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::BuildingSignature => "building a signature",
            Self::ConsumingSignatureInput => "reading a signature",
            Self::BuildingDelta => "building a delta",
            Self::ApplyingDelta => "applying a delta",
        })
    }
}

type BoxPatcher<'a> = Patcher<Box<dyn Write + 'a>, Box<dyn ReadSeek + 'a>>;

/// One side of a transfer. See the [module docs](self) for the order of calls.
///
/// The output and reference of [`Self::start_delta`] are borrowed for `'a`.
#[must_use]
pub struct Session<'a> {
    config: Config,
    state: SessionState,
    /// If the current phase has ended.
    phase_done: bool,
    failed: bool,
    table: Option<BlockHashTable>,
    /// Start of an incomplete signature record.
    leftover_signature: Vec<u8>,
    patcher: Option<BoxPatcher<'a>>,
}
impl<'a> Session<'a> {
    /// Create a session using `config` for the signatures it creates.
    ///
    /// # Errors
    ///
    /// Returns an error if the block size of `config` is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.block_size()?;
        Ok(Self::with_valid_config(config))
    }
    fn with_valid_config(config: Config) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            phase_done: false,
            failed: false,
            table: None,
            leftover_signature: Vec::new(),
            patcher: None,
        }
    }
    /// The configuration this session was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }
    /// The current phase.
    pub fn state(&self) -> SessionState {
        self.state
    }
    /// The table created by [`Self::compute_signature`] or read by
    /// [`Self::feed_signature_bytes`].
    #[must_use]
    pub fn table(&self) -> Option<&BlockHashTable> {
        self.table.as_ref()
    }
    /// Run `f`, poisoning the session if it fails.
    fn guard<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.failed {
            return Err(Error::SessionFailed);
        }
        let result = f(self);
        if result.is_err() {
            self.failed = true;
        }
        result
    }
    fn out_of_order(&self, operation: &'static str) -> Error {
        Error::OutOfOrder {
            state: self.state,
            operation,
        }
    }
    fn enter(&mut self, state: SessionState) {
        debug!("Session: {} -> {}", self.state, state);
        self.state = state;
        self.phase_done = false;
    }

    /// Start creating a signature. Returns the header, which has to be sent first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrder`] unless the session is [idle](SessionState::Idle).
    pub fn begin_signature(&mut self) -> Result<[u8; HEADER_LEN]> {
        self.guard(|this| {
            if this.state != SessionState::Idle {
                return Err(this.out_of_order("begin_signature"));
            }
            let header = this.config.header()?;
            this.enter(SessionState::BuildingSignature);
            Ok(header.to_bytes())
        })
    }
    /// Hash all of `source`, passing every record to `emit`.
    ///
    /// The table is kept to later apply a delta against the same reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrder`] unless [`Self::begin_signature`] was just called and
    /// [`Error::Io`] if reading `source` or `emit` fails.
    pub fn compute_signature(
        &mut self,
        source: impl Read,
        emit: impl FnMut(&[u8]) -> io::Result<()>,
    ) -> Result<()> {
        self.guard(|this| {
            if this.state != SessionState::BuildingSignature || this.phase_done {
                return Err(this.out_of_order("compute_signature"));
            }
            let builder = SignatureBuilder::with_config(&this.config)?;
            this.table = Some(compute_signature(source, builder, emit)?);
            this.phase_done = true;
            Ok(())
        })
    }
    /// [`Self::begin_signature`] and [`Self::compute_signature`] in one go. The header is
    /// passed to `emit` first.
    ///
    /// # Errors
    ///
    /// See the two methods.
    pub fn create_signature(
        &mut self,
        source: impl Read,
        mut emit: impl FnMut(&[u8]) -> io::Result<()>,
    ) -> Result<()> {
        let header = self.begin_signature()?;
        self.guard(|_| emit(&header).map_err(Error::Io))?;
        self.compute_signature(source, emit)
    }

    /// Read the next chunk of a signature created by the other side.
    ///
    /// Chunks can be split anywhere. An incomplete record is kept until the next call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrder`] if the session isn't idle or already reading a signature,
    /// and protocol errors for invalid headers and records.
    pub fn feed_signature_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.guard(|this| {
            match (this.state, this.phase_done) {
                (SessionState::Idle, _) => this.enter(SessionState::ConsumingSignatureInput),
                (SessionState::ConsumingSignatureInput, false) => {}
                _ => return Err(this.out_of_order("feed_signature_bytes")),
            }
            if this.leftover_signature.is_empty() {
                let consumed = decode_signature(&mut this.table, data)?;
                this.leftover_signature.extend_from_slice(&data[consumed..]);
            } else {
                let mut pending = std::mem::take(&mut this.leftover_signature);
                pending.extend_from_slice(data);
                let consumed = decode_signature(&mut this.table, &pending)?;
                pending.drain(..consumed);
                this.leftover_signature = pending;
            }
            Ok(())
        })
    }
    /// End the signature input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeftoverSignatureData`] if the signature ended inside a record,
    /// [`Error::MissingSignatureHeader`] if no complete header was read and
    /// [`Error::OutOfOrder`] if no signature is being read.
    pub fn finish_signature_input(&mut self) -> Result<()> {
        self.guard(|this| {
            if this.state != SessionState::ConsumingSignatureInput || this.phase_done {
                return Err(this.out_of_order("finish_signature_input"));
            }
            if this.table.is_none() {
                return Err(Error::MissingSignatureHeader);
            }
            if !this.leftover_signature.is_empty() {
                return Err(Error::LeftoverSignatureData(this.leftover_signature.len()));
            }
            if let Some(table) = &this.table {
                debug!(
                    "Read signature of {} blocks, reference is {} bytes",
                    table.len(),
                    table.total_len()
                );
            }
            this.phase_done = true;
            Ok(())
        })
    }

    /// Read all of `target` and pass the serialized delta against the signature read
    /// earlier to `emit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSignature`] if no signature was read, [`Error::OutOfOrder`] if the
    /// signature input wasn't finished and [`Error::Io`] if reading `target` or `emit` fails.
    pub fn compute_delta(
        &mut self,
        target: impl Read,
        mut emit: impl FnMut(&[u8]) -> io::Result<()>,
    ) -> Result<DeltaStats> {
        self.guard(|this| {
            match (this.state, this.phase_done) {
                (SessionState::Idle, _) => return Err(Error::NoSignature),
                (SessionState::ConsumingSignatureInput, true) => {}
                _ => return Err(this.out_of_order("compute_delta")),
            }
            this.enter(SessionState::BuildingDelta);
            let table = this.table.as_ref().ok_or(Error::NoSignature)?;
            let mut bytes = Vec::new();
            let stats = compute_delta(target, table, |op| {
                bytes.clear();
                op.serialize_into(&mut bytes);
                emit(&bytes).map_err(Error::Io)
            })?;
            this.phase_done = true;
            Ok(stats)
        })
    }

    /// Start applying a delta, writing the target to `output` and copying from `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrder`] unless the session is idle or a signature was completely
    /// created or read, and [`Error::Io`] if the size of `reference` can't be determined.
    pub fn start_delta(
        &mut self,
        output: impl Write + 'a,
        reference: impl ReadSeek + 'a,
    ) -> Result<()> {
        self.guard(|this| {
            let allowed = match this.state {
                SessionState::Idle => true,
                SessionState::BuildingSignature | SessionState::ConsumingSignatureInput => {
                    this.phase_done
                }
                SessionState::BuildingDelta | SessionState::ApplyingDelta => false,
            };
            if !allowed {
                return Err(this.out_of_order("start_delta"));
            }
            let output: Box<dyn Write + 'a> = Box::new(output);
            let reference: Box<dyn ReadSeek + 'a> = Box::new(reference);
            let patcher = Patcher::new(output, reference)?;
            if let Some(table) = &this.table {
                if table.total_len() != patcher.reference_size() {
                    debug!(
                        "Reference is {} bytes, the signature was created from {}",
                        patcher.reference_size(),
                        table.total_len()
                    );
                }
            }
            this.patcher = Some(patcher);
            this.enter(SessionState::ApplyingDelta);
            Ok(())
        })
    }
    /// Apply the next chunk of a delta.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfOrder`] if [`Self::start_delta`] wasn't called, protocol errors
    /// for malformed operations and [`Error::RefOutOfBounds`] for copies outside of the
    /// reference.
    pub fn update_delta(&mut self, data: &[u8]) -> Result<()> {
        self.guard(|this| {
            let state = this.state;
            match this.patcher.as_mut() {
                Some(patcher) if state == SessionState::ApplyingDelta => patcher.update(data),
                _ => Err(Error::OutOfOrder {
                    state,
                    operation: "update_delta",
                }),
            }
        })
    }
    /// End the delta and flush the output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeftoverDeltaData`] if the delta ended inside an operation and
    /// [`Error::OutOfOrder`] if no delta is being applied.
    pub fn finish_delta(&mut self) -> Result<DeltaStats> {
        self.guard(|this| {
            if this.state != SessionState::ApplyingDelta {
                return Err(this.out_of_order("finish_delta"));
            }
            let Some(patcher) = this.patcher.take() else {
                return Err(this.out_of_order("finish_delta"));
            };
            let (_, stats) = patcher.finish()?;
            this.phase_done = true;
            Ok(stats)
        })
    }
}
impl Default for Session<'_> {
    fn default() -> Self {
        Self::with_valid_config(Config::default())
    }
}
impl Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("phase_done", &self.phase_done)
            .field("failed", &self.failed)
            .field("table", &self.table.as_ref().map(BlockHashTable::len))
            .field("leftover_signature", &self.leftover_signature.len())
            .field("patcher", &self.patcher)
            .finish()
    }
}
