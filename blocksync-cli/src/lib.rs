//! File based front end of [`blocksync`].
//!
//! Each `run_*` function is one step of a transfer. [`run_signature`] runs where the old file
//! is, [`run_delta`] where the new one is, and [`run_patch`] rebuilds the new file from the
//! old one.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use blocksync::{Config, DeltaStats, Session, StrongHashType, WeakHashType};
use log::{debug, info};

/// Any error from a `run_*` function.
pub type DynError = Box<dyn Error>;

/// The size of the pieces signature and delta files are read in, unless told otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Invalid command line input.
#[derive(Debug, PartialEq)]
pub enum ApplicationError {
    /// A chunk size of `0` was given.
    ZeroChunkSize,
    /// The name isn't one of [`WEAK_HASHES`].
    UnknownWeakHash(String),
    /// The name isn't one of [`STRONG_HASHES`].
    UnknownStrongHash(String),
    /// The output would overwrite one of the inputs while it's being read.
    OutputIsInput(PathBuf),
}
impl Error for ApplicationError {}
impl Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroChunkSize => write!(f, "the chunk size has to be at least 1"),
            Self::UnknownWeakHash(name) => write!(
                f,
                "unknown weak hash {name:?}, expected one of {:?}",
                WEAK_HASHES
            ),
            Self::UnknownStrongHash(name) => write!(
                f,
                "unknown strong hash {name:?}, expected one of {:?}",
                STRONG_HASHES
            ),
            Self::OutputIsInput(path) => {
                write!(f, "output {path:?} is also an input")
            }
        }
    }
}

/// Names of the weak hashes accepted on the command line.
pub const WEAK_HASHES: [&str; 3] = ["beta", "adler32", "cyclic-poly32"];
/// Names of the strong hashes accepted on the command line.
pub const STRONG_HASHES: [&str; 2] = ["xxh3-64", "xxh3-128"];

/// Get the weak hash called `name`.
///
/// # Errors
///
/// Returns [`ApplicationError::UnknownWeakHash`] if `name` isn't in [`WEAK_HASHES`].
pub fn weak_hash(name: &str) -> Result<WeakHashType, ApplicationError> {
    match name {
        "beta" => Ok(WeakHashType::Beta),
        "adler32" => Ok(WeakHashType::Adler32),
        "cyclic-poly32" => Ok(WeakHashType::CyclicPoly32),
        _ => Err(ApplicationError::UnknownWeakHash(name.to_owned())),
    }
}
/// Get the strong hash called `name`.
///
/// # Errors
///
/// Returns [`ApplicationError::UnknownStrongHash`] if `name` isn't in [`STRONG_HASHES`].
pub fn strong_hash(name: &str) -> Result<StrongHashType, ApplicationError> {
    match name {
        "xxh3-64" => Ok(StrongHashType::Xxh3_64),
        "xxh3-128" => Ok(StrongHashType::Xxh3_128),
        _ => Err(ApplicationError::UnknownStrongHash(name.to_owned())),
    }
}

fn check_distinct(output: &Path, inputs: &[&Path]) -> Result<(), DynError> {
    let Ok(output_canonical) = output.canonicalize() else {
        // doesn't exist yet
        return Ok(());
    };
    for input in inputs {
        if input.canonicalize()? == output_canonical {
            return Err(ApplicationError::OutputIsInput(output.to_owned()).into());
        }
    }
    Ok(())
}

/// Read `file` in pieces of `chunk_size` bytes, like they'd arrive from a transport.
fn feed_chunks(
    mut file: impl Read,
    chunk_size: usize,
    mut f: impl FnMut(&[u8]) -> blocksync::Result<()>,
) -> Result<(), DynError> {
    if chunk_size == 0 {
        return Err(ApplicationError::ZeroChunkSize.into());
    }
    let mut buf = vec![0; chunk_size];
    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        f(&buf[..read])?;
    }
}

/// Write the signature of `reference` to `signature`.
///
/// Without a `block_size`, it's derived from the size of `reference`.
///
/// # Errors
///
/// Returns an error if a file can't be read or written or the `block_size` is invalid.
pub fn run_signature(
    reference: &Path,
    signature: &Path,
    block_size: Option<usize>,
    weak: WeakHashType,
    strong: StrongHashType,
) -> Result<(), DynError> {
    check_distinct(signature, &[reference])?;
    let file = File::open(reference)?;
    let len = file.metadata()?.len();
    let config = match block_size {
        Some(block_size) => Config::with_block_size(block_size),
        None => Config::for_expected_size(len),
    }
    .weak_hash(weak)
    .strong_hash(strong);

    let mut session = Session::new(config)?;
    let mut out = BufWriter::new(File::create(signature)?);
    session.create_signature(BufReader::new(file), |bytes| out.write_all(bytes))?;
    out.flush()?;

    if let Some(table) = session.table() {
        info!(
            "Wrote signature of {reference:?} ({len} bytes) to {signature:?}: {} blocks of {} bytes",
            table.len(),
            table.block_size()
        );
    }
    Ok(())
}

/// Read `signature` and write a delta of `target` against it to `delta`.
///
/// # Errors
///
/// Returns an error if a file can't be read or written or the signature is malformed.
pub fn run_delta(
    signature: &Path,
    target: &Path,
    delta: &Path,
    chunk_size: usize,
) -> Result<DeltaStats, DynError> {
    check_distinct(delta, &[signature, target])?;
    let mut session = Session::default();
    feed_chunks(File::open(signature)?, chunk_size, |chunk| {
        session.feed_signature_bytes(chunk)
    })?;
    session.finish_signature_input()?;
    if let Some(table) = session.table() {
        debug!(
            "Signature has {} blocks of {} bytes",
            table.len(),
            table.block_size()
        );
    }

    let mut out = BufWriter::new(File::create(delta)?);
    let stats = session.compute_delta(BufReader::new(File::open(target)?), |bytes| {
        out.write_all(bytes)
    })?;
    out.flush()?;
    info!("Wrote delta of {target:?} to {delta:?}: {stats}");
    Ok(stats)
}

/// Apply `delta` to `reference`, writing the result to `output`.
///
/// # Errors
///
/// Returns an error if a file can't be read or written or the delta is malformed or doesn't
/// fit `reference`.
pub fn run_patch(
    reference: &Path,
    delta: &Path,
    output: &Path,
    chunk_size: usize,
) -> Result<DeltaStats, DynError> {
    check_distinct(output, &[reference, delta])?;
    let reference_file = BufReader::new(File::open(reference)?);
    let out = BufWriter::new(File::create(output)?);

    let mut session = Session::default();
    session.start_delta(out, reference_file)?;
    feed_chunks(File::open(delta)?, chunk_size, |chunk| {
        session.update_delta(chunk)
    })?;
    let stats = session.finish_delta()?;
    info!("Patched {reference:?} with {delta:?} into {output:?}: {stats}");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn signature_delta_patch() {
        let dir = tempfile::tempdir().unwrap();
        let reference: Vec<u8> = (0..20_000_u32).map(|i| (i * 7 % 253) as u8).collect();
        let mut target = reference.clone();
        target[5000..5010].copy_from_slice(b"0123456789");
        target.extend_from_slice(b"appended");

        let reference_path = write(dir.path(), "reference", &reference);
        let target_path = write(dir.path(), "target", &target);
        let signature = dir.path().join("signature");
        let delta = dir.path().join("delta");
        let output = dir.path().join("output");

        run_signature(
            &reference_path,
            &signature,
            None,
            WeakHashType::Beta,
            StrongHashType::Xxh3_128,
        )
        .unwrap();
        let stats = run_delta(&signature, &target_path, &delta, 100).unwrap();
        assert!(stats.copy_ops > 0);
        assert!(fs::metadata(&delta).unwrap().len() < target.len() as u64);
        let stats = run_patch(&reference_path, &delta, &output, 7).unwrap();
        assert_eq!(stats.output_len(), target.len() as u64);
        assert_eq!(fs::read(&output).unwrap(), target);
    }
    #[test]
    fn explicit_block_size() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write(dir.path(), "reference", b"AAAABBBBCCCCDDDD");
        let signature = dir.path().join("signature");
        run_signature(
            &reference,
            &signature,
            Some(4),
            WeakHashType::Adler32,
            StrongHashType::Xxh3_64,
        )
        .unwrap();
        assert_eq!(fs::read(&signature).unwrap().len(), 12 + 4 * 20);
    }
    #[test]
    fn rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write(dir.path(), "reference", b"data");
        let signature = write(dir.path(), "signature", b"\x00\x00\x00");
        let delta = dir.path().join("delta");

        // truncated signature
        assert!(run_delta(&signature, &reference, &delta, 1).is_err());
        // zero chunk size
        run_signature(
            &reference,
            &signature,
            None,
            WeakHashType::default(),
            StrongHashType::default(),
        )
        .unwrap();
        let err = run_delta(&signature, &reference, &delta, 0).unwrap_err();
        assert_eq!(err.to_string(), ApplicationError::ZeroChunkSize.to_string());
        // patching the reference in place
        let err = run_patch(&reference, &signature, &reference, 1).unwrap_err();
        assert!(err.to_string().contains("is also an input"), "{err}");
        assert_eq!(fs::read(&reference).unwrap(), b"data");
    }
    #[test]
    fn hash_names() {
        for name in WEAK_HASHES {
            assert!(weak_hash(name).is_ok());
        }
        for name in STRONG_HASHES {
            assert!(strong_hash(name).is_ok());
        }
        assert_eq!(
            weak_hash("md4"),
            Err(ApplicationError::UnknownWeakHash("md4".to_owned()))
        );
        assert!(strong_hash("sha1").is_err());
    }
}
