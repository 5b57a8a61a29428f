//! Prepared-claim checkpoint encoding.
//!
//! The checksum is XXH32 over the compact JSON encoding of the document with
//! `checksum` set to zero. It is computed from a borrowed view of the payload,
//! so the document being verified is never modified. Loaded bytes must also be
//! the exact encoding `save` produces, so escapes that decode to the same
//! value cannot slip past the checksum.

mod store;

use core::error::Error;

use api_types::Checkpoint;
use api_types::CheckpointV1;
use api_types::PreparedClaims;
use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;

pub use self::store::CheckpointStore;
pub use self::store::CHECKPOINT_FILE_NAME;

#[derive(Debug, Display)]
pub enum CheckpointError {
    #[display("Failed to encode checkpoint")]
    Encode,
    #[display("Failed to decode checkpoint")]
    Decode,
    #[display("Checkpoint checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[display("Failed to read checkpoint file {path}")]
    Read { path: String },
    #[display("Failed to write checkpoint file {path}")]
    Write { path: String },
}

impl Error for CheckpointError {}

/// `Checkpoint` as it is hashed: same field order, checksum always zero
#[derive(Serialize)]
struct Unsigned<'a> {
    checksum: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    v1: Option<&'a CheckpointV1>,
}

/// Checksum `checkpoint` should carry for its current payload
pub fn checksum(checkpoint: &Checkpoint) -> Result<u32, Report<CheckpointError>> {
    let unsigned = Unsigned {
        checksum: 0,
        v1: checkpoint.v1.as_ref(),
    };
    let bytes = serde_json::to_vec(&unsigned).change_context(CheckpointError::Encode)?;
    Ok(xxhash_rust::xxh32::xxh32(&bytes, 0))
}

/// Encode `claims` as a signed checkpoint document
pub fn save(claims: &PreparedClaims) -> Result<Vec<u8>, Report<CheckpointError>> {
    let mut checkpoint = Checkpoint::new(claims.clone());
    checkpoint.checksum = checksum(&checkpoint)?;
    serde_json::to_vec(&checkpoint).change_context(CheckpointError::Encode)
}

/// Check that the stored checksum matches the payload
pub fn verify(checkpoint: &Checkpoint) -> Result<(), Report<CheckpointError>> {
    let computed = checksum(checkpoint)?;
    if computed != checkpoint.checksum {
        return Err(Report::new(CheckpointError::ChecksumMismatch {
            stored: checkpoint.checksum,
            computed,
        }));
    }
    Ok(())
}

/// Decode and verify a checkpoint document
pub fn load(bytes: &[u8]) -> Result<PreparedClaims, Report<CheckpointError>> {
    let checkpoint: Checkpoint = serde_json::from_slice(bytes)
        .change_context(CheckpointError::Decode)
        .attach_printable_lazy(|| format!("{} bytes", bytes.len()))?;
    verify(&checkpoint)?;

    let canonical = serde_json::to_vec(&checkpoint).change_context(CheckpointError::Encode)?;
    if canonical != bytes {
        return Err(Report::new(CheckpointError::Decode)
            .attach_printable("document is not in canonical encoding"));
    }
    Ok(checkpoint.prepared_claims())
}
