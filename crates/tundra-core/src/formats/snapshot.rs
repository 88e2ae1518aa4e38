//! # Snapshot Format
//!
//! Binary encoding of one [`ModelStateSnapshot`].
//!
//! Format: Header (37 bytes) + postcard-serialized state.
//! - 4 bytes: Magic ("TSNP")
//! - 1 byte: Version
//! - 32 bytes: BLAKE3 digest of the payload
//!
//! Decoding checks, in order: size bounds, header, digest, payload decoding,
//! structural validation. Any failure is `SnapshotCorrupt`, so a damaged
//! restart file is never mistaken for a missing one.

use crate::primitives::{FORMAT_VERSION, HEADER_LEN, MAGIC_BYTES, MAX_SNAPSHOT_SIZE};
use crate::{ModelStateSnapshot, TundraError};

const DIGEST_LEN: usize = 32;

/// The header preceding every encoded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub digest: [u8; DIGEST_LEN],
}

impl SnapshotHeader {
    /// Header for a payload in the current format version.
    #[must_use]
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
            digest: *blake3::hash(payload).as_bytes(),
        }
    }

    pub fn validate(&self) -> Result<(), TundraError> {
        if &self.magic != MAGIC_BYTES {
            return Err(TundraError::SnapshotCorrupt(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(TundraError::SnapshotCorrupt(format!(
                "Unsupported version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Check the payload against the recorded digest.
    pub fn verify(&self, payload: &[u8]) -> Result<(), TundraError> {
        if blake3::hash(payload).as_bytes() != &self.digest {
            return Err(TundraError::SnapshotCorrupt(
                "Payload digest mismatch".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes[5..HEADER_LEN].copy_from_slice(&self.digest);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TundraError> {
        if bytes.len() < HEADER_LEN {
            return Err(TundraError::SnapshotCorrupt(format!(
                "Data too short: minimum {} bytes required",
                HEADER_LEN
            )));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes[5..HEADER_LEN]);
        Ok(Self {
            magic,
            version: bytes[4],
            digest,
        })
    }
}

/// Encode a snapshot (header + payload).
///
/// Invalid state is refused so that it never reaches a restart file.
pub fn snapshot_to_bytes(state: &ModelStateSnapshot) -> Result<Vec<u8>, TundraError> {
    state.validate().map_err(|reason| {
        TundraError::SerializationError(format!(
            "Refusing to encode invalid state for cohort {}: {}",
            state.cohort, reason
        ))
    })?;

    let payload =
        postcard::to_stdvec(state).map_err(|e| TundraError::SerializationError(e.to_string()))?;
    if payload.len() + HEADER_LEN > MAX_SNAPSHOT_SIZE {
        return Err(TundraError::SerializationError(format!(
            "Encoded snapshot of {} bytes exceeds maximum {} bytes",
            payload.len() + HEADER_LEN,
            MAX_SNAPSHOT_SIZE
        )));
    }

    let header = SnapshotHeader::for_payload(&payload);
    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Decode and validate a snapshot.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<ModelStateSnapshot, TundraError> {
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(TundraError::SnapshotCorrupt(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }

    let header = SnapshotHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = &bytes[HEADER_LEN..];
    header.verify(payload)?;

    let state: ModelStateSnapshot = postcard::from_bytes(payload).map_err(|e| {
        TundraError::SnapshotCorrupt(format!("Failed to decode snapshot payload: {}", e))
    })?;
    state.validate().map_err(TundraError::SnapshotCorrupt)?;
    Ok(state)
}

// =============================================================================
// TESTS
// =============================================================================
