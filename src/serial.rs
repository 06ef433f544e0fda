//! Binary caching of compiled documents.
//!
//! A [`CompiledArtifact`] pairs a compiled [`Document`] with its resource
//! graph [`Resolution`], so a transformation service can skip parsing,
//! validation and graph resolution on start-up. The format is a 32-byte fixed
//! header followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"RDMX"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. If it does not,
//! deserialization fails immediately with [`DeserializeError::IncompatibleVersion`].
//! The engine version is informational only.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{resolve_graph, Resolution};
use crate::types::{DataReference, Document, Resource, ResourceKey};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"RDMX";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when serializing a [`CompiledArtifact`] to bytes.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode compiled document: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("payload of {0} bytes exceeds the format limit")]
    TooLarge(usize),

    #[error("I/O error during serialization: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when deserializing a [`CompiledArtifact`] from bytes.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a redmatch binary: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during deserialization: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// A compiled document and its resolved resource graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub document: Document,
    pub resolution: Resolution,
}

impl CompiledArtifact {
    /// Resolve the graph of an already compiled document.
    #[must_use]
    pub fn new(document: Document) -> Self {
        let resolution = resolve_graph(&document);
        Self {
            document,
            resolution,
        }
    }

    /// Serialize to a byte vector.
    ///
    /// The optional `source_text` is hashed (BLAKE3) and embedded in the
    /// payload metadata, see [`source_digest`](Self::source_digest).
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`] if encoding fails.
    pub fn to_bytes(&self, source_text: Option<&str>) -> Result<Vec<u8>, SerializeError> {
        encode(self, source_text)
    }

    /// Deserialize from bytes produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`] on format, integrity, or validation failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeserializeError> {
        decode(bytes).map(|(artifact, _)| artifact)
    }

    /// Digest of the rule text embedded by [`to_bytes`](Self::to_bytes), if
    /// any. Compare with [`digest`] to decide whether a cache is stale.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`] on format, integrity, or validation failure.
    pub fn source_digest(bytes: &[u8]) -> Result<Option<[u8; 32]>, DeserializeError> {
        decode(bytes).map(|(_, digest)| digest)
    }

    /// # Errors
    ///
    /// Returns [`SerializeError`] on encoding or I/O failure.
    pub fn to_binary_file(
        &self,
        path: impl AsRef<Path>,
        source_text: Option<&str>,
    ) -> Result<(), SerializeError> {
        let bytes = self.to_bytes(source_text)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DeserializeError`] on I/O, format, integrity, or validation
    /// failure.
    pub fn from_binary_file(path: impl AsRef<Path>) -> Result<Self, DeserializeError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

/// BLAKE3 digest of rule text, as embedded in the payload.
#[must_use]
pub fn digest(source_text: &str) -> [u8; 32] {
    *blake3::hash(source_text.as_bytes()).as_bytes()
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    rule_count: usize,
    resource_count: usize,
    source_digest: Option<[u8; 32]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    metadata: Metadata,
    artifact: CompiledArtifact,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(payload: &Payload) -> Result<(), DeserializeError> {
    let doc = &payload.artifact.document;
    let resolution = &payload.artifact.resolution;

    if payload.metadata.rule_count != doc.rules.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} rules but payload has {}",
            payload.metadata.rule_count,
            doc.rules.len()
        )));
    }
    let resources = doc.resources();
    if payload.metadata.resource_count != resources.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} resource statements but payload has {}",
            payload.metadata.resource_count,
            resources.len()
        )));
    }

    // A fatal resolution has no order to check.
    if resolution.is_fatal() {
        return Ok(());
    }

    let created: HashSet<ResourceKey> = resources.into_iter().map(Resource::key).collect();
    let mut seen: HashSet<&ResourceKey> = HashSet::new();
    for key in &resolution.order {
        if !created.contains(key) {
            return Err(DeserializeError::Validation(format!(
                "creation order names {key} but no rule creates it"
            )));
        }
        if !seen.insert(key) {
            return Err(DeserializeError::Validation(format!(
                "creation order lists {key} twice"
            )));
        }
    }
    if seen.len() != created.len() {
        return Err(DeserializeError::Validation(format!(
            "creation order has {} resources but the document creates {}",
            seen.len(),
            created.len()
        )));
    }

    // Targets precede the resources that reference them.
    let position: std::collections::HashMap<&ResourceKey, usize> = resolution
        .order
        .iter()
        .enumerate()
        .map(|(i, k)| (k, i))
        .collect();
    for resource in doc.resources() {
        let key = resource.key();
        for target in resource.references() {
            match (position.get(&key), position.get(&target)) {
                (Some(from), Some(to)) if to < from => {}
                _ => {
                    return Err(DeserializeError::Validation(format!(
                        "{target} does not precede {key} in the creation order"
                    )));
                }
            }
        }
    }

    for key in &resolution.shared {
        if resolution.classes.get(key) != Some(&DataReference::No) {
            return Err(DeserializeError::Validation(format!(
                "{key} is shared but not classified as literal-only"
            )));
        }
    }
    for (key, class) in &resolution.classes {
        if *class == DataReference::Resource {
            return Err(DeserializeError::Validation(format!(
                "{key} was left unclassified"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), SerializeError> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| SerializeError::TooLarge(payload.len()))?;
    let hash = blake3::hash(payload);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash.as_bytes()[..16]);
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // HEADER_SIZE is 32, always fits in u32
fn read_header(bytes: &[u8]) -> Result<(u16, u32, [u8; 16]), DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE as u32,
            actual: bytes.len(),
        });
    }
    if &bytes[0..4] != MAGIC {
        return Err(DeserializeError::BadMagic);
    }
    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    // bytes[6..8] is engine_version, bytes[8..12] is flags
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&bytes[16..32]);
    Ok((format_version, payload_len, hash))
}

// ---------------------------------------------------------------------------
// Encode/decode
// ---------------------------------------------------------------------------

fn encode(artifact: &CompiledArtifact, source_text: Option<&str>) -> Result<Vec<u8>, SerializeError> {
    let payload = Payload {
        metadata: Metadata {
            rule_count: artifact.document.rules.len(),
            resource_count: artifact.document.resources().len(),
            source_digest: source_text.map(digest),
        },
        artifact: artifact.clone(),
    };
    let bytes = bincode::serde::encode_to_vec(&payload, bincode::config::standard())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + bytes.len());
    write_header(&mut buf, &bytes)?;
    buf.extend_from_slice(&bytes);
    Ok(buf)
}

fn decode(bytes: &[u8]) -> Result<(CompiledArtifact, Option<[u8; 32]>), DeserializeError> {
    let (format_version, payload_len, stored_hash) = read_header(bytes)?;

    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }

    let payload_end = HEADER_SIZE + payload_len as usize;
    if bytes.len() < payload_end {
        return Err(DeserializeError::LengthMismatch {
            expected: payload_len,
            actual: bytes.len() - HEADER_SIZE,
        });
    }
    let payload = &bytes[HEADER_SIZE..payload_end];

    if blake3::hash(payload).as_bytes()[..16] != stored_hash {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (decoded, _): (Payload, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    validate(&decoded)?;
    Ok((decoded.artifact, decoded.metadata.source_digest))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
