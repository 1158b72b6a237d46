//! Lote packaging: byte-exact serialization, store-only compression, and
//! text-safe encoding into the single submission envelope.
//!
//! The payload travels as base64 over the SOAP channel; compression uses a
//! store-only gzip member (`Compression::none()`) so the signed document
//! bytes inside the container are preserved verbatim. One document per
//! envelope; nesting envelopes is refused, never silently repaired.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::core::EkuatiaError;
use crate::xml::tree::{self, Element};
use crate::xml::CanonicalDocument;

/// Container tag wrapping the rDE inside the compressed payload.
pub const LOTE_CONTAINER_TAG: &str = "rLoteDE";

/// Outer envelope tag carried on the wire.
pub const ENVELOPE_TAG: &str = "rEnvioLote";

/// The wire envelope: exactly one compressed, encoded document plus a
/// transport identifier. Never double-wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnvelope {
    /// Transport/batch identifier (`dId`).
    pub batch_id: String,
    /// Base64 of the store-only gzip of the lote XML (`xDE`).
    pub payload: String,
}

impl BatchEnvelope {
    /// Assemble the envelope element for the wire.
    pub fn to_element(&self) -> Element {
        Element::new(ENVELOPE_TAG)
            .with_text_child("dId", &self.batch_id)
            .with_text_child("xDE", &self.payload)
    }

    /// Serialized envelope bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EkuatiaError> {
        self.to_element().to_bytes()
    }
}

fn local(tag: &str) -> &str {
    match tag.rsplit_once(':') {
        Some((_, l)) => l,
        None => tag,
    }
}

/// Strip a leading XML declaration so the bytes can be embedded verbatim.
fn without_declaration(xml: &[u8]) -> &[u8] {
    let trimmed = xml
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(xml, |i| &xml[i..]);
    if trimmed.starts_with(b"<?xml") {
        if let Some(end) = trimmed.windows(2).position(|w| w == b"?>") {
            let rest = &trimmed[end + 2..];
            return rest
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .map_or(&[], |i| &rest[i..]);
        }
    }
    trimmed
}

/// Package a canonical document into a [`BatchEnvelope`].
///
/// Precondition: the document carries exactly one supplementary block (QR
/// injection has run). The serialized bytes are wrapped in a `rLoteDE`
/// container, compressed store-only, base64-encoded, and enveloped once.
///
/// # Errors
///
/// [`EkuatiaError::Pack`] when the precondition fails or the input is
/// already an envelope.
pub fn pack(
    doc: &CanonicalDocument,
    batch_id: impl Into<String>,
) -> Result<BatchEnvelope, EkuatiaError> {
    if doc.supplementary().is_none() {
        return Err(EkuatiaError::Pack(
            "document has no supplementary block; run QR injection before packaging".into(),
        ));
    }
    pack_bytes(&doc.serialize()?, batch_id)
}

/// Package already-serialized document bytes.
///
/// Accepts an `rDE` (wrapped into the lote container) or a bare `rLoteDE`
/// (used as-is). An input whose root is already the envelope tag is refused;
/// re-wrapping would nest envelopes.
pub fn pack_bytes(xml: &[u8], batch_id: impl Into<String>) -> Result<BatchEnvelope, EkuatiaError> {
    let root = tree::root_tag(xml)?;
    let lote: Vec<u8> = match local(&root) {
        t if t == ENVELOPE_TAG => {
            return Err(EkuatiaError::Pack(format!(
                "input root is already <{ENVELOPE_TAG}>; refusing to double-wrap"
            )));
        }
        t if t == LOTE_CONTAINER_TAG => xml.to_vec(),
        "rDE" => {
            let mut wrapped = Vec::with_capacity(xml.len() + 64);
            wrapped.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
            wrapped.extend_from_slice(format!("<{LOTE_CONTAINER_TAG}>").as_bytes());
            // The signed rDE bytes go in verbatim.
            wrapped.extend_from_slice(without_declaration(xml));
            wrapped.extend_from_slice(format!("</{LOTE_CONTAINER_TAG}>").as_bytes());
            wrapped
        }
        other => {
            return Err(EkuatiaError::Pack(format!(
                "cannot package a <{other}> document"
            )));
        }
    };

    let mut encoder = GzEncoder::new(Vec::new(), Compression::none());
    encoder
        .write_all(&lote)
        .and_then(|()| encoder.finish())
        .map(|compressed| BatchEnvelope {
            batch_id: batch_id.into(),
            payload: BASE64.encode(compressed),
        })
        .map_err(|e| EkuatiaError::Pack(format!("compression failed: {e}")))
}

/// Decode an envelope payload back to the lote XML bytes.
///
/// Inverse of [`pack`]; used for audit and round-trip verification.
pub fn unpack_payload(envelope: &BatchEnvelope) -> Result<Vec<u8>, EkuatiaError> {
    let compressed = BASE64
        .decode(&envelope.payload)
        .map_err(|e| EkuatiaError::Pack(format!("payload is not valid base64: {e}")))?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EkuatiaError::Pack(format!("payload decompression failed: {e}")))?;
    Ok(out)
}
