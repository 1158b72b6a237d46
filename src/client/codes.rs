//! SIFEN result-code classification.
//!
//! The pipeline only needs to classify a small subset of the backend's code
//! catalog: acceptance, the malformed-XML family it knows how to repair, and
//! the in-progress batch states. Everything else is surfaced verbatim as
//! non-recoverable.

use serde::{Deserialize, Serialize};

/// `0260`: Autorizado el DE.
pub const CODE_DE_APPROVED: &str = "0260";

/// `0300`: Lote recibido con éxito (submission acknowledged, poll next).
pub const CODE_LOTE_RECEIVED: &str = "0300";

/// `0361`: Lote en procesamiento.
pub const CODE_LOTE_IN_PROCESS: &str = "0361";

/// `0160`: XML mal formado: signature block out of position.
pub const CODE_MALFORMED_SIGNATURE: &str = "0160";

/// `0161`: XML mal formado: duplicated supplementary block.
pub const CODE_MALFORMED_DUPLICATE: &str = "0161";

/// `0162`: XML mal formado: CDC check digit mismatch.
pub const CODE_MALFORMED_CHECK_DIGIT: &str = "0162";

/// Structural rejection causes this library knows how to repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionCause {
    /// Signature block in the wrong container.
    SignaturePlacement,
    /// More than one supplementary fields block.
    DuplicateSupplementary,
    /// CDC trailing digit fails the mod-11 check.
    ControlCodeCheckDigit,
}

/// What a backend response means for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Terminal success; the document must never be resubmitted.
    Accepted,
    /// Keep polling: never a failure.
    StillProcessing,
    /// Rejected with a code mapped to a corrective transform.
    RejectedKnown(RejectionCause),
    /// Rejected with a code outside the fix catalog; terminal, surfaced
    /// with the original code and message intact.
    RejectedUnknown,
}

/// Fallback for processing states reported with unlisted codes: the backend
/// wording always carries this stem ("en proceso", "procesamiento").
fn is_processing_message(message: &str) -> bool {
    message.to_lowercase().contains("proceso")
}

/// Classify a backend result code (plus message, for the in-progress
/// keyword fallback).
pub fn classify(code: &str, message: &str) -> Disposition {
    match code {
        CODE_DE_APPROVED => Disposition::Accepted,
        CODE_LOTE_RECEIVED | CODE_LOTE_IN_PROCESS => Disposition::StillProcessing,
        CODE_MALFORMED_SIGNATURE => {
            Disposition::RejectedKnown(RejectionCause::SignaturePlacement)
        }
        CODE_MALFORMED_DUPLICATE => {
            Disposition::RejectedKnown(RejectionCause::DuplicateSupplementary)
        }
        CODE_MALFORMED_CHECK_DIGIT => {
            Disposition::RejectedKnown(RejectionCause::ControlCodeCheckDigit)
        }
        _ if is_processing_message(message) => Disposition::StillProcessing,
        _ => Disposition::RejectedUnknown,
    }
}
