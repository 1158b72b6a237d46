use thiserror::Error;

/// Errors that can occur during document assembly or submission preparation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EkuatiaError {
    /// Malformed input rejected before any processing (wrong lengths,
    /// non-numeric control codes, empty series fields). Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Persistence collaborator fault; the enclosing transaction was
    /// rolled back, no partial state remains.
    #[error("store error: {0}")]
    Store(String),

    /// XML parsing or serialization error.
    #[error("XML error: {0}")]
    Xml(String),

    /// Structural corruption that must not be guessed at (e.g. more than
    /// one signature block). Fatal, aborts the pipeline.
    #[error("structural error: {0}")]
    Structural(String),

    /// Lote packaging error, including refusal to double-wrap.
    #[error("packaging error: {0}")]
    Pack(String),

    /// External signing collaborator failure.
    #[error("signing error: {0}")]
    Signing(String),
}

/// Control-code specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CdcError {
    /// Input was not the required number of characters.
    #[error("control code must be exactly {expected} digits, got {got}")]
    InvalidLength { expected: usize, got: usize },

    /// Input contained a character outside `0-9`.
    #[error("control code must contain only ASCII digits")]
    NonNumeric,

    /// The trailing digit does not match the one computed from the base.
    #[error("check digit mismatch: expected {expected}, got {got}")]
    CheckDigitMismatch { expected: u8, got: u8 },
}

impl From<CdcError> for EkuatiaError {
    fn from(e: CdcError) -> Self {
        EkuatiaError::Validation(e.to_string())
    }
}
