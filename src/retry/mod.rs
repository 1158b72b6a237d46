//! Self-correcting submission loop.
//!
//! One closed state machine replaces ad hoc resubmission scripts: submit,
//! poll to a terminal state, diagnose the rejection code against a fixed fix
//! catalog, apply the corrective transform, re-sign, and resubmit; within a
//! caller-configured iteration bound. Unknown rejection codes are genuinely
//! terminal; the loop never guesses at fixes the catalog does not name.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{
    Disposition, PollOptions, RejectionCause, SifenClient, SubmissionResult, SubmitError,
    Transport,
};
use crate::core::{EkuatiaError, repair_control_code};
use crate::xml::tree::Element;
use crate::xml::{
    CanonicalDocument, QrParams, Signer, SigningCredential, canonicalize,
    dedup_supplementary_blocks, inject_qr_url, normalize_signature_placement, sign_document,
};

/// The closed catalog of corrective transforms. Every fix is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fix {
    /// Re-run the signature placement normalizer.
    NormalizeSignaturePlacement,
    /// Strip duplicated supplementary blocks, keeping the first.
    DedupSupplementaryBlocks,
    /// Recompute the CDC check digit.
    RepairControlCode,
}

impl Fix {
    /// The fix mapped to a diagnosable rejection cause.
    pub fn for_cause(cause: RejectionCause) -> Self {
        match cause {
            RejectionCause::SignaturePlacement => Self::NormalizeSignaturePlacement,
            RejectionCause::DuplicateSupplementary => Self::DedupSupplementaryBlocks,
            RejectionCause::ControlCodeCheckDigit => Self::RepairControlCode,
        }
    }

    /// Stable identifier recorded in the audit trail.
    pub fn id(self) -> &'static str {
        match self {
            Self::NormalizeSignaturePlacement => "normalize-signature-placement",
            Self::DedupSupplementaryBlocks => "dedup-supplementary-blocks",
            Self::RepairControlCode => "repair-control-code",
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    /// Terminal success. The document is never resubmitted afterwards.
    Accepted,
    /// The iteration bound was reached with the document still rejected.
    Exhausted,
    /// A rejection code outside the fix catalog; reported verbatim.
    Unrecoverable,
    /// The same fix was about to repeat without any observed state change.
    NoProgress,
    /// The caller's cancellation signal was raised between iterations.
    Cancelled,
}

/// One audited iteration: inputs, applied fix, and resulting status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Batch identifier submitted this iteration.
    pub batch_id: String,
    /// Size of the packaged payload, for correlating with transport logs.
    pub payload_bytes: usize,
    /// Backend result code, verbatim.
    pub code: String,
    /// Backend result message, verbatim.
    pub message: String,
    /// Fix applied after diagnosing this iteration's rejection, if any.
    pub fix_applied: Option<Fix>,
}

/// Terminal report: final status plus the full diagnostic trail, so every
/// failure is reproducible and auditable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    /// Terminal state of the loop.
    pub status: OutcomeStatus,
    /// How many submission attempts ran.
    pub iterations: u32,
    /// Ordered list of fixes applied across all iterations.
    pub applied_fixes: Vec<Fix>,
    /// Per-iteration audit records.
    pub trail: Vec<AttemptRecord>,
    /// The last backend result observed, if any exchange completed.
    pub final_result: Option<SubmissionResult>,
}

impl SubmissionOutcome {
    /// Whether the document was accepted.
    pub fn is_accepted(&self) -> bool {
        self.status == OutcomeStatus::Accepted
    }

    /// JSON rendering of the audit trail.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Pipeline failure outside the diagnose/repair cycle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Assembly, signing, or packaging fault, including fatal structural
    /// corruption, which is never repaired by guesswork.
    #[error(transparent)]
    Document(#[from] EkuatiaError),

    /// Transport or protocol fault. Not auto-retried here; retryable at the
    /// caller's discretion.
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Bounds for one submission attempt sequence.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of submission attempts (default 5).
    pub max_iterations: u32,
    /// Polling backoff and deadline for each attempt.
    pub poll: PollOptions,
    /// Cooperative cancellation, checked between iterations only; never
    /// mid-exchange, so an in-flight submission is never left ambiguous.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryOptions {
    /// Defaults: 5 iterations, default polling bounds, no cancellation.
    pub fn new() -> Self {
        Self {
            max_iterations: 5,
            poll: PollOptions::default(),
            cancel: None,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// The submission pipeline: canonicalize once, then sign → pack → submit →
/// poll → diagnose → repair until terminal.
pub struct SubmissionPipeline<'a, T, S> {
    client: &'a SifenClient<T>,
    signer: &'a S,
    credential: SigningCredential,
    options: RetryOptions,
}

impl<'a, T: Transport, S: Signer> SubmissionPipeline<'a, T, S> {
    /// Build a pipeline with default [`RetryOptions`].
    pub fn new(client: &'a SifenClient<T>, signer: &'a S, credential: SigningCredential) -> Self {
        Self {
            client,
            signer,
            credential,
            options: RetryOptions::new(),
        }
    }

    /// Override the retry bounds.
    pub fn with_options(mut self, options: RetryOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the full pipeline for one draft rDE.
    ///
    /// Terminal outcomes (accepted, exhausted, unrecoverable code, no
    /// progress, cancelled) are reported through [`SubmissionOutcome`];
    /// `Err` is reserved for infrastructure faults (structural corruption,
    /// signing failure, transport breakage).
    pub async fn run(
        &self,
        draft: Element,
        qr: &QrParams,
        batch_id: &str,
    ) -> Result<SubmissionOutcome, PipelineError> {
        // Assembling: slot ordering, supplementary dedup, QR injection.
        let mut doc = canonicalize(draft)?;
        inject_qr_url(&mut doc, qr)?;

        let mut trail: Vec<AttemptRecord> = Vec::new();
        let mut applied_fixes: Vec<Fix> = Vec::new();
        let mut last_fix: Option<Fix> = None;
        let mut final_result: Option<SubmissionResult> = None;
        let mut status = OutcomeStatus::Exhausted;
        let mut iterations = 0;

        for iteration in 1..=self.options.max_iterations.max(1) {
            if self.options.cancelled() {
                status = OutcomeStatus::Cancelled;
                break;
            }
            iterations = iteration;

            // Resigning: every correction invalidates the previous digest.
            sign_document(&mut doc, self.signer, &self.credential)?;
            let envelope = crate::batch::pack(&doc, batch_id)?;
            let payload_bytes = envelope.payload.len();

            // Submitting, then polling to a terminal state if asynchronous.
            let mut result = self.client.submit(&envelope).await?;
            if result.disposition() == Disposition::StillProcessing {
                let tracking = result.tracking_id.clone().ok_or_else(|| {
                    SubmitError::Protocol(EkuatiaError::Xml(
                        "backend reported in-process without a tracking id".into(),
                    ))
                })?;
                result = self
                    .client
                    .poll_until_terminal(&tracking, &self.options.poll)
                    .await?;
            }

            let mut record = AttemptRecord {
                iteration,
                batch_id: batch_id.to_string(),
                payload_bytes,
                code: result.code.clone(),
                message: result.message.clone(),
                fix_applied: None,
            };

            match result.disposition() {
                Disposition::Accepted => {
                    // Terminal: an accepted document must never be resubmitted.
                    final_result = Some(result);
                    trail.push(record);
                    status = OutcomeStatus::Accepted;
                    break;
                }
                Disposition::RejectedUnknown => {
                    final_result = Some(result);
                    trail.push(record);
                    status = OutcomeStatus::Unrecoverable;
                    break;
                }
                Disposition::StillProcessing => {
                    // poll_until_terminal only returns terminal states.
                    return Err(SubmitError::Protocol(EkuatiaError::Xml(
                        "non-terminal disposition after polling".into(),
                    ))
                    .into());
                }
                Disposition::RejectedKnown(cause) => {
                    final_result = Some(result);
                    if iteration == self.options.max_iterations {
                        // Exhausted: no point diagnosing a fix we cannot try.
                        trail.push(record);
                        break;
                    }

                    let fix = Fix::for_cause(cause);
                    let before = doc.signing_payload()?;
                    apply_fix(&mut doc, fix)?;
                    let after = doc.signing_payload()?;

                    record.fix_applied = Some(fix);
                    trail.push(record);
                    // Every applied fix is ledgered, no-op repeats included,
                    // so the trail and the summary list always agree.
                    applied_fixes.push(fix);

                    if last_fix == Some(fix) && before == after {
                        status = OutcomeStatus::NoProgress;
                        break;
                    }
                    last_fix = Some(fix);
                }
            }
        }

        Ok(SubmissionOutcome {
            status,
            iterations,
            applied_fixes,
            trail,
            final_result,
        })
    }
}

/// Apply one corrective transform. All fixes are idempotent; the stale
/// signature slot is dropped where the transform touches signed bytes,
/// because the loop re-signs before every resubmission.
fn apply_fix(doc: &mut CanonicalDocument, fix: Fix) -> Result<(), EkuatiaError> {
    match fix {
        Fix::NormalizeSignaturePlacement => {
            doc.take_signature();
            normalize_signature_placement(doc)?;
        }
        Fix::DedupSupplementaryBlocks => {
            let mut element = doc.to_element();
            dedup_supplementary_blocks(&mut element);
            *doc = canonicalize(element)?;
        }
        Fix::RepairControlCode => {
            let cdc = doc
                .cdc()
                .ok_or_else(|| {
                    EkuatiaError::Validation("cannot repair check digit: no CDC bound".into())
                })?
                .to_owned();
            doc.set_cdc(repair_control_code(&cdc).map_err(EkuatiaError::from)?);
        }
    }
    Ok(())
}
