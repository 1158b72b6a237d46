#![cfg(feature = "retry")]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ekuatia::client::{ClientConfig, PollOptions, SifenClient, Transport, TransportError};
use ekuatia::core::Environment;
use ekuatia::retry::*;
use ekuatia::xml::tree::{Element, parse};
use ekuatia::xml::{QrParams, Signer, SigningCredential, SigningError};

const CDC: &str = "12345678901234567890123456789012345678901235";

struct ScriptedTransport {
    responses: Mutex<VecDeque<(u16, Vec<u8>)>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|b| (200, b.into_bytes())).collect()),
        }
    }
}

impl Transport for ScriptedTransport {
    async fn exchange(
        &self,
        _endpoint: &str,
        _soap_action: &str,
        _body: &[u8],
    ) -> Result<(u16, Vec<u8>), TransportError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Network("script exhausted".into()))
    }
}

struct StubSigner;

impl Signer for StubSigner {
    fn sign(&self, payload: &[u8], _: &SigningCredential) -> Result<Vec<u8>, SigningError> {
        Ok(format!("<ds:Signature>{}</ds:Signature>", payload.len()).into_bytes())
    }
}

fn soap(code: &str, msg: &str, tracking: Option<&str>) -> String {
    let tracking = tracking
        .map(|t| format!("<dProtConsLote>{t}</dProtConsLote>"))
        .unwrap_or_default();
    format!(
        "<env:Envelope xmlns:env=\"http://www.w3.org/2003/05/soap-envelope\"><env:Body>\
         <rRes><dCodRes>{code}</dCodRes><dMsgRes>{msg}</dMsgRes>{tracking}</rRes>\
         </env:Body></env:Envelope>"
    )
}

fn client(responses: Vec<String>) -> SifenClient<ScriptedTransport> {
    SifenClient::new(
        ScriptedTransport::new(responses),
        ClientConfig::for_environment(Environment::Test),
    )
}

fn credential() -> SigningCredential {
    SigningCredential {
        alias: "issuer".into(),
        material: b"pkcs12".to_vec(),
    }
}

fn qr() -> QrParams {
    QrParams {
        environment: Environment::Test,
        security_hash: "cafe".into(),
    }
}

fn fast_options() -> RetryOptions {
    RetryOptions {
        max_iterations: 5,
        poll: PollOptions {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            deadline: Duration::from_secs(5),
        },
        cancel: None,
    }
}

/// Draft with the signature nested inside the DE body; the structural
/// defect the backend rejects as malformed.
fn misplaced_signature_draft() -> Element {
    parse(&format!(
        r#"<rDE><dVerFor>150</dVerFor><DE Id="{CDC}"><gOpeDE><ds:Signature>old</ds:Signature></gOpeDE></DE></rDE>"#
    ))
    .unwrap()
}

fn clean_draft() -> Element {
    parse(&format!(r#"<rDE><dVerFor>150</dVerFor><DE Id="{CDC}"/></rDE>"#)).unwrap()
}

#[tokio::test]
async fn malformed_placement_is_fixed_within_two_iterations() {
    // Iteration 1: rejected 0160 (signature out of position).
    // Iteration 2: accepted after exactly the placement fix.
    let c = client(vec![
        soap("0160", "XML mal formado", None),
        soap("0260", "Autorizado el DE", None),
    ]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());

    let outcome = pipeline
        .run(misplaced_signature_draft(), &qr(), "1001")
        .await
        .unwrap();

    assert!(outcome.is_accepted());
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.applied_fixes, vec![Fix::NormalizeSignaturePlacement]);
    assert_eq!(outcome.trail.len(), 2);
    assert_eq!(
        outcome.trail[0].fix_applied,
        Some(Fix::NormalizeSignaturePlacement)
    );
    assert_eq!(outcome.trail[1].code, "0260");
    assert_eq!(outcome.final_result.unwrap().code, "0260");
}

#[tokio::test]
async fn stray_signature_in_supplementary_is_normalized() {
    let c = client(vec![
        soap("0160", "XML mal formado", None),
        soap("0260", "Autorizado el DE", None),
    ]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());

    // The stray block hides outside the DE body.
    let draft = parse(&format!(
        r#"<rDE><DE Id="{CDC}"/><gCamFuFD><ds:Signature>stray</ds:Signature></gCamFuFD></rDE>"#
    ))
    .unwrap();

    let outcome = pipeline.run(draft, &qr(), "1010").await.unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(outcome.applied_fixes, vec![Fix::NormalizeSignaturePlacement]);
}

#[tokio::test]
async fn async_acceptance_via_polling() {
    let c = client(vec![
        soap("0300", "Lote recibido con éxito", Some("42")),
        soap("0361", "Lote en procesamiento", None),
        soap("0260", "Autorizado el DE", None),
    ]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());

    let outcome = pipeline.run(clean_draft(), &qr(), "1002").await.unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.applied_fixes.is_empty());
}

#[tokio::test]
async fn unknown_code_is_terminal_and_verbatim() {
    let c = client(vec![soap("0420", "RUC del emisor inexistente", None)]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());

    let outcome = pipeline.run(clean_draft(), &qr(), "1003").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Unrecoverable);
    assert_eq!(outcome.iterations, 1);
    let last = outcome.final_result.unwrap();
    assert_eq!(last.code, "0420");
    assert_eq!(last.message, "RUC del emisor inexistente");
}

#[tokio::test]
async fn check_digit_rejection_is_repaired() {
    let c = client(vec![
        soap("0162", "CDC con dígito verificador inválido", None),
        soap("0260", "Autorizado el DE", None),
    ]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());

    // Draft with a deliberately wrong trailing digit.
    let bad_cdc = format!("{}9", &CDC[..43]);
    let draft = parse(&format!(r#"<rDE><DE Id="{bad_cdc}"/></rDE>"#)).unwrap();

    let outcome = pipeline.run(draft, &qr(), "1004").await.unwrap();
    assert!(outcome.is_accepted());
    assert_eq!(outcome.applied_fixes, vec![Fix::RepairControlCode]);
}

#[tokio::test]
async fn repeating_fix_without_state_change_stops() {
    // The backend keeps answering 0160; after the first placement fix the
    // document no longer changes, so the loop must not spin to exhaustion.
    let c = client(vec![
        soap("0160", "XML mal formado", None),
        soap("0160", "XML mal formado", None),
        soap("0160", "XML mal formado", None),
    ]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());

    let outcome = pipeline
        .run(misplaced_signature_draft(), &qr(), "1005")
        .await
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::NoProgress);
    assert_eq!(outcome.iterations, 2);
    // The repeated no-op application is ledgered too; the summary list and
    // the per-iteration trail must tell the same story.
    assert_eq!(
        outcome.applied_fixes,
        vec![
            Fix::NormalizeSignaturePlacement,
            Fix::NormalizeSignaturePlacement
        ]
    );
    let trail_fixes: Vec<Fix> = outcome.trail.iter().filter_map(|r| r.fix_applied).collect();
    assert_eq!(trail_fixes, outcome.applied_fixes);
}

#[tokio::test]
async fn iteration_bound_exhausts() {
    let responses: Vec<String> = (0..2).map(|_| soap("0160", "XML mal formado", None)).collect();
    let c = client(responses);
    let mut options = fast_options();
    options.max_iterations = 2;
    let pipeline = SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(options);

    let outcome = pipeline
        .run(misplaced_signature_draft(), &qr(), "1006")
        .await
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Exhausted);
    assert_eq!(outcome.iterations, 2);
    // Audit trail covers every attempt.
    assert_eq!(outcome.trail.len(), 2);
}

#[tokio::test]
async fn cancellation_is_checked_between_iterations() {
    let cancel = Arc::new(AtomicBool::new(true));
    let c = client(vec![]);
    let mut options = fast_options();
    options.cancel = Some(Arc::clone(&cancel));
    let pipeline = SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(options);

    // Raised before the first iteration: no exchange ever happens.
    let outcome = pipeline.run(clean_draft(), &qr(), "1007").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    assert_eq!(outcome.iterations, 0);
    assert!(outcome.trail.is_empty());
    cancel.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn audit_trail_serializes_to_json() {
    let c = client(vec![soap("0420", "Fuera de catálogo", None)]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());
    let outcome = pipeline.run(clean_draft(), &qr(), "1008").await.unwrap();

    let json = outcome.to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["status"], "unrecoverable");
    assert_eq!(parsed["trail"][0]["code"], "0420");
    assert_eq!(parsed["trail"][0]["batch_id"], "1008");
}

#[tokio::test]
async fn multiple_signatures_abort_instead_of_guessing() {
    let c = client(vec![]);
    let pipeline =
        SubmissionPipeline::new(&c, &StubSigner, credential()).with_options(fast_options());

    let draft = parse(&format!(
        r#"<rDE><DE Id="{CDC}"/><ds:Signature>a</ds:Signature><ds:Signature>b</ds:Signature></rDE>"#
    ))
    .unwrap();
    let err = pipeline.run(draft, &qr(), "1009").await.unwrap_err();
    assert!(err.to_string().contains("signature"));
}
