//! SOAP request construction and response extraction.
//!
//! Loose local-name matching is confined to this wire boundary; everything
//! past [`parse_response`] works with typed results.

use crate::batch::BatchEnvelope;
use crate::core::EkuatiaError;
use crate::xml::tree::{self, Element};

use super::SubmissionResult;

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const SIFEN_NS: &str = "http://ekuatia.set.gov.py/sifen/xsd";

fn soap_wrap(body_child: Element) -> Element {
    Element::new("env:Envelope")
        .with_attr("xmlns:env", SOAP_ENV_NS)
        .with_child(Element::new("env:Body").with_child(body_child))
}

/// Build the lote submission request (`siRecepLoteDE`).
pub fn build_submit_request(envelope: &BatchEnvelope) -> Result<Vec<u8>, EkuatiaError> {
    let payload = Element::new("rEnvioLote")
        .with_attr("xmlns", SIFEN_NS)
        .with_text_child("dId", &envelope.batch_id)
        .with_text_child("xDE", &envelope.payload);
    soap_wrap(payload).to_document_bytes()
}

/// Build the lote status query (`siResultLoteDE`).
pub fn build_query_request(tracking_id: &str) -> Result<Vec<u8>, EkuatiaError> {
    let payload = Element::new("rEnviConsLoteDe")
        .with_attr("xmlns", SIFEN_NS)
        .with_text_child("dProtConsLote", tracking_id);
    soap_wrap(payload).to_document_bytes()
}

fn find_text(element: &Element, local: &str) -> Option<String> {
    if element.local_name() == local {
        return Some(element.text());
    }
    element
        .child_elements()
        .find_map(|child| find_text(child, local))
}

/// Extract the result fields from a SOAP response body.
///
/// `dCodRes`/`dMsgRes` carry the result code and message; a
/// `dProtConsLote` in a reception response is the tracking identifier for
/// subsequent polling.
///
/// # Errors
///
/// [`EkuatiaError::Xml`] when the body is unparseable or carries no result
/// code at all.
pub fn parse_response(http_status: u16, body: &[u8]) -> Result<SubmissionResult, EkuatiaError> {
    let root = tree::parse_bytes(body)?;
    let code = find_text(&root, "dCodRes")
        .ok_or_else(|| EkuatiaError::Xml("response carries no dCodRes result code".into()))?;
    let message = find_text(&root, "dMsgRes").unwrap_or_default();
    let tracking_id = find_text(&root, "dProtConsLote").filter(|t| !t.is_empty());

    Ok(SubmissionResult {
        http_status,
        code,
        message,
        tracking_id,
    })
}
