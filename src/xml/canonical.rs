//! rDE canonicalization: fixed slot ordering, supplementary-block dedup,
//! and QR verification-URL injection.
//!
//! A canonical rDE has exactly this top-level sequence: `dVerFor`, `DE`,
//! optional `ds:Signature`, optional `gCamFuFD`. Structural slots are
//! addressed by role after a single classification pass; downstream code
//! never searches the tree by tag name again.

use crate::core::{EkuatiaError, Environment};

use super::tree::{Element, Node};

/// SIFEN schema namespace carried on the rDE root.
pub const SIFEN_NS: &str = "http://ekuatia.set.gov.py/sifen/xsd";

/// XML-DSig namespace of the signature block.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Schema version written into a synthesized `dVerFor`.
pub const SCHEMA_VERSION: &str = "150";

/// QR verification base URL per environment.
pub fn qr_base_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Test => "https://ekuatia.set.gov.py/consultas-test/qr",
        Environment::Production => "https://ekuatia.set.gov.py/consultas/qr",
    }
}

/// Structural role of a direct rDE child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    /// `dVerFor`: schema version field.
    Version,
    /// `DE`: the document body.
    DeBody,
    /// `ds:Signature` (any prefix); XML-DSig block.
    Signature,
    /// `gCamFuFD`: supplementary fields block (QR URL lives here).
    Supplementary,
    /// Anything else: not part of the canonical form.
    Other,
}

impl ElementRole {
    /// Classify an element by its local name.
    pub fn of(element: &Element) -> Self {
        match element.local_name() {
            "dVerFor" => Self::Version,
            "DE" => Self::DeBody,
            "Signature" => Self::Signature,
            "gCamFuFD" => Self::Supplementary,
            _ => Self::Other,
        }
    }
}

/// An rDE with its top-level children resolved into typed slots.
///
/// Construction goes through [`canonicalize`]; by construction there is at
/// most one signature slot and at most one supplementary slot, and the slot
/// order is fixed. The body is never mutated once a CDC is bound; repairs
/// go through the signature normalizer or [`set_cdc`](Self::set_cdc).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDocument {
    root_attrs: Vec<(String, String)>,
    version: Element,
    body: Element,
    signature: Option<Element>,
    supplementary: Option<Element>,
}

impl CanonicalDocument {
    /// The `DE` body.
    pub fn body(&self) -> &Element {
        &self.body
    }

    /// Mutable access to the body, for the signature normalizer only.
    pub(crate) fn body_mut(&mut self) -> &mut Element {
        &mut self.body
    }

    /// The signature slot.
    pub fn signature(&self) -> Option<&Element> {
        self.signature.as_ref()
    }

    /// Replace the signature slot, returning the previous block if any.
    pub fn set_signature(&mut self, signature: Element) -> Option<Element> {
        self.signature.replace(signature)
    }

    /// Remove the signature slot (e.g. before re-signing).
    pub fn take_signature(&mut self) -> Option<Element> {
        self.signature.take()
    }

    pub(crate) fn set_signature_opt(&mut self, signature: Option<Element>) {
        self.signature = signature;
    }

    /// The supplementary fields block.
    pub fn supplementary(&self) -> Option<&Element> {
        self.supplementary.as_ref()
    }

    /// Mutable access to the supplementary block, for the signature
    /// normalizer only.
    pub(crate) fn supplementary_mut(&mut self) -> Option<&mut Element> {
        self.supplementary.as_mut()
    }

    /// Schema version text from `dVerFor`.
    pub fn version(&self) -> String {
        self.version.text()
    }

    /// The CDC bound to the body (`DE/@Id`), if present.
    pub fn cdc(&self) -> Option<&str> {
        self.body.attr("Id")
    }

    /// Rewrite the CDC on the body. Used only by the check-digit repair fix;
    /// anything else is a new document identity.
    pub fn set_cdc(&mut self, cdc: impl Into<String>) {
        self.body.set_attr("Id", cdc);
    }

    /// Reassemble the rDE element in canonical slot order.
    pub fn to_element(&self) -> Element {
        let mut root = Element::new("rDE");
        root.attrs = self.root_attrs.clone();
        root.children.push(Node::Element(self.version.clone()));
        root.children.push(Node::Element(self.body.clone()));
        if let Some(sig) = &self.signature {
            root.children.push(Node::Element(sig.clone()));
        }
        if let Some(sup) = &self.supplementary {
            root.children.push(Node::Element(sup.clone()));
        }
        root
    }

    /// Serialize the full document with XML declaration.
    pub fn serialize(&self) -> Result<Vec<u8>, EkuatiaError> {
        self.to_element().to_document_bytes()
    }

    /// Bytes handed to the signer: the document without its signature slot.
    pub fn signing_payload(&self) -> Result<Vec<u8>, EkuatiaError> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        unsigned.to_element().to_bytes()
    }
}

/// Build a [`CanonicalDocument`] from a draft rDE tree.
///
/// Enforces the fixed slot ordering, synthesizes a missing `dVerFor`, and
/// **dedups supplementary blocks**, keeping the first in document order.
/// More than one signature block is fatal ([`EkuatiaError::Structural`]);
/// the pipeline must abort rather than guess which to keep. A signature
/// nested inside the `DE` body is left in place for the placement
/// normalizer to repair.
///
/// # Errors
///
/// [`EkuatiaError::Validation`] when the root is not `rDE`, the `DE` body is
/// missing, or an unrecognized top-level element is present.
pub fn canonicalize(draft: Element) -> Result<CanonicalDocument, EkuatiaError> {
    if draft.local_name() != "rDE" {
        return Err(EkuatiaError::Validation(format!(
            "expected rDE root, found {}",
            draft.name
        )));
    }

    let root_attrs = draft.attrs.clone();
    let mut version: Option<Element> = None;
    let mut body: Option<Element> = None;
    let mut signature: Option<Element> = None;
    let mut supplementary: Option<Element> = None;

    for node in draft.children {
        let element = match node {
            Node::Element(e) => e,
            // Inter-slot whitespace or stray text carries no meaning here.
            Node::Text(_) => continue,
        };
        match ElementRole::of(&element) {
            ElementRole::Version => {
                if version.is_none() {
                    version = Some(element);
                }
            }
            ElementRole::DeBody => {
                if body.is_some() {
                    return Err(EkuatiaError::Structural(
                        "more than one DE body in rDE".into(),
                    ));
                }
                body = Some(element);
            }
            ElementRole::Signature => {
                if signature.is_some() {
                    return Err(EkuatiaError::Structural(
                        "more than one signature block in rDE".into(),
                    ));
                }
                signature = Some(element);
            }
            ElementRole::Supplementary => {
                // Upstream duplication: keep the first, discard the rest.
                if supplementary.is_none() {
                    supplementary = Some(element);
                }
            }
            ElementRole::Other => {
                return Err(EkuatiaError::Validation(format!(
                    "unexpected top-level element {} in rDE",
                    element.name
                )));
            }
        }
    }

    let body = body.ok_or_else(|| EkuatiaError::Validation("rDE is missing its DE body".into()))?;
    let version = version.unwrap_or_else(|| {
        let mut v = Element::new("dVerFor");
        v.children.push(Node::Text(SCHEMA_VERSION.into()));
        v
    });

    Ok(CanonicalDocument {
        root_attrs,
        version,
        body,
        signature,
        supplementary,
    })
}

/// Drop duplicate `gCamFuFD` blocks from a raw rDE tree, keeping the first
/// in document order. Returns how many were removed. Used as a corrective
/// transform on drafts before (re-)canonicalization; idempotent.
pub fn dedup_supplementary_blocks(root: &mut Element) -> usize {
    let mut seen = false;
    let before = root.children.len();
    root.children.retain(|node| match node {
        Node::Element(e) if ElementRole::of(e) == ElementRole::Supplementary => {
            if seen {
                false
            } else {
                seen = true;
                true
            }
        }
        _ => true,
    });
    before - root.children.len()
}

/// Parameters for the QR verification URL.
#[derive(Debug, Clone)]
pub struct QrParams {
    /// Environment selecting the consultation base URL.
    pub environment: Environment,
    /// Hex digest derived from the authority-issued CSC (código de seguridad
    /// del contribuyente). Opaque to this crate.
    pub security_hash: String,
}

/// Deterministic verification URL for a document.
pub fn verification_url(params: &QrParams, cdc: &str) -> String {
    format!(
        "{}?nVersion={}&Id={}&cHashQR={}",
        qr_base_url(params.environment),
        SCHEMA_VERSION,
        cdc,
        params.security_hash,
    )
}

/// Inject the QR verification URL (`dCarQR`) into the supplementary block.
///
/// Creates the `gCamFuFD` block when absent, and inserts `dCarQR` as its
/// first child. Idempotent: if a `dCarQR` already exists the document is
/// left untouched and `false` is returned.
///
/// # Errors
///
/// [`EkuatiaError::Validation`] when the document has no CDC bound; the
/// URL binds the document identity and cannot be synthesized without it.
pub fn inject_qr_url(
    doc: &mut CanonicalDocument,
    params: &QrParams,
) -> Result<bool, EkuatiaError> {
    let cdc = doc
        .cdc()
        .ok_or_else(|| {
            EkuatiaError::Validation("cannot inject QR URL: document has no CDC (DE/@Id)".into())
        })?
        .to_owned();

    let supplementary = doc
        .supplementary
        .get_or_insert_with(|| Element::new("gCamFuFD"));
    if supplementary.has_child("dCarQR") {
        return Ok(false);
    }

    let mut qr = Element::new("dCarQR");
    qr.children.push(Node::Text(verification_url(params, &cdc)));
    supplementary.children.insert(0, Node::Element(qr));
    Ok(true)
}
