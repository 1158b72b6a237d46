//! Signature placement normalization and the external signer seam.
//!
//! SIFEN requires the XML-DSig block as a direct child of `rDE`, immediately
//! after the `DE` body and before `gCamFuFD`. Externally produced signatures
//! sometimes arrive nested inside the body or the supplementary block; the
//! normalizer detaches and re-attaches them at the canonical position. The
//! repair is idempotent.

use thiserror::Error;

use crate::core::EkuatiaError;

use super::canonical::{CanonicalDocument, ElementRole};
use super::tree::{Element, Node};

fn is_signature(element: &Element) -> bool {
    ElementRole::of(element) == ElementRole::Signature
}

/// Where the signature currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePlacement {
    /// No signature block anywhere in the document.
    Missing,
    /// Exactly one signature, nested inside the `DE` body or the
    /// supplementary block.
    Misplaced,
    /// Exactly one signature, in the canonical slot.
    Correct,
}

fn count_signatures_in(element: &Element) -> usize {
    element
        .child_elements()
        .map(|child| {
            let own = usize::from(is_signature(child));
            own + count_signatures_in(child)
        })
        .sum()
}

fn extract_signature_in(element: &mut Element) -> Option<Element> {
    // Depth-first: detach the first signature found.
    let pos = element.children.iter().position(|node| {
        matches!(node, Node::Element(e) if is_signature(e))
    });
    if let Some(pos) = pos {
        match element.children.remove(pos) {
            Node::Element(e) => return Some(e),
            Node::Text(_) => unreachable!("position matched an element"),
        }
    }
    for node in &mut element.children {
        if let Node::Element(child) = node {
            if let Some(sig) = extract_signature_in(child) {
                return Some(sig);
            }
        }
    }
    None
}

/// Inspect where the signature sits, without mutating the document.
///
/// # Errors
///
/// [`EkuatiaError::Structural`] when more than one signature block exists;
/// not auto-repairable, the pipeline must abort rather than guess.
pub fn signature_placement(doc: &CanonicalDocument) -> Result<SignaturePlacement, EkuatiaError> {
    // Stray signatures hide in the body or the supplementary subtree alike.
    let nested =
        count_signatures_in(doc.body()) + doc.supplementary().map_or(0, count_signatures_in);
    let in_slot = usize::from(doc.signature().is_some());
    match (in_slot + nested, in_slot) {
        (0, _) => Ok(SignaturePlacement::Missing),
        (1, 1) => Ok(SignaturePlacement::Correct),
        (1, 0) => Ok(SignaturePlacement::Misplaced),
        (n, _) => Err(EkuatiaError::Structural(format!(
            "found {n} signature blocks, expected at most one"
        ))),
    }
}

/// Move a nested signature to the canonical slot.
///
/// Idempotent: applying it to an already-correct document is a no-op.
/// Returns the placement observed *before* normalizing.
///
/// # Errors
///
/// [`EkuatiaError::Structural`] when more than one signature block exists.
pub fn normalize_signature_placement(
    doc: &mut CanonicalDocument,
) -> Result<SignaturePlacement, EkuatiaError> {
    let placement = signature_placement(doc)?;
    if placement == SignaturePlacement::Misplaced {
        let sig = extract_signature_in(doc.body_mut())
            .or_else(|| doc.supplementary_mut().and_then(extract_signature_in))
            .ok_or_else(|| EkuatiaError::Structural("misplaced signature vanished".into()))?;
        doc.set_signature_opt(Some(sig));
    }
    Ok(placement)
}

/// Errors from the external signing collaborator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SigningError {
    /// The credential is unusable (expired, wrong passphrase, bad alias).
    #[error("invalid signing credential: {0}")]
    InvalidCredential(String),

    /// The payload could not be signed (corrupt or unparseable input).
    #[error("corrupt signing input: {0}")]
    CorruptInput(String),

    /// Fault inside the signing backend itself.
    #[error("signing backend error: {0}")]
    Backend(String),
}

/// Opaque signing credential. Storage and lifecycle are the caller's
/// concern; this crate only passes it through to the [`Signer`].
#[derive(Debug, Clone)]
pub struct SigningCredential {
    /// Key alias or subject identifier.
    pub alias: String,
    /// Key material in whatever encoding the signer expects.
    pub material: Vec<u8>,
}

/// External XML-DSig collaborator, treated as a black box.
///
/// `payload` is the byte-exact serialization of the document without its
/// signature slot; the returned bytes must parse as a single `ds:Signature`
/// element computed over that payload.
pub trait Signer {
    /// Produce a detached signature block for `payload`.
    fn sign(&self, payload: &[u8], credential: &SigningCredential)
    -> Result<Vec<u8>, SigningError>;
}

/// Sign the document and attach the block at the canonical position.
///
/// Any previous signature is discarded first; a correction to the byte
/// layout invalidates its digest anyway.
pub fn sign_document<S: Signer>(
    doc: &mut CanonicalDocument,
    signer: &S,
    credential: &SigningCredential,
) -> Result<(), EkuatiaError> {
    doc.take_signature();
    let payload = doc.signing_payload()?;
    let sig_bytes = signer
        .sign(&payload, credential)
        .map_err(|e| EkuatiaError::Signing(e.to_string()))?;
    let sig = super::tree::parse_bytes(&sig_bytes)?;
    if !is_signature(&sig) {
        return Err(EkuatiaError::Structural(format!(
            "signer returned a {} element, expected a signature block",
            sig.name
        )));
    }
    doc.set_signature_opt(Some(sig));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::canonical::canonicalize;
    use crate::xml::tree::parse;

    fn doc(children: &str) -> CanonicalDocument {
        canonicalize(parse(&format!("<rDE>{children}</rDE>")).unwrap()).unwrap()
    }

    #[test]
    fn placement_states() {
        assert_eq!(
            signature_placement(&doc(r#"<DE Id="0"/>"#)).unwrap(),
            SignaturePlacement::Missing
        );
        assert_eq!(
            signature_placement(&doc(r#"<DE Id="0"/><ds:Signature/>"#)).unwrap(),
            SignaturePlacement::Correct
        );
        assert_eq!(
            signature_placement(&doc(r#"<DE Id="0"><ds:Signature/></DE>"#)).unwrap(),
            SignaturePlacement::Misplaced
        );
    }

    #[test]
    fn signature_inside_supplementary_is_misplaced_not_missing() {
        let mut d = doc(r#"<DE Id="0"/><gCamFuFD><ds:Signature>stray</ds:Signature></gCamFuFD>"#);
        assert_eq!(
            signature_placement(&d).unwrap(),
            SignaturePlacement::Misplaced
        );
        normalize_signature_placement(&mut d).unwrap();
        assert_eq!(
            signature_placement(&d).unwrap(),
            SignaturePlacement::Correct
        );
        let sup = String::from_utf8(d.supplementary().unwrap().to_bytes().unwrap()).unwrap();
        assert!(!sup.contains("Signature"));
    }

    #[test]
    fn slot_plus_supplementary_signature_is_fatal() {
        let mut d = doc(
            r#"<DE Id="0"/><ds:Signature/><gCamFuFD><ds:Signature>stray</ds:Signature></gCamFuFD>"#,
        );
        assert!(signature_placement(&d).is_err());
        assert!(normalize_signature_placement(&mut d).is_err());
    }

    #[test]
    fn signing_after_normalization_keeps_one_signature() {
        let mut d = doc(r#"<DE Id="0"/><gCamFuFD><ds:Signature>stray</ds:Signature></gCamFuFD>"#);
        normalize_signature_placement(&mut d).unwrap();
        sign_document(&mut d, &FakeSigner, &credential()).unwrap();
        let out = String::from_utf8(d.to_element().to_bytes().unwrap()).unwrap();
        assert_eq!(out.matches("<ds:Signature").count(), 1);
    }

    #[test]
    fn multiple_signatures_are_fatal_not_repaired() {
        let mut d = doc(r#"<DE Id="0"><ds:Signature/></DE><ds:Signature/>"#);
        assert!(signature_placement(&d).is_err());
        assert!(normalize_signature_placement(&mut d).is_err());
    }

    #[test]
    fn misplaced_signature_is_moved_to_slot() {
        let mut d = doc(r#"<DE Id="0"><gOpeDE><ds:Signature>sig</ds:Signature></gOpeDE></DE>"#);
        let before = normalize_signature_placement(&mut d).unwrap();
        assert_eq!(before, SignaturePlacement::Misplaced);
        assert_eq!(
            signature_placement(&d).unwrap(),
            SignaturePlacement::Correct
        );
        // Gone from the body, present in the slot, before gCamFuFD-position.
        let bytes = String::from_utf8(d.to_element().to_bytes().unwrap()).unwrap();
        let de_end = bytes.find("</DE>").unwrap();
        let sig = bytes.find("<ds:Signature>").unwrap();
        assert!(sig > de_end);
    }

    #[test]
    fn normalization_is_idempotent_byte_for_byte() {
        let mut d = doc(r#"<DE Id="0"><ds:Signature>sig</ds:Signature></DE><gCamFuFD/>"#);
        normalize_signature_placement(&mut d).unwrap();
        let once = d.to_element().to_bytes().unwrap();
        let second = normalize_signature_placement(&mut d).unwrap();
        assert_eq!(second, SignaturePlacement::Correct);
        assert_eq!(d.to_element().to_bytes().unwrap(), once);
    }

    #[test]
    fn slot_precedes_supplementary_block() {
        let mut d = doc(r#"<DE Id="0"><ds:Signature/></DE><gCamFuFD><dCarQR>u</dCarQR></gCamFuFD>"#);
        normalize_signature_placement(&mut d).unwrap();
        let bytes = String::from_utf8(d.to_element().to_bytes().unwrap()).unwrap();
        assert!(bytes.find("Signature").unwrap() < bytes.find("gCamFuFD").unwrap());
    }

    struct FakeSigner;

    impl Signer for FakeSigner {
        fn sign(
            &self,
            payload: &[u8],
            _credential: &SigningCredential,
        ) -> Result<Vec<u8>, SigningError> {
            Ok(format!("<ds:Signature>len{}</ds:Signature>", payload.len()).into_bytes())
        }
    }

    fn credential() -> SigningCredential {
        SigningCredential {
            alias: "test".into(),
            material: vec![1, 2, 3],
        }
    }

    #[test]
    fn sign_document_replaces_stale_signature() {
        let mut d = doc(r#"<DE Id="0"/><ds:Signature>stale</ds:Signature>"#);
        sign_document(&mut d, &FakeSigner, &credential()).unwrap();
        let sig = d.signature().unwrap();
        assert!(sig.text().starts_with("len"));
        assert_eq!(
            signature_placement(&d).unwrap(),
            SignaturePlacement::Correct
        );
    }

    struct BadSigner;

    impl Signer for BadSigner {
        fn sign(&self, _: &[u8], _: &SigningCredential) -> Result<Vec<u8>, SigningError> {
            Ok(b"<NotASignature/>".to_vec())
        }
    }

    #[test]
    fn sign_document_rejects_non_signature_output() {
        let mut d = doc(r#"<DE Id="0"/>"#);
        assert!(sign_document(&mut d, &BadSigner, &credential()).is_err());
    }
}
