//! # ekuatia
//!
//! Paraguayan e-invoicing (SIFEN / e-Kuatia) library covering the submission
//! lifecycle: CDC control codes, gapless document numbering, rDE document
//! canonicalization, XML-DSig placement normalization, lote packaging, and a
//! self-correcting submission/polling client.
//!
//! The core never touches the network; the SIFEN web services are reached
//! through the feature-gated [`client`] module, and cryptographic signing is
//! delegated to an external [`xml::Signer`](crate::xml::Signer) collaborator.
//!
//! ## Quick Start
//!
//! ```rust
//! use ekuatia::core::*;
//!
//! // Mod-11 check digit over a 43-digit CDC base
//! let base = "1234567890123456789012345678901234567890123";
//! let dv = compute_check_digit(base).unwrap();
//! assert_eq!(dv, 5);
//! assert!(validate_control_code(&format!("{base}{dv}")));
//!
//! // Gapless per-series numbering against an in-memory store
//! let store = MemorySequenceStore::new();
//! let key = DocumentKey::new(
//!     Environment::Test,
//!     "80012345",
//!     "001",
//!     "001",
//!     DocumentType::FacturaElectronica,
//! );
//! assert_eq!(next_number(&store, &key, None).unwrap(), 1);
//! assert_eq!(next_number(&store, &key, None).unwrap(), 2);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` (default) | CDC check digits, series types, sequence counter |
//! | `xml` | rDE tree model, canonicalization, signature placement |
//! | `batch` | Lote packaging (store-only gzip + base64 envelope) |
//! | `client` | SIFEN SOAP submission/polling client |
//! | `retry` | Self-correcting diagnose/repair submission loop |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "xml")]
pub mod xml;

#[cfg(feature = "batch")]
pub mod batch;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "retry")]
pub mod retry;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
