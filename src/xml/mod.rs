//! rDE document model: tree, canonicalization, signature placement.
//!
//! The flow is strictly ordered: canonicalize → sign → package. A signed
//! subtree is never re-serialized differently; [`tree`] serialization is
//! deterministic, which is what keeps the signature digest valid.

mod canonical;
mod signature;
pub mod tree;

pub use canonical::*;
pub use signature::*;
pub use tree::{Element, Node};
