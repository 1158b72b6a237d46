//! Core types: CDC control codes, document series, and the sequence counter.
//!
//! Everything here is pure or backed by an explicit persistence collaborator
//! ([`SequenceStore`]); no network or ambient global state.

mod cdc;
mod error;
mod sequence;
mod series;

pub use cdc::*;
pub use error::*;
pub use sequence::*;
pub use series::*;
