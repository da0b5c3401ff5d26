//! Error kinds surfaced by the digest engine (spec §7).
//!
//! `OutOfMemory` from the C reference has no Rust analogue here: `Vec`
//! growth aborts the process on real allocation failure the same way
//! every other safe-Rust crate in this tree does, so it is not a
//! `Result` variant. See DESIGN.md for the full reasoning.

use thiserror::Error;

/// Errors returned by [`crate::Digester::update`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    /// The line buffer would grow past the implementation ceiling.
    #[error("line buffer would exceed the maximum representable size")]
    Overflow,

    /// `update` was called after `finalize` already ran on this digester.
    #[error("update called on a digester that has already been finalized")]
    InvalidState,
}
