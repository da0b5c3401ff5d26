//! Streaming Pyzor message digest.
//!
//! Computes a SHA-1 fingerprint over a normalized, line-selected subset of a
//! message body, so that two "copies" of the same bulk message — differing
//! only in whitespace, short tokens, HTML markup, addresses, or URLs —
//! produce the same digest.
//!
//! Feed the decoded payload of each `text/*` MIME part to [`Digester::update`]
//! in arbitrary-sized chunks (marking the last chunk of each part with
//! `end_of_part = true`), then call [`Digester::finalize`] once to obtain the
//! digest. MIME parsing, transfer-encoding decoding, and character-set
//! conversion are the caller's responsibility; this crate treats everything
//! it receives as opaque ASCII-classified bytes.

mod digester;
mod error;
mod phase;
mod selector;

pub use digester::{Digester, LINES_ATOMIC, LINE_MIN, STRING_MIN};
pub use error::DigestError;
