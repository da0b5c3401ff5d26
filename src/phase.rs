//! Tokenizer phase (spec §3, §4.1).

/// The Tokenizer's current classification state.
///
/// `Discard` is bookkeeping only: once a token is poisoned the digester
/// tracks that via [`crate::Digester`]'s `poisoned` flag and short-circuits
/// byte handling entirely, so `Discard` never drives a transition itself —
/// it just keeps `phase` truthful for invariant 6 while poisoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    #[default]
    None,
    Space,
    NonSpace,
    Alpha,
    Delim,
    Discard,
}

#[inline]
pub(crate) fn is_space(c: u8) -> bool {
    matches!(c, b'\t' | b'\n' | 0x0B | 0x0C | b'\r' | b' ')
}

#[inline]
pub(crate) fn is_newline(c: u8) -> bool {
    c == b'\n'
}
