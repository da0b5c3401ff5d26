//! Selection windows and incremental SHA-1 hashing (spec §4.4).

use sha1::{Digest, Sha1};
use std::fmt::Write as _;

use crate::digester::HEADER_SIZE;

/// A message with more than this many normalized lines is sampled rather
/// than hashed whole.
pub(crate) const LINES_ATOMIC: usize = 4;

/// Inclusive `[lo, hi]` line-index range, or `None` if the window is empty.
type Window = Option<(usize, usize)>;

/// Computes window A and window B for a message with `tot` normalized lines.
pub(crate) fn windows(tot: usize) -> (Window, Window) {
    if tot > LINES_ATOMIC {
        let a = (tot as f64 * 0.20).floor() as usize;
        let b = (tot as f64 * 0.60).floor() as usize;
        (Some((a, a + 2)), Some((b, b + 2)))
    } else if tot > 0 {
        (Some((0, tot - 1)), None)
    } else {
        (None, None)
    }
}

#[inline]
fn in_window(idx: usize, w: Window) -> bool {
    matches!(w, Some((lo, hi)) if idx >= lo && idx <= hi)
}

/// Feeds the selected lines' payload bytes through SHA-1 and writes the
/// lowercase hex digest into `out`, truncated or padded to `out.len()`.
///
/// `buf` holds the finalized line records `[len: u32 LE][payload]...` up to
/// `committed_end`; `first_index` is the logical index of the first record
/// (i.e. `nth`, the count of lines already scrubbed away).
pub(crate) fn select_and_hash(
    buf: &[u8],
    committed_end: usize,
    first_index: usize,
    tot: usize,
    out: &mut [u8],
) -> usize {
    let (win_a, win_b) = windows(tot);
    tracing::debug!(tot, ?win_a, ?win_b, "selecting lines for digest");

    let mut hasher = Sha1::new();
    let mut pos = 0usize;
    let mut idx = first_index;
    while pos + HEADER_SIZE <= committed_end {
        let len = u32::from_le_bytes(buf[pos..pos + HEADER_SIZE].try_into().unwrap()) as usize;
        pos += HEADER_SIZE;
        if pos + len > buf.len() {
            // Scrubber invariant violated; stop rather than read out of bounds.
            break;
        }
        if in_window(idx, win_a) || in_window(idx, win_b) {
            hasher.update(&buf[pos..pos + len]);
        }
        pos += len;
        idx += 1;
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    let bytes = hex.as_bytes();
    let n = bytes.len().min(out.len());
    out[..n].copy_from_slice(&bytes[..n]);
    n
}
