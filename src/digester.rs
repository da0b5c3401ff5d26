//! The Digester: streaming normalizer and scrubber (spec §3, §4.1–§4.3).

use memchr::memchr;

use crate::error::DigestError;
use crate::phase::{is_newline, is_space, Phase};
use crate::selector;

/// Minimum payload length (bytes) for a normalized line to count toward the
/// digest. Shorter lines are silently dropped.
pub const LINE_MIN: usize = 8;

/// Any token whose post-strip length reaches this many bytes is considered a
/// long opaque run (URL, hash, attachment name, ...) and poisons its line.
pub const STRING_MIN: usize = 10;

/// Messages with this many normalized lines or fewer are atomic: hashed in
/// full rather than sampled. Re-exported from [`selector`] so it only lives
/// in one place.
pub const LINES_ATOMIC: usize = selector::LINES_ATOMIC;

/// Width, in bytes, of the length header written in front of each finalized
/// line record.
pub(crate) const HEADER_SIZE: usize = 4;

/// Streaming Pyzor digest engine.
///
/// Feed it the decoded bytes of each `text/*` MIME part via [`update`],
/// marking the last chunk of every part with `end_of_part = true`, then call
/// [`finalize`] once to obtain the hex SHA-1 digest.
///
/// [`update`]: Digester::update
/// [`finalize`]: Digester::finalize
#[derive(Debug)]
pub struct Digester {
    /// Finalized line records `[len: u32 LE][payload]...` followed by the
    /// in-progress tail. `buf.len()` always equals `lim`.
    buf: Vec<u8>,
    /// Total number of finalized lines ever admitted (monotonic).
    tot: usize,
    /// Index of the first line record still retained in `buf`; lines before
    /// this have been scrubbed.
    nth: usize,
    /// Offset in `buf` at which the current (unterminated) line's header
    /// begins.
    delim: usize,
    /// Offset at which the current token began, or 0 if none is open.
    off: usize,
    /// One past the last byte written for the current line; always equals
    /// `buf.len()`.
    lim: usize,
    /// Offset of the earliest unmatched `<` in the current line, or 0.
    lt: usize,
    /// Offset of the matching `>` for `lt`, or 0.
    gt: usize,
    phase: Phase,
    /// Set when the current line has been poisoned by a long-run or
    /// address/URL token and must be dropped regardless of what follows.
    poisoned: bool,
    /// Set once `finalize` has run; further `update` calls are rejected.
    finalized: bool,
}

impl Digester {
    /// Creates an empty digester with its first header slot reserved.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.resize(HEADER_SIZE, 0);
        Digester {
            buf,
            tot: 0,
            nth: 0,
            delim: 0,
            off: 0,
            lim: HEADER_SIZE,
            lt: 0,
            gt: 0,
            phase: Phase::None,
            poisoned: false,
            finalized: false,
        }
    }

    /// Streams `bytes` through the tokenizer. `end_of_part` forces a line
    /// boundary after the last byte, so a part's final token never merges
    /// with the next part's first token (spec §5).
    pub fn update(&mut self, bytes: &[u8], end_of_part: bool) -> Result<(), DigestError> {
        if self.finalized {
            return Err(DigestError::InvalidState);
        }
        for &c in bytes {
            self.ingest_byte(c)?;
        }
        if end_of_part {
            self.commit_line()?;
        }
        Ok(())
    }

    /// Writes up to `out.len()` bytes of lowercase hex SHA-1 into `out` and
    /// returns the number of bytes written. Idempotent: may be called more
    /// than once, but `update` is rejected afterwards.
    pub fn finalize(&mut self, out: &mut [u8]) -> usize {
        self.finalized = true;
        selector::select_and_hash(&self.buf, self.delim, self.nth, self.tot, out)
    }

    fn ingest_byte(&mut self, c: u8) -> Result<(), DigestError> {
        if self.poisoned {
            if is_newline(c) {
                self.commit_line()?;
            }
            return Ok(());
        }

        match self.phase {
            Phase::None | Phase::Space => {
                if is_newline(c) {
                    self.commit_line()?;
                } else if is_space(c) {
                    self.phase = Phase::Space;
                } else if c.is_ascii_alphabetic() {
                    self.start_token(c, Phase::Alpha)?;
                } else {
                    self.start_token(c, Phase::NonSpace)?;
                }
            }
            Phase::Alpha => {
                if is_newline(c) {
                    self.commit_line()?;
                } else if is_space(c) {
                    self.phase = Phase::Space;
                } else if c == b':' || c == b'@' {
                    self.push_byte(c)?;
                    self.phase = Phase::Delim;
                    self.check_run_len();
                } else if c.is_ascii_alphabetic() {
                    self.push_byte(c)?;
                    self.check_run_len();
                } else {
                    self.push_byte(c)?;
                    self.phase = Phase::NonSpace;
                    self.check_run_len();
                }
            }
            Phase::NonSpace => {
                if is_newline(c) {
                    self.commit_line()?;
                } else if is_space(c) {
                    self.phase = Phase::Space;
                } else if c == b'@' {
                    self.push_byte(c)?;
                    self.phase = Phase::Delim;
                    self.check_run_len();
                } else {
                    self.push_byte(c)?;
                    self.check_run_len();
                }
            }
            Phase::Delim => {
                if is_newline(c) {
                    self.commit_line()?;
                } else if is_space(c) {
                    self.phase = Phase::Space;
                } else {
                    self.poison_line();
                }
            }
            Phase::Discard => unreachable!("Discard is tracked via `poisoned`, never entered"),
        }
        Ok(())
    }

    /// Starts a new token: inserts a single separator space if this isn't
    /// the line's first kept token, records `off`, pushes `c`, and sets the
    /// resulting phase.
    fn start_token(&mut self, c: u8, phase: Phase) -> Result<(), DigestError> {
        if self.lim > self.delim + HEADER_SIZE {
            self.push_byte(b' ')?;
        }
        self.off = self.lim;
        self.push_byte(c)?;
        self.phase = phase;
        self.check_run_len();
        Ok(())
    }

    /// Appends `c` to the buffer, tracks `<`/`>` positions, and strips any
    /// newly-closed HTML tag in place.
    fn push_byte(&mut self, c: u8) -> Result<(), DigestError> {
        if self.buf.len() >= usize::MAX - HEADER_SIZE {
            return Err(DigestError::Overflow);
        }
        let pos = self.lim;
        self.buf.push(c);
        self.lim += 1;
        if c == b'<' && self.lt == 0 {
            self.lt = pos;
        } else if c == b'>' && self.lt != 0 && self.gt == 0 && pos > self.lt {
            self.gt = pos;
        }
        self.strip();
        Ok(())
    }

    /// A run of `STRING_MIN` or more post-strip bytes poisons the whole
    /// line: URLs, hashes and other opaque tokens are the main variance
    /// between otherwise-identical bulk copies.
    fn check_run_len(&mut self) {
        // While a `<` is open and still unmatched, its eventual `>` may strip
        // the whole tag away (§4.2); counting those pending bytes now would
        // poison lines that HTML-stripping would otherwise rescue. Deferred
        // until `strip` resolves the tag (or `commit_line` truncates it away).
        if self.lt != 0 {
            return;
        }
        if self.lim - self.off >= STRING_MIN {
            self.poison_line();
        }
    }

    /// Wipes the current line's accumulated content and marks it poisoned.
    /// An address/URL token or an over-long run discards the *entire* line,
    /// not just the offending token — see DESIGN.md for why this departs
    /// from a literal per-token revert.
    fn poison_line(&mut self) {
        self.lim = self.delim + HEADER_SIZE;
        self.buf.truncate(self.lim);
        self.off = 0;
        self.lt = 0;
        self.gt = 0;
        self.phase = Phase::Discard;
        self.poisoned = true;
    }

    /// Excises matched `<...>` tags from the in-progress tail as soon as
    /// their closing `>` is seen, rescanning for the next tag each time.
    fn strip(&mut self) {
        while self.lt != 0 && self.gt != 0 && self.gt > self.lt && self.gt < self.lim {
            let start = self.lt;
            let end = self.gt;
            self.buf.drain(start..=end);
            let removed = end - start + 1;
            self.lim -= removed;
            if self.off > start {
                self.off = self.lim;
            }
            self.lt = 0;
            self.gt = 0;
            if let Some(next_lt) = memchr(b'<', &self.buf[start..self.lim]) {
                self.lt = start + next_lt;
                if let Some(next_gt) = memchr(b'>', &self.buf[self.lt..self.lim]) {
                    self.gt = self.lt + next_gt;
                }
            }
        }
    }

    /// Closes the current line: commits it if its payload is long enough,
    /// otherwise rewinds. Reserves the next header slot and runs the
    /// scrubber.
    fn commit_line(&mut self) -> Result<(), DigestError> {
        // An unclosed tag devours the rest of the line (spec §4.2).
        if self.lt != 0 && self.gt == 0 {
            self.lim = self.lt;
            self.buf.truncate(self.lim);
        }

        let payload_len = self.lim.saturating_sub(self.delim + HEADER_SIZE);
        if payload_len > u32::MAX as usize {
            return Err(DigestError::Overflow);
        }
        if payload_len >= LINE_MIN {
            let header = (payload_len as u32).to_le_bytes();
            self.buf[self.delim..self.delim + HEADER_SIZE].copy_from_slice(&header);
            self.tot += 1;
            tracing::trace!(line = self.tot, payload_len, "committed line");
            self.delim = self.lim;
        } else {
            self.lim = self.delim;
            self.buf.truncate(self.lim);
        }

        if self.buf.len() >= usize::MAX - HEADER_SIZE {
            return Err(DigestError::Overflow);
        }
        self.buf.resize(self.delim + HEADER_SIZE, 0);
        self.lim = self.delim + HEADER_SIZE;
        self.off = 0;
        self.lt = 0;
        self.gt = 0;
        self.phase = Phase::None;
        self.poisoned = false;

        self.maybe_scrub();
        Ok(())
    }

    /// Drops retained lines strictly below the lower edge of the first
    /// selection window, since the selector can never choose them again
    /// (spec §4.3).
    fn maybe_scrub(&mut self) {
        if self.tot < LINE_MIN {
            return;
        }
        let lower = (self.tot as f64 * 0.20).floor() as usize;
        if lower <= self.nth {
            return;
        }

        let mut off = 0usize;
        for _ in 0..(lower - self.nth) {
            let len = u32::from_le_bytes(self.buf[off..off + HEADER_SIZE].try_into().unwrap())
                as usize;
            off += HEADER_SIZE + len;
        }

        self.buf.drain(0..off);
        self.delim -= off;
        if self.off != 0 {
            self.off -= off;
        }
        self.lim -= off;
        if self.lt != 0 {
            self.lt -= off;
        }
        if self.gt != 0 {
            self.gt -= off;
        }
        tracing::debug!(
            from = self.nth,
            to = lower,
            bytes_reclaimed = off,
            "scrubbed retained lines"
        );
        self.nth = lower;
    }
}

impl Default for Digester {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    fn digest_str(s: &str) -> String {
        let mut d = Digester::new();
        d.update(s.as_bytes(), true).unwrap();
        let mut out = [0u8; 40];
        let n = d.finalize(&mut out);
        String::from_utf8(out[..n].to_vec()).unwrap()
    }

    #[test]
    fn e1_empty() {
        assert_eq!(digest_str(""), EMPTY_SHA1);
    }

    #[test]
    fn e2_single_short_line() {
        assert_eq!(digest_str("hi\n"), EMPTY_SHA1);
    }

    #[test]
    fn e3_single_long_line() {
        assert_ne!(digest_str("Hello World From Me\n"), EMPTY_SHA1);
    }

    #[test]
    fn e4_html_stripping_matches() {
        let a = digest_str("Some <b>bold</b> text here today\n");
        let b = digest_str("Some bold text here today\n");
        assert_eq!(a, b);
    }

    #[test]
    fn e5_address_suppression() {
        assert_eq!(
            digest_str("Please mail me at user@example.com today now\n"),
            EMPTY_SHA1
        );
    }

    #[test]
    fn e6_chunking_independence() {
        let whole = "Some <b>bold</b> text here today\n";
        let expected = digest_str(whole);
        for i in 0..whole.len() {
            let (l, r) = whole.as_bytes().split_at(i);
            let mut d = Digester::new();
            d.update(l, false).unwrap();
            d.update(r, true).unwrap();
            let mut out = [0u8; 40];
            let n = d.finalize(&mut out);
            assert_eq!(
                String::from_utf8(out[..n].to_vec()).unwrap(),
                expected,
                "split at {i}"
            );
        }
    }

    #[test]
    fn url_scheme_prefix_suppresses_whole_line() {
        // "http:" is alpha then ':' -> Delim, followed by more non-space -> poisons the line.
        let got = digest_str("Click http://example.com/path/to/a/thing right now\n");
        assert_eq!(got, EMPTY_SHA1);
    }

    #[test]
    fn long_opaque_token_suppresses_whole_line() {
        let got = digest_str("See attachment aaaaaaaaaaaaaaaaaaaaaaaa right now please\n");
        assert_eq!(got, EMPTY_SHA1);
    }

    #[test]
    fn unclosed_tag_devours_rest_of_line() {
        // "<div" is never closed; everything from '<' onward is dropped,
        // leaving "Hello" alone (5 bytes, still below LINE_MIN).
        assert_eq!(digest_str("Hello <div class=foo\n"), EMPTY_SHA1);
    }

    #[test]
    fn end_of_part_forces_line_boundary_between_parts() {
        // Without a forced boundary "helloworld" would merge into one token.
        let mut a = Digester::new();
        a.update(b"hello", true).unwrap();
        a.update(b"world and more text\n", true).unwrap();
        let mut out_a = [0u8; 40];
        let n_a = a.finalize(&mut out_a);

        let mut b = Digester::new();
        b.update(b"helloworld and more text\n", true).unwrap();
        let mut out_b = [0u8; 40];
        let n_b = b.finalize(&mut out_b);

        assert_ne!(out_a[..n_a], out_b[..n_b]);
    }

    #[test]
    fn oversized_line_payload_is_rejected_before_header_truncation() {
        // A payload_len past u32::MAX would silently wrap when cast to the
        // u32 LE header; commit_line must reject it first. `buf` itself is
        // never indexed at this size (the check runs before any header
        // write), so this doesn't need a multi-gigabyte allocation to prove
        // the guard fires.
        let mut d = Digester::new();
        d.lim = d.delim + HEADER_SIZE + (u32::MAX as usize) + 1;
        assert_eq!(d.commit_line(), Err(DigestError::Overflow));
    }

    #[test]
    fn update_after_finalize_is_rejected() {
        let mut d = Digester::new();
        let mut out = [0u8; 40];
        d.finalize(&mut out);
        assert_eq!(d.update(b"more\n", true), Err(DigestError::InvalidState));
    }

    #[test]
    fn atomic_message_keeps_every_surviving_line() {
        // 4 lines, each individually long enough to survive: tot == LINES_ATOMIC,
        // so every line must contribute (no sampling).
        let mut d = Digester::new();
        let lines = [
            "alpha beta gamma delta\n",
            "epsilon zeta eta theta\n",
            "iota kappa lambda mu nu\n",
            "xi omicron pi rho sigma\n",
        ];
        for l in lines {
            d.update(l.as_bytes(), false).unwrap();
        }
        let mut out = [0u8; 40];
        let n = d.finalize(&mut out);
        let whole_hash = &out[..n];

        // Hashing the concatenation directly (all 4 lines, space join per line
        // content already single-spaced) should match, since atomic messages
        // are hashed whole with no sampling.
        use sha1::{Digest as _, Sha1};
        let mut hasher = Sha1::new();
        for l in lines {
            hasher.update(l.trim_end_matches('\n').as_bytes());
        }
        let expect = hasher.finalize();
        let mut expect_hex = String::new();
        use std::fmt::Write as _;
        for b in expect {
            let _ = write!(expect_hex, "{b:02x}");
        }
        assert_eq!(String::from_utf8(whole_hash.to_vec()).unwrap(), expect_hex);
    }

    #[test]
    fn sampling_selects_exactly_the_windowed_lines_end_to_end() {
        // 10 lines, each a distinct surviving line (single-spaced, no
        // poisoning tokens, already >= LINE_MIN once the newline is
        // stripped). tot = 10 > LINES_ATOMIC, so the Selector samples:
        // a = floor(10*0.20) = 2 -> window A = lines[2..=4]
        // b = floor(10*0.60) = 6 -> window B = lines[6..=8]
        // (same arithmetic selector::tests::windows_sampled checks in
        // isolation; this drives it through the real Digester instead).
        let lines = [
            "line zero has several words in it today",
            "line one has several words in it today",
            "line two has several words in it today",
            "line three has several words in it today",
            "line four has several words in it today",
            "line five has several words in it today",
            "line six has several words in it today",
            "line seven has several words in it today",
            "line eight has several words in it today",
            "line nine has several words in it today",
        ];

        let mut d = Digester::new();
        for l in lines {
            d.update(format!("{l}\n").as_bytes(), false).unwrap();
        }
        let mut out = [0u8; 40];
        let n = d.finalize(&mut out);
        let got = String::from_utf8(out[..n].to_vec()).unwrap();

        use sha1::{Digest as _, Sha1};
        use std::fmt::Write as _;
        let mut hasher = Sha1::new();
        for &idx in &[2, 3, 4, 6, 7, 8] {
            hasher.update(lines[idx].as_bytes());
        }
        let expect = hasher.finalize();
        let mut expect_hex = String::new();
        for b in expect {
            let _ = write!(expect_hex, "{b:02x}");
        }

        assert_eq!(got, expect_hex);
        // Sanity: lines 0, 1, 5, and 9 must not have contributed.
        assert_ne!(got, EMPTY_SHA1);
    }

    #[test]
    fn scrubbing_bounds_memory_on_long_messages() {
        // Many short-ish but kept lines; the scrubber should reclaim the
        // earliest ones well before the message ends.
        let mut d = Digester::new();
        for i in 0..500u32 {
            let line = format!("line number {i} has plenty of words in it\n");
            d.update(line.as_bytes(), false).unwrap();
        }
        assert!(d.nth > 0, "scrubber should have reclaimed some lines");
        assert!(
            d.buf.len() < 500 * 48,
            "retained buffer should be much smaller than the full message"
        );
        let mut out = [0u8; 40];
        let n = d.finalize(&mut out);
        assert_eq!(n, 40);
    }

    #[test]
    fn determinism() {
        let msg = "Some <b>bold</b> text with user@example.com and more\nshort\nAnother line here today\n";
        assert_eq!(digest_str(msg), digest_str(msg));
    }
}
