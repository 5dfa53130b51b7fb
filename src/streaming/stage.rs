//! Per-rule stream transformers
//!
//! Each replacement rule runs as one stage. A stage accepts input in
//! arbitrary pieces, appends every byte that is final to `out` and keeps
//! only what it still needs to decide a match (its pending buffer).
//! `flush` releases the pending buffer unmodified.

use std::sync::Arc;

use log::debug;
use regex::bytes::{Captures, Regex};

use super::pattern_fsm::{Advance, LiteralPattern, PatternState};

/// Already-emitted bytes a regex stage keeps in front of its pending
/// buffer, so `\b` and `(?m)^` see the same context they would in one pass.
/// One UTF-8 scalar is at most 4 bytes.
const LOOKBEHIND: usize = 4;

/// One rule's stream transformer, dispatched by pattern kind
#[derive(Clone, Debug)]
pub enum Stage {
    Literal(LiteralStage),
    Regex(RegexStage),
}

impl Stage {
    /// Transform `input`, appending final bytes to `out`
    pub fn write(&mut self, input: &[u8], out: &mut Vec<u8>) {
        match self {
            Stage::Literal(stage) => stage.write(input, out),
            Stage::Regex(stage) => stage.write(input, out),
        }
    }

    /// End of input: resolve what can still match and release the rest
    pub fn flush(&mut self, out: &mut Vec<u8>) {
        match self {
            Stage::Literal(stage) => stage.flush(out),
            Stage::Regex(stage) => stage.flush(out),
        }
    }

    /// Transform a complete input in one pass. Regex matches are not
    /// limited by the lookahead bound since nothing else can follow.
    pub fn transform_all(&mut self, input: &[u8], out: &mut Vec<u8>) {
        match self {
            Stage::Literal(stage) => {
                stage.write(input, out);
                stage.flush(out);
            }
            Stage::Regex(stage) => stage.transform_all(input, out),
        }
    }

    /// Drop pending bytes and counters
    pub fn reset(&mut self) {
        match self {
            Stage::Literal(stage) => stage.reset(),
            Stage::Regex(stage) => stage.reset(),
        }
    }

    /// Replacements made since the last reset
    pub fn replacements(&self) -> usize {
        match self {
            Stage::Literal(stage) => stage.replacements,
            Stage::Regex(stage) => stage.replacements,
        }
    }

    /// Bytes held back waiting for more input
    pub fn pending_len(&self) -> usize {
        match self {
            Stage::Literal(stage) => stage.state.held(),
            Stage::Regex(stage) => stage.buf.len() - stage.start,
        }
    }
}

/// Substring replacement stage
#[derive(Clone, Debug)]
pub struct LiteralStage {
    pattern: Arc<LiteralPattern>,
    template: Arc<[u8]>,
    state: PatternState,
    replacements: usize,
}

impl LiteralStage {
    pub fn new(pattern: Arc<LiteralPattern>, template: Arc<[u8]>) -> Self {
        Self {
            pattern,
            template,
            state: PatternState::new(),
            replacements: 0,
        }
    }

    pub fn write(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            // held bytes are always pattern[..held], so nothing is buffered here
            let held = self.state.held();
            match self.state.advance(byte, &self.pattern) {
                Advance::Matched => {
                    out.extend_from_slice(&self.template);
                    self.replacements += 1;
                }
                Advance::Partial { released } if released > held => {
                    out.extend_from_slice(&self.pattern.as_bytes()[..held]);
                    out.push(byte);
                }
                Advance::Partial { released } => {
                    out.extend_from_slice(&self.pattern.as_bytes()[..released]);
                }
            }
        }
    }

    pub fn flush(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pattern.as_bytes()[..self.state.held()]);
        self.state.reset();
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.replacements = 0;
    }
}

/// Regular expression replacement stage with a bounded lookahead
///
/// A match is only replaced once it is confirmed:
/// - the input has ended, or
/// - the match ends before the buffered data does and at least
///   `max_match` bytes are buffered from its start.
///
/// A match still running into the end of the buffer after more than
/// `max_match` bytes is abandoned and passed through unmodified.
#[derive(Clone, Debug)]
pub struct RegexStage {
    regex: Regex,
    template: Arc<[u8]>,
    max_match: usize,
    /// Look-behind context followed by pending bytes
    buf: Vec<u8>,
    /// Start of the pending bytes in `buf`
    start: usize,
    /// End of the last replaced match, relative to `buf`
    last_match_end: Option<usize>,
    replacements: usize,
}

impl RegexStage {
    pub fn new(regex: Regex, template: Arc<[u8]>, max_match: usize) -> Self {
        Self {
            regex,
            template,
            max_match,
            buf: Vec::new(),
            start: 0,
            last_match_end: None,
            replacements: 0,
        }
    }

    pub fn write(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.buf.extend_from_slice(input);
        self.scan(false, out);
    }

    pub fn flush(&mut self, out: &mut Vec<u8>) {
        self.transform_all(&[], out);
    }

    /// Pending bytes followed by `input`, scanned as end of input
    pub fn transform_all(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.buf.extend_from_slice(input);
        self.scan(true, out);
        self.buf.clear();
        self.start = 0;
        self.last_match_end = None;
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.start = 0;
        self.last_match_end = None;
        self.replacements = 0;
    }

    fn scan(&mut self, eof: bool, out: &mut Vec<u8>) {
        let len = self.buf.len();
        let max = self.max_match;
        let mut pos = self.start;
        let mut last_match_end = self.last_match_end;

        loop {
            let Some(caps) = next_match(&self.regex, &self.buf, pos, last_match_end) else {
                // any match starting before len - max would have fit in view
                let safe = if eof { len } else { len.saturating_sub(max).max(pos) };
                out.extend_from_slice(&self.buf[pos..safe]);
                pos = safe;
                break;
            };
            let Some(m) = caps.get(0) else { break };
            let (ms, me) = (m.start(), m.end());

            if eof || (me < len && len - ms >= max) {
                out.extend_from_slice(&self.buf[pos..ms]);
                caps.expand(&self.template, out);
                self.replacements += 1;
                pos = me;
                last_match_end = Some(me);
                continue;
            }

            if me == len && len - ms > max {
                debug!(
                    "regex match of {} bytes still open, passing through unmodified",
                    len - ms
                );
                out.extend_from_slice(&self.buf[pos..len]);
                pos = len;
                last_match_end = None;
                break;
            }

            // unconfirmed and shorter than the bound: wait for more input
            let safe = len.saturating_sub(max).max(pos);
            out.extend_from_slice(&self.buf[pos..safe]);
            pos = safe;
            break;
        }

        let keep_from = pos.saturating_sub(LOOKBEHIND);
        self.buf.drain(..keep_from);
        self.start = pos - keep_from;
        self.last_match_end = last_match_end.and_then(|end| end.checked_sub(keep_from));
    }
}

/// Leftmost-first match at or after `pos`, skipping an empty match that
/// touches the previous match (the same rule `Regex::replace_all` follows).
fn next_match<'h>(
    regex: &Regex,
    haystack: &'h [u8],
    pos: usize,
    last_match_end: Option<usize>,
) -> Option<Captures<'h>> {
    let caps = regex.captures_at(haystack, pos)?;
    let m = caps.get(0)?;
    if m.is_empty() && Some(m.end()) == last_match_end {
        if pos >= haystack.len() {
            return None;
        }
        return regex.captures_at(haystack, pos + 1);
    }
    Some(caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(search: &str, replace: &str) -> Stage {
        Stage::Literal(LiteralStage::new(
            Arc::new(LiteralPattern::from_string(search)),
            Arc::from(replace.as_bytes()),
        ))
    }

    fn regex(pattern: &str, replace: &str, max_match: usize) -> Stage {
        Stage::Regex(RegexStage::new(
            Regex::new(pattern).unwrap(),
            Arc::from(replace.as_bytes()),
            max_match,
        ))
    }

    fn run(stage: &mut Stage, chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            stage.write(chunk, &mut out);
        }
        stage.flush(&mut out);
        out
    }

    #[test]
    fn test_literal_split_across_writes() {
        let mut stage = literal("foobar", "X");
        let mut out = Vec::new();

        stage.write(b"fo", &mut out);
        assert!(out.is_empty());
        assert_eq!(stage.pending_len(), 2);

        stage.write(b"obar", &mut out);
        assert_eq!(out, b"X");
        assert_eq!(stage.pending_len(), 0);
        assert_eq!(stage.replacements(), 1);
    }

    #[test]
    fn test_literal_pending_released_on_flush() {
        let mut stage = literal("foobar", "X");
        assert_eq!(run(&mut stage, &[b"xx", b"foob"]), b"xxfoob");
        assert_eq!(stage.replacements(), 0);
    }

    #[test]
    fn test_literal_pending_shorter_than_pattern() {
        let mut stage = literal("abcabd", "!");
        let mut out = Vec::new();

        stage.write(b"zzabcab", &mut out);
        assert_eq!(out, b"zz");
        assert!(stage.pending_len() < 6);

        stage.write(b"cabd", &mut out);
        stage.flush(&mut out);
        assert_eq!(out, b"zzabc!");
    }

    #[test]
    fn test_literal_matches_str_replace() {
        let input = "aaaa abab ababab aab";
        for (search, replace) in [("aa", "b"), ("ab", "ba"), ("abab", ""), ("aab", "[x]")] {
            let mut stage = literal(search, replace);
            let out = run(&mut stage, &[input.as_bytes()]);
            assert_eq!(out, input.replace(search, replace).as_bytes(), "{search}");
        }
    }

    #[test]
    fn test_regex_capture_group() {
        let mut stage = regex(r"\s+foo(bar|baz)\s+", " foo $1 ", 2048);
        assert_eq!(run(&mut stage, &[b" foobaz "]), b" foo baz ");
    }

    #[test]
    fn test_regex_unmatched_group_is_empty() {
        let mut stage = regex(r"a(b)?c", "[$1]", 2048);
        assert_eq!(run(&mut stage, &[b"ac abc"]), b"[] [b]");
    }

    #[test]
    fn test_regex_split_across_writes() {
        let mut stage = regex(r"foo(bar)?", "<$1>", 2048);
        // "foob" alone would settle for "foo"; the match must wait
        assert_eq!(run(&mut stage, &[b"xx foob", b"ar yy"]), b"xx <bar> yy");
    }

    #[test]
    fn test_regex_confirms_once_lookahead_is_buffered() {
        let mut stage = regex(r"ab", "X", 4);
        let mut out = Vec::new();

        stage.write(b"ab", &mut out);
        assert!(out.is_empty());

        stage.write(b"cdef", &mut out);
        assert_eq!(out, b"X");
        // the last max_match bytes stay pending
        assert_eq!(stage.pending_len(), 4);
    }

    #[test]
    fn test_regex_pending_is_bounded() {
        let mut stage = regex(r"<[a-z]+>", "", 8);
        let mut out = Vec::new();

        for _ in 0..100 {
            stage.write(b"0123456789", &mut out);
            assert!(stage.pending_len() <= 8);
        }
        stage.flush(&mut out);
        assert_eq!(out.len(), 1000);
    }

    #[test]
    fn test_regex_long_match_left_unreplaced() {
        let mut stage = regex(r"<!--.*?-->", "", 16);
        let body = format!("a<!-- {} -->b", "x".repeat(40));
        let chunks: Vec<&[u8]> = body.as_bytes().chunks(10).collect();

        assert_eq!(run(&mut stage, &chunks), body.as_bytes());
        assert_eq!(stage.replacements(), 0);
    }

    #[test]
    fn test_regex_long_match_replaced_within_one_write() {
        let mut stage = regex(r"<!--.*?-->", "", 16);
        let body = format!("a<!-- {} -->b", "x".repeat(40));

        assert_eq!(run(&mut stage, &[body.as_bytes()]), b"ab");
    }

    #[test]
    fn test_regex_open_ended_match_gives_up() {
        let mut stage = regex(r"a+", "A", 4);
        let mut out = Vec::new();

        stage.write(b"aaaaaa", &mut out);
        assert_eq!(out, b"aaaaaa");
        assert_eq!(stage.pending_len(), 0);
    }

    #[test]
    fn test_regex_empty_matches_follow_replace_all() {
        let re = Regex::new("x*").unwrap();
        let input = b"axxbx";
        let expected = re.replace_all(input, &b"-"[..]).into_owned();

        let mut stage = regex("x*", "-", 2048);
        assert_eq!(run(&mut stage, &[input]), expected);

        let mut stage = regex("x*", "-", 2048);
        assert_eq!(run(&mut stage, &[b"ax", b"x", b"bx"]), expected);
    }

    #[test]
    fn test_regex_word_boundary_uses_lookbehind() {
        let mut stage = regex(r"\bcat\b", "dog", 3);
        // "concat" must not match even though "cat" starts a later write
        // and "con" has already been emitted
        assert_eq!(
            run(&mut stage, &[b"a long con", b"cat cat!"]),
            b"a long concat dog!"
        );
    }

    #[test]
    fn test_regex_start_anchor_only_at_stream_start() {
        let mut stage = regex(r"^x", "Y", 2);
        assert_eq!(run(&mut stage, &[b"xab", b"cdx", b"x"]), b"Yabcdxx");
    }

    #[test]
    fn test_transform_all_ignores_lookahead_bound() {
        let mut stage = regex(r"<!--.*?-->", "", 16);
        let body = format!("a<!-- {} -->", "x".repeat(40));
        let mut out = Vec::new();

        stage.transform_all(body.as_bytes(), &mut out);
        assert_eq!(out, b"a");
        assert_eq!(stage.replacements(), 1);
        assert_eq!(stage.pending_len(), 0);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut stage = regex(r"ab", "X", 64);
        let mut out = Vec::new();
        stage.write(b"zzab", &mut out);
        stage.flush(&mut out);
        stage.write(b"a", &mut out);
        assert_eq!(stage.replacements(), 1);

        stage.reset();
        assert_eq!(stage.replacements(), 0);
        assert_eq!(stage.pending_len(), 0);
    }
}
