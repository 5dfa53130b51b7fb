//! Finite State Machine Literal Matching
//!
//! Literal searches never need to see more than one pattern's worth of
//! input at a time. This module provides a KMP automaton that is:
//! - O(1) amortised per byte
//! - Constant memory usage (the held bytes are always a prefix of the pattern)
//! - Case-sensitive, byte exact

/// A literal pattern with its precomputed failure table
#[derive(Clone, Debug)]
pub struct LiteralPattern {
    /// Pattern bytes
    bytes: Vec<u8>,
    /// `failure[i]` is the length of the longest proper prefix of
    /// `bytes[..=i]` that is also its suffix
    failure: Vec<usize>,
}

impl LiteralPattern {
    /// Create a new pattern from raw bytes
    pub fn new(pattern: &[u8]) -> Self {
        let mut failure = vec![0; pattern.len()];
        let mut k = 0;
        for i in 1..pattern.len() {
            while k > 0 && pattern[i] != pattern[k] {
                k = failure[k - 1];
            }
            if pattern[i] == pattern[k] {
                k += 1;
            }
            failure[i] = k;
        }

        Self {
            bytes: pattern.to_vec(),
            failure,
        }
    }

    /// Create a new pattern from a string
    pub fn from_string(s: &str) -> Self {
        Self::new(s.as_bytes())
    }

    /// Pattern bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Outcome of feeding one byte to a [`PatternState`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// No complete match. The first `released` bytes of
    /// `held ++ [byte]` can no longer be part of a match.
    Partial { released: usize },
    /// The pattern just completed; the state restarted at zero
    Matched,
}

/// State of a single pattern match attempt
#[derive(Clone, Debug, Default)]
pub struct PatternState {
    /// Current position in pattern (0 = not matching)
    position: usize,
}

impl PatternState {
    /// Create a new pattern state
    pub fn new() -> Self {
        Self { position: 0 }
    }

    /// Advance FSM by one byte
    ///
    /// Matches are non-overlapping: after a full match the automaton
    /// restarts from the empty prefix.
    pub fn advance(&mut self, byte: u8, pattern: &LiteralPattern) -> Advance {
        if pattern.is_empty() {
            return Advance::Partial { released: 1 };
        }

        let held = self.position;
        let mut q = held;
        while q > 0 && pattern.bytes[q] != byte {
            q = pattern.failure[q - 1];
        }
        if pattern.bytes[q] == byte {
            q += 1;
        }

        if q == pattern.len() {
            self.position = 0;
            return Advance::Matched;
        }

        self.position = q;
        Advance::Partial {
            released: held + 1 - q,
        }
    }

    /// Number of bytes currently held as a partial match.
    /// They are always `pattern[..held()]`.
    pub fn held(&self) -> usize {
        self.position
    }

    /// Reset the state
    pub fn reset(&mut self) {
        self.position = 0;
    }
}
