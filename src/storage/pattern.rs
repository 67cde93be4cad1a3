//! Glob patterns for key enumeration.
//!
//! Supported syntax:
//! - `*` matches any run of bytes, including none
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^abc]` match one byte from (or outside) a class
//! - `\x` matches `x` literally
//!
//! Patterns are validated once up front so that matching itself cannot fail.

use crate::error::{StoreError, StoreResult};

/// A validated glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    /// Parses and validates a pattern.
    ///
    /// Fails with `InvalidArgument` on an unterminated character class or a
    /// dangling escape.
    pub fn parse(pattern: &str) -> StoreResult<Self> {
        let bytes = pattern.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => {
                    if i + 1 >= bytes.len() {
                        return Err(StoreError::invalid(format!(
                            "pattern {:?} ends with a dangling escape",
                            pattern
                        )));
                    }
                    i += 2;
                }
                b'[' => {
                    let mut j = i + 1;
                    if bytes.get(j) == Some(&b'^') {
                        j += 1;
                    }
                    while j < bytes.len() && bytes[j] != b']' {
                        j += 1;
                    }
                    if j >= bytes.len() {
                        return Err(StoreError::invalid(format!(
                            "pattern {:?} has an unterminated character class",
                            pattern
                        )));
                    }
                    i = j + 1;
                }
                _ => i += 1,
            }
        }
        Ok(Self {
            pattern: bytes.to_vec(),
        })
    }

    /// Returns true if the pattern is a bare `*`.
    pub fn is_match_all(&self) -> bool {
        self.pattern == b"*"
    }

    pub fn as_str(&self) -> &str {
        // Built from a &str in every constructor.
        std::str::from_utf8(&self.pattern).unwrap_or("*")
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        matches_from(&self.pattern, text)
    }
}

/// Matches one byte against the class opening at `pattern[open]`.
///
/// Returns whether it matched and the index just past the closing `]`.
fn match_class(pattern: &[u8], open: usize, byte: u8) -> (bool, usize) {
    let mut i = open + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            if byte >= pattern[i] && byte <= pattern[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if pattern[i] == byte {
                matched = true;
            }
            i += 1;
        }
    }

    (matched != negate, i + 1)
}

/// Iterative matcher that backtracks only to the most recent `*`, so
/// matching runs in O(pattern * text).
fn matches_from(pattern: &[u8], text: &[u8]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        if pi < pattern.len() {
            match pattern[pi] {
                b'*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                b'?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                b'[' => {
                    let (matched, next) = match_class(pattern, pi, text[ti]);
                    if matched {
                        pi = next;
                        ti += 1;
                        continue;
                    }
                }
                b'\\' if pi + 1 < pattern.len() => {
                    if pattern[pi + 1] == text[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }

        // Let the last star absorb one more byte.
        match star {
            Some((star_pi, star_ti)) => {
                star = Some((star_pi, star_ti + 1));
                pi = star_pi + 1;
                ti = star_ti + 1;
            }
            None => return false,
        }
    }

    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }
    pi == pattern.len()
}
