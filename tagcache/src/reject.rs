//! Tag patterns that make a response uncacheable.

use std::collections::HashSet;

/// Matcher over a fixed set of tag patterns.
///
/// Patterns are classified once:
///
/// - no `*`: exact match,
/// - a single trailing `*`: prefix match,
/// - anything else: glob where `*` matches any, possibly empty, run of bytes.
#[derive(Debug, Clone, Default)]
pub struct RejectMatcher {
    exact: HashSet<String>,
    prefixes: Vec<String>,
    globs: Vec<Vec<u8>>,
}

impl RejectMatcher {
    /// Builds a matcher from `patterns`.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match pattern.find('*') {
                None => {
                    matcher.exact.insert(pattern.to_owned());
                }
                Some(star) if star == pattern.len() - 1 => {
                    matcher.prefixes.push(pattern[..star].to_owned());
                }
                Some(_) => matcher.globs.push(collapse_stars(pattern.as_bytes())),
            }
        }
        matcher
    }

    /// Returns `true` when no pattern is configured.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.globs.is_empty()
    }

    /// Whether `tag` matches any pattern.
    pub fn matches(&self, tag: &str) -> bool {
        self.exact.contains(tag)
            || self.prefixes.iter().any(|prefix| tag.starts_with(prefix.as_str()))
            || self.globs.iter().any(|glob| glob_match(glob, tag.as_bytes()))
    }

    /// Whether any of `tags` matches.
    pub fn matches_any<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        !self.is_empty() && tags.iter().any(|tag| self.matches(tag.as_ref()))
    }
}

fn collapse_stars(pattern: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pattern.len());
    for &byte in pattern {
        if byte == b'*' && out.last() == Some(&b'*') {
            continue;
        }
        out.push(byte);
    }
    out
}

fn glob_match(pattern: &[u8], input: &[u8]) -> bool {
    match pattern.split_first() {
        None => input.is_empty(),
        Some((b'*', rest)) => {
            rest.is_empty() || (0..=input.len()).any(|skip| glob_match(rest, &input[skip..]))
        }
        Some((byte, rest)) => input
            .split_first()
            .is_some_and(|(head, tail)| head == byte && glob_match(rest, tail)),
    }
}
