/// Thin wrapper over the regex engine.
///
/// Both field classification and request truncation run byte-level
/// regexes over raw log data, so everything here is `regex::bytes`.
/// Patterns are compiled once at startup and shared read-only by all
/// workers; a compile failure is fatal and carries the engine's own
/// error text.
use anyhow::Result;
use regex::bytes::Regex;

use crate::errx;

pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Ok(re),
        Err(e) => errx!("failed to compile regex '{}': {}", pattern, e),
    }
}

pub fn does_match(re: &Regex, bytes: &[u8]) -> bool {
    re.is_match(bytes)
}

/// First match of `re` in `bytes`, as a half-open byte range.
pub fn find_match(re: &Regex, bytes: &[u8]) -> Option<(usize, usize)> {
    re.find(bytes).map(|m| (m.start(), m.end()))
}

// This tests:
//  - compile failures report the offending pattern

#[test]
fn test_compile_failure() {
    let err = compile_pattern("([0-9]{2").unwrap_err();
    assert!(format!("{}", err).contains("([0-9]{2"));
}

// This tests:
//  - byte-level matching and match ranges

#[test]
fn test_match_helpers() {
    let re = compile_pattern("[0-9]+").unwrap();
    assert!(does_match(&re, b"abc123"));
    assert!(!does_match(&re, b"abc"));
    assert!(find_match(&re, b"ab12cd34") == Some((2, 4)));
    assert!(find_match(&re, b"abcd") == None);
}
