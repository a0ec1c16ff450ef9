/// Truncation patterns: canonicalising rewrites for request fields.
///
/// A pattern file holds one pattern per line.  Blank lines and lines
/// whose first non-space byte is `#` are skipped.  A line of the form
/// `$NAME = PATTERN` binds the alias `$NAME` to the pattern; a bare
/// `PATTERN` is its own alias, which makes matching a pure marker
/// operation (the match is replaced by the pattern text itself).
///
/// Canonicalisation is what collapses requests differing only in
/// variable tokens: with `$UUID = [0-9a-fA-F-]{36}` both
/// `/u/<uuid-a>` and `/u/<uuid-b>` become `/u/$UUID` and intern to a
/// single request id.
use std::borrow::Cow;
use std::fs;

use anyhow::{Context, Result};
use regex::bytes::Regex;

use crate::pattern::{compile_pattern, does_match, find_match};
use crate::warnx;

pub const TRUNCATE_NPATTERNS_MAX: usize = 512;

#[derive(Debug)]
pub struct TruncatePattern {
    regex: Regex,
    alias: Vec<u8>,
}

#[derive(Default, Debug)]
pub struct TruncatePatterns {
    patterns: Vec<TruncatePattern>,
}

impl TruncatePatterns {
    /// The empty table: canonicalisation is the identity.
    pub fn empty() -> TruncatePatterns {
        TruncatePatterns::default()
    }

    pub fn from_file(path: &str) -> Result<TruncatePatterns> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to open truncate patterns at '{}'", path))?;
        TruncatePatterns::parse(&text)
    }

    pub fn parse(text: &str) -> Result<TruncatePatterns> {
        let mut patterns = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if patterns.len() == TRUNCATE_NPATTERNS_MAX {
                warnx!(
                    "more than {} truncate patterns, ignoring the rest",
                    TRUNCATE_NPATTERNS_MAX
                );
                break;
            }
            let (alias, pat) = split_alias(line);
            patterns.push(TruncatePattern {
                regex: compile_pattern(pat)?,
                alias: alias.as_bytes().to_vec(),
            });
        }
        Ok(TruncatePatterns { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Replace every match of the first matching pattern with that
    /// pattern's alias, left to right.  Only the first matching
    /// pattern is iterated; matches of later patterns inside the
    /// result are left alone.  Without a match the input is returned
    /// unchanged, borrowed.
    pub fn canonicalise<'a>(&self, raw: &'a [u8]) -> Cow<'a, [u8]> {
        let tp = match self.patterns.iter().find(|tp| does_match(&tp.regex, raw)) {
            Some(tp) => tp,
            None => return Cow::Borrowed(raw),
        };

        let mut out = Vec::with_capacity(raw.len());
        let mut rest = raw;
        loop {
            match find_match(&tp.regex, rest) {
                Some((start, end)) if end > start => {
                    out.extend_from_slice(&rest[..start]);
                    out.extend_from_slice(&tp.alias);
                    rest = &rest[end..];
                }
                _ => break,
            }
        }
        out.extend_from_slice(rest);
        Cow::Owned(out)
    }
}

// `$NAME = PATTERN` or a bare pattern that is its own alias.  The
// separator is any run of whitespace and `=`.
fn split_alias(line: &str) -> (&str, &str) {
    if !line.starts_with('$') {
        return (line, line);
    }
    let alias_end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let alias = &line[..alias_end];
    let pat = line[alias_end..].trim_start_matches(|c: char| c.is_whitespace() || c == '=');
    (alias, pat)
}

// This tests:
//  - comments, blank lines and surrounding whitespace in the file
//  - `$NAME = PATTERN` and bare-pattern lines

#[test]
fn test_parse_pattern_file() {
    let tp = TruncatePatterns::parse(
        "# uuids in urls\n\
         \n\
         $UUID = [0-9a-fA-F-]{36}\n\
         \t $NUM=[0-9]+\n\
         /health\n",
    )
    .unwrap();
    assert!(tp.len() == 3);
    assert!(tp.canonicalise(b"/nums/123") == Cow::<[u8]>::Owned(b"/nums/$NUM".to_vec()));
    assert!(tp.canonicalise(b"/health") == Cow::<[u8]>::Owned(b"/health".to_vec()));
}

// This tests:
//  - a bad pattern is a compile error naming the pattern

#[test]
fn test_parse_bad_pattern() {
    let err = TruncatePatterns::parse("$X = [0-9").unwrap_err();
    assert!(format!("{}", err).contains("[0-9"));
}

// This tests:
//  - two distinct uuids collapse to the same canonical form
//  - multiple matches are all replaced, and the tail is kept

#[test]
fn test_canonicalise_uuid() {
    let tp = TruncatePatterns::parse("$UUID = [0-9a-fA-F-]{36}").unwrap();
    let a = tp.canonicalise(b"GET /u/AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE");
    let b = tp.canonicalise(b"GET /u/11111111-2222-3333-4444-555555555555");
    assert!(a == b);
    assert!(&*a == b"GET /u/$UUID".as_slice());

    let c = tp.canonicalise(b"GET /u/11111111-2222-3333-4444-555555555555/x/22222222-3333-4444-5555-666666666666/end");
    assert!(&*c == b"GET /u/$UUID/x/$UUID/end".as_slice());
}

// This tests:
//  - only the first matching pattern is iterated; matches of later
//    patterns inside the result are not rescanned

#[test]
fn test_canonicalise_first_pattern_only() {
    let tp = TruncatePatterns::parse("$A = aa+\n$B = b+\n").unwrap();
    let out = tp.canonicalise(b"xx aaa bb aa");
    assert!(&*out == b"xx $A bb $A".as_slice());

    // The first pattern does not match here, so the second one runs.
    let out = tp.canonicalise(b"xx bb cc");
    assert!(&*out == b"xx $B cc".as_slice());
}

// This tests:
//  - no match returns the input unchanged, borrowed
//  - canonicalising a canonical form is a fixed point

#[test]
fn test_canonicalise_fixed_point() {
    let tp = TruncatePatterns::parse("$UUID = [0-9a-fA-F-]{36}\n/login\n").unwrap();
    let raw: &[u8] = b"GET /about";
    assert!(matches!(tp.canonicalise(raw), Cow::Borrowed(_)));

    let once = tp.canonicalise(b"GET /u/11111111-2222-3333-4444-555555555555");
    let twice = tp.canonicalise(&once);
    assert!(once == twice);

    // A literal marker alias equals its pattern, so it still matches
    // after rewriting; the rewrite must converge all the same.
    let once = tp.canonicalise(b"GET /login");
    let twice = tp.canonicalise(&once);
    assert!(&*once == b"GET /login".as_slice());
    assert!(once == twice);
}

// This tests:
//  - the empty table is the identity

#[test]
fn test_empty_table() {
    let tp = TruncatePatterns::empty();
    assert!(tp.is_empty());
    assert!(matches!(tp.canonicalise(b"GET /x"), Cow::Borrowed(_)));
}
