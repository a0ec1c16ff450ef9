/// Non-allocating field tokenizer for access-log lines.
///
/// A line consists of fields separated by runs of spaces, tabs and
/// vertical tabs.  A field is either a run of non-separator bytes or,
/// when the field opens with a double quote, everything up to the
/// closing quote (the quotes themselves are not part of the field).
/// Quotes inside a standalone field are ordinary bytes.  A newline
/// terminates the line in any state, so a quoted field that runs into
/// a newline is cut short there.
///
/// The tokenizer is resumable: it returns the cursor position of the
/// newline that terminated the line, and the *next* call (with
/// `skip_line_seek` false) first seeks past that newline.  This is
/// also what lets scan workers start mid-chunk: the first call on an
/// unaligned cursor simply skips the remainder of the straddling line,
/// which the neighbouring worker parses in full.

/// Most fields any line can have; the rest are dropped.
pub const NALL_FIELDS_MAX: usize = 512;

enum State {
    Seek,
    Standalone,
    Quoted,
}

/// Tokenize one line of `src` starting at `pos`, pushing at most
/// `max_fields` field views into `out` (which is cleared first).
/// Returns the cursor for the next call, or `None` when the end of the
/// buffer was reached.
pub fn get_fields<'a>(
    src: &'a [u8],
    mut pos: usize,
    max_fields: usize,
    skip_line_seek: bool,
    out: &mut Vec<&'a [u8]>,
) -> Option<usize> {
    out.clear();

    if !skip_line_seek {
        match memchr::memchr(b'\n', &src[pos.min(src.len())..]) {
            Some(nl) => pos += nl + 1,
            None => return None,
        }
    }

    let mut state = State::Seek;
    let mut start = pos;
    loop {
        if out.len() == max_fields {
            return Some(pos);
        }
        let c = match src.get(pos) {
            Some(&c) => c,
            None => {
                match state {
                    State::Seek => {}
                    State::Standalone | State::Quoted => out.push(&src[start..pos]),
                }
                return None;
            }
        };
        match state {
            State::Seek => match c {
                b'\n' => return Some(pos),
                b' ' | b'\t' | b'\x0b' => pos += 1,
                b'"' => {
                    pos += 1;
                    start = pos;
                    state = State::Quoted;
                }
                _ => {
                    start = pos;
                    pos += 1;
                    state = State::Standalone;
                }
            },
            State::Standalone => match c {
                b' ' | b'\t' | b'\x0b' => {
                    out.push(&src[start..pos]);
                    pos += 1;
                    state = State::Seek;
                }
                b'\n' => {
                    out.push(&src[start..pos]);
                    return Some(pos);
                }
                _ => pos += 1,
            },
            State::Quoted => match c {
                b'\n' => {
                    out.push(&src[start..pos]);
                    return Some(pos);
                }
                b'"' => {
                    out.push(&src[start..pos]);
                    pos += 1;
                    state = State::Seek;
                }
                _ => pos += 1,
            },
        }
    }
}

// This tests:
//  - standalone fields split on runs of spaces, tabs and vertical tabs
//  - the cursor stops at the terminating newline

#[test]
fn test_fields_standalone() {
    let src = b"one  two\tthree\x0bfour\nrest";
    let mut fvs = Vec::new();
    let next = get_fields(src, 0, NALL_FIELDS_MAX, true, &mut fvs);
    assert!(fvs.len() == 4);
    assert!(fvs[0] == b"one");
    assert!(fvs[1] == b"two");
    assert!(fvs[2] == b"three");
    assert!(fvs[3] == b"four");
    assert!(next == Some(19));
    assert!(src[19] == b'\n');
}

// This tests:
//  - quoted fields keep their spaces and drop the quotes
//  - a quote inside a standalone field is an ordinary byte

#[test]
fn test_fields_quoted() {
    let src = b"1.2.3.4 \"GET http://x/ HTTP/1.1\" ab\"cd \"\" tail\n";
    let mut fvs = Vec::new();
    get_fields(src, 0, NALL_FIELDS_MAX, true, &mut fvs);
    assert!(fvs.len() == 5);
    assert!(fvs[0] == b"1.2.3.4");
    assert!(fvs[1] == b"GET http://x/ HTTP/1.1");
    assert!(fvs[2] == b"ab\"cd");
    assert!(fvs[3] == b"");
    assert!(fvs[4] == b"tail");
}

// This tests:
//  - resuming from the returned cursor skips past the newline
//  - an unaligned cursor with skip_line_seek skips the partial line

#[test]
fn test_fields_resume() {
    let src = b"a b\nc d\ne f\n";
    let mut fvs = Vec::new();
    let next = get_fields(src, 0, NALL_FIELDS_MAX, true, &mut fvs).unwrap();
    assert!(fvs == vec![&b"a"[..], &b"b"[..]]);
    let next = get_fields(src, next, NALL_FIELDS_MAX, false, &mut fvs).unwrap();
    assert!(fvs == vec![&b"c"[..], &b"d"[..]]);
    get_fields(src, next, NALL_FIELDS_MAX, false, &mut fvs);
    assert!(fvs == vec![&b"e"[..], &b"f"[..]]);

    // Start mid-way through "c d": that line is skipped entirely.
    get_fields(src, 5, NALL_FIELDS_MAX, false, &mut fvs);
    assert!(fvs == vec![&b"e"[..], &b"f"[..]]);
}

// This tests:
//  - end of buffer without a trailing newline closes the last field
//    and reports no resume position

#[test]
fn test_fields_eof() {
    let mut fvs = Vec::new();
    let next = get_fields(b"last line", 0, NALL_FIELDS_MAX, true, &mut fvs);
    assert!(next.is_none());
    assert!(fvs == vec![&b"last"[..], &b"line"[..]]);

    let next = get_fields(b"open \"quo", 0, NALL_FIELDS_MAX, true, &mut fvs);
    assert!(next.is_none());
    assert!(fvs == vec![&b"open"[..], &b"quo"[..]]);

    let next = get_fields(b"", 0, NALL_FIELDS_MAX, true, &mut fvs);
    assert!(next.is_none());
    assert!(fvs.is_empty());
}

// This tests:
//  - a newline inside a quoted field terminates both the field and the
//    line at that newline

#[test]
fn test_fields_quoted_newline() {
    let src = b"a \"cut\nnext\n";
    let mut fvs = Vec::new();
    let next = get_fields(src, 0, NALL_FIELDS_MAX, true, &mut fvs);
    assert!(fvs == vec![&b"a"[..], &b"cut"[..]]);
    assert!(next == Some(6));
}

// This tests:
//  - fields beyond max_fields are dropped and the cursor is left
//    mid-line, where the next call resynchronises

#[test]
fn test_fields_max() {
    let src = b"f0 f1 f2 f3 f4\nnext ok\n";
    let mut fvs = Vec::new();
    let next = get_fields(src, 0, 3, true, &mut fvs).unwrap();
    assert!(fvs == vec![&b"f0"[..], &b"f1"[..], &b"f2"[..]]);
    get_fields(src, next, NALL_FIELDS_MAX, false, &mut fvs);
    assert!(fvs == vec![&b"next"[..], &b"ok"[..]]);
}

// This tests:
//  - an empty line yields an empty record with the cursor on its
//    newline

#[test]
fn test_fields_empty_line() {
    let src = b"\na b\n";
    let mut fvs = Vec::new();
    let next = get_fields(src, 0, NALL_FIELDS_MAX, true, &mut fvs);
    assert!(fvs.is_empty());
    assert!(next == Some(0));
    get_fields(src, 0, NALL_FIELDS_MAX, false, &mut fvs);
    assert!(fvs == vec![&b"a"[..], &b"b"[..]]);
}
