/// Parallel log scan: chunk partitioning, worker threads, and the
/// per-line loop that feeds the request set and the session map.
///
/// The byte range is split into near-equal chunks, one OS thread per
/// chunk.  A worker treats its cursor as mid-line unless it sits at
/// the very start of the file, so the tokenizer first seeks past the
/// next newline; a line straddling a chunk boundary is parsed in full
/// by the worker owning the newline that precedes it.  Workers share
/// nothing but the two striped tables, and the main thread joins them
/// all before any post-processing.
use std::thread;

use anyhow::Result;

use crate::dates;
use crate::fields::{get_fields, NALL_FIELDS_MAX};
use crate::hash::{hash64_init, hash64_update, hash64_update_ipaddr};
use crate::request::{RequestInfo, RequestSet};
use crate::schema::{FieldKind, LineSchema};
use crate::session::SessionMap;
use crate::truncate::TruncatePatterns;
use crate::{errx, warnx};

/// Log size threshold below which the scan stays single-threaded.
pub const MT_THRESHOLD: usize = 4 * 1024 * 1024;
pub const NTHREADS_DEFAULT: usize = 4;
pub const NTHREADS_MAX: usize = 4096;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    /// Lines scanned into the tables.
    pub nlines: u64,
    /// Lines dropped for not having the schema's field count.
    pub nskipped: u64,
    /// Scan-plan fields dispatched.
    pub nfields: u64,
}

impl ScanStats {
    fn absorb(&mut self, other: ScanStats) {
        self.nlines += other.nlines;
        self.nskipped += other.nskipped;
        self.nfields += other.nfields;
    }
}

/// Scan the whole log into `requests` and `sessions`.  `nthreads`
/// overrides the thread count; `None` uses one thread per logical CPU.
pub fn scan_log(
    log: &[u8],
    schema: &LineSchema,
    patterns: &TruncatePatterns,
    requests: &RequestSet,
    sessions: &SessionMap,
    nthreads: Option<usize>,
) -> Result<ScanStats> {
    let nthreads = resolve_nthreads(log.len(), nthreads)?;
    let chunks = partition(log.len(), nthreads);

    let mut stats = ScanStats::default();
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(chunks.len());
        for &(start, end) in &chunks {
            handles.push(scope.spawn(move || {
                scan_chunk(log, start, end, schema, patterns, requests, sessions)
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(s) => stats.absorb(s),
                Err(e) => std::panic::resume_unwind(e),
            }
        }
    });
    Ok(stats)
}

fn resolve_nthreads(len: usize, nthreads: Option<usize>) -> Result<usize> {
    if let Some(n) = nthreads {
        if n == 0 || n > NTHREADS_MAX {
            errx!("thread count must be between 1 and {}", NTHREADS_MAX);
        }
    }
    if len < MT_THRESHOLD {
        return Ok(1);
    }
    if let Some(n) = nthreads {
        return Ok(n);
    }
    match thread::available_parallelism() {
        Ok(n) => Ok(n.get().min(NTHREADS_MAX)),
        Err(_) => {
            warnx!(
                "failed to read CPU core count, using {} threads by default",
                NTHREADS_DEFAULT
            );
            Ok(NTHREADS_DEFAULT)
        }
    }
}

// Near-equal chunks; the last one absorbs the division remainder.
fn partition(len: usize, nthreads: usize) -> Vec<(usize, usize)> {
    let chunk = len / nthreads;
    let rem = len % nthreads;
    let mut out = Vec::with_capacity(nthreads);
    for tid in 0..nthreads {
        let start = tid * chunk;
        let end = if tid < nthreads - 1 {
            start + chunk
        } else {
            start + chunk + rem
        };
        out.push((start, end));
    }
    out
}

fn scan_chunk(
    log: &[u8],
    start: usize,
    end: usize,
    schema: &LineSchema,
    patterns: &TruncatePatterns,
    requests: &RequestSet,
    sessions: &SessionMap,
) -> ScanStats {
    let mut stats = ScanStats::default();
    let mut fvs: Vec<&[u8]> = Vec::with_capacity(schema.nall_fields());
    let mut cursor = start;
    // Only the very start of the file is known to be a line start.
    let mut at_line_start = start == 0;

    while cursor < end {
        let next = get_fields(log, cursor, NALL_FIELDS_MAX, at_line_start, &mut fvs);
        at_line_start = false;

        if fvs.len() == schema.nall_fields() {
            scan_line(&fvs, schema, patterns, requests, sessions, &mut stats);
            stats.nlines += 1;
        } else if !(fvs.is_empty() && next.is_none()) {
            // Blank lines have a field count of zero and are skipped
            // like any other mismatched line.  A fieldless result at
            // the end of the buffer is the tail after the final
            // newline, not a line.
            stats.nskipped += 1;
        }

        match next {
            Some(next) => cursor = next,
            None => break,
        }
    }
    stats
}

fn scan_line(
    fvs: &[&[u8]],
    schema: &LineSchema,
    patterns: &TruncatePatterns,
    requests: &RequestSet,
    sessions: &SessionMap,
    stats: &mut ScanStats,
) {
    let mut ts = 0u64;
    let mut sid = hash64_init();
    let mut info = RequestInfo::default();

    for fi in schema.scan_fields() {
        let fv = fvs[fi.index];
        match fi.kind {
            FieldKind::Rfc3339 => ts = dates::rfc3339_to_ms(fv),
            FieldKind::Rfc3339NoMs => ts = dates::rfc3339_no_ms_to_ms(fv),
            FieldKind::Date => ts = ts.wrapping_add(dates::date_to_ms(fv)),
            FieldKind::Time => ts = ts.wrapping_add(dates::time_to_ms(fv)),
            FieldKind::Ipaddr => {
                if fi.is_session {
                    sid = hash64_update_ipaddr(sid, fv);
                }
            }
            FieldKind::Useragent => {
                if fi.is_session {
                    sid = hash64_update(sid, fv);
                }
            }
            FieldKind::Request => info.request = Some(fv),
            FieldKind::Method => info.method = Some(fv),
            FieldKind::Protocol => info.protocol = Some(fv),
            FieldKind::Domain => info.domain = Some(fv),
            FieldKind::Endpoint => info.endpoint = Some(fv),
        }
        stats.nfields += 1;
    }

    let rid = requests.intern(&info, patterns);
    sessions.amend(sid, ts, rid);
}

#[cfg(test)]
fn scan_fixture(log: &[u8], nthreads: usize) -> (ScanStats, crate::request::RequestTable, Vec<crate::session::SessionEntry>) {
    let schema = LineSchema::infer(log, None, "ipaddr,useragent").unwrap();
    let patterns = TruncatePatterns::empty();
    let requests = RequestSet::new();
    let sessions = SessionMap::new();

    let mut stats = ScanStats::default();
    for (start, end) in partition(log.len(), nthreads) {
        stats.absorb(scan_chunk(
            log, start, end, &schema, &patterns, &requests, &sessions,
        ));
    }
    (stats, requests.into_table(), sessions.into_entries())
}

#[cfg(test)]
const FIXTURE_LOG: &[u8] = b"10.0.0.1 2023-10-12T07:33:14.000 \"GET http://a.b/login HTTP/1.1\" \"Mozilla/5.0 (one)\"\n\
10.0.0.1 2023-10-12T07:33:15.000 \"GET http://a.b/data?q=1 HTTP/1.1\" \"Mozilla/5.0 (one)\"\n\
10.0.0.2 2023-10-12T07:33:16.000 \"GET http://a.b/login HTTP/1.1\" \"Mozilla/5.0 (two)\"\n\
short line\n\
\n\
10.0.0.2 2023-10-12T07:33:18.000 \"GET http://a.b/data?q=2 HTTP/1.1\" \"Mozilla/5.0 (two)\"\n";

// This tests:
//  - an end-to-end single-threaded scan: interning, query stripping,
//    session keying by (ipaddr, useragent), and skipping of lines
//    with the wrong field count, blank lines included

#[test]
fn test_scan_single_chunk() {
    let (stats, table, entries) = scan_fixture(FIXTURE_LOG, 1);

    assert!(stats.nlines == 4);
    assert!(stats.nskipped == 2);
    assert!(stats.nfields == 4 * 4);

    assert!(table.len() == 2);
    assert!(table.request(0) == b"GET http://a.b/login");
    assert!(table.request(1) == b"GET http://a.b/data");

    assert!(entries.len() == 2);
    for entry in &entries {
        assert!(entry.requests.len() == 2);
        assert!(entry.requests[0].rid == 0);
        assert!(entry.requests[1].rid == 1);
    }
}

// This tests:
//  - chunked scans agree with the single-threaded scan no matter how
//    the chunk boundaries fall mid-line

#[test]
fn test_scan_chunked_determinism() {
    let (stats1, table1, mut entries1) = scan_fixture(FIXTURE_LOG, 1);

    for nthreads in 2..8 {
        let (stats, table, mut entries) = scan_fixture(FIXTURE_LOG, nthreads);
        assert!(stats.nlines == stats1.nlines);
        assert!(stats.nskipped == stats1.nskipped);

        assert!(table.len() == table1.len());
        let mut bytes: Vec<&[u8]> = (0..table.len()).map(|r| table.request(r as u64)).collect();
        let mut bytes1: Vec<&[u8]> = (0..table1.len()).map(|r| table1.request(r as u64)).collect();
        bytes.sort();
        bytes1.sort();
        assert!(bytes == bytes1);

        entries.sort_by_key(|e| e.sid);
        entries1.sort_by_key(|e| e.sid);
        assert!(entries.len() == entries1.len());
        for (a, b) in entries.iter().zip(entries1.iter()) {
            assert!(a.sid == b.sid);
            let mut ts_a: Vec<u64> = a.requests.iter().map(|r| r.ts).collect();
            let mut ts_b: Vec<u64> = b.requests.iter().map(|r| r.ts).collect();
            ts_a.sort();
            ts_b.sort();
            assert!(ts_a == ts_b);
        }
    }
}

// This tests:
//  - partitioning covers the byte range exactly, with the remainder
//    in the last chunk

#[test]
fn test_partition() {
    let chunks = partition(103, 4);
    assert!(chunks == vec![(0, 25), (25, 50), (50, 75), (75, 103)]);
    assert!(partition(0, 1) == vec![(0, 0)]);
    assert!(partition(5, 1) == vec![(0, 5)]);
}

// This tests:
//  - small inputs force a single thread regardless of the request
//  - out-of-range thread counts are rejected

#[test]
fn test_resolve_nthreads() {
    assert!(resolve_nthreads(100, Some(16)).unwrap() == 1);
    assert!(resolve_nthreads(MT_THRESHOLD, Some(16)).unwrap() == 16);
    assert!(resolve_nthreads(100, None).unwrap() == 1);
    assert!(resolve_nthreads(100, Some(0)).is_err());
    assert!(resolve_nthreads(MT_THRESHOLD, Some(NTHREADS_MAX + 1)).is_err());
}

// This tests:
//  - the public scan_log entry point over a log with a session id
//    split across differently-keyed lines, checked through the graph

#[test]
fn test_scan_log_end_to_end() {
    let log = FIXTURE_LOG;
    let schema = LineSchema::infer(log, None, "ipaddr,useragent").unwrap();
    let patterns = TruncatePatterns::empty();
    let requests = RequestSet::new();
    let sessions = SessionMap::new();

    let stats = scan_log(log, &schema, &patterns, &requests, &sessions, Some(3)).unwrap();
    assert!(stats.nlines == 4);

    let table = requests.into_table();
    let graph = crate::graph::PathGraph::build(table.len(), sessions.into_entries());

    // Two sessions, each login -> data; durations 1000 and 2000 ms.
    assert!(graph.total_nhits == 4);
    assert!(graph.total_nedges == 1);
    let login = graph.vertex(0).unwrap();
    assert!(login.nhits_in == 2);
    assert!(login.min_depth == 1);
    assert!(login.edges.len() == 1);
    assert!(login.edges[0].nhits == 2);
    assert!(login.edges[0].duration_cma == 1500.0);
    let data = graph.vertex(1).unwrap();
    assert!(data.nhits_in == 2);
    assert!(data.min_depth == 2);
}

// This tests:
//  - the empty byte range scans to nothing and succeeds

#[test]
fn test_scan_empty() {
    let log = b"10.0.0.1 2023-10-12T07:33:14.000 \"GET http://a.b/x HTTP/1.1\" \"Mozilla/5.0\"\n";
    let schema = LineSchema::infer(log, None, "ipaddr").unwrap();
    let patterns = TruncatePatterns::empty();
    let requests = RequestSet::new();
    let sessions = SessionMap::new();
    let stats = scan_log(b"", &schema, &patterns, &requests, &sessions, None).unwrap();
    assert!(stats.nlines == 0);
    assert!(requests.nrequests() == 0);
    assert!(sessions.nsessions() == 0);
}
