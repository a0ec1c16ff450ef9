/// Shared request set: canonical request bytes interned behind striped
/// bucket locks, with a dense monotonic id per unique request.
///
/// Workers intern concurrently.  A request's identity is its canonical
/// form after truncation-pattern rewriting, hashed with FNV-1a; the
/// hash picks one of 256 bucket locks, so contention is low even with
/// many threads.  Entries are immutable once inserted, and ids are
/// dense in `[0, nrequests)` after the scan joins, which is what makes
/// the dense request table and the id-indexed vertex array possible.
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::hash::{hash64_init, hash64_update};
use crate::truncate::TruncatePatterns;
use crate::warnx;

pub type RequestId = u64;

/// Sentinel for "no successor" in the path walk.
pub const REQUEST_ID_INVALID: RequestId = u64::MAX;

pub const REQUEST_SET_NBUCKETS: usize = 1 << 8;
const REQUEST_SET_BUCKET_MASK: u64 = (REQUEST_SET_NBUCKETS as u64) - 1;

/// Requests longer than this are truncated with a warning.
pub const REQUEST_LEN_MAX: usize = 4096;

/// One request as a worker saw it on a line: either the full quoted
/// request field, or its method/protocol/domain/endpoint parts.
#[derive(Debug, Default)]
pub struct RequestInfo<'a> {
    pub request: Option<&'a [u8]>,
    pub method: Option<&'a [u8]>,
    pub protocol: Option<&'a [u8]>,
    pub domain: Option<&'a [u8]>,
    pub endpoint: Option<&'a [u8]>,
}

struct RequestEntry {
    data: Box<[u8]>,
    hash: u64,
    rid: RequestId,
}

pub struct RequestSet {
    buckets: Vec<Mutex<Vec<RequestEntry>>>,
    rid_ctr: AtomicU64,
}

impl RequestSet {
    pub fn new() -> RequestSet {
        let mut buckets = Vec::with_capacity(REQUEST_SET_NBUCKETS);
        buckets.resize_with(REQUEST_SET_NBUCKETS, || Mutex::new(Vec::new()));
        RequestSet {
            buckets,
            rid_ctr: AtomicU64::new(0),
        }
    }

    /// Unique request count so far.
    pub fn nrequests(&self) -> usize {
        self.rid_ctr.load(Ordering::Relaxed) as usize
    }

    /// Intern the request described by `info`, canonicalised through
    /// `patterns`, and return its id.
    pub fn intern(&self, info: &RequestInfo, patterns: &TruncatePatterns) -> RequestId {
        let mut raw = Vec::new();
        build_raw_request(info, &mut raw);
        if raw.len() > REQUEST_LEN_MAX {
            warnx!("truncating request over {} bytes long", REQUEST_LEN_MAX);
            raw.truncate(REQUEST_LEN_MAX);
        }
        let canonical = patterns.canonicalise(&raw);
        let hash = hash64_update(hash64_init(), &canonical);

        let bucket = &self.buckets[(hash & REQUEST_SET_BUCKET_MASK) as usize];
        let mut entries = bucket.lock();
        for entry in entries.iter() {
            if entry.hash == hash && entry.data[..] == canonical[..] {
                return entry.rid;
            }
        }
        // Drawing the id inside the bucket's critical section pairs
        // every increment with exactly one insertion, keeping the ids
        // dense without a global lock.
        let rid = self.rid_ctr.fetch_add(1, Ordering::Relaxed);
        entries.push(RequestEntry {
            data: canonical.into_owned().into_boxed_slice(),
            hash,
            rid,
        });
        rid
    }

    /// Drain the buckets into dense id-indexed arrays.  Consumes the
    /// set; the canonical bytes move into the table.
    pub fn into_table(self) -> RequestTable {
        let n = self.nrequests();
        let mut requests: Vec<Box<[u8]>> = Vec::new();
        requests.resize_with(n, Default::default);
        let mut hashes = vec![0u64; n];
        for bucket in self.buckets {
            for entry in bucket.into_inner() {
                let rid = entry.rid as usize;
                hashes[rid] = entry.hash;
                requests[rid] = entry.data;
            }
        }
        RequestTable { requests, hashes }
    }
}

impl Default for RequestSet {
    fn default() -> RequestSet {
        RequestSet::new()
    }
}

/// Mapping from dense request ids to canonical request bytes and
/// hashes; built once, after the scan workers have joined.
pub struct RequestTable {
    requests: Vec<Box<[u8]>>,
    hashes: Vec<u64>,
}

impl RequestTable {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn request(&self, rid: RequestId) -> &[u8] {
        &self.requests[rid as usize]
    }

    pub fn hash(&self, rid: RequestId) -> u64 {
        self.hashes[rid as usize]
    }
}

// The raw form drops the URL query string and everything after the
// URL (a closing quote, the trailing HTTP version): the method, the
// original separator run, then the URL cut at the first of `?`, `"`,
// space or newline.
fn build_raw_request(info: &RequestInfo, out: &mut Vec<u8>) {
    out.clear();
    if let Some(req) = info.request {
        let method_end = req.iter().position(|&b| b == b' ').unwrap_or(req.len());
        let mut url_start = method_end;
        while url_start < req.len() && matches!(req[url_start], b' ' | b'\t' | b'\x0b') {
            url_start += 1;
        }
        let url_len = req[url_start..]
            .iter()
            .position(|&b| matches!(b, b'?' | b'"' | b' ' | b'\n'))
            .unwrap_or(req.len() - url_start);
        out.extend_from_slice(&req[..url_start + url_len]);
        return;
    }

    // Assembled form: METHOD SP [PROTOCOL "://"] DOMAIN ENDPOINT.
    if let Some(method) = info.method {
        out.extend_from_slice(method);
    }
    out.push(b' ');
    if let Some(protocol) = info.protocol {
        out.extend_from_slice(protocol);
        out.extend_from_slice(b"://");
    }
    if let Some(domain) = info.domain {
        out.extend_from_slice(domain);
    }
    if let Some(endpoint) = info.endpoint {
        out.extend_from_slice(endpoint);
    }
}

#[cfg(test)]
fn request_info(request: &[u8]) -> RequestInfo {
    RequestInfo {
        request: Some(request),
        ..RequestInfo::default()
    }
}

// This tests:
//  - the query string and HTTP version are dropped from a full
//    request field
//  - the assembled method/protocol/domain/endpoint form

#[test]
fn test_build_raw_request() {
    let mut out = Vec::new();

    build_raw_request(&request_info(b"GET https://a.b/c?x=1 HTTP/1.1"), &mut out);
    assert!(out == b"GET https://a.b/c");

    build_raw_request(&request_info(b"POST https://a.b/c HTTP/1.1"), &mut out);
    assert!(out == b"POST https://a.b/c");

    build_raw_request(&request_info(b"GET /bare-endpoint"), &mut out);
    assert!(out == b"GET /bare-endpoint");

    let info = RequestInfo {
        method: Some(b"GET"),
        protocol: Some(b"https"),
        domain: Some(b"a.b"),
        endpoint: Some(b"/c"),
        ..RequestInfo::default()
    };
    build_raw_request(&info, &mut out);
    assert!(out == b"GET https://a.b/c");

    let info = RequestInfo {
        method: Some(b"GET"),
        domain: Some(b"a.b"),
        endpoint: Some(b"/c"),
        ..RequestInfo::default()
    };
    build_raw_request(&info, &mut out);
    assert!(out == b"GET a.b/c");
}

// This tests:
//  - equal requests intern to equal ids, distinct ones to distinct
//    dense ids
//  - requests equal after query stripping share an id

#[test]
fn test_intern_dense_ids() {
    let rs = RequestSet::new();
    let tp = TruncatePatterns::empty();

    let a = rs.intern(&request_info(b"GET https://a.b/one HTTP/1.1"), &tp);
    let b = rs.intern(&request_info(b"GET https://a.b/two HTTP/1.1"), &tp);
    let a2 = rs.intern(&request_info(b"GET https://a.b/one?q=2 HTTP/1.1"), &tp);

    assert!(a == 0);
    assert!(b == 1);
    assert!(a2 == a);
    assert!(rs.nrequests() == 2);

    let rt = rs.into_table();
    assert!(rt.len() == 2);
    assert!(rt.request(a) == b"GET https://a.b/one");
    assert!(rt.request(b) == b"GET https://a.b/two");
    assert!(rt.hash(a) == hash64_update(hash64_init(), b"GET https://a.b/one"));
}

// This tests:
//  - truncation patterns collapse variable tokens before interning

#[test]
fn test_intern_canonicalised() {
    let rs = RequestSet::new();
    let tp = TruncatePatterns::parse("$UUID = [0-9a-fA-F-]{36}").unwrap();

    let a = rs.intern(
        &request_info(b"GET /u/AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE"),
        &tp,
    );
    let b = rs.intern(
        &request_info(b"GET /u/11111111-2222-3333-4444-555555555555"),
        &tp,
    );
    assert!(a == b);
    assert!(rs.nrequests() == 1);

    let rt = rs.into_table();
    assert!(rt.request(a) == b"GET /u/$UUID");
}

// This tests:
//  - over-length requests are truncated to the cap

#[test]
fn test_intern_overlength() {
    let rs = RequestSet::new();
    let tp = TruncatePatterns::empty();

    let mut long = b"GET /".to_vec();
    long.extend(std::iter::repeat(b'x').take(2 * REQUEST_LEN_MAX));
    let rid = rs.intern(&request_info(&long), &tp);

    let rt = rs.into_table();
    assert!(rt.request(rid).len() == REQUEST_LEN_MAX);
}

// This tests:
//  - concurrent interning of an overlapping request mix yields dense
//    ids and one entry per unique request

#[test]
fn test_intern_threaded() {
    let rs = RequestSet::new();
    let tp = TruncatePatterns::empty();
    let reqs: Vec<Vec<u8>> = (0..64)
        .map(|i| format!("GET https://a.b/endpoint/{}", i).into_bytes())
        .collect();

    std::thread::scope(|scope| {
        for t in 0..8 {
            let rs = &rs;
            let tp = &tp;
            let reqs = &reqs;
            scope.spawn(move || {
                for round in 0..50 {
                    for (i, req) in reqs.iter().enumerate() {
                        if (i + t + round) % 3 == 0 {
                            rs.intern(&request_info(req), tp);
                        }
                    }
                }
            });
        }
    });

    // Every request was interned by at least one thread.
    let n = rs.nrequests();
    assert!(n == reqs.len());

    let rt = rs.into_table();
    let mut seen = vec![false; n];
    for rid in 0..n as u64 {
        assert!(!rt.request(rid).is_empty());
        assert!(!seen[rid as usize]);
        seen[rid as usize] = true;
    }
    assert!(seen.iter().all(|&s| s));
}
