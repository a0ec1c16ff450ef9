/// Session map: striped hash map from 64-bit session ids to the
/// timestamped requests observed for each session.
///
/// Requests are appended in arrival order, which is not wall-clock
/// order: chunks are scanned in parallel, so two halves of a session
/// may arrive interleaved.  Nothing is sorted or deduplicated here;
/// the graph builder re-establishes time order with a per-session
/// sort after the workers join.
use parking_lot::Mutex;

use crate::hash::{hash64_init, hash64_update};
use crate::request::RequestId;

pub type SessionId = u64;

pub const SESSION_MAP_NBUCKETS: usize = 1 << 16;
const SESSION_MAP_BUCKET_MASK: u64 = (SESSION_MAP_NBUCKETS as u64) - 1;

const SESSION_INIT_CAPREQUESTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRequest {
    pub rid: RequestId,
    pub ts: u64,
}

pub struct SessionEntry {
    pub sid: SessionId,
    pub requests: Vec<SessionRequest>,
}

pub struct SessionMap {
    buckets: Vec<Mutex<Vec<SessionEntry>>>,
}

impl SessionMap {
    pub fn new() -> SessionMap {
        let mut buckets = Vec::with_capacity(SESSION_MAP_NBUCKETS);
        buckets.resize_with(SESSION_MAP_NBUCKETS, || Mutex::new(Vec::new()));
        SessionMap { buckets }
    }

    /// Record one request observation for the session `sid`.
    pub fn amend(&self, sid: SessionId, ts: u64, rid: RequestId) {
        // Session ids are hashes already, but mix them once more so
        // the masked bucket index is well distributed.
        let idx = hash64_update(hash64_init(), &sid.to_ne_bytes()) & SESSION_MAP_BUCKET_MASK;
        let mut entries = self.buckets[idx as usize].lock();
        for entry in entries.iter_mut() {
            if entry.sid == sid {
                entry.requests.push(SessionRequest { rid, ts });
                return;
            }
        }
        let mut requests = Vec::with_capacity(SESSION_INIT_CAPREQUESTS);
        requests.push(SessionRequest { rid, ts });
        entries.push(SessionEntry { sid, requests });
    }

    pub fn nsessions(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    /// Drain the map into a flat entry list, in bucket order.
    pub fn into_entries(self) -> Vec<SessionEntry> {
        let mut out = Vec::new();
        for bucket in self.buckets {
            out.extend(bucket.into_inner());
        }
        out
    }
}

impl Default for SessionMap {
    fn default() -> SessionMap {
        SessionMap::new()
    }
}

// This tests:
//  - appends stay in call order within one session
//  - distinct session ids get distinct entries

#[test]
fn test_amend_and_drain() {
    let sm = SessionMap::new();
    sm.amend(7, 3000, 0);
    sm.amend(7, 1000, 1);
    sm.amend(9, 2000, 0);
    sm.amend(7, 2000, 2);

    assert!(sm.nsessions() == 2);

    let mut entries = sm.into_entries();
    entries.sort_by_key(|e| e.sid);
    assert!(entries.len() == 2);
    assert!(entries[0].sid == 7);
    assert!(
        entries[0].requests
            == vec![
                SessionRequest { rid: 0, ts: 3000 },
                SessionRequest { rid: 1, ts: 1000 },
                SessionRequest { rid: 2, ts: 2000 },
            ]
    );
    assert!(entries[1].sid == 9);
    assert!(entries[1].requests == vec![SessionRequest { rid: 0, ts: 2000 }]);
}

// This tests:
//  - a session's vector starts with the expected initial capacity and
//    grows without shrinking

#[test]
fn test_amend_growth() {
    let sm = SessionMap::new();
    for i in 0..100u64 {
        sm.amend(42, i, i);
    }
    let entries = sm.into_entries();
    assert!(entries.len() == 1);
    assert!(entries[0].requests.len() == 100);
    assert!(entries[0].requests.capacity() >= 100);
}

// This tests:
//  - concurrent appends to a shared session lose nothing

#[test]
fn test_amend_threaded() {
    let sm = SessionMap::new();
    std::thread::scope(|scope| {
        for t in 0..8u64 {
            let sm = &sm;
            scope.spawn(move || {
                for i in 0..1000u64 {
                    sm.amend(5, t * 10_000 + i, i);
                    sm.amend(100 + t, i, i);
                }
            });
        }
    });

    let entries = sm.into_entries();
    assert!(entries.len() == 9);
    let shared = entries.iter().find(|e| e.sid == 5).unwrap();
    assert!(shared.requests.len() == 8000);
    for t in 0..8u64 {
        let own = entries.iter().find(|e| e.sid == 100 + t).unwrap();
        assert!(own.requests.len() == 1000);
    }
}
