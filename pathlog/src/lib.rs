/// An HTTP access log is a stream of requests from many clients at
/// once.  This library reconstructs *sessions* from such a log — the
/// requests attributable to a common origin, identified by a hash over
/// chosen session key fields (source address and/or user agent) — and
/// aggregates the transitions between consecutive requests of every
/// session into a weighted, directed *path graph*: vertices are
/// canonicalised requests, edges carry hit counts and the average
/// duration of the transition, and every vertex knows the shallowest
/// position at which it ever appeared in a session.
///
/// The library is built for multi-gigabyte inputs.  The log is
/// memory-mapped and scanned by parallel workers over near-equal
/// chunks; workers share two striped-lock tables (the request
/// interner and the session map) and nothing else.  The layout of a
/// line is inferred once from line 0 and applied verbatim to every
/// other line; lines that do not fit are dropped, because real logs
/// are noisy and strict validation is someone else's job.
///
/// The processing pipeline, in order:
///
/// - map the log (`LogView`);
/// - infer the scan plan from line 0 (`LineSchema`);
/// - scan in parallel, interning requests and appending to sessions
///   (`scan_log`, `RequestSet`, `SessionMap`);
/// - freeze the interner into the dense table (`RequestSet::into_table`);
/// - build the graph single-threaded (`PathGraph::build`).
mod dates;
mod fields;
mod graph;
mod hash;
mod logview;
mod pattern;
mod request;
mod scan;
mod schema;
mod session;
mod truncate;
mod util;

// Read-only byte view of the input log.

pub use logview::LogView;

// Split a line into field views; the per-line field cap.

pub use fields::get_fields;
pub use fields::NALL_FIELDS_MAX;

// The field kinds a column can be classified as, the per-column
// record, and the scan plan inferred from line 0.

pub use schema::FieldInfo;
pub use schema::FieldKind;
pub use schema::LineSchema;

// Approximate timestamp decoding (constant-length months; fast, not
// calendar-accurate, by design).

pub use dates::{date_to_ms, rfc3339_no_ms_to_ms, rfc3339_to_ms, time_to_ms};

// FNV-1a 64, the hash under session ids, request identity and bucket
// striping.

pub use hash::{hash64_init, hash64_update, hash64_update_ipaddr};

// Truncation patterns: the canonicalising rewrites applied to raw
// requests before interning.

pub use truncate::TruncatePatterns;
pub use truncate::TRUNCATE_NPATTERNS_MAX;

// The concurrent request interner, its dense id type, and the table
// it freezes into after the scan.

pub use request::RequestId;
pub use request::RequestInfo;
pub use request::RequestSet;
pub use request::RequestTable;
pub use request::REQUEST_ID_INVALID;
pub use request::REQUEST_LEN_MAX;

// The concurrent session map and its entry types.

pub use session::SessionEntry;
pub use session::SessionId;
pub use session::SessionMap;
pub use session::SessionRequest;

// The parallel scan driver and its statistics.

pub use scan::scan_log;
pub use scan::ScanStats;
pub use scan::{MT_THRESHOLD, NTHREADS_DEFAULT, NTHREADS_MAX};

// The finished path graph.

pub use graph::PathGraph;
pub use graph::PathGraphEdge;
pub use graph::PathGraphVertex;
