/// Path-graph builder.  Runs single-threaded after the scan workers
/// have joined.
///
/// Every session's request list is stable-sorted by timestamp, then
/// each consecutive pair contributes a hit to the source vertex and to
/// the edge between the pair; the final request contributes one more
/// hit with no successor.  Edge durations are kept as a cumulative
/// moving average, so an edge observed k times with durations d1..dk
/// carries their arithmetic mean.
///
/// Depth is the 1-based position of a request within its session after
/// the time sort, except that a self-loop does not advance it; a
/// vertex records the minimum depth at which it was ever seen.
use crate::request::{RequestId, REQUEST_ID_INVALID};
use crate::session::{SessionEntry, SessionRequest};

const VERTEX_INIT_CAPEDGES: usize = 8;

#[derive(Debug, Clone)]
pub struct PathGraphEdge {
    /// Target request of this outward edge.
    pub rid: RequestId,
    pub nhits: u64,
    /// Cumulative moving average of the transition duration, in
    /// milliseconds.
    pub duration_cma: f64,
}

#[derive(Debug, Clone)]
pub struct PathGraphVertex {
    pub rid: RequestId,
    pub edges: Vec<PathGraphEdge>,
    pub nhits_in: u64,
    pub nhits_out: u64,
    pub min_depth: u64,
}

pub struct PathGraph {
    /// Vertices sorted by (min_depth, nhits_in + nhits_out), both
    /// ascending; each vertex's edges sorted by nhits, ascending.
    pub vertices: Vec<PathGraphVertex>,
    pub total_nhits: u64,
    /// Unique edge count.
    pub total_nedges: u64,
    /// Sum of every edge's hit count.
    pub total_edge_nhits: u64,
}

impl PathGraph {
    pub fn build(nrequests: usize, mut sessions: Vec<SessionEntry>) -> PathGraph {
        let mut slots: Vec<Option<PathGraphVertex>> = Vec::new();
        slots.resize_with(nrequests, || None);
        let mut total_nhits = 0u64;
        let mut total_nedges = 0u64;

        for entry in sessions.iter_mut() {
            entry.requests.sort_by_key(|r| r.ts);
            let mut depth = 1u64;
            for r in 0..entry.requests.len() {
                let SessionRequest { rid, ts } = entry.requests[r];
                let (edge_rid, edge_ts) = match entry.requests.get(r + 1) {
                    Some(next) => (next.rid, next.ts),
                    None => (REQUEST_ID_INVALID, 0),
                };
                amend_vertex(
                    &mut slots,
                    &mut total_nhits,
                    &mut total_nedges,
                    depth,
                    rid,
                    edge_rid,
                    ts,
                    edge_ts,
                );
                if rid != edge_rid {
                    depth += 1;
                }
            }
        }

        let mut vertices: Vec<PathGraphVertex> = slots.into_iter().flatten().collect();
        let total_edge_nhits = vertices
            .iter()
            .flat_map(|v| v.edges.iter())
            .map(|e| e.nhits)
            .sum();

        vertices.sort_by(|a, b| {
            a.min_depth
                .cmp(&b.min_depth)
                .then((a.nhits_in + a.nhits_out).cmp(&(b.nhits_in + b.nhits_out)))
        });
        for vertex in vertices.iter_mut() {
            vertex.edges.sort_by_key(|e| e.nhits);
        }

        PathGraph {
            vertices,
            total_nhits,
            total_nedges,
            total_edge_nhits,
        }
    }

    pub fn vertex(&self, rid: RequestId) -> Option<&PathGraphVertex> {
        self.vertices.iter().find(|v| v.rid == rid)
    }
}

fn amend_vertex(
    slots: &mut [Option<PathGraphVertex>],
    total_nhits: &mut u64,
    total_nedges: &mut u64,
    depth: u64,
    rid: RequestId,
    edge_rid: RequestId,
    ts: u64,
    edge_ts: u64,
) {
    let vertex = slots[rid as usize].get_or_insert_with(|| PathGraphVertex {
        rid,
        edges: Vec::with_capacity(VERTEX_INIT_CAPEDGES),
        nhits_in: 0,
        nhits_out: 0,
        min_depth: depth,
    });
    vertex.min_depth = vertex.min_depth.min(depth);
    vertex.nhits_in += 1;
    *total_nhits += 1;

    if edge_rid == REQUEST_ID_INVALID {
        return;
    }

    let duration = edge_ts as f64 - ts as f64;
    if let Some(edge) = vertex.edges.iter_mut().find(|e| e.rid == edge_rid) {
        edge.duration_cma =
            (duration + edge.nhits as f64 * edge.duration_cma) / (edge.nhits as f64 + 1.0);
        edge.nhits += 1;
        vertex.nhits_out += 1;
        return;
    }

    vertex.edges.push(PathGraphEdge {
        rid: edge_rid,
        nhits: 1,
        duration_cma: duration,
    });
    vertex.nhits_out += 1;
    *total_nedges += 1;
}

#[cfg(test)]
fn session(sid: u64, requests: &[(RequestId, u64)]) -> SessionEntry {
    SessionEntry {
        sid,
        requests: requests
            .iter()
            .map(|&(rid, ts)| SessionRequest { rid, ts })
            .collect(),
    }
}

#[cfg(test)]
fn edge<'a>(v: &'a PathGraphVertex, rid: RequestId) -> &'a PathGraphEdge {
    v.edges.iter().find(|e| e.rid == rid).unwrap()
}

// This tests:
//  - the A B A B session: hit counts, durations, and minimum depths

#[test]
fn test_build_alternating() {
    // One session, requests A(0) and B(1) at one-second steps.
    let sessions = vec![session(1, &[(0, 1000), (1, 2000), (0, 3000), (1, 4000)])];
    let pg = PathGraph::build(2, sessions);

    assert!(pg.vertices.len() == 2);
    assert!(pg.total_nhits == 4);
    assert!(pg.total_nedges == 2);
    assert!(pg.total_edge_nhits == 3);

    let a = pg.vertex(0).unwrap();
    let b = pg.vertex(1).unwrap();
    assert!(a.nhits_in == 2);
    assert!(b.nhits_in == 2);
    assert!(a.min_depth == 1);
    assert!(b.min_depth == 2);

    let ab = edge(a, 1);
    assert!(ab.nhits == 2);
    assert!(ab.duration_cma == 1000.0);
    let ba = edge(b, 0);
    assert!(ba.nhits == 1);
    assert!(ba.duration_cma == 1000.0);
}

// This tests:
//  - two sessions over the same transition: the edge hit count sums
//    and the duration averages across sessions

#[test]
fn test_build_two_sessions() {
    // login(0) -> data(1), with durations 1000 and 3000.
    let sessions = vec![
        session(1, &[(0, 1000), (1, 2000)]),
        session(2, &[(0, 5000), (1, 8000)]),
    ];
    let pg = PathGraph::build(2, sessions);

    let login = pg.vertex(0).unwrap();
    let data = pg.vertex(1).unwrap();
    assert!(login.nhits_in == 2);
    assert!(data.nhits_in == 2);
    assert!(login.min_depth == 1);
    assert!(data.min_depth == 2);

    let e = edge(login, 1);
    assert!(e.nhits == 2);
    assert!(e.duration_cma == 2000.0);
    assert!(data.edges.is_empty());
}

// This tests:
//  - self-loops: the edge accumulates, and depth does not advance

#[test]
fn test_build_self_loop() {
    let sessions = vec![session(1, &[(0, 1000), (0, 2000), (0, 3000)])];
    let pg = PathGraph::build(1, sessions);

    let health = pg.vertex(0).unwrap();
    assert!(health.nhits_in == 3);
    assert!(health.min_depth == 1);
    let e = edge(health, 0);
    assert!(e.nhits == 2);
    assert!(e.duration_cma == 1000.0);
    assert!(pg.total_nhits == 3);
    assert!(pg.total_nedges == 1);
}

// This tests:
//  - arrival order does not matter: the builder re-sorts by timestamp

#[test]
fn test_build_sorts_by_timestamp() {
    let shuffled = vec![session(1, &[(1, 2000), (0, 3000), (1, 4000), (0, 1000)])];
    let pg = PathGraph::build(2, shuffled);

    let a = pg.vertex(0).unwrap();
    assert!(a.min_depth == 1);
    assert!(edge(a, 1).nhits == 2);
    let b = pg.vertex(1).unwrap();
    assert!(edge(b, 0).nhits == 1);
}

// This tests:
//  - hit-count bookkeeping invariants over a larger mixed input:
//    total_nhits is the sum of vertex in-hits, total_nedges the number
//    of unique edges, total_edge_nhits the sum over edge hits

#[test]
fn test_build_invariants() {
    let sessions = vec![
        session(1, &[(0, 1000), (1, 2000), (2, 3000), (0, 4000)]),
        session(2, &[(2, 1000), (2, 1500), (1, 2500)]),
        session(3, &[(3, 100)]),
        session(4, &[(1, 10), (3, 20), (1, 30), (3, 40), (1, 50)]),
    ];
    let pg = PathGraph::build(4, sessions);

    let sum_in: u64 = pg.vertices.iter().map(|v| v.nhits_in).sum();
    assert!(sum_in == pg.total_nhits);
    assert!(pg.total_nhits == 13);

    let nedges: u64 = pg.vertices.iter().map(|v| v.edges.len() as u64).sum();
    assert!(nedges == pg.total_nedges);

    let edge_nhits: u64 = pg
        .vertices
        .iter()
        .flat_map(|v| v.edges.iter())
        .map(|e| e.nhits)
        .sum();
    assert!(edge_nhits == pg.total_edge_nhits);

    let sum_out: u64 = pg.vertices.iter().map(|v| v.nhits_out).sum();
    assert!(sum_out == pg.total_edge_nhits);
}

// This tests:
//  - vertices are sorted by (min_depth, combined hits) ascending and
//    edges by hits ascending

#[test]
fn test_build_sort_order() {
    let sessions = vec![
        session(1, &[(0, 1000), (1, 2000), (0, 3000), (2, 4000), (0, 5000)]),
        session(2, &[(1, 1000), (2, 2000)]),
    ];
    let pg = PathGraph::build(3, sessions);

    for pair in pg.vertices.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let ka = (a.min_depth, a.nhits_in + a.nhits_out);
        let kb = (b.min_depth, b.nhits_in + b.nhits_out);
        assert!(ka <= kb);
    }
    for vertex in &pg.vertices {
        for pair in vertex.edges.windows(2) {
            assert!(pair[0].nhits <= pair[1].nhits);
        }
    }
}

// This tests:
//  - no sessions at all yields the empty graph

#[test]
fn test_build_empty() {
    let pg = PathGraph::build(0, Vec::new());
    assert!(pg.vertices.is_empty());
    assert!(pg.total_nhits == 0);
    assert!(pg.total_nedges == 0);
    assert!(pg.total_edge_nhits == 0);
}
