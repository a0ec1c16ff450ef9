/// Graphviz dot renderer for the finished path graph.
///
/// Vertices arrive sorted by minimum depth, so each run of equal
/// depths becomes one same-rank subgraph and the graph reads
/// left-to-right in call order.  Visual weight (font size, pen width)
/// scales with the square root of a vertex's or edge's share of the
/// total hits; node colors are derived from the request hash with the
/// high bit of each channel forced, so labels stay readable.
use std::io::Write;

use anyhow::Result;

use pathlog::{PathGraph, PathGraphVertex, RequestTable};

const WEAK_FONT_SIZE: u32 = 14;
const STRONG_FONT_SIZE: u32 = 3 * WEAK_FONT_SIZE;
const FONT_SCALE: u32 = STRONG_FONT_SIZE - WEAK_FONT_SIZE;

const WEAK_PEN_WIDTH: f64 = 2.0;
const STRONG_PEN_WIDTH: f64 = 6.0;
const PEN_WIDTH_SCALE: f64 = STRONG_PEN_WIDTH - WEAK_PEN_WIDTH;

fn weight(total_nhits: u64, nhits: u64) -> f64 {
    if total_nhits == 0 {
        return 0.0;
    }
    (nhits as f64 / total_nhits as f64).sqrt()
}

fn font_size(weight: f64) -> u32 {
    WEAK_FONT_SIZE + (weight * FONT_SCALE as f64) as u32
}

fn pen_width(weight: f64) -> f64 {
    WEAK_PEN_WIDTH + weight * PEN_WIDTH_SCALE
}

fn node_color(hash: u64) -> u32 {
    let r = 0x80 | ((hash >> 16) & 0xff) as u32;
    let g = 0x80 | ((hash >> 8) & 0xff) as u32;
    let b = 0x80 | (hash & 0xff) as u32;
    (r << 16) | (g << 8) | b
}

fn darken(color: u32, mult: f64) -> u32 {
    let r = (((color >> 16) & 0xff) as f64 * mult) as u32;
    let g = (((color >> 8) & 0xff) as f64 * mult) as u32;
    let b = ((color & 0xff) as f64 * mult) as u32;
    (r << 16) | (g << 8) | b
}

fn escape_label(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

pub fn write_dot_graph(out: &mut dyn Write, pg: &PathGraph, rt: &RequestTable) -> Result<()> {
    writeln!(out, "digraph path_graph {{")?;
    writeln!(out, "    nodesep=1.0;")?;
    writeln!(out, "    rankdir=LR;")?;
    writeln!(out, "    ranksep=1.0;")?;
    writeln!(out)?;

    // One same-rank subgraph per run of equal minimum depth.
    let mut subgraph_id = 0u64;
    let mut i = 0;
    while i < pg.vertices.len() {
        let depth = pg.vertices[i].min_depth;
        writeln!(out, "    subgraph s{} {{", subgraph_id)?;
        writeln!(out, "        rank = same;")?;
        while i < pg.vertices.len() && pg.vertices[i].min_depth == depth {
            write_vertex(out, pg, rt, &pg.vertices[i])?;
            i += 1;
        }
        writeln!(out, "    }}")?;
        writeln!(out)?;
        subgraph_id += 1;
    }

    // Depth per request id, for the edge styles; the sorted vertex
    // list is not indexed by id.
    let mut depth_by_rid = vec![0u64; rt.len()];
    for vertex in &pg.vertices {
        depth_by_rid[vertex.rid as usize] = vertex.min_depth;
    }

    for vertex in &pg.vertices {
        for edge in &vertex.edges {
            let pct = 100.0 * edge.nhits as f64 / pg.total_edge_nhits as f64;
            let w = weight(pg.total_nhits, edge.nhits);
            let style = if vertex.rid == edge.rid {
                "dotted"
            } else if depth_by_rid[vertex.rid as usize] <= depth_by_rid[edge.rid as usize] {
                "solid"
            } else {
                "dashed"
            };
            let color = node_color(rt.hash(vertex.rid));
            writeln!(
                out,
                "    r{} -> r{} [xlabel=\"{:.2}% ({})\\n{:.1}s\", \
                 fontsize={}, style=\"{}\", color=\"#{:06x}\", \
                 fontcolor=\"#{:06x}\", penwidth={:.2}];",
                vertex.rid,
                edge.rid,
                pct,
                edge.nhits,
                edge.duration_cma / 1000.0,
                font_size(w),
                style,
                darken(color, 0.8),
                darken(color, 0.6),
                pen_width(w)
            )?;
        }
    }

    writeln!(out, "}}")?;
    Ok(())
}

fn write_vertex(
    out: &mut dyn Write,
    pg: &PathGraph,
    rt: &RequestTable,
    vertex: &PathGraphVertex,
) -> Result<()> {
    let pct_in = 100.0 * vertex.nhits_in as f64 / pg.total_nhits as f64;
    let pct_out = 100.0 * vertex.nhits_out as f64 / vertex.nhits_in as f64;
    let w = weight(pg.total_nhits, vertex.nhits_in);
    writeln!(
        out,
        "        r{} [label=\"{}\\n(in {:.2}% ({}), out {:.2}% ({}))\", \
         fontsize={}, style=filled, fillcolor=\"#{:06x}\", penwidth={:.2}];",
        vertex.rid,
        escape_label(rt.request(vertex.rid)),
        pct_in,
        vertex.nhits_in,
        pct_out,
        vertex.nhits_out,
        font_size(w),
        node_color(rt.hash(vertex.rid)),
        pen_width(w)
    )?;
    Ok(())
}

#[cfg(test)]
fn fixture() -> (PathGraph, RequestTable) {
    use pathlog::{
        LineSchema, RequestSet, SessionMap, TruncatePatterns, scan_log,
    };

    let log: &[u8] = b"10.0.0.1 2023-10-12T07:33:14.000 \"GET http://a.b/login HTTP/1.1\"\n\
10.0.0.1 2023-10-12T07:33:15.000 \"GET http://a.b/data HTTP/1.1\"\n\
10.0.0.1 2023-10-12T07:33:16.000 \"GET http://a.b/data HTTP/1.1\"\n";
    let schema = LineSchema::infer(log, None, "ipaddr").unwrap();
    let requests = RequestSet::new();
    let sessions = SessionMap::new();
    scan_log(
        log,
        &schema,
        &TruncatePatterns::empty(),
        &requests,
        &sessions,
        None,
    )
    .unwrap();
    let table = requests.into_table();
    let graph = PathGraph::build(table.len(), sessions.into_entries());
    (graph, table)
}

// This tests:
//  - the rendered output is a well-formed digraph with one node line
//    per vertex and one edge line per edge
//  - self-loops are dotted and forward edges solid

#[test]
fn test_write_dot_graph() {
    let (graph, table) = fixture();
    let mut buf = Vec::new();
    write_dot_graph(&mut buf, &graph, &table).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.starts_with("digraph path_graph {"));
    assert!(text.trim_end().ends_with("}"));
    assert!(text.contains("GET http://a.b/login"));
    assert!(text.contains("GET http://a.b/data"));
    assert!(text.matches("rank = same;").count() == 2);
    assert!(text.contains("r0 -> r1"));
    assert!(text.contains("style=\"solid\""));
    assert!(text.contains("r1 -> r1"));
    assert!(text.contains("style=\"dotted\""));
}

// This tests:
//  - an empty graph renders to a valid, empty digraph

#[test]
fn test_write_empty_graph() {
    let graph = PathGraph::build(0, Vec::new());
    let table = pathlog::RequestSet::new().into_table();
    let mut buf = Vec::new();
    write_dot_graph(&mut buf, &graph, &table).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.starts_with("digraph path_graph {"));
    assert!(!text.contains("subgraph"));
    assert!(!text.contains("->"));
}

// This tests:
//  - label escaping of quotes and backslashes

#[test]
fn test_escape_label() {
    assert!(escape_label(b"GET /plain") == "GET /plain");
    assert!(escape_label(b"GET /q\"uo\\te") == "GET /q\\\"uo\\\\te");
}
