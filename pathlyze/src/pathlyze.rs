/// `pathlyze` -- build call-path graphs from HTTP access logs
///
/// Reads an access log, reconstructs per-client sessions, and emits a
/// weighted directed graph of the request-to-request transitions seen
/// inside those sessions.  Run with --help for the option summary.
///
/// Quirks
///
/// The first line of the log decides the schema for the whole file.
/// If a log changes shape mid-file (rotated logs with different
/// formats catenated together), the lines with a differing field
/// count are silently dropped; use --verbose to see how many.
///
/// Session identity defaults to the pair (source address, user agent).
/// If the log carries no user agent column, that default makes schema
/// inference fail; pass --session ipaddr in that case.
mod dot;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process;

use anyhow::{bail, Result};
use clap::Parser;
use pathlog::{
    scan_log, LineSchema, LogView, PathGraph, RequestSet, ScanStats, SessionMap, TruncatePatterns,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Access log file containing HTTP request timestamps, addresses,
    /// methods, URLs and user agent headers
    log_file: String,

    /// Number of scan threads [default: one per logical CPU]
    #[arg(long, short = 'C', value_parser = clap::value_parser!(u64).range(1..=4096))]
    concurrency: Option<u64>,

    /// Custom field indices, e.g. 'ipaddr=2,request=5' (zero-based)
    #[arg(long, short = 'i')]
    index: Option<String>,

    /// Fields that identify a session, from {ipaddr, useragent}
    #[arg(long, short = 'S', default_value = "ipaddr,useragent")]
    session: String,

    /// File containing URL patterns for truncating requests
    #[arg(long, short = 'T')]
    truncate_patterns: Option<String>,

    /// Output format [possible values: dot-graph]
    #[arg(long, short = 'f', default_value = "dot-graph")]
    format: String,

    /// Output destination, '-' for stdout
    #[arg(long, short = 'o', default_value = "-")]
    output: String,

    /// Print scan statistics to stderr
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() {
    match pathlyze() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            process::exit(1);
        }
    }
}

fn pathlyze() -> Result<()> {
    let cli = Cli::parse();

    let log = LogView::open(&cli.log_file)?;
    let patterns = match &cli.truncate_patterns {
        Some(path) => TruncatePatterns::from_file(path)?,
        None => TruncatePatterns::empty(),
    };

    let requests = RequestSet::new();
    let sessions = SessionMap::new();
    let mut stats = ScanStats::default();

    // An empty log has no line 0 to infer a schema from; it is still a
    // legal input and produces the empty graph.
    if !log.bytes().is_empty() {
        let schema = LineSchema::infer(log.bytes(), cli.index.as_deref(), &cli.session)?;
        stats = scan_log(
            log.bytes(),
            &schema,
            &patterns,
            &requests,
            &sessions,
            cli.concurrency.map(|n| n as usize),
        )?;
    }

    let nsessions = sessions.nsessions();
    let table = requests.into_table();
    let graph = PathGraph::build(table.len(), sessions.into_entries());

    if cli.verbose {
        eprintln!("Access log: {}", log.path().display());
        eprintln!("Lines scanned: {}", stats.nlines);
        eprintln!("Lines skipped: {}", stats.nskipped);
        eprintln!("Fields iterated: {}", stats.nfields);
        eprintln!("Unique requests: {}", table.len());
        eprintln!("Sessions: {}", nsessions);
        eprintln!(
            "Graph: {} vertices, {} unique edges, {} hits",
            graph.vertices.len(),
            graph.total_nedges,
            graph.total_nhits
        );
    }

    let stdout = io::stdout();
    let mut out: Box<dyn Write> = if cli.output == "-" {
        Box::new(stdout.lock())
    } else {
        match File::create(&cli.output) {
            Ok(f) => Box::new(BufWriter::new(f)),
            Err(e) => bail!("failed to create output file '{}': {}", cli.output, e),
        }
    };

    match cli.format.as_str() {
        "dot-graph" => dot::write_dot_graph(&mut out, &graph, &table)?,
        other => bail!("unknown output format: '{}'", other),
    }
    out.flush()?;

    Ok(())
}

// This tests:
//  - the argument surface: defaults, the concurrency range, and the
//    required positional

#[test]
fn test_cli_parsing() {
    let cli = Cli::try_parse_from(["pathlyze", "access.log"]).unwrap();
    assert!(cli.log_file == "access.log");
    assert!(cli.concurrency.is_none());
    assert!(cli.session == "ipaddr,useragent");
    assert!(cli.format == "dot-graph");
    assert!(cli.output == "-");
    assert!(!cli.verbose);

    let cli = Cli::try_parse_from([
        "pathlyze",
        "-C",
        "8",
        "-S",
        "ipaddr",
        "-i",
        "ipaddr=2",
        "-f",
        "dot-graph",
        "-o",
        "out.dot",
        "-v",
        "access.log",
    ])
    .unwrap();
    assert!(cli.concurrency == Some(8));
    assert!(cli.session == "ipaddr");
    assert!(cli.index.as_deref() == Some("ipaddr=2"));
    assert!(cli.output == "out.dot");
    assert!(cli.verbose);

    assert!(Cli::try_parse_from(["pathlyze"]).is_err());
    assert!(Cli::try_parse_from(["pathlyze", "a.log", "b.log"]).is_err());
    assert!(Cli::try_parse_from(["pathlyze", "-C", "0", "a.log"]).is_err());
    assert!(Cli::try_parse_from(["pathlyze", "-C", "5000", "a.log"]).is_err());
}
