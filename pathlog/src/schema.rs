/// Line schema inference.
///
/// The first line of the log decides the layout of every line: the
/// inferencer tokenises line 0, classifies each column by trying the
/// anchored field patterns in a fixed order, honours `--index`
/// overrides and the `--session` key selection, and produces the scan
/// plan that every worker applies to every subsequent line.
///
/// Classification is deliberately liberal.  Logs are noisy and the
/// patterns are only used to find columns, not to validate them; the
/// scan itself never re-matches a field.
use anyhow::Result;
use regex::bytes::Regex;

use crate::fields::{get_fields, NALL_FIELDS_MAX};
use crate::pattern::{compile_pattern, does_match};
use crate::{errx, warnx};

/// Everything a column can be recognised as.  "Unknown" is expressed
/// as the absence of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Rfc3339,
    Rfc3339NoMs,
    Date,
    Time,
    Ipaddr,
    Useragent,
    Request,
    Method,
    Protocol,
    Domain,
    Endpoint,
}

pub const NFIELD_KINDS: usize = 11;

// Classification order; the first matching kind claims the column.
// Rfc3339NoMs is not probed (its pattern equals Rfc3339's and only the
// decoders differ); it stays reachable through an `--index` override.
const CLASSIFY_ORDER: [FieldKind; 10] = [
    FieldKind::Rfc3339,
    FieldKind::Date,
    FieldKind::Time,
    FieldKind::Ipaddr,
    FieldKind::Useragent,
    FieldKind::Request,
    FieldKind::Method,
    FieldKind::Protocol,
    FieldKind::Domain,
    FieldKind::Endpoint,
];

// Classification probes at most this many leading bytes of a field.
const CLASSIFY_PROBE_MAX: usize = 4096;

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Rfc3339 => "rfc3339",
            FieldKind::Rfc3339NoMs => "rfc3339-no-ms",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::Ipaddr => "ipaddr",
            FieldKind::Useragent => "useragent",
            FieldKind::Request => "request",
            FieldKind::Method => "method",
            FieldKind::Protocol => "protocol",
            FieldKind::Domain => "domain",
            FieldKind::Endpoint => "endpoint",
        }
    }

    fn from_str(s: &str) -> Option<FieldKind> {
        match s {
            "rfc3339" => Some(FieldKind::Rfc3339),
            "rfc3339-no-ms" => Some(FieldKind::Rfc3339NoMs),
            "date" => Some(FieldKind::Date),
            "time" => Some(FieldKind::Time),
            "ipaddr" => Some(FieldKind::Ipaddr),
            "useragent" => Some(FieldKind::Useragent),
            "request" => Some(FieldKind::Request),
            "method" => Some(FieldKind::Method),
            "protocol" => Some(FieldKind::Protocol),
            "domain" => Some(FieldKind::Domain),
            "endpoint" => Some(FieldKind::Endpoint),
            _ => None,
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            FieldKind::Rfc3339 | FieldKind::Rfc3339NoMs => {
                r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}"
            }
            FieldKind::Date => r"^[0-9]{4}-[0-9]{2}-[0-9]{2}",
            FieldKind::Time => r"^[0-9]{2}:[0-9]{2}:[0-9]{2}",
            FieldKind::Ipaddr => r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}",
            FieldKind::Useragent => r"^(Mozilla|http-kit)",
            FieldKind::Request => r"^(GET|HEAD|POST|PUT|OPTIONS|PATCH)\s+(http|https)://.+",
            FieldKind::Method => r"^(GET|HEAD|POST|PUT|OPTIONS|PATCH)$",
            FieldKind::Protocol => r"^(http|https)$",
            FieldKind::Domain => r"^.+\..+$",
            FieldKind::Endpoint => r"^/.+$",
        }
    }
}

/// One scan-plan entry: which column carries which kind of field.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub kind: FieldKind,
    pub index: usize,
    pub nmatches: usize,
    pub is_session: bool,
    pub is_custom: bool,
}

/// The scan plan: the ordered column extractions a worker performs on
/// each line, plus the field count every line must have to be
/// scanned at all.
#[derive(Debug)]
pub struct LineSchema {
    nall_fields: usize,
    scan_fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone, Copy, Default)]
struct KindState {
    index: Option<usize>,
    nmatches: usize,
    is_session: bool,
    is_custom: bool,
}

impl LineSchema {
    /// Infer the schema from line 0 of `log`, honouring `kind=col`
    /// overrides in `index_fields` and the comma-separated session key
    /// selection in `session_fields`.
    pub fn infer(
        log: &[u8],
        index_fields: Option<&str>,
        session_fields: &str,
    ) -> Result<LineSchema> {
        let mut classifiers = Vec::with_capacity(CLASSIFY_ORDER.len());
        for kind in CLASSIFY_ORDER {
            classifiers.push((kind, compile_pattern(kind.pattern())?));
        }

        let mut total = [KindState::default(); NFIELD_KINDS];
        parse_session_fields(&mut total, session_fields)?;

        let mut fvs: Vec<&[u8]> = Vec::new();
        get_fields(log, 0, NALL_FIELDS_MAX, true, &mut fvs);
        let nall_fields = fvs.len();
        if nall_fields == NALL_FIELDS_MAX {
            warnx!(
                "found possibly more than {} fields, ignoring the rest",
                NALL_FIELDS_MAX
            );
        }

        // Which columns are already claimed, and by what.
        let mut active: Vec<Option<FieldKind>> = vec![None; nall_fields];

        if let Some(index_fields) = index_fields {
            apply_overrides(&mut total, &mut active, &fvs, index_fields)?;
        }

        for (idx, fv) in fvs.iter().enumerate() {
            if active[idx].is_some() {
                // Designated by an override; inference keeps out.
                continue;
            }
            if let Some(kind) = classify(&classifiers, fv) {
                amend(&mut total, &mut active, kind, idx);
            }
        }

        let scan_fields = assemble_scan_plan(&total)?;
        Ok(LineSchema {
            nall_fields,
            scan_fields,
        })
    }

    /// The field count of line 0; lines with any other count are
    /// skipped by the scan.
    pub fn nall_fields(&self) -> usize {
        self.nall_fields
    }

    pub fn scan_fields(&self) -> &[FieldInfo] {
        &self.scan_fields
    }
}

fn classify(classifiers: &[(FieldKind, Regex)], fv: &[u8]) -> Option<FieldKind> {
    let probe = &fv[..fv.len().min(CLASSIFY_PROBE_MAX)];
    for (kind, re) in classifiers {
        if does_match(re, probe) {
            return Some(*kind);
        }
    }
    None
}

fn amend(
    total: &mut [KindState; NFIELD_KINDS],
    active: &mut [Option<FieldKind>],
    kind: FieldKind,
    idx: usize,
) {
    let st = &mut total[kind as usize];
    if st.is_custom {
        return;
    }
    if st.index.is_none() {
        st.index = Some(idx);
        active[idx] = Some(kind);
    }
    st.nmatches += 1;
    if st.nmatches > 1 {
        warnx!(
            "multiple matches for field '{}', consider using the \
             '--index {}=...' command line option for specifying a \
             custom field index",
            kind.as_str(),
            kind.as_str()
        );
    }
}

fn parse_session_fields(total: &mut [KindState; NFIELD_KINDS], session_fields: &str) -> Result<()> {
    for tok in session_fields.split(',') {
        let tok = tok.trim();
        match tok {
            "ipaddr" => total[FieldKind::Ipaddr as usize].is_session = true,
            "useragent" => total[FieldKind::Useragent as usize].is_session = true,
            _ => errx!("invalid session field: '{}'", tok),
        }
    }
    Ok(())
}

fn apply_overrides(
    total: &mut [KindState; NFIELD_KINDS],
    active: &mut [Option<FieldKind>],
    fvs: &[&[u8]],
    index_fields: &str,
) -> Result<()> {
    for part in index_fields.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, index) = match part.split_once('=') {
            Some((name, index)) => (name.trim(), index.trim()),
            None => errx!("invalid index override: '{}'", part),
        };
        let kind = match FieldKind::from_str(name) {
            Some(kind) => kind,
            None => errx!("unknown field type: '{}'", name),
        };
        let index: usize = match index.parse() {
            Ok(n) => n,
            Err(_) => errx!("invalid index for field '{}': '{}'", name, index),
        };
        if index >= fvs.len() {
            errx!("index for field '{}' out of range: {}", name, index);
        }
        if let Some(prev) = active[index] {
            errx!(
                "cannot re-use field '{}' at index {} for field '{}'",
                prev.as_str(),
                index,
                kind.as_str()
            );
        }
        // The designated column still has to look like what it is
        // claimed to be.
        let re = compile_pattern(kind.pattern())?;
        if !does_match(&re, &fvs[index][..fvs[index].len().min(CLASSIFY_PROBE_MAX)]) {
            errx!(
                "field at index {} does not match field type '{}'",
                index,
                kind.as_str()
            );
        }
        let st = &mut total[kind as usize];
        st.index = Some(index);
        st.is_custom = true;
        active[index] = Some(kind);
    }
    Ok(())
}

fn assemble_scan_plan(total: &[KindState; NFIELD_KINDS]) -> Result<Vec<FieldInfo>> {
    let is_set = |kind: FieldKind| total[kind as usize].index.is_some();
    let mut plan: Vec<FieldInfo> = Vec::new();
    let push = |plan: &mut Vec<FieldInfo>, kind: FieldKind| {
        let st = &total[kind as usize];
        plan.push(FieldInfo {
            kind,
            index: st.index.expect("scan plan members are resolved"),
            nmatches: st.nmatches,
            is_session: st.is_session,
            is_custom: st.is_custom,
        });
    };

    // Timestamp representation.
    if is_set(FieldKind::Rfc3339) {
        push(&mut plan, FieldKind::Rfc3339);
    } else if is_set(FieldKind::Rfc3339NoMs) {
        push(&mut plan, FieldKind::Rfc3339NoMs);
    } else if is_set(FieldKind::Date) && is_set(FieldKind::Time) {
        push(&mut plan, FieldKind::Date);
        push(&mut plan, FieldKind::Time);
    } else {
        errx!("could not find RFC3339 timestamp, nor date and time fields");
    }

    // Session keys; every enabled key must exist.
    if total[FieldKind::Ipaddr as usize].is_session {
        if is_set(FieldKind::Ipaddr) {
            push(&mut plan, FieldKind::Ipaddr);
        } else {
            errx!("could not find IP address field");
        }
    }
    if total[FieldKind::Useragent as usize].is_session {
        if is_set(FieldKind::Useragent) {
            push(&mut plan, FieldKind::Useragent);
        } else {
            errx!("could not find user agent field");
        }
    }

    // Request representation.
    if is_set(FieldKind::Request) {
        push(&mut plan, FieldKind::Request);
    } else if is_set(FieldKind::Method) && is_set(FieldKind::Domain) && is_set(FieldKind::Endpoint)
    {
        push(&mut plan, FieldKind::Method);
        if is_set(FieldKind::Protocol) {
            push(&mut plan, FieldKind::Protocol);
        }
        push(&mut plan, FieldKind::Domain);
        push(&mut plan, FieldKind::Endpoint);
    } else {
        errx!("could not find request, nor method, domain and endpoint fields");
    }

    Ok(plan)
}

#[cfg(test)]
fn plan_kinds(schema: &LineSchema) -> Vec<FieldKind> {
    schema.scan_fields().iter().map(|fi| fi.kind).collect()
}

// This tests:
//  - classification of a combined-log style line with a quoted
//    request and user agent
//  - unknown columns are left out of the plan

#[test]
fn test_infer_combined_log() {
    let log = b"203.0.113.9 - - 2023-10-12T07:33:14.000 \
                \"GET https://api.example.com/v1/users?id=1 HTTP/1.1\" \
                200 \"Mozilla/5.0 (X11; Linux x86_64)\"\n";
    let schema = LineSchema::infer(log, None, "ipaddr,useragent").unwrap();
    assert!(schema.nall_fields() == 7);
    assert!(
        plan_kinds(&schema)
            == vec![
                FieldKind::Rfc3339,
                FieldKind::Ipaddr,
                FieldKind::Useragent,
                FieldKind::Request
            ]
    );
    let indices: Vec<usize> = schema.scan_fields().iter().map(|fi| fi.index).collect();
    assert!(indices == vec![3, 0, 6, 4]);
}

// This tests:
//  - the date+time fallback and the method/domain/endpoint request
//    representation, with the optional protocol column picked up

#[test]
fn test_infer_split_fields() {
    let log = b"2023-10-12 07:33:14 10.0.0.1 GET https example.com /index.html\n";
    let schema = LineSchema::infer(log, None, "ipaddr").unwrap();
    assert!(
        plan_kinds(&schema)
            == vec![
                FieldKind::Date,
                FieldKind::Time,
                FieldKind::Ipaddr,
                FieldKind::Method,
                FieldKind::Protocol,
                FieldKind::Domain,
                FieldKind::Endpoint
            ]
    );

    let log = b"2023-10-12 07:33:14 10.0.0.1 GET example.com /index.html\n";
    let schema = LineSchema::infer(log, None, "ipaddr").unwrap();
    assert!(
        plan_kinds(&schema)
            == vec![
                FieldKind::Date,
                FieldKind::Time,
                FieldKind::Ipaddr,
                FieldKind::Method,
                FieldKind::Domain,
                FieldKind::Endpoint
            ]
    );
}

// This tests:
//  - required fields missing from line 0 are fatal

#[test]
fn test_infer_missing_fields() {
    // No timestamp at all.
    let err = LineSchema::infer(b"10.0.0.1 GET example.com /x\n", None, "ipaddr").unwrap_err();
    assert!(format!("{}", err).contains("RFC3339"));

    // No request representation.
    let err =
        LineSchema::infer(b"2023-10-12 07:33:14 10.0.0.1 200\n", None, "ipaddr").unwrap_err();
    assert!(format!("{}", err).contains("request"));

    // Session key enabled but absent.
    let err = LineSchema::infer(
        b"2023-10-12 07:33:14 GET example.com /x\n",
        None,
        "ipaddr",
    )
    .unwrap_err();
    assert!(format!("{}", err).contains("IP address"));
}

// This tests:
//  - an invalid session field name is rejected

#[test]
fn test_infer_bad_session_field() {
    let err = LineSchema::infer(b"x\n", None, "ipaddr,hostname").unwrap_err();
    assert!(format!("{}", err).contains("hostname"));
}

// This tests:
//  - with two columns matching one kind, the first wins
//  - an `--index` override designates the other column and inference
//    keeps its hands off it

#[test]
fn test_infer_duplicate_kind_and_override() {
    let log = b"2023-10-12T07:33:14 192.168.0.1 10.9.8.7 \"GET http://a.b/c HTTP/1.1\"\n";

    let schema = LineSchema::infer(log, None, "ipaddr").unwrap();
    let ip = schema.scan_fields().iter().find(|fi| fi.kind == FieldKind::Ipaddr).unwrap();
    assert!(ip.index == 1);
    assert!(ip.nmatches == 2);

    let schema = LineSchema::infer(log, Some("ipaddr=2"), "ipaddr").unwrap();
    let ip = schema.scan_fields().iter().find(|fi| fi.kind == FieldKind::Ipaddr).unwrap();
    assert!(ip.index == 2);
    assert!(ip.is_custom);
}

// This tests:
//  - overrides naming a column that does not look like the kind are
//    rejected, as are out-of-range and double-claimed columns and
//    unknown kind names

#[test]
fn test_infer_override_validation() {
    let log = b"2023-10-12T07:33:14 192.168.0.1 10.9.8.7 \"GET http://a.b/c HTTP/1.1\"\n";

    let err = LineSchema::infer(log, Some("ipaddr=0"), "ipaddr").unwrap_err();
    assert!(format!("{}", err).contains("does not match"));

    let err = LineSchema::infer(log, Some("ipaddr=9"), "ipaddr").unwrap_err();
    assert!(format!("{}", err).contains("out of range"));

    let err = LineSchema::infer(log, Some("ipaddr=1,useragent=1"), "ipaddr").unwrap_err();
    assert!(format!("{}", err).contains("re-use"));

    let err = LineSchema::infer(log, Some("sessionid=1"), "ipaddr").unwrap_err();
    assert!(format!("{}", err).contains("unknown field type"));

    let err = LineSchema::infer(log, Some("ipaddr"), "ipaddr").unwrap_err();
    assert!(format!("{}", err).contains("invalid index override"));
}

// This tests:
//  - rfc3339-no-ms is selectable through an override and replaces the
//    inferred rfc3339 representation

#[test]
fn test_infer_no_ms_override() {
    let log = b"2023-10-12T07:33:14 192.168.0.1 \"GET http://a.b/c HTTP/1.1\"\n";
    let schema = LineSchema::infer(log, Some("rfc3339-no-ms=0"), "ipaddr").unwrap();
    assert!(plan_kinds(&schema)[0] == FieldKind::Rfc3339NoMs);
}
